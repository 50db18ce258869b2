//! [`AlarmEngine`] – identity-based alarm dedup with timed expiry.
//!
//! Every poll asks the source for alarms stamped within the rolling
//! [`AlarmPolicy::horizon`].  An alarm is admitted into the active set only if
//! its `_id` has not been seen before; admission starts a one-shot expiry task
//! that removes the alarm after [`AlarmPolicy::display_duration`], whether or
//! not any further polls happen.
//!
//! Seen ids are remembered until their timestamp falls behind the horizon, so
//! an alarm that already expired is not re-admitted by the next overlapping
//! query.
//!
//! A failed poll is logged and skipped.  It never clears the active set and
//! never cancels pending expiry tasks.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use robowatch_middleware::{EventBus, SourceError, TelemetrySource, Topic};
use robowatch_types::{Alarm, Event, EventPayload};
use tokio::task::AbortHandle;
use tracing::{debug, info, instrument, warn};

use crate::tick_gate::TickGate;

const EVENT_SOURCE: &str = "robowatch-engine::alarm_engine";

/// Dedup window and display duration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AlarmPolicy {
    /// How far back each poll looks. Should be at least the poll interval.
    pub horizon: Duration,
    /// How long an admitted alarm stays active.
    pub display_duration: Duration,
}

impl Default for AlarmPolicy {
    fn default() -> Self {
        Self {
            horizon: Duration::from_secs(300),
            display_duration: Duration::from_secs(3),
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Book-keeping
// ────────────────────────────────────────────────────────────────────────────

#[derive(Default)]
struct AlarmBook {
    /// Admission order.
    active: Vec<Alarm>,
    timers: HashMap<String, AbortHandle>,
    /// Every admitted id with its alarm timestamp, for horizon pruning.
    seen: HashMap<String, DateTime<Utc>>,
}

impl AlarmBook {
    fn is_active(&self, alarm_id: &str) -> bool {
        self.active.iter().any(|a| a.id == alarm_id)
    }

    fn forget_older_than(&mut self, cutoff: DateTime<Utc>, returned: &HashSet<&str>) {
        let active: HashSet<String> = self.active.iter().map(|a| a.id.clone()).collect();
        self.seen
            .retain(|id, ts| *ts >= cutoff || returned.contains(id.as_str()) || active.contains(id));
    }

    /// Remove `alarm_id` from the active set. Returns `false` if it was not
    /// active.
    fn take(&mut self, alarm_id: &str) -> bool {
        let before = self.active.len();
        self.active.retain(|a| a.id != alarm_id);
        if let Some(timer) = self.timers.remove(alarm_id) {
            timer.abort();
        }
        self.active.len() != before
    }
}

fn lock(book: &Mutex<AlarmBook>) -> MutexGuard<'_, AlarmBook> {
    book.lock().unwrap_or_else(PoisonError::into_inner)
}

// ────────────────────────────────────────────────────────────────────────────
// AlarmEngine
// ────────────────────────────────────────────────────────────────────────────

/// Owns the active alarm set and its expiry tasks.
///
/// Expiry tasks are spawned on the current Tokio runtime, so polls must run
/// inside one.  Dropping the engine cancels every pending expiry.
pub struct AlarmEngine {
    source: Arc<dyn TelemetrySource>,
    policy: AlarmPolicy,
    book: Arc<Mutex<AlarmBook>>,
    bus: EventBus,
    gate: TickGate,
}

impl AlarmEngine {
    pub fn new(source: Arc<dyn TelemetrySource>, bus: EventBus, policy: AlarmPolicy, max_in_flight: usize) -> Self {
        Self {
            source,
            policy,
            book: Arc::new(Mutex::new(AlarmBook::default())),
            bus,
            gate: TickGate::new(max_in_flight),
        }
    }

    pub fn policy(&self) -> AlarmPolicy {
        self.policy
    }

    /// The alarms currently eligible for display, oldest admission first.
    pub fn active(&self) -> Vec<Alarm> {
        lock(&self.book).active.clone()
    }

    pub fn is_active(&self, alarm_id: &str) -> bool {
        lock(&self.book).is_active(alarm_id)
    }

    /// Poll once and return the newly admitted alarms.  Failures are logged
    /// and yield an empty list.
    pub async fn poll(&self) -> Vec<Alarm> {
        match self.try_poll().await {
            Ok(admitted) => admitted,
            Err(e) => {
                warn!(error = %e, "alarm poll failed; keeping active set");
                Vec::new()
            }
        }
    }

    /// Timer-driven poll.  Returns `None` without querying the source while
    /// the in-flight limit is reached.
    pub async fn scheduled_poll(&self) -> Option<Vec<Alarm>> {
        let Some(_ticket) = self.gate.try_begin() else {
            debug!("previous alarm poll still running; skipping tick");
            return None;
        };
        Some(self.poll().await)
    }

    /// Poll once, surfacing source errors to the caller.
    #[instrument(name = "alarm_poll", skip(self))]
    pub async fn try_poll(&self) -> Result<Vec<Alarm>, SourceError> {
        let cutoff = horizon_start(Utc::now(), self.policy.horizon);
        let alarms = self.source.alarms_after(cutoff).await?;
        let admitted = self.admit(alarms, cutoff);

        for alarm in &admitted {
            info!(alarm_id = %alarm.id, robot_id = %alarm.robot_id, alarm_type = ?alarm.alarm_type, "alarm admitted");
            self.announce(EventPayload::AlarmAdmitted(alarm.clone()));
        }
        Ok(admitted)
    }

    /// Remove an alarm before its expiry fires.  Returns `false` if it was not
    /// active.
    pub fn dismiss(&self, alarm_id: &str) -> bool {
        let removed = lock(&self.book).take(alarm_id);
        if removed {
            debug!(%alarm_id, "alarm dismissed");
            self.announce(EventPayload::AlarmDismissed {
                alarm_id: alarm_id.to_string(),
            });
        }
        removed
    }

    fn admit(&self, alarms: Vec<Alarm>, cutoff: DateTime<Utc>) -> Vec<Alarm> {
        let mut book = lock(&self.book);

        let returned: HashSet<&str> = alarms.iter().map(|a| a.id.as_str()).collect();
        book.forget_older_than(cutoff, &returned);

        let mut admitted = Vec::new();
        for alarm in &alarms {
            if book.seen.contains_key(&alarm.id) || book.is_active(&alarm.id) {
                continue;
            }
            book.seen.insert(alarm.id.clone(), alarm.timestamp);
            book.active.push(alarm.clone());
            let timer = self.spawn_expiry(alarm.id.clone());
            book.timers.insert(alarm.id.clone(), timer);
            admitted.push(alarm.clone());
        }
        admitted
    }

    fn spawn_expiry(&self, alarm_id: String) -> AbortHandle {
        let book = Arc::clone(&self.book);
        let bus = self.bus.clone();
        let display = self.policy.display_duration;

        tokio::spawn(async move {
            tokio::time::sleep(display).await;
            let expired = {
                let mut book = lock(&book);
                // Already removed by dismissal if absent.
                book.timers.remove(&alarm_id);
                let before = book.active.len();
                book.active.retain(|a| a.id != alarm_id);
                book.active.len() != before
            };
            if expired {
                debug!(%alarm_id, "alarm expired");
                let _ = bus.publish_to(
                    Topic::Alarms,
                    Event::new(EVENT_SOURCE, EventPayload::AlarmExpired { alarm_id }),
                );
            }
        })
        .abort_handle()
    }

    fn announce(&self, payload: EventPayload) {
        // Best-effort publish – no subscribers is not an error.
        let _ = self.bus.publish_to(Topic::Alarms, Event::new(EVENT_SOURCE, payload));
    }
}

impl Drop for AlarmEngine {
    fn drop(&mut self) {
        for (_, timer) in lock(&self.book).timers.drain() {
            timer.abort();
        }
    }
}

/// `now - horizon`, saturating at the earliest representable instant.
fn horizon_start(now: DateTime<Utc>, horizon: Duration) -> DateTime<Utc> {
    TimeDelta::from_std(horizon)
        .ok()
        .and_then(|h| now.checked_sub_signed(h))
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

#[cfg(test)]
mod tests {
    use super::*;
    use robowatch_middleware::SimSource;
    use robowatch_types::AlarmType;

    fn alarm(id: &str, age: TimeDelta) -> Alarm {
        Alarm {
            id: id.into(),
            robot_id: "R1".into(),
            timestamp: Utc::now() - age,
            alarm_type: AlarmType::LowBattery,
            message: "Low battery: 12.00%".into(),
            temperature: None,
            battery_level: Some(12.0),
        }
    }

    fn engine(sim: &Arc<SimSource>, display_ms: u64) -> AlarmEngine {
        let policy = AlarmPolicy {
            horizon: Duration::from_secs(300),
            display_duration: Duration::from_millis(display_ms),
        };
        AlarmEngine::new(Arc::clone(sim) as Arc<dyn TelemetrySource>, EventBus::default(), policy, 1)
    }

    #[test]
    fn default_policy_matches_dashboard_timings() {
        let policy = AlarmPolicy::default();
        assert_eq!(policy.horizon, Duration::from_secs(300));
        assert_eq!(policy.display_duration, Duration::from_secs(3));
    }

    #[test]
    fn horizon_start_saturates() {
        let now = Utc::now();
        assert_eq!(horizon_start(now, Duration::from_secs(60)), now - TimeDelta::seconds(60));
        assert_eq!(horizon_start(now, Duration::MAX), DateTime::<Utc>::MIN_UTC);
    }

    #[tokio::test]
    async fn same_alarm_in_consecutive_polls_is_admitted_once() {
        let sim = Arc::new(SimSource::new());
        sim.push_alarm(alarm("A1", TimeDelta::zero()));
        let engine = engine(&sim, 5_000);

        assert_eq!(engine.poll().await.len(), 1);
        assert!(engine.poll().await.is_empty());
        let active = engine.active();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].id, "A1");
    }

    #[tokio::test]
    async fn duplicate_ids_within_one_response_collapse() {
        let sim = Arc::new(SimSource::new());
        sim.push_alarm(alarm("A1", TimeDelta::zero()));
        sim.push_alarm(alarm("A1", TimeDelta::milliseconds(5)));
        sim.push_alarm(alarm("A2", TimeDelta::zero()));
        let engine = engine(&sim, 5_000);

        let admitted = engine.poll().await;
        assert_eq!(admitted.len(), 2);
        assert_eq!(engine.active().len(), 2);
    }

    #[tokio::test]
    async fn admitted_alarm_expires_without_further_polls() {
        let sim = Arc::new(SimSource::new());
        sim.push_alarm(alarm("A1", TimeDelta::zero()));
        let engine = engine(&sim, 50);

        engine.poll().await;
        assert!(engine.is_active("A1"));
        tokio::time::sleep(Duration::from_millis(150)).await;
        assert!(engine.active().is_empty());
    }

    #[tokio::test]
    async fn expired_alarm_is_not_readmitted_within_horizon() {
        let sim = Arc::new(SimSource::new());
        sim.push_alarm(alarm("A1", TimeDelta::zero()));
        let engine = engine(&sim, 30);

        engine.poll().await;
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(engine.poll().await.is_empty());
        assert!(engine.active().is_empty());
    }

    #[tokio::test]
    async fn failed_poll_keeps_active_set_and_timers() {
        let sim = Arc::new(SimSource::new());
        sim.push_alarm(alarm("A1", TimeDelta::zero()));
        let engine = engine(&sim, 150);

        engine.poll().await;
        sim.set_alarm_outage(true);
        assert!(engine.try_poll().await.is_err());
        assert!(engine.poll().await.is_empty());
        assert!(engine.is_active("A1"));

        tokio::time::sleep(Duration::from_millis(300)).await;
        assert!(engine.active().is_empty(), "expiry must still fire after a failed poll");
    }

    #[tokio::test]
    async fn dismiss_removes_and_cancels_expiry() {
        let sim = Arc::new(SimSource::new());
        sim.push_alarm(alarm("A1", TimeDelta::zero()));
        let engine = engine(&sim, 5_000);

        engine.poll().await;
        assert!(engine.dismiss("A1"));
        assert!(!engine.dismiss("A1"));
        assert!(engine.active().is_empty());
        assert!(lock(&engine.book).timers.is_empty());
        assert!(engine.poll().await.is_empty(), "dismissed alarm stays seen");
    }

    #[tokio::test]
    async fn alarms_older_than_horizon_are_not_admitted() {
        let sim = Arc::new(SimSource::new());
        sim.push_alarm(alarm("OLD", TimeDelta::minutes(10)));
        sim.push_alarm(alarm("NEW", TimeDelta::seconds(1)));
        let engine = engine(&sim, 5_000);

        let admitted = engine.poll().await;
        assert_eq!(admitted.len(), 1);
        assert_eq!(admitted[0].id, "NEW");
    }

    #[tokio::test]
    async fn seen_ids_are_forgotten_once_behind_the_horizon() {
        let sim = Arc::new(SimSource::new());
        sim.push_alarm(alarm("A1", TimeDelta::zero()));
        let policy = AlarmPolicy {
            horizon: Duration::from_millis(200),
            display_duration: Duration::from_millis(20),
        };
        let engine = AlarmEngine::new(sim as Arc<dyn TelemetrySource>, EventBus::default(), policy, 1);

        engine.poll().await;
        assert_eq!(lock(&engine.book).seen.len(), 1);
        tokio::time::sleep(Duration::from_millis(300)).await;
        engine.poll().await;
        assert!(lock(&engine.book).seen.is_empty());
    }

    #[tokio::test]
    async fn lifecycle_is_announced_on_the_bus() {
        let sim = Arc::new(SimSource::new());
        sim.push_alarm(alarm("A1", TimeDelta::zero()));
        let bus = EventBus::default();
        let mut alarms = bus.subscribe_to(Topic::Alarms);
        let policy = AlarmPolicy {
            display_duration: Duration::from_millis(20),
            ..AlarmPolicy::default()
        };
        let engine = AlarmEngine::new(sim as Arc<dyn TelemetrySource>, bus, policy, 1);

        engine.poll().await;
        let admitted = alarms.recv().await.unwrap();
        assert!(matches!(admitted.payload, EventPayload::AlarmAdmitted(ref a) if a.id == "A1"));

        let expired = alarms.recv().await.unwrap();
        assert!(matches!(expired.payload, EventPayload::AlarmExpired { ref alarm_id } if alarm_id == "A1"));
    }

    #[tokio::test]
    async fn scheduled_poll_skips_while_previous_in_flight() {
        let sim = Arc::new(SimSource::new());
        let engine = engine(&sim, 5_000);
        let _held = engine.gate.try_begin().unwrap();
        assert!(engine.scheduled_poll().await.is_none());
    }
}
