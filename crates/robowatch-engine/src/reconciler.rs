//! [`FleetReconciler`] – keeps the fleet snapshot in step with the backend.
//!
//! Each tick:
//!
//! 1. **Registry** – fetch every registered robot.  If this fails the tick is
//!    abandoned and the last published snapshot stays in place.
//! 2. **Telemetry** – fetch the latest sample of every robot concurrently.
//!    A failed or missing sample only affects its own robot, which falls back
//!    to zero-valued telemetry.
//! 3. **Join** – [`merge_fleet`] builds one [`RobotView`] per robot in
//!    registry order.  The step-1 registry is authoritative for membership.
//! 4. **Publish** – the snapshot replaces the previous one in a single
//!    `watch` update, unless a newer tick already published.
//!
//! Consumers read through [`FleetReconciler::snapshot`] or
//! [`FleetReconciler::subscribe`]; they never observe a partial list.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures_util::future::join_all;
use robowatch_middleware::{EventBus, TelemetrySource, Topic};
use robowatch_types::{Event, EventPayload, Robot, RobotView, TelemetrySample};
use tokio::sync::watch;
use tracing::{debug, instrument, warn};

use crate::tick_gate::{TickGate, TickTicket};

const EVENT_SOURCE: &str = "robowatch-engine::reconciler";

/// An immutable, fully reconciled view of the fleet.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FleetSnapshot {
    /// Sequence number of the tick that produced this snapshot (0 = never).
    pub sequence: u64,
    pub robots: Vec<RobotView>,
    pub refreshed_at: Option<DateTime<Utc>>,
}

impl FleetSnapshot {
    pub fn robot(&self, robot_id: &str) -> Option<&RobotView> {
        self.robots.iter().find(|r| r.robot_id == robot_id)
    }
}

/// Join the registry with per-robot samples.
///
/// `samples[i]` belongs to `robots[i]`; a missing entry reads as "no sample".
pub fn merge_fleet(robots: &[Robot], samples: &[Option<TelemetrySample>]) -> Vec<RobotView> {
    robots
        .iter()
        .enumerate()
        .map(|(i, robot)| RobotView::join(robot, samples.get(i).and_then(Option::as_ref)))
        .collect()
}

/// Periodically rebuilds the fleet snapshot from a [`TelemetrySource`].
pub struct FleetReconciler {
    source: Arc<dyn TelemetrySource>,
    gate: TickGate,
    snapshot: watch::Sender<FleetSnapshot>,
    bus: EventBus,
}

impl FleetReconciler {
    /// `max_in_flight` bounds concurrently running scheduled ticks.
    pub fn new(source: Arc<dyn TelemetrySource>, bus: EventBus, max_in_flight: usize) -> Self {
        let (snapshot, _) = watch::channel(FleetSnapshot::default());
        Self {
            source,
            gate: TickGate::new(max_in_flight),
            snapshot,
            bus,
        }
    }

    /// The most recently published snapshot.
    pub fn snapshot(&self) -> FleetSnapshot {
        self.snapshot.borrow().clone()
    }

    /// A receiver notified whenever a new snapshot is published.
    pub fn subscribe(&self) -> watch::Receiver<FleetSnapshot> {
        self.snapshot.subscribe()
    }

    /// Run one tick immediately, regardless of ticks already in flight.
    ///
    /// Returns the snapshot that is current once the tick completes: the new
    /// one, or the previous one if the registry fetch failed or a newer tick
    /// won the race.
    pub async fn reconcile(&self) -> FleetSnapshot {
        let ticket = self.gate.begin();
        self.run(ticket).await
    }

    /// Run one timer-driven tick, or return `None` without touching the
    /// backend when the in-flight limit is reached.
    pub async fn scheduled_tick(&self) -> Option<FleetSnapshot> {
        let Some(ticket) = self.gate.try_begin() else {
            debug!(in_flight = self.gate.in_flight(), "previous reconciliation still running; skipping tick");
            return None;
        };
        Some(self.run(ticket).await)
    }

    #[instrument(name = "reconcile", skip_all, fields(sequence = ticket.sequence()))]
    async fn run(&self, ticket: TickTicket) -> FleetSnapshot {
        let robots = match self.source.list_robots().await {
            Ok(robots) => robots,
            Err(e) => {
                warn!(error = %e, "registry fetch failed; keeping last snapshot");
                return self.snapshot();
            }
        };

        let samples = join_all(robots.iter().map(|robot| self.fetch_sample(&robot.robot_id))).await;

        self.publish(FleetSnapshot {
            sequence: ticket.sequence(),
            robots: merge_fleet(&robots, &samples),
            refreshed_at: Some(Utc::now()),
        })
    }

    async fn fetch_sample(&self, robot_id: &str) -> Option<TelemetrySample> {
        match self.source.latest_telemetry(robot_id).await {
            Ok(sample) => sample,
            Err(e) => {
                warn!(%robot_id, error = %e, "telemetry fetch failed; using defaults");
                None
            }
        }
    }

    fn publish(&self, candidate: FleetSnapshot) -> FleetSnapshot {
        let sequence = candidate.sequence;
        let robot_count = candidate.robots.len();

        let published = self.snapshot.send_if_modified(|current| {
            if sequence > current.sequence {
                *current = candidate;
                true
            } else {
                false
            }
        });

        if published {
            debug!(sequence, robot_count, "fleet snapshot published");
            let event = Event::new(EVENT_SOURCE, EventPayload::FleetRefreshed { sequence, robot_count });
            // Best-effort publish – no subscribers is not an error.
            let _ = self.bus.publish_to(Topic::Fleet, event);
        } else {
            debug!(sequence, current = self.snapshot.borrow().sequence, "discarding stale tick");
        }
        self.snapshot()
    }
}
