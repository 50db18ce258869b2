//! [`FleetMonitor`] – wires the engines together and drives their timers.
//!
//! Two independent periodic timers run the [`FleetReconciler`] and the
//! [`AlarmEngine`].  Neither timer waits for its tick to finish: each beat is
//! spawned, and the engines' tick gates decide whether it actually runs.  The
//! [`CommandDispatcher`] shares the reconciler so successful writes refresh
//! the snapshot out of band.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use robowatch_engine::monitor::{FleetMonitor, MonitorConfig};
//! use robowatch_middleware::SimSource;
//!
//! # async fn demo() {
//! let sim = Arc::new(SimSource::new());
//! let monitor = FleetMonitor::new(sim.clone(), sim, MonitorConfig::default());
//! let handle = monitor.start();
//! // ... read monitor.reconciler().snapshot() and monitor.alarms().active()
//! drop(handle);
//! # }
//! ```

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use robowatch_middleware::{EventBus, RegistryWriter, TelemetrySource};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::MissedTickBehavior;
use tracing::{info, warn};

use crate::alarm_engine::{AlarmEngine, AlarmPolicy};
use crate::dispatcher::CommandDispatcher;
use crate::reconciler::FleetReconciler;

// ─────────────────────────────────────────────────────────────────────────────
// Configuration
// ─────────────────────────────────────────────────────────────────────────────

/// Timing configuration for [`FleetMonitor`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MonitorConfig {
    /// Period of the fleet reconciliation timer.
    pub reconcile_interval: Duration,
    /// Period of the alarm poll timer.
    pub alarm_poll_interval: Duration,
    pub alarm_policy: AlarmPolicy,
    /// Scheduled ticks allowed in flight per timer. A beat is skipped when the
    /// limit is reached.
    pub max_in_flight_ticks: usize,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            reconcile_interval: Duration::from_secs(2),
            alarm_poll_interval: Duration::from_secs(2),
            alarm_policy: AlarmPolicy::default(),
            max_in_flight_ticks: 1,
        }
    }
}

impl MonitorConfig {
    /// Raise the alarm horizon to the poll interval if it is shorter, so
    /// consecutive polls leave no gap.
    fn normalized(mut self) -> Self {
        if self.alarm_policy.horizon < self.alarm_poll_interval {
            warn!(
                horizon_ms = self.alarm_policy.horizon.as_millis() as u64,
                poll_ms = self.alarm_poll_interval.as_millis() as u64,
                "alarm horizon shorter than poll interval; raising it"
            );
            self.alarm_policy.horizon = self.alarm_poll_interval;
        }
        self
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// FleetMonitor
// ─────────────────────────────────────────────────────────────────────────────

pub struct FleetMonitor {
    reconciler: Arc<FleetReconciler>,
    alarms: Arc<AlarmEngine>,
    dispatcher: Arc<CommandDispatcher>,
    bus: EventBus,
    config: MonitorConfig,
}

impl FleetMonitor {
    pub fn new(source: Arc<dyn TelemetrySource>, writer: Arc<dyn RegistryWriter>, config: MonitorConfig) -> Self {
        let config = config.normalized();
        let bus = EventBus::default();
        let reconciler = Arc::new(FleetReconciler::new(
            Arc::clone(&source),
            bus.clone(),
            config.max_in_flight_ticks,
        ));
        let alarms = Arc::new(AlarmEngine::new(
            source,
            bus.clone(),
            config.alarm_policy,
            config.max_in_flight_ticks,
        ));
        let dispatcher = Arc::new(CommandDispatcher::new(writer, Arc::clone(&reconciler), bus.clone()));
        Self {
            reconciler,
            alarms,
            dispatcher,
            bus,
            config,
        }
    }

    pub fn reconciler(&self) -> Arc<FleetReconciler> {
        Arc::clone(&self.reconciler)
    }

    pub fn alarms(&self) -> Arc<AlarmEngine> {
        Arc::clone(&self.alarms)
    }

    pub fn dispatcher(&self) -> Arc<CommandDispatcher> {
        Arc::clone(&self.dispatcher)
    }

    /// The bus carrying fleet, alarm and command events.
    pub fn bus(&self) -> EventBus {
        self.bus.clone()
    }

    pub fn config(&self) -> MonitorConfig {
        self.config
    }

    /// Start both timers on the current Tokio runtime.
    ///
    /// # Panics
    ///
    /// Panics if called outside a Tokio runtime.
    pub fn start(&self) -> MonitorHandle {
        info!(
            reconcile_ms = self.config.reconcile_interval.as_millis() as u64,
            alarm_poll_ms = self.config.alarm_poll_interval.as_millis() as u64,
            "fleet monitor starting"
        );

        let reconciler = Arc::clone(&self.reconciler);
        let fleet = spawn_periodic(self.config.reconcile_interval, move || {
            let reconciler = Arc::clone(&reconciler);
            async move {
                reconciler.scheduled_tick().await;
            }
        });

        let alarms = Arc::clone(&self.alarms);
        let alarm = spawn_periodic(self.config.alarm_poll_interval, move || {
            let alarms = Arc::clone(&alarms);
            async move {
                alarms.scheduled_poll().await;
            }
        });

        MonitorHandle {
            tasks: vec![fleet, alarm],
        }
    }
}

/// Run `tick` every `period` without waiting for the previous beat.
///
/// Beats still running when the timer task is aborted are aborted with it.
fn spawn_periodic<F, Fut>(period: Duration, mut tick: F) -> JoinHandle<()>
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period.max(Duration::from_millis(1)));
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut beats = JoinSet::new();
        loop {
            interval.tick().await;
            while beats.try_join_next().is_some() {}
            beats.spawn(tick());
        }
    })
}

// ─────────────────────────────────────────────────────────────────────────────
// MonitorHandle
// ─────────────────────────────────────────────────────────────────────────────

/// Keeps the monitor timers alive. Dropping it stops them.
pub struct MonitorHandle {
    tasks: Vec<JoinHandle<()>>,
}

impl MonitorHandle {
    pub fn stop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
        info!("fleet monitor stopped");
    }

    pub fn is_running(&self) -> bool {
        self.tasks.iter().any(|t| !t.is_finished())
    }
}

impl Drop for MonitorHandle {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use robowatch_middleware::SimSource;
    use robowatch_types::{AlarmType, OperationState, Robot};

    fn fast_config() -> MonitorConfig {
        MonitorConfig {
            reconcile_interval: Duration::from_millis(20),
            alarm_poll_interval: Duration::from_millis(20),
            alarm_policy: AlarmPolicy {
                horizon: Duration::from_secs(60),
                display_duration: Duration::from_millis(500),
            },
            max_in_flight_ticks: 1,
        }
    }

    #[test]
    fn short_horizon_is_raised_to_poll_interval() {
        let sim = Arc::new(SimSource::new());
        let config = MonitorConfig {
            alarm_poll_interval: Duration::from_secs(10),
            alarm_policy: AlarmPolicy {
                horizon: Duration::from_secs(1),
                ..AlarmPolicy::default()
            },
            ..MonitorConfig::default()
        };
        let monitor = FleetMonitor::new(sim.clone(), sim, config);
        assert_eq!(monitor.config().alarm_policy.horizon, Duration::from_secs(10));
        assert_eq!(monitor.alarms().policy().horizon, Duration::from_secs(10));
    }

    #[tokio::test]
    async fn timers_drive_reconciliation_and_alarm_polls() {
        let sim = Arc::new(SimSource::new().with_robot(Robot::new("R1", OperationState::Running)));
        let monitor = FleetMonitor::new(sim.clone(), sim.clone(), fast_config());
        let mut handle = monitor.start();
        assert!(handle.is_running());

        tokio::time::sleep(Duration::from_millis(100)).await;
        let snapshot = monitor.reconciler().snapshot();
        assert_eq!(snapshot.robots.len(), 1);
        assert!(snapshot.sequence >= 1);

        let alarm = sim.raise_alarm("R1", AlarmType::HighTemperature, "High temperature: 80.00°C");
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(monitor.alarms().is_active(&alarm.id));

        handle.stop();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!handle.is_running());
    }

    #[tokio::test]
    async fn dispatcher_shares_the_reconciler() {
        let sim = Arc::new(SimSource::new());
        let monitor = FleetMonitor::new(sim.clone(), sim, MonitorConfig::default());
        monitor.dispatcher().add_robot("R7", "palletizer").await.unwrap();
        assert!(monitor.reconciler().snapshot().robot("R7").is_some());
    }
}
