//! `robowatch-engine` – fleet synchronisation and alarm lifecycle.
//!
//! Keeps a local view of the fleet in step with two independently polled
//! sources (the robot registry and per-robot telemetry) and manages a
//! de-duplicated, self-expiring set of active alarms.
//!
//! # Modules
//!
//! - [`reconciler`] – [`FleetReconciler`]: rebuilds the fleet snapshot on
//!   every tick through the pure [`merge_fleet`] join, publishing it
//!   atomically and discarding completions older than the published one.
//! - [`alarm_engine`] – [`AlarmEngine`]: admits each alarm `_id` at most once
//!   per horizon and removes it again after the display duration.
//! - [`dispatcher`] – [`CommandDispatcher`]: registry writes, each followed by
//!   an out-of-band reconciliation.
//! - [`tick_gate`] – [`TickGate`][tick_gate::TickGate]: tick sequencing and the
//!   bound on scheduled ticks in flight.
//! - [`monitor`] – [`FleetMonitor`]: owns the engines and their two timers.
//! - [`telemetry`] – [`init_tracing`][telemetry::init_tracing]: the global
//!   `tracing` subscriber with optional OTLP export.

pub mod alarm_engine;
pub mod dispatcher;
pub mod monitor;
pub mod reconciler;
pub mod telemetry;
pub mod tick_gate;

pub use alarm_engine::{AlarmEngine, AlarmPolicy};
pub use dispatcher::{CommandDispatcher, CommandError, RobotCommand};
pub use monitor::{FleetMonitor, MonitorConfig, MonitorHandle};
pub use reconciler::{FleetReconciler, FleetSnapshot, merge_fleet};
pub use telemetry::{TracerProviderGuard, init_tracing};
