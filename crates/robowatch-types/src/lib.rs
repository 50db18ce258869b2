//! `robowatch-types` – shared domain model for the fleet monitor.
//!
//! Registry records, telemetry samples, the derived [`RobotView`], alarms and
//! the event envelope routed over the internal bus.

pub mod wire;

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Motor status shown for a robot that has not reported any telemetry yet.
pub const DEFAULT_MOTOR_STATUS: &str = "idle";

// ─────────────────────────────────────────────────────────────────────────────
// Registry
// ─────────────────────────────────────────────────────────────────────────────

/// Operator-controlled operating state of a robot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationState {
    Running,
    /// Newly registered robots start idle.
    #[default]
    Idle,
    Maintenance,
    Error,
}

impl OperationState {
    pub const ALL: [OperationState; 4] = [
        OperationState::Running,
        OperationState::Idle,
        OperationState::Maintenance,
        OperationState::Error,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            OperationState::Running => "running",
            OperationState::Idle => "idle",
            OperationState::Maintenance => "maintenance",
            OperationState::Error => "error",
        }
    }
}

impl fmt::Display for OperationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OperationState {
    type Err = WatchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|state| state.as_str() == wanted)
            .ok_or_else(|| WatchError::InvalidOperationState(s.to_string()))
    }
}

/// A registry record. Owned by the remote registry; the monitor only caches it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Robot {
    pub robot_id: String,
    #[serde(default, deserialize_with = "wire::null_as_default")]
    pub description: String,
    #[serde(default, deserialize_with = "wire::null_as_default")]
    pub operation_state: OperationState,
}

impl Robot {
    pub fn new(robot_id: impl Into<String>, operation_state: OperationState) -> Self {
        Self {
            robot_id: robot_id.into(),
            description: String::new(),
            operation_state,
        }
    }
}

/// Body of a registry `add` request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewRobot {
    pub robot_id: String,
    pub description: String,
}

/// Body of a registry `update` request. Absent fields are left untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RobotUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub robot_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Body of an operation-state update.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OperationUpdate {
    pub operation_state: OperationState,
}

/// Reject blank robot identifiers before they reach the registry.
pub fn validate_robot_id(robot_id: &str) -> Result<&str, WatchError> {
    let trimmed = robot_id.trim();
    if trimmed.is_empty() {
        return Err(WatchError::InvalidRobotId(robot_id.to_string()));
    }
    Ok(trimmed)
}

// ─────────────────────────────────────────────────────────────────────────────
// Telemetry
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Position {
    #[serde(default, deserialize_with = "wire::null_as_default")]
    pub x: f64,
    #[serde(default, deserialize_with = "wire::null_as_default")]
    pub y: f64,
    #[serde(default, deserialize_with = "wire::null_as_default")]
    pub z: f64,
}

impl Position {
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }
}

/// Latest telemetry reported by one robot. Immutable once fetched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TelemetrySample {
    #[serde(default, deserialize_with = "wire::null_as_default")]
    pub robot_id: String,
    #[serde(default, deserialize_with = "wire::null_as_default")]
    pub position: Position,
    #[serde(default, deserialize_with = "wire::null_as_default")]
    pub speed: f64,
    #[serde(default, deserialize_with = "wire::null_as_default")]
    pub temperature: f64,
    #[serde(default, deserialize_with = "wire::null_as_default")]
    pub battery_level: f64,
    #[serde(default, deserialize_with = "wire::null_as_default")]
    pub motor_status: String,
    #[serde(default, deserialize_with = "wire::optional_timestamp")]
    pub timestamp: Option<DateTime<Utc>>,
}

/// One registry record joined with its most recent telemetry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RobotView {
    pub robot_id: String,
    pub description: String,
    pub operation_state: OperationState,
    pub position: Position,
    pub speed: f64,
    pub temperature: f64,
    pub battery_level: f64,
    pub motor_status: String,
    /// `None` when the robot has never reported.
    pub telemetry_at: Option<DateTime<Utc>>,
}

impl RobotView {
    /// Join a registry record with its latest sample, falling back to
    /// zero-valued telemetry when there is none.
    pub fn join(robot: &Robot, sample: Option<&TelemetrySample>) -> Self {
        let sample = sample.cloned().unwrap_or_default();
        let motor_status = if sample.motor_status.is_empty() {
            DEFAULT_MOTOR_STATUS.to_string()
        } else {
            sample.motor_status
        };
        Self {
            robot_id: robot.robot_id.clone(),
            description: robot.description.clone(),
            operation_state: robot.operation_state,
            position: sample.position,
            speed: sample.speed,
            temperature: sample.temperature,
            battery_level: sample.battery_level,
            motor_status,
            telemetry_at: sample.timestamp,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Alarms
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlarmType {
    SystemError,
    HighTemperature,
    LowBattery,
    /// Anything else the backend emits (e.g. `high_speed`).
    #[serde(other)]
    Other,
}

/// How loudly an alarm should be presented.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum AlarmSeverity {
    Warning,
    Error,
}

/// An alarm raised by the backend. `id` is the sole identity used for dedup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alarm {
    #[serde(rename = "_id")]
    pub id: String,
    pub robot_id: String,
    #[serde(deserialize_with = "wire::timestamp")]
    pub timestamp: DateTime<Utc>,
    pub alarm_type: AlarmType,
    #[serde(default, deserialize_with = "wire::null_as_default")]
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub battery_level: Option<f64>,
}

impl Alarm {
    pub fn severity(&self) -> AlarmSeverity {
        match self.alarm_type {
            AlarmType::SystemError => AlarmSeverity::Error,
            _ => AlarmSeverity::Warning,
        }
    }
}

/// One page of the alarm history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlarmPage {
    pub alarms: Vec<Alarm>,
    pub total: u64,
    pub page: u32,
    pub per_page: u32,
}

// ─────────────────────────────────────────────────────────────────────────────
// Bus events
// ─────────────────────────────────────────────────────────────────────────────

/// Unified event wrapper for the internal event bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    /// e.g. "robowatch-engine::reconciler"
    pub source: String,
    pub payload: EventPayload,
}

impl Event {
    pub fn new(source: impl Into<String>, payload: EventPayload) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            source: source.into(),
            payload,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum EventPayload {
    /// A reconciliation tick published a new snapshot.
    FleetRefreshed { sequence: u64, robot_count: usize },
    AlarmAdmitted(Alarm),
    AlarmExpired { alarm_id: String },
    AlarmDismissed { alarm_id: String },
    CommandApplied { command: String },
    CommandFailed { command: String, message: String },
}

/// Domain errors shared by every crate in the workspace.
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum WatchError {
    #[error("Invalid robot id: {0:?}")]
    InvalidRobotId(String),

    #[error("Invalid operation state: {0:?} (expected running, idle, maintenance or error)")]
    InvalidOperationState(String),

    #[error("Event bus error: {0}")]
    Channel(String),
}
