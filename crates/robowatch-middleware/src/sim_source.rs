//! In-process fleet simulation for tests and offline demos.
//!
//! [`SimSource`] keeps a registry, per-robot telemetry and an alarm log in
//! memory and implements both [`TelemetrySource`] and [`RegistryWriter`], so
//! the full monitor can run without the REST backend.  Each call to
//! [`SimSource::advance`] moves every robot one step and raises alarms when a
//! reading crosses a limit:
//!
//! | Reading | Limit | Alarm type |
//! |---|---|---|
//! | temperature | > 75 °C | `high_temperature` |
//! | battery level | < 15 % | `low_battery` |
//! | speed | > 45 m/s | `high_speed` (read as [`AlarmType::Other`]) |
//! | operation state | `error` | `system_error` |
//!
//! Outages, rejected writes and slow responses can be injected.
//!
//! # Example
//!
//! ```rust
//! use robowatch_middleware::sim_source::SimSource;
//! use robowatch_types::{OperationState, Robot};
//!
//! let sim = SimSource::new()
//!     .with_robot(Robot::new("R1", OperationState::Running))
//!     .with_robot(Robot::new("R2", OperationState::Idle));
//! sim.advance();
//! assert_eq!(sim.robot_count(), 2);
//! ```

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use robowatch_types::{
    Alarm, AlarmPage, AlarmType, NewRobot, OperationState, Position, Robot, RobotUpdate, TelemetrySample,
};

use crate::source::{RegistryWriter, SourceError, TelemetrySource};

const HIGH_TEMPERATURE: f64 = 75.0;
const LOW_BATTERY: f64 = 15.0;
const HIGH_SPEED: f64 = 45.0;

// ────────────────────────────────────────────────────────────────────────────
// State
// ────────────────────────────────────────────────────────────────────────────

#[derive(Default)]
struct SimState {
    robots: Vec<Robot>,
    telemetry: HashMap<String, TelemetrySample>,
    alarms: Vec<Alarm>,
    /// Conditions currently raised, so an alarm fires once per excursion.
    raised: HashSet<(String, AlarmType)>,
    next_alarm: u64,
    step: u64,
    registry_outage: bool,
    alarm_outage: bool,
    failing_telemetry: HashSet<String>,
    write_rejection: Option<String>,
    registry_delays: VecDeque<Duration>,
    telemetry_delay: Option<Duration>,
    registry_calls: usize,
}

impl SimState {
    fn raise(&mut self, robot_id: &str, alarm_type: AlarmType, message: String, sample: &TelemetrySample) -> Alarm {
        self.next_alarm += 1;
        let alarm = Alarm {
            id: format!("sim-{:06}", self.next_alarm),
            robot_id: robot_id.to_string(),
            timestamp: Utc::now(),
            alarm_type,
            message,
            temperature: Some(sample.temperature),
            battery_level: Some(sample.battery_level),
        };
        self.alarms.push(alarm.clone());
        alarm
    }

    /// Raise `alarm_type` when `active` turns true; re-arm when it clears.
    fn edge(
        &mut self,
        robot_id: &str,
        alarm_type: AlarmType,
        active: bool,
        message: impl FnOnce() -> String,
        sample: &TelemetrySample,
    ) {
        let key = (robot_id.to_string(), alarm_type);
        if active {
            if self.raised.insert(key) {
                self.raise(robot_id, alarm_type, message(), sample);
            }
        } else {
            self.raised.remove(&key);
        }
    }

    fn find_robot(&mut self, robot_id: &str) -> Result<&mut Robot, SourceError> {
        self.robots
            .iter_mut()
            .find(|r| r.robot_id == robot_id)
            .ok_or_else(|| not_found(robot_id))
    }

    fn check_writable(&self, endpoint: &str) -> Result<(), SourceError> {
        match &self.write_rejection {
            Some(body) => Err(SourceError::Rejected {
                endpoint: endpoint.to_string(),
                status: 500,
                body: body.clone(),
            }),
            None => Ok(()),
        }
    }
}

fn not_found(robot_id: &str) -> SourceError {
    SourceError::Rejected {
        endpoint: format!("robots/{robot_id}/"),
        status: 404,
        body: r#"{"error":"Robot not found"}"#.to_string(),
    }
}

/// Advance one robot's telemetry by one simulation step.
fn drift(previous: Option<&TelemetrySample>, robot: &Robot, step: u64) -> TelemetrySample {
    let mut sample = previous.cloned().unwrap_or_else(|| TelemetrySample {
        robot_id: robot.robot_id.clone(),
        position: Position::new(10.0, 10.0, 0.0),
        temperature: 40.0,
        battery_level: 100.0,
        ..TelemetrySample::default()
    });

    match robot.operation_state {
        OperationState::Running => {
            sample.speed = 20.0 + ((step * 7) % 30) as f64;
            sample.temperature += 1.5;
            sample.battery_level -= 2.0;
            sample.motor_status = "running".to_string();
        }
        OperationState::Idle => {
            sample.speed = 0.0;
            sample.temperature -= 1.0;
            sample.battery_level -= 0.1;
            sample.motor_status = "idle".to_string();
        }
        OperationState::Maintenance => {
            sample.speed = 0.0;
            sample.temperature -= 2.0;
            sample.battery_level += 5.0;
            sample.motor_status = "stopped".to_string();
        }
        OperationState::Error => {
            sample.speed = 0.0;
            sample.motor_status = "error".to_string();
        }
    }

    sample.temperature = sample.temperature.clamp(20.0, 90.0);
    sample.battery_level = sample.battery_level.clamp(0.0, 100.0);
    sample.position.x += sample.speed * 0.1;
    sample.timestamp = Some(Utc::now());
    sample
}

// ────────────────────────────────────────────────────────────────────────────
// SimSource
// ────────────────────────────────────────────────────────────────────────────

/// An in-memory fleet backend.
#[derive(Default)]
pub struct SimSource {
    state: Mutex<SimState>,
}

impl SimSource {
    /// Create an empty simulated fleet.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a robot (builder-style).
    pub fn with_robot(self, robot: Robot) -> Self {
        self.lock().robots.push(robot);
        self
    }

    /// Seed the latest sample for a robot (builder-style).
    pub fn with_telemetry(self, sample: TelemetrySample) -> Self {
        self.set_telemetry(sample);
        self
    }

    /// Replace the latest sample for `sample.robot_id`.
    pub fn set_telemetry(&self, sample: TelemetrySample) {
        self.lock().telemetry.insert(sample.robot_id.clone(), sample);
    }

    /// Register a robot after construction, bypassing write validation.
    pub fn insert_robot(&self, robot: Robot) {
        self.lock().robots.push(robot);
    }

    /// Append an alarm to the log verbatim.
    pub fn push_alarm(&self, alarm: Alarm) {
        self.lock().alarms.push(alarm);
    }

    /// Append a freshly timestamped alarm and return it.
    pub fn raise_alarm(&self, robot_id: &str, alarm_type: AlarmType, message: &str) -> Alarm {
        let mut state = self.lock();
        let sample = state.telemetry.get(robot_id).cloned().unwrap_or_default();
        state.raise(robot_id, alarm_type, message.to_string(), &sample)
    }

    /// Make registry reads fail until cleared.
    pub fn set_registry_outage(&self, down: bool) {
        self.lock().registry_outage = down;
    }

    /// Make alarm reads fail until cleared.
    pub fn set_alarm_outage(&self, down: bool) {
        self.lock().alarm_outage = down;
    }

    /// Make telemetry reads for `robot_id` fail.
    pub fn fail_telemetry_for(&self, robot_id: &str) {
        self.lock().failing_telemetry.insert(robot_id.to_string());
    }

    /// Reject every write with `body` until cleared with `None`.
    pub fn set_write_rejection(&self, body: Option<&str>) {
        self.lock().write_rejection = body.map(str::to_string);
    }

    /// Delay the next registry read by `delay`. Queued delays are consumed
    /// one per call.
    pub fn queue_registry_delay(&self, delay: Duration) {
        self.lock().registry_delays.push_back(delay);
    }

    /// Delay every telemetry read by `delay`.
    pub fn set_telemetry_delay(&self, delay: Option<Duration>) {
        self.lock().telemetry_delay = delay;
    }

    pub fn robot_count(&self) -> usize {
        self.lock().robots.len()
    }

    /// Number of registry reads served so far.
    pub fn registry_calls(&self) -> usize {
        self.lock().registry_calls
    }

    /// Move every robot one step and raise alarms for limit crossings.
    ///
    /// Returns the alarms raised during this step.
    pub fn advance(&self) -> Vec<Alarm> {
        let mut state = self.lock();
        state.step += 1;
        let step = state.step;
        let robots = state.robots.clone();
        let before = state.alarms.len();

        for robot in &robots {
            let sample = drift(state.telemetry.get(&robot.robot_id), robot, step);
            let id = robot.robot_id.as_str();
            state.edge(
                id,
                AlarmType::HighTemperature,
                sample.temperature > HIGH_TEMPERATURE,
                || format!("High temperature: {:.2}°C", sample.temperature),
                &sample,
            );
            state.edge(
                id,
                AlarmType::LowBattery,
                sample.battery_level < LOW_BATTERY,
                || format!("Low battery: {:.2}%", sample.battery_level),
                &sample,
            );
            state.edge(
                id,
                AlarmType::Other,
                sample.speed > HIGH_SPEED,
                || format!("High speed: {:.2} m/s", sample.speed),
                &sample,
            );
            state.edge(
                id,
                AlarmType::SystemError,
                robot.operation_state == OperationState::Error,
                || "Motor fault detected".to_string(),
                &sample,
            );
            state.telemetry.insert(robot.robot_id.clone(), sample);
        }

        state.alarms[before..].to_vec()
    }
}

#[async_trait]
impl TelemetrySource for SimSource {
    async fn list_robots(&self) -> Result<Vec<Robot>, SourceError> {
        let (robots, delay) = {
            let mut state = self.lock();
            state.registry_calls += 1;
            if state.registry_outage {
                return Err(SourceError::Unavailable("simulated registry outage".into()));
            }
            (state.robots.clone(), state.registry_delays.pop_front())
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        Ok(robots)
    }

    async fn latest_telemetry(&self, robot_id: &str) -> Result<Option<TelemetrySample>, SourceError> {
        let (result, delay) = {
            let state = self.lock();
            let result = if state.failing_telemetry.contains(robot_id) {
                Err(SourceError::Unavailable(format!("simulated telemetry failure for {robot_id}")))
            } else {
                Ok(state.telemetry.get(robot_id).cloned())
            };
            (result, state.telemetry_delay)
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        result
    }

    async fn alarms_after(&self, after: DateTime<Utc>) -> Result<Vec<Alarm>, SourceError> {
        let state = self.lock();
        if state.alarm_outage {
            return Err(SourceError::Unavailable("simulated alarm outage".into()));
        }
        let mut alarms: Vec<Alarm> = state
            .alarms
            .iter()
            .filter(|a| a.timestamp >= after)
            .cloned()
            .collect();
        alarms.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        Ok(alarms)
    }

    async fn alarm_page(&self, page: u32, per_page: u32) -> Result<AlarmPage, SourceError> {
        let state = self.lock();
        if state.alarm_outage {
            return Err(SourceError::Unavailable("simulated alarm outage".into()));
        }
        let mut alarms = state.alarms.clone();
        alarms.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        let skip = page.saturating_sub(1) as usize * per_page as usize;
        Ok(AlarmPage {
            total: alarms.len() as u64,
            alarms: alarms.into_iter().skip(skip).take(per_page as usize).collect(),
            page,
            per_page,
        })
    }
}

#[async_trait]
impl RegistryWriter for SimSource {
    async fn add_robot(&self, robot: &NewRobot) -> Result<(), SourceError> {
        let mut state = self.lock();
        state.check_writable("robots/add/")?;
        if state.robots.iter().any(|r| r.robot_id == robot.robot_id) {
            return Err(SourceError::Rejected {
                endpoint: "robots/add/".into(),
                status: 400,
                body: r#"{"error":"A robot with this id already exists"}"#.into(),
            });
        }
        state.robots.push(Robot {
            robot_id: robot.robot_id.clone(),
            description: robot.description.clone(),
            operation_state: OperationState::Idle,
        });
        Ok(())
    }

    async fn update_robot(&self, robot_id: &str, update: &RobotUpdate) -> Result<(), SourceError> {
        let mut state = self.lock();
        state.check_writable(&format!("robots/{robot_id}/"))?;
        let robot = state.find_robot(robot_id)?;
        if let Some(description) = &update.description {
            robot.description = description.clone();
        }
        if let Some(new_id) = &update.robot_id {
            robot.robot_id = new_id.clone();
        }
        Ok(())
    }

    async fn update_operation_state(&self, robot_id: &str, operation_state: OperationState) -> Result<(), SourceError> {
        let mut state = self.lock();
        state.check_writable(&format!("robots/{robot_id}/operation/"))?;
        state.find_robot(robot_id)?.operation_state = operation_state;
        Ok(())
    }

    async fn remove_robot(&self, robot_id: &str) -> Result<(), SourceError> {
        let mut state = self.lock();
        state.check_writable(&format!("robots/{robot_id}/"))?;
        let before = state.robots.len();
        state.robots.retain(|r| r.robot_id != robot_id);
        if state.robots.len() == before {
            return Err(not_found(robot_id));
        }
        // The backend drops the robot's samples and alarms with it.
        state.telemetry.remove(robot_id);
        state.alarms.retain(|a| a.robot_id != robot_id);
        state.raised.retain(|(id, _)| id != robot_id);
        Ok(())
    }
}
