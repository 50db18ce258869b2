//! The source contracts.
//!
//! The monitor never speaks HTTP directly.  It reads through a
//! [`TelemetrySource`] and writes through a [`RegistryWriter`]; concrete
//! adapters translate those calls into the outside world's protocol.
//!
//! - [`HttpSource`][crate::http_source::HttpSource] – the REST backend.
//! - [`SimSource`][crate::sim_source::SimSource] – an in-process fleet for
//!   tests and offline demos.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use robowatch_types::{Alarm, AlarmPage, NewRobot, OperationState, Robot, RobotUpdate, TelemetrySample};
use thiserror::Error;

/// Errors that can arise while talking to a source.
#[derive(Error, Debug)]
pub enum SourceError {
    /// The request could not be sent or its body could not be read.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    /// The source answered with a non-success status. `body` is verbatim.
    #[error("{endpoint} returned HTTP {status}: {body}")]
    Rejected {
        endpoint: String,
        status: u16,
        body: String,
    },
    /// The response body did not have the expected shape.
    #[error("Unexpected response format: {0}")]
    BadResponse(String),
    /// The source is unreachable (used by in-process sources).
    #[error("Source unavailable: {0}")]
    Unavailable(String),
}

/// Read side: the registry, per-robot telemetry, and alarms.
#[async_trait]
pub trait TelemetrySource: Send + Sync {
    /// Every registered robot, in registry order.
    async fn list_robots(&self) -> Result<Vec<Robot>, SourceError>;

    /// The most recent sample for `robot_id`, or `None` when it has never
    /// reported.
    async fn latest_telemetry(&self, robot_id: &str) -> Result<Option<TelemetrySample>, SourceError>;

    /// Alarms whose timestamp is at or after `after`.
    async fn alarms_after(&self, after: DateTime<Utc>) -> Result<Vec<Alarm>, SourceError>;

    /// One page of the full alarm history, newest first. `page` is 1-based.
    async fn alarm_page(&self, page: u32, per_page: u32) -> Result<AlarmPage, SourceError>;
}

/// Write side: registry mutations. Each call is a single remote write.
#[async_trait]
pub trait RegistryWriter: Send + Sync {
    async fn add_robot(&self, robot: &NewRobot) -> Result<(), SourceError>;

    async fn update_robot(&self, robot_id: &str, update: &RobotUpdate) -> Result<(), SourceError>;

    async fn update_operation_state(&self, robot_id: &str, state: OperationState) -> Result<(), SourceError>;

    async fn remove_robot(&self, robot_id: &str) -> Result<(), SourceError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejected_error_keeps_body_verbatim() {
        let err = SourceError::Rejected {
            endpoint: "robots/add/".into(),
            status: 400,
            body: r#"{"error":"robot exists"}"#.into(),
        };
        let text = err.to_string();
        assert!(text.contains("400"));
        assert!(text.contains(r#"{"error":"robot exists"}"#));
    }
}
