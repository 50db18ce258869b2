//! [`CommandDispatcher`] – registry writes followed by an immediate refresh.
//!
//! Each [`RobotCommand`] is validated locally, sent as one remote write, and
//! on success followed by an out-of-band reconciliation so the new state is
//! visible without waiting for the next scheduled tick.  A failed write leaves
//! the snapshot untouched and is returned to the caller with the backend's
//! body verbatim.  Nothing is retried.

use std::fmt;
use std::sync::Arc;

use robowatch_middleware::{EventBus, RegistryWriter, SourceError, Topic};
use robowatch_types::{Event, EventPayload, NewRobot, OperationState, RobotUpdate, WatchError, validate_robot_id};
use thiserror::Error;
use tracing::{info, instrument, warn};

use crate::reconciler::{FleetReconciler, FleetSnapshot};

const EVENT_SOURCE: &str = "robowatch-engine::dispatcher";

/// A user intent against the robot registry.
#[derive(Debug, Clone, PartialEq)]
pub enum RobotCommand {
    Add { robot_id: String, description: String },
    UpdateDescription { robot_id: String, description: String },
    UpdateOperationState { robot_id: String, state: OperationState },
    Remove { robot_id: String },
}

impl RobotCommand {
    pub fn robot_id(&self) -> &str {
        match self {
            Self::Add { robot_id, .. }
            | Self::UpdateDescription { robot_id, .. }
            | Self::UpdateOperationState { robot_id, .. }
            | Self::Remove { robot_id } => robot_id,
        }
    }
}

impl fmt::Display for RobotCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Add { robot_id, .. } => write!(f, "add {robot_id}"),
            Self::UpdateDescription { robot_id, .. } => write!(f, "describe {robot_id}"),
            Self::UpdateOperationState { robot_id, state } => write!(f, "set {robot_id} to {state}"),
            Self::Remove { robot_id } => write!(f, "remove {robot_id}"),
        }
    }
}

#[derive(Error, Debug)]
pub enum CommandError {
    /// The command was refused before reaching the backend.
    #[error(transparent)]
    Invalid(#[from] WatchError),
    /// The backend refused the write or could not be reached.
    #[error(transparent)]
    Rejected(#[from] SourceError),
}

/// Sends registry writes and keeps the fleet snapshot current afterwards.
pub struct CommandDispatcher {
    writer: Arc<dyn RegistryWriter>,
    reconciler: Arc<FleetReconciler>,
    bus: EventBus,
}

impl CommandDispatcher {
    pub fn new(writer: Arc<dyn RegistryWriter>, reconciler: Arc<FleetReconciler>, bus: EventBus) -> Self {
        Self { writer, reconciler, bus }
    }

    /// Apply `command` and return the snapshot refreshed after it.
    #[instrument(skip_all, fields(command = %command))]
    pub async fn dispatch(&self, command: RobotCommand) -> Result<FleetSnapshot, CommandError> {
        match self.apply(&command).await {
            Ok(()) => {
                info!("command applied");
                self.announce(EventPayload::CommandApplied {
                    command: command.to_string(),
                });
                Ok(self.reconciler.reconcile().await)
            }
            Err(e) => {
                warn!(error = %e, "command failed");
                self.announce(EventPayload::CommandFailed {
                    command: command.to_string(),
                    message: e.to_string(),
                });
                Err(e)
            }
        }
    }

    pub async fn add_robot(&self, robot_id: &str, description: &str) -> Result<FleetSnapshot, CommandError> {
        self.dispatch(RobotCommand::Add {
            robot_id: robot_id.to_string(),
            description: description.to_string(),
        })
        .await
    }

    pub async fn update_description(&self, robot_id: &str, description: &str) -> Result<FleetSnapshot, CommandError> {
        self.dispatch(RobotCommand::UpdateDescription {
            robot_id: robot_id.to_string(),
            description: description.to_string(),
        })
        .await
    }

    pub async fn update_operation_state(&self, robot_id: &str, state: OperationState) -> Result<FleetSnapshot, CommandError> {
        self.dispatch(RobotCommand::UpdateOperationState {
            robot_id: robot_id.to_string(),
            state,
        })
        .await
    }

    pub async fn remove_robot(&self, robot_id: &str) -> Result<FleetSnapshot, CommandError> {
        self.dispatch(RobotCommand::Remove {
            robot_id: robot_id.to_string(),
        })
        .await
    }

    async fn apply(&self, command: &RobotCommand) -> Result<(), CommandError> {
        let robot_id = validate_robot_id(command.robot_id())?;
        match command {
            RobotCommand::Add { description, .. } => {
                let robot = NewRobot {
                    robot_id: robot_id.to_string(),
                    description: description.clone(),
                };
                self.writer.add_robot(&robot).await?;
            }
            RobotCommand::UpdateDescription { description, .. } => {
                let update = RobotUpdate {
                    robot_id: None,
                    description: Some(description.clone()),
                };
                self.writer.update_robot(robot_id, &update).await?;
            }
            RobotCommand::UpdateOperationState { state, .. } => {
                self.writer.update_operation_state(robot_id, *state).await?;
            }
            RobotCommand::Remove { .. } => {
                self.writer.remove_robot(robot_id).await?;
            }
        }
        Ok(())
    }

    fn announce(&self, payload: EventPayload) {
        // Best-effort publish – no subscribers is not an error.
        let _ = self.bus.publish_to(Topic::Commands, Event::new(EVENT_SOURCE, payload));
    }
}
