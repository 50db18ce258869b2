//! `robowatch-middleware` – sources and the event bus.
//!
//! Moves data between the remote fleet backend, the monitor engine and its
//! consumers without caring what the data means.
//!
//! # Modules
//!
//! - [`bus`] – typed, topic-based publish/subscribe event bus built on Tokio
//!   broadcast channels.
//! - [`source`] – the [`TelemetrySource`] / [`RegistryWriter`] contracts every
//!   backend adapter implements.
//! - [`http_source`] – [`HttpSource`], the REST adapter.
//! - [`sim_source`] – [`SimSource`], an in-process fleet for tests and demos.

pub mod bus;
pub mod http_source;
pub mod sim_source;
pub mod source;

pub use bus::{EventBus, Topic, TopicReceiver};
pub use http_source::{HttpSource, SessionCredentials};
pub use sim_source::SimSource;
pub use source::{RegistryWriter, SourceError, TelemetrySource};
