//! Core engine of the DAB broker.
//!
//! Three pieces cooperate here:
//! - an [`OperationTable`] per device instance, built at registration time
//!   through [`InstanceBuilder`]; what the instance supports is decided once
//!   and drives both the `operations` reply and the subscription set;
//! - the [`DeviceRegistry`], which probes its [`DeviceDriver`]s in declared
//!   order to pick the implementation for a device address;
//! - the [`Dispatcher`], which maps `dab/<deviceId>/<operation-path>` topics
//!   onto handlers and shapes every outcome into a status-carrying reply
//!   object.
//!
//! The MQTT side lives in `dab-mqtt`; this crate performs no I/O of its own.

pub mod dispatch;
pub mod error;
pub mod instance;
pub mod operation;
pub mod ops;
pub mod registry;
pub mod telemetry;

pub use dispatch::{error_reply, Dispatcher, RequestEnvelope};
pub use error::{DabError, RegistryError};
pub use instance::{DeviceContext, DeviceInstance, Publisher};
pub use operation::{
    optional_str, required_int, required_str, HandlerResult, InstanceBuilder, OperationTable,
};
pub use registry::{DeviceDriver, DeviceRegistry};
pub use telemetry::TelemetryRunner;

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
