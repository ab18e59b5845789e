//! MQTT v5 binding for the DAB broker.
//!
//! [`MqttSession`] owns the `rumqttc` client, subscribes on behalf of the
//! device registry, and runs the request/response loop: inbound publishes
//! are decoded into request envelopes, dispatched, and answered on the
//! requester's response topic with correlation data echoed. Instances
//! publish unsolicited telemetry through the same session.

pub mod error;
pub mod session;

pub use error::SessionError;
pub use session::{MqttSession, SessionConfig};

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
