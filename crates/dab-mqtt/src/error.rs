//! Session error type.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SessionError {
    /// The broker URI could not be understood.
    #[error("invalid broker uri \"{uri}\": {reason}")]
    InvalidBrokerUri { uri: String, reason: String },

    /// The MQTT client rejected a request (subscribe, publish, disconnect).
    #[error("mqtt client error: {0}")]
    Client(#[from] rumqttc::v5::ClientError),
}
