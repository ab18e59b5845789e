//! Error types shared across the broker core.

use thiserror::Error;

/// Operation failure carrying the HTTP-like status code for the reply.
///
/// Handlers raise this to control the `status`/`error` members of the reply
/// envelope; anything else that escapes a handler is reported as `500`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{text} (status {code})")]
pub struct DabError {
    pub code: i64,
    pub text: String,
}

impl DabError {
    pub fn new(code: i64, text: impl Into<String>) -> Self {
        Self {
            code,
            text: text.into(),
        }
    }

    /// `501 unsupported`: the operation has no handler on this instance.
    pub fn unsupported() -> Self {
        Self::new(501, "unsupported")
    }

    /// `400 topic is malformed`.
    pub fn malformed_topic() -> Self {
        Self::new(400, "topic is malformed")
    }

    /// `400 deviceId does not exist`.
    pub fn unknown_device() -> Self {
        Self::new(400, "deviceId does not exist")
    }

    /// `500 internal`, the catch-all for failures that are not `DabError`s.
    pub fn internal() -> Self {
        Self::new(500, "internal")
    }

    pub fn bad_request(text: impl Into<String>) -> Self {
        Self::new(400, text)
    }

    pub fn missing_parameter(name: &str) -> Self {
        Self::new(400, format!("missing parameter \"{name}\""))
    }
}

/// Failures while registering device instances.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// No configured driver accepted the device address.
    #[error("no compatible implementation for device address \"{0}\"")]
    NoCompatibleImplementation(String),

    /// The device id is already registered.
    #[error("device \"{0}\" already exists")]
    DuplicateDevice(String),

    /// The selected driver failed to construct the instance.
    #[error(transparent)]
    Connect(#[from] DabError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_text() {
        assert_eq!(DabError::unsupported().to_string(), "unsupported (status 501)");
        assert_eq!(DabError::unknown_device().code, 400);
        assert_eq!(
            DabError::missing_parameter("appId").text,
            "missing parameter \"appId\""
        );
    }
}
