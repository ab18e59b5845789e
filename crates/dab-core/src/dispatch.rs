//! Request routing: topic to instance to handler, and reply shaping.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use dab_json::JsonValue;
use futures::FutureExt;
use tracing::{debug, error};

use crate::error::DabError;
use crate::operation::HandlerResult;
use crate::registry::DeviceRegistry;

/// A decoded inbound request.
///
/// `topic` comes from the MQTT delivery, not the payload; `response_topic`
/// and `correlation_data` are the MQTT v5 properties when the requester
/// supplied them.
#[derive(Debug, Clone)]
pub struct RequestEnvelope {
    pub topic: String,
    pub payload: JsonValue,
    pub response_topic: Option<String>,
    pub correlation_data: Option<Vec<u8>>,
}

impl RequestEnvelope {
    pub fn new(topic: impl Into<String>, payload: JsonValue) -> Self {
        Self {
            topic: topic.into(),
            payload,
            response_topic: None,
            correlation_data: None,
        }
    }

    pub fn with_response_topic(mut self, topic: impl Into<String>) -> Self {
        self.response_topic = Some(topic.into());
        self
    }

    pub fn with_correlation_data(mut self, data: Vec<u8>) -> Self {
        self.correlation_data = Some(data);
        self
    }
}

/// Routes requests through the registry and shapes every outcome into a
/// reply object.
pub struct Dispatcher {
    registry: Arc<DeviceRegistry>,
}

impl Dispatcher {
    pub fn new(registry: Arc<DeviceRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &Arc<DeviceRegistry> {
        &self.registry
    }

    /// Produce exactly one reply for the request, never failing.
    pub async fn dispatch(&self, request: &RequestEnvelope) -> JsonValue {
        match AssertUnwindSafe(self.route(request)).catch_unwind().await {
            Ok(Ok(value)) => finalize_reply(value),
            Ok(Err(failure)) => {
                debug!("request on {} failed: {}", request.topic, failure);
                error_reply(&failure)
            }
            Err(_) => {
                error!("handler panicked for topic {}", request.topic);
                error_reply(&DabError::internal())
            }
        }
    }

    async fn route(&self, request: &RequestEnvelope) -> HandlerResult {
        let (device_id, operation) = split_topic(&request.topic)?;
        let instance = self
            .registry
            .lookup(device_id)
            .await
            .ok_or_else(DabError::unknown_device)?;
        instance.dispatch(operation, request.payload.clone()).await
    }
}

/// Split `dab/<deviceId>/<operation-path>` into its parts.
pub(crate) fn split_topic(topic: &str) -> Result<(&str, &str), DabError> {
    let rest = topic
        .strip_prefix("dab/")
        .ok_or_else(DabError::malformed_topic)?;
    let (device_id, operation) = rest.split_once('/').ok_or_else(DabError::malformed_topic)?;
    if device_id.is_empty() || operation.is_empty() {
        return Err(DabError::malformed_topic());
    }
    Ok((device_id, operation))
}

/// Handler-supplied `status` wins; objects without one get `200`. A null
/// result is an empty success.
fn finalize_reply(value: JsonValue) -> JsonValue {
    let mut reply = match value {
        JsonValue::Null => JsonValue::new_object(),
        other => other,
    };
    if reply.is_object() && !reply.has("status") {
        *reply.entry("status") = JsonValue::Int(200);
    }
    reply
}

/// `{status, error}` envelope for a failed request.
pub fn error_reply(failure: &DabError) -> JsonValue {
    let mut reply = JsonValue::new_object();
    *reply.entry("status") = JsonValue::Int(failure.code);
    *reply.entry("error") = JsonValue::Str(failure.text.clone());
    reply
}
