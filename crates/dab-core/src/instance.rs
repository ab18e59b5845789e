//! Device instances and the context handed to their handlers.

use std::fmt;
use std::future::Future;
use std::sync::{Arc, OnceLock};

use dab_json::JsonValue;
use futures::future::BoxFuture;

use crate::error::DabError;
use crate::operation::OperationTable;
use crate::telemetry::TelemetryRunner;

/// Async publish function for unsolicited messages (telemetry,
/// notifications). Handed to every instance by the session once the MQTT
/// connection exists.
#[derive(Clone)]
pub struct Publisher {
    inner: Arc<dyn Fn(String, JsonValue) -> BoxFuture<'static, Result<(), DabError>> + Send + Sync>,
}

impl Publisher {
    pub fn new<F, Fut>(publish: F) -> Self
    where
        F: Fn(String, JsonValue) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), DabError>> + Send + 'static,
    {
        Self {
            inner: Arc::new(move |topic, payload| Box::pin(publish(topic, payload))),
        }
    }

    pub async fn publish(
        &self,
        topic: impl Into<String>,
        payload: JsonValue,
    ) -> Result<(), DabError> {
        (self.inner.as_ref())(topic.into(), payload).await
    }
}

impl fmt::Debug for Publisher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Publisher")
    }
}

pub(crate) struct InstanceShared {
    device_id: String,
    publisher: OnceLock<Publisher>,
    telemetry: TelemetryRunner,
}

/// Handle passed to every operation handler.
///
/// Cheap to clone; gives handlers their device id, the unsolicited publish
/// path, and the telemetry scheduler.
#[derive(Clone)]
pub struct DeviceContext {
    shared: Arc<InstanceShared>,
}

impl DeviceContext {
    pub fn device_id(&self) -> &str {
        &self.shared.device_id
    }

    /// Publish an unsolicited message on `topic`.
    pub async fn publish(
        &self,
        topic: impl Into<String>,
        payload: JsonValue,
    ) -> Result<(), DabError> {
        let publisher = self
            .shared
            .publisher
            .get()
            .ok_or_else(|| DabError::new(500, "publish channel not connected"))?;
        publisher.publish(topic, payload).await
    }

    pub(crate) fn telemetry(&self) -> &TelemetryRunner {
        &self.shared.telemetry
    }
}

/// A registered device: one `deviceId`, one handler table, owned by the
/// registry for the lifetime of the process.
pub struct DeviceInstance {
    shared: Arc<InstanceShared>,
    table: OperationTable,
}

impl DeviceInstance {
    pub(crate) fn new(device_id: String, table: OperationTable) -> Self {
        Self {
            shared: Arc::new(InstanceShared {
                device_id,
                publisher: OnceLock::new(),
                telemetry: TelemetryRunner::new(),
            }),
            table,
        }
    }

    pub fn device_id(&self) -> &str {
        &self.shared.device_id
    }

    /// The operations this instance will answer, sorted.
    pub fn operations(&self) -> Vec<String> {
        self.table.supported().map(str::to_owned).collect()
    }

    pub fn supports(&self, operation: &str) -> bool {
        self.table.supports(operation)
    }

    /// Request topics the session must subscribe to for this instance.
    pub fn subscription_topics(&self) -> Vec<String> {
        self.table
            .supported()
            .map(|op| format!("dab/{}/{}", self.shared.device_id, op))
            .collect()
    }

    /// Install the unsolicited publish path. Idempotent: the first publisher
    /// sticks.
    pub fn set_publisher(&self, publisher: Publisher) {
        let _ = self.shared.publisher.set(publisher);
    }

    pub fn context(&self) -> DeviceContext {
        DeviceContext {
            shared: self.shared.clone(),
        }
    }

    /// Run the handler for `operation`; `501 unsupported` when absent.
    pub async fn dispatch(
        &self,
        operation: &str,
        payload: JsonValue,
    ) -> Result<JsonValue, DabError> {
        let handler = self
            .table
            .handler(operation)
            .ok_or_else(DabError::unsupported)?;
        (handler.as_ref())(self.context(), payload).await
    }
}

impl fmt::Debug for DeviceInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceInstance")
            .field("device_id", &self.shared.device_id)
            .field("operations", &self.table.len())
            .finish()
    }
}
