//! Operation handler tables and the instance builder.
//!
//! Implementations declare what they support by registering handlers at
//! construction time; the resulting table is immutable afterwards and is the
//! single source of truth for the `operations` reply, the dispatch decision,
//! and the MQTT subscription set.

use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use dab_json::JsonValue;
use futures::future::BoxFuture;

use crate::error::DabError;
use crate::instance::{DeviceContext, DeviceInstance};
use crate::ops;
use crate::telemetry::SampleFn;

/// What every operation handler produces.
pub type HandlerResult = Result<JsonValue, DabError>;

pub(crate) type BoxedHandler =
    Arc<dyn Fn(DeviceContext, JsonValue) -> BoxFuture<'static, HandlerResult> + Send + Sync>;

/// Per-app metrics source for application telemetry.
pub type AppSampleFn = Arc<dyn Fn(String) -> BoxFuture<'static, HandlerResult> + Send + Sync>;

// Single device-wide telemetry slot; application entries are keyed by appId.
const DEVICE_TELEMETRY_ID: &str = "";

/// Map of operation path to handler, iterated in path order.
pub struct OperationTable {
    handlers: BTreeMap<String, BoxedHandler>,
}

impl OperationTable {
    pub fn new() -> Self {
        Self {
            handlers: BTreeMap::new(),
        }
    }

    /// Register `handler` for `operation`, replacing any previous one.
    pub fn insert<F, Fut>(&mut self, operation: impl Into<String>, handler: F)
    where
        F: Fn(DeviceContext, JsonValue) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        self.handlers.insert(
            operation.into(),
            Arc::new(move |cx, payload| Box::pin(handler(cx, payload))),
        );
    }

    pub fn supports(&self, operation: &str) -> bool {
        self.handlers.contains_key(operation)
    }

    /// Supported operation paths, sorted.
    pub fn supported(&self) -> impl Iterator<Item = &str> {
        self.handlers.keys().map(String::as_str)
    }

    pub(crate) fn handler(&self, operation: &str) -> Option<&BoxedHandler> {
        self.handlers.get(operation)
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

impl Default for OperationTable {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for OperationTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.handlers.keys()).finish()
    }
}

/// Builds a [`DeviceInstance`], wiring the built-in operations.
///
/// `operations` and `version` are always served; the telemetry operations
/// appear when a metrics source is supplied.
pub struct InstanceBuilder {
    device_id: String,
    table: OperationTable,
    device_metrics: Option<SampleFn>,
    app_metrics: Option<AppSampleFn>,
}

impl InstanceBuilder {
    pub fn new(device_id: impl Into<String>) -> Self {
        Self {
            device_id: device_id.into(),
            table: OperationTable::new(),
            device_metrics: None,
            app_metrics: None,
        }
    }

    /// Register a handler for one catalog operation.
    pub fn operation<F, Fut>(mut self, operation: &str, handler: F) -> Self
    where
        F: Fn(DeviceContext, JsonValue) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        self.table.insert(operation, handler);
        self
    }

    /// Supply the device-wide metrics source, enabling
    /// `device/telemetry/{start,stop}`.
    pub fn device_metrics<F, Fut>(mut self, sample: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        self.device_metrics = Some(Arc::new(move || Box::pin(sample())));
        self
    }

    /// Supply the per-application metrics source, enabling
    /// `application/telemetry/{start,stop}`.
    pub fn app_metrics<F, Fut>(mut self, sample: F) -> Self
    where
        F: Fn(String) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        self.app_metrics = Some(Arc::new(move |app_id| Box::pin(sample(app_id))));
        self
    }

    pub fn build(self) -> DeviceInstance {
        let mut table = self.table;

        if !table.supports(ops::VERSION) {
            table.insert(ops::VERSION, |_cx, _payload| async {
                let mut reply = JsonValue::new_object();
                reply.entry("versions").push(ops::PROTOCOL_VERSION);
                Ok(reply)
            });
        }

        if let Some(sample) = self.device_metrics {
            table.insert(ops::DEVICE_TELEMETRY_START, move |cx, payload| {
                let sample = sample.clone();
                async move {
                    let period = telemetry_period(&payload)?;
                    let topic = format!("dab/{}/device/telemetry/metrics", cx.device_id());
                    cx.telemetry()
                        .start(DEVICE_TELEMETRY_ID, topic, period, cx.clone(), sample)
                        .await;
                    Ok(duration_reply(period))
                }
            });
            table.insert(ops::DEVICE_TELEMETRY_STOP, |cx, _payload| async move {
                cx.telemetry().stop(DEVICE_TELEMETRY_ID).await;
                Ok(JsonValue::new_object())
            });
        }

        if let Some(sample) = self.app_metrics {
            table.insert(ops::APPLICATION_TELEMETRY_START, move |cx, payload| {
                let sample = sample.clone();
                async move {
                    let app_id = required_str(&payload, "appId")?.to_owned();
                    let period = telemetry_period(&payload)?;
                    let topic = format!(
                        "dab/{}/application/telemetry/metrics/{}",
                        cx.device_id(),
                        app_id
                    );
                    let app = app_id.clone();
                    let source: SampleFn = Arc::new(move || (sample.as_ref())(app.clone()));
                    cx.telemetry()
                        .start(&app_id, topic, period, cx.clone(), source)
                        .await;
                    Ok(duration_reply(period))
                }
            });
            table.insert(ops::APPLICATION_TELEMETRY_STOP, |cx, payload| async move {
                let app_id = required_str(&payload, "appId")?.to_owned();
                cx.telemetry().stop(&app_id).await;
                Ok(JsonValue::new_object())
            });
        }

        // registered last so the advertised set reflects the final table
        let mut listed: Vec<String> = table.supported().map(str::to_owned).collect();
        if !table.supports(ops::OPERATIONS) {
            listed.push(ops::OPERATIONS.to_owned());
            listed.sort();
        }
        table.insert(ops::OPERATIONS, move |_cx, _payload| {
            let listed = listed.clone();
            async move {
                let mut reply = JsonValue::new_object();
                let list = reply.entry("operations");
                for op in &listed {
                    list.push(op.as_str());
                }
                Ok(reply)
            }
        });

        DeviceInstance::new(self.device_id, table)
    }
}

/// Extract a required string parameter from the request payload.
pub fn required_str<'a>(payload: &'a JsonValue, name: &str) -> Result<&'a str, DabError> {
    payload
        .get(name)
        .ok_or_else(|| DabError::missing_parameter(name))?
        .string()
        .map_err(|_| DabError::bad_request(format!("parameter \"{name}\" must be a string")))
}

/// Extract a required integer parameter from the request payload.
pub fn required_int(payload: &JsonValue, name: &str) -> Result<i64, DabError> {
    payload
        .get(name)
        .ok_or_else(|| DabError::missing_parameter(name))?
        .integer()
        .map_err(|_| DabError::bad_request(format!("parameter \"{name}\" must be an integer")))
}

/// Extract an optional string parameter.
pub fn optional_str<'a>(payload: &'a JsonValue, name: &str) -> Result<Option<&'a str>, DabError> {
    match payload.get(name) {
        None | Some(JsonValue::Null) => Ok(None),
        Some(value) => value
            .string()
            .map(Some)
            .map_err(|_| DabError::bad_request(format!("parameter \"{name}\" must be a string"))),
    }
}

fn telemetry_period(payload: &JsonValue) -> Result<Duration, DabError> {
    let millis = required_int(payload, "duration")?;
    if millis <= 0 {
        return Err(DabError::bad_request("duration must be positive"));
    }
    Ok(Duration::from_millis(millis as u64))
}

fn duration_reply(period: Duration) -> JsonValue {
    let mut reply = JsonValue::new_object();
    *reply.entry("duration") = JsonValue::Int(period.as_millis() as i64);
    reply
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_supported_is_sorted() {
        let mut table = OperationTable::new();
        table.insert("voice/list", |_cx, _p| async { Ok(JsonValue::Null) });
        table.insert("device/info", |_cx, _p| async { Ok(JsonValue::Null) });
        let ops: Vec<&str> = table.supported().collect();
        assert_eq!(ops, ["device/info", "voice/list"]);
    }

    #[test]
    fn test_param_extraction() {
        let payload = dab_json::parse("{\"appId\":\"netflix\",\"duration\":500}").expect("parse");
        assert_eq!(required_str(&payload, "appId"), Ok("netflix"));
        assert_eq!(required_int(&payload, "duration"), Ok(500));
        assert_eq!(optional_str(&payload, "parameters"), Ok(None));
        assert_eq!(
            required_str(&payload, "contentId"),
            Err(DabError::missing_parameter("contentId"))
        );
        assert!(required_str(&payload, "duration").is_err());
    }

    #[tokio::test]
    async fn test_builder_wires_builtins() {
        let instance = InstanceBuilder::new("d1")
            .operation(ops::DEVICE_INFO, |_cx, _p| async {
                Ok(JsonValue::member("version", ops::PROTOCOL_VERSION))
            })
            .build();

        assert!(instance.supports(ops::OPERATIONS));
        assert!(instance.supports(ops::VERSION));
        assert!(instance.supports(ops::DEVICE_INFO));
        assert!(!instance.supports(ops::DEVICE_TELEMETRY_START));

        let reply = instance
            .dispatch(ops::VERSION, JsonValue::new_object())
            .await
            .expect("version");
        assert_eq!(
            reply.get("versions").and_then(|v| v.idx(0)),
            Some(&JsonValue::Str(ops::PROTOCOL_VERSION.into()))
        );
    }

    #[tokio::test]
    async fn test_operations_reply_matches_dispatchable_set() {
        let instance = InstanceBuilder::new("d1")
            .operation(ops::DEVICE_INFO, |_cx, _p| async {
                Ok(JsonValue::new_object())
            })
            .device_metrics(|| async { Ok(JsonValue::new_object()) })
            .build();

        let reply = instance
            .dispatch(ops::OPERATIONS, JsonValue::new_object())
            .await
            .expect("operations");
        let advertised: Vec<&str> = reply
            .get("operations")
            .expect("operations member")
            .items()
            .filter_map(|v| v.string().ok())
            .collect();

        assert_eq!(advertised, instance.operations());
        for op in &advertised {
            assert!(instance.supports(op), "{op} advertised but not served");
        }
    }
}
