//! JSON-RPC 2.0 client for the vendor device service.
//!
//! The target exposes Thunder-style services over HTTP at
//! `http://<address>:9998/jsonrpc`; methods are addressed as
//! `<callsign>.1.<method>`. This wire is strict JSON, so it rides on
//! `serde_json` rather than the DAB dialect.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use dab_core::DabError;
use serde_json::{json, Value};
use thiserror::Error;
use tracing::debug;

pub(crate) const RPC_PORT: u16 = 9998;

#[derive(Debug, Error)]
pub enum RpcError {
    /// The HTTP request could not be completed.
    #[error("transport error calling {method}: {source}")]
    Transport {
        method: String,
        #[source]
        source: reqwest::Error,
    },

    /// The service answered with a JSON-RPC error object.
    #[error("service error {code} calling {method}: {message}")]
    Service {
        method: String,
        code: i64,
        message: String,
    },

    /// The reply carried neither a result nor an error.
    #[error("malformed reply for {method}")]
    MalformedReply { method: String },
}

impl From<RpcError> for DabError {
    fn from(error: RpcError) -> Self {
        DabError::new(500, error.to_string())
    }
}

/// One device service endpoint.
pub struct RpcClient {
    http: reqwest::Client,
    endpoint: String,
    next_id: AtomicU64,
}

impl RpcClient {
    pub fn new(device_address: &str) -> Self {
        Self {
            http: reqwest::Client::new(),
            endpoint: endpoint_for(device_address),
            next_id: AtomicU64::new(1),
        }
    }

    /// Invoke `method` with `params`, returning the `result` member.
    pub async fn call(&self, method: &str, params: Value) -> Result<Value, RpcError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let mut body = json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": method,
        });
        if !params.is_null() {
            body["params"] = params;
        }
        debug!("rpc call {}", method);

        let transport = |source| RpcError::Transport {
            method: method.to_owned(),
            source,
        };
        let response = self
            .http
            .post(&self.endpoint)
            .json(&body)
            .send()
            .await
            .map_err(transport)?;
        let reply: Value = response.json().await.map_err(transport)?;

        if let Some(failure) = reply.get("error") {
            return Err(RpcError::Service {
                method: method.to_owned(),
                code: failure.get("code").and_then(Value::as_i64).unwrap_or(0),
                message: failure
                    .get("message")
                    .and_then(Value::as_str)
                    .unwrap_or("unknown")
                    .to_owned(),
            });
        }
        reply
            .get("result")
            .cloned()
            .ok_or_else(|| RpcError::MalformedReply {
                method: method.to_owned(),
            })
    }

    /// Short compatibility probe: whether a controller answers at the
    /// address within `timeout`.
    pub async fn probe(device_address: &str, timeout: Duration) -> bool {
        let Ok(http) = reqwest::Client::builder().timeout(timeout).build() else {
            return false;
        };
        let body = json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": "Controller.1.status",
        });
        match http.post(endpoint_for(device_address)).json(&body).send().await {
            Ok(response) => response.status().is_success(),
            Err(_) => false,
        }
    }
}

fn endpoint_for(device_address: &str) -> String {
    format!("http://{device_address}:{RPC_PORT}/jsonrpc")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_shape() {
        assert_eq!(endpoint_for("10.0.0.9"), "http://10.0.0.9:9998/jsonrpc");
    }

    #[test]
    fn test_rpc_error_maps_to_500() {
        let failure = RpcError::Service {
            method: "org.rdk.System.1.reboot".into(),
            code: -32601,
            message: "method not found".into(),
        };
        let dab: DabError = failure.into();
        assert_eq!(dab.code, 500);
        assert!(dab.text.contains("reboot"));
    }
}
