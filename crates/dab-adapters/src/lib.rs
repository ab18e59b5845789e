//! Reference device adapters.
//!
//! Two implementations of the driver contract: [`RdkDriver`] speaks the
//! vendor's Thunder JSON-RPC services over HTTP, and [`PanelDriver`] is an
//! always-compatible in-memory panel used as fallback and in tests. The
//! registry probes them in the order the binary declares them.

use std::future::Future;
use std::sync::Arc;

use dab_core::{DeviceContext, HandlerResult};
use dab_json::JsonValue;

pub mod panel;
pub mod rdk;
pub mod rpc;

pub use panel::PanelDriver;
pub use rdk::RdkDriver;
pub use rpc::{RpcClient, RpcError};

/// Adapt a `(device, context, payload)` closure into the handler shape,
/// cloning the device handle per invocation.
pub(crate) fn bind<D, F, Fut>(
    device: &Arc<D>,
    handler: F,
) -> impl Fn(DeviceContext, JsonValue) -> Fut + Send + Sync + 'static
where
    D: Send + Sync + 'static,
    F: Fn(Arc<D>, DeviceContext, JsonValue) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    let device = device.clone();
    move |cx, payload| handler(device.clone(), cx, payload)
}

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
