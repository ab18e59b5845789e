//! Periodic telemetry publishing.
//!
//! Each started entry owns a tokio task that samples a metrics callback and
//! publishes the result on its notification topic, first sample immediately
//! and then once per period. Starting an id that is already running only
//! updates its interval; stopping cancels the task.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use dab_json::JsonValue;
use futures::future::BoxFuture;
use tokio::sync::{watch, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::DabError;
use crate::instance::DeviceContext;

/// Metrics source polled on every telemetry tick.
pub type SampleFn = Arc<dyn Fn() -> BoxFuture<'static, Result<JsonValue, DabError>> + Send + Sync>;

struct Entry {
    interval: watch::Sender<Duration>,
    token: CancellationToken,
}

/// Scheduler for the telemetry entries of one device instance.
pub struct TelemetryRunner {
    entries: Mutex<HashMap<String, Entry>>,
    root: CancellationToken,
}

impl TelemetryRunner {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            root: CancellationToken::new(),
        }
    }

    /// Start publishing `sample()` to `topic` every `period`, or update the
    /// period of an already-running entry.
    pub async fn start(
        &self,
        id: &str,
        topic: String,
        period: Duration,
        cx: DeviceContext,
        sample: SampleFn,
    ) {
        let mut entries = self.entries.lock().await;
        if let Some(entry) = entries.get(id) {
            let _ = entry.interval.send(period);
            debug!("telemetry interval for {} updated to {:?}", topic, period);
            return;
        }

        let (interval_tx, interval_rx) = watch::channel(period);
        let token = self.root.child_token();
        entries.insert(
            id.to_owned(),
            Entry {
                interval: interval_tx,
                token: token.clone(),
            },
        );
        debug!("telemetry started on {} every {:?}", topic, period);
        tokio::spawn(run_entry(topic, cx, sample, interval_rx, token));
    }

    /// Cancel an entry; returns whether it was running.
    pub async fn stop(&self, id: &str) -> bool {
        let mut entries = self.entries.lock().await;
        match entries.remove(id) {
            Some(entry) => {
                entry.token.cancel();
                true
            }
            None => false,
        }
    }

    /// Number of running entries.
    pub async fn active(&self) -> usize {
        self.entries.lock().await.len()
    }
}

impl Default for TelemetryRunner {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for TelemetryRunner {
    fn drop(&mut self) {
        self.root.cancel();
    }
}

async fn run_entry(
    topic: String,
    cx: DeviceContext,
    sample: SampleFn,
    mut interval: watch::Receiver<Duration>,
    token: CancellationToken,
) {
    let mut period = *interval.borrow();
    loop {
        match (sample.as_ref())().await {
            Ok(metrics) => {
                if let Err(error) = cx.publish(topic.clone(), metrics).await {
                    warn!("telemetry publish on {} failed: {}", topic, error);
                }
            }
            Err(error) => warn!("telemetry sample for {} failed: {}", topic, error),
        }

        // wait out one period, absorbing interval updates without sampling early
        loop {
            tokio::select! {
                _ = token.cancelled() => return,
                _ = tokio::time::sleep(period) => break,
                changed = interval.changed() => {
                    if changed.is_err() {
                        return;
                    }
                    period = *interval.borrow();
                }
            }
        }
    }
}
