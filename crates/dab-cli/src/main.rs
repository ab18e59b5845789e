//! Command-line entry point for the DAB broker.

use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use dab_adapters::{PanelDriver, RdkDriver};
use dab_core::{DeviceRegistry, Dispatcher};
use dab_mqtt::{MqttSession, SessionConfig};
use tracing::{error, info};

/// Device Application Bridge broker.
#[derive(Parser, Debug)]
#[command(name = "dab")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// MQTT broker URI, e.g. mqtt://127.0.0.1:1883.
    broker_uri: String,

    /// Device identifier served under dab/<deviceId>/...
    device_id: String,

    /// Address of the target device.
    device_address: String,

    /// Verbose output.
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();
    init_tracing(args.verbose);

    if let Err(e) = run(args).await {
        error!("startup failed: {e:#}");
        std::process::exit(1);
    }
}

async fn run(args: Args) -> Result<()> {
    let registry = Arc::new(
        DeviceRegistry::new()
            .with_driver(RdkDriver::default())
            .with_driver(PanelDriver),
    );
    registry
        .make_device_instance(&args.device_id, &args.device_address)
        .await?;

    let dispatcher = Arc::new(Dispatcher::new(registry));
    let session = MqttSession::connect(SessionConfig::new(&args.broker_uri), dispatcher).await?;
    info!(
        "serving device {} ({}) via {}",
        args.device_id, args.device_address, args.broker_uri
    );

    tokio::select! {
        _ = session.wait() => {
            info!("session ended");
        }
        _ = tokio::signal::ctrl_c() => {
            info!("shutting down");
            if let Err(e) = session.disconnect().await {
                error!("disconnect failed: {e}");
            }
        }
    }

    Ok(())
}

fn init_tracing(verbose: bool) {
    let default_directive = if verbose { "dab=debug,info" } else { "info" };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_directive));

    let json_logging = std::env::var("DAB_LOG_JSON")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(false);

    if json_logging {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(true)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(false)
            .compact()
            .init();
    }
}
