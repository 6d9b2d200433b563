//! Zenoh bridge for Crazyflie vehicles.
//!
//! Streams telemetry from the vehicle to Zenoh and relays commands from Zenoh
//! to the vehicle.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::Parser;
use tracing::{error, info, warn};

use flybridge_common::{BridgeConfig, BridgeStatus, KeyExprBuilder, LoggingConfig};
use zenoh_bridge_crazyflie::sim::{SIM_SCHEME, SimVehicle};
use zenoh_bridge_crazyflie::{Bridge, CrazyflieBridgeConfig, ZenohBus};

const BRIDGE_NAME: &str = "crazyflie";

/// Zenoh bridge for Crazyflie vehicles.
#[derive(Parser, Debug)]
#[command(name = "zenoh-bridge-crazyflie")]
#[command(about = "Bridges Crazyflie telemetry and commands to Zenoh")]
#[command(version)]
struct Args {
    /// Path to configuration file (JSON5 format)
    #[arg(short, long, default_value = "crazyflie.json5")]
    config: PathBuf,

    /// Override log level (trace, debug, info, warn, error).
    #[arg(long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Load configuration
    let config = CrazyflieBridgeConfig::load(&args.config)
        .with_context(|| format!("Failed to load config from {:?}", args.config))?;

    // Initialize logging
    let log_config = LoggingConfig {
        level: args
            .log_level
            .clone()
            .unwrap_or_else(|| config.logging.level.clone()),
        format: config.logging.format,
    };
    flybridge_common::init_tracing(&log_config)
        .map_err(|e| anyhow::anyhow!("Failed to init tracing: {}", e))?;

    info!("Starting zenoh-bridge-crazyflie");
    info!("Loaded configuration from {:?}", args.config);

    let uri = &config.crazyflie.uri;
    if uri.scheme() != SIM_SCHEME {
        bail!(
            "Link URI '{}' is not supported: this build has no radio driver, use a '{}://' URI",
            uri,
            SIM_SCHEME
        );
    }

    // Connect to Zenoh
    let session = flybridge_common::connect(&config.zenoh)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to connect to Zenoh: {}", e))?;
    let session = Arc::new(session);

    let keys = KeyExprBuilder::new(config.key_prefix());
    let bus = Arc::new(ZenohBus::with_queue_capacity(
        Arc::clone(&session),
        keys,
        config.bus.serialization,
        config.bus.queue_capacity,
    ));

    let vehicle = SimVehicle::new();
    let bridge = Bridge::start(&config, vehicle.connector(), bus.clone())
        .await
        .context("Failed to start bridge")?;

    // Publish bridge status
    let metadata = serde_json::json!({
        "uri": uri.to_string(),
        "channel": config.bus.channel,
        "goto_policy": config.crazyflie.goto_policy,
        "telemetry_period_ms": config.crazyflie.telemetry.period_ms,
    });
    let running = BridgeStatus::running(BRIDGE_NAME, env!("CARGO_PKG_VERSION"))
        .with_metadata(metadata.clone());
    if let Err(e) = bus.publish_status(&running).await {
        error!("Failed to publish bridge status: {}", e);
    }

    info!(
        commands = %bus.keys().commands(config.bus.channel),
        "Crazyflie bridge running"
    );

    let result = bridge.run_until(shutdown_signal()).await;

    let status = match &result {
        Ok(stats) => {
            info!(
                samples = stats.samples,
                publish_errors = stats.publish_errors,
                commands_staged = stats.commands_staged,
                commands_overwritten = stats.commands_overwritten,
                commands_rejected = stats.commands_rejected,
                commands_sent = stats.commands_sent,
                commands_dropped = stats.commands_dropped,
                unknown_variables = stats.unknown_variables,
                telemetry_losses = stats.telemetry_losses,
                reconnect_attempts = stats.reconnect_attempts,
                "Final statistics"
            );
            BridgeStatus::offline(BRIDGE_NAME, env!("CARGO_PKG_VERSION")).with_metadata(metadata)
        }
        Err(e) => BridgeStatus::error(BRIDGE_NAME, env!("CARGO_PKG_VERSION"), e.to_string()),
    };
    if let Err(e) = bus.publish_status(&status).await {
        warn!("Failed to publish offline status: {}", e);
    }

    bus.close().await;
    session
        .close()
        .await
        .map_err(|e| anyhow::anyhow!("Failed to close Zenoh session: {}", e))?;
    info!("Crazyflie bridge stopped");

    result.map(|_| ()).map_err(Into::into)
}

/// Resolves on Ctrl+C or SIGTERM.
async fn shutdown_signal() {
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down...");
        }
        _ = async {
            #[cfg(unix)]
            {
                match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                    Ok(mut sigterm) => {
                        sigterm.recv().await;
                    }
                    Err(e) => {
                        warn!("Failed to install SIGTERM handler: {}", e);
                        std::future::pending::<()>().await;
                    }
                }
            }
            #[cfg(not(unix))]
            {
                std::future::pending::<()>().await;
            }
        } => {
            info!("Received SIGTERM, shutting down...");
        }
    }
}
