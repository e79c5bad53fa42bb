// src/main.rs - Bridge entry point: config, broker session, router and status mirror
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};

use c3p_bridge::control_plane::WebSocketConnector;
use c3p_bridge::{BridgeContext, FixedBackoff, MoonrakerClient, Router, StatusSynchronizer, load_config, mqtt};

const INBOUND_BUFFER: usize = 64;
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Bridges remote print jobs and printer status between MQTT and the local printer API
#[derive(Parser, Debug)]
#[command(name = "c3p-bridge", version, about)]
struct Cli {
    /// Path to the TOML configuration file
    #[arg(default_value = "c3p-bridge.toml")]
    config: PathBuf,

    /// Maximum log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: tracing::Level,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync + 'static>> {
    let cli = Cli::parse();

    tracing_subscriber::fmt().with_max_level(cli.log_level).init();

    tracing::info!("Starting c3p-bridge {}", env!("CARGO_PKG_VERSION"));
    tracing::info!("Loading configuration from: {}", cli.config.display());

    let config = load_config(&cli.config).map_err(|e| {
        tracing::error!("Please ensure the configuration file exists and is properly formatted");
        Box::new(e) as Box<dyn std::error::Error + Send + Sync + 'static>
    })?;
    let config = Arc::new(config);

    tracing::info!("Instance: {}", config.instance_name);
    tracing::info!("Printer API: {}", config.printer.api_url);
    tracing::info!("MQTT broker: {}:{}", config.mqtt.address, config.mqtt.port);

    let printer = MoonrakerClient::new(&config.printer)?;
    let (publisher, event_loop) = mqtt::connect(&config);
    let ctx = BridgeContext::new(config.clone(), Arc::new(publisher));

    let (shutdown_tx, _) = broadcast::channel::<()>(1);
    let (inbound_tx, inbound_rx) = mpsc::channel(INBOUND_BUFFER);

    let router = Router::new(ctx.clone(), printer);
    let synchronizer = StatusSynchronizer::new(
        ctx,
        Arc::new(WebSocketConnector::new(config.printer.websocket_url())),
        Arc::new(FixedBackoff::new(config.sync.reconnect_delay())),
    );

    let tasks = vec![
        tokio::spawn(event_loop.run(inbound_tx, shutdown_tx.subscribe())),
        tokio::spawn(router.run(inbound_rx, shutdown_tx.subscribe())),
        tokio::spawn(synchronizer.run(shutdown_tx.subscribe())),
    ];
    let abort_handles: Vec<_> = tasks.iter().map(|task| task.abort_handle()).collect();

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutdown requested");
    let _ = shutdown_tx.send(());

    let joined = tokio::time::timeout(SHUTDOWN_GRACE, futures::future::join_all(tasks)).await;
    match joined {
        Ok(results) => {
            for result in results {
                if let Err(e) = result {
                    tracing::error!("Task ended abnormally: {}", e);
                }
            }
            tracing::info!("Shutdown complete");
        }
        Err(_) => {
            tracing::warn!("Tasks did not stop within {:?}, aborting", SHUTDOWN_GRACE);
            for handle in abort_handles {
                handle.abort();
            }
        }
    }

    Ok(())
}
