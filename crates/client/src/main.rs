//! Standalone log forwarding client.
//!
//! Wires the capture layer, forwarder and WebTransport uplink together so
//! this process's warnings, errors and panics stream to a controller.
//! Records produced before the connection is up (or after it goes down)
//! wait in the pending buffer.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use logwire::{
    forward_layer, install_panic_capture, ConnectionManager, LogForwarder, LogTransport,
    TransportConfig, WebTransportClient,
};
use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::Layer;

#[derive(Parser, Debug)]
#[command(name = "logwire-client")]
#[command(about = "Forwards application logs to a logwire controller")]
struct Args {
    /// Controller host name or IP address
    #[arg(long, env = "LOGWIRE_SERVER", default_value = "127.0.0.1")]
    server: String,

    /// Controller port
    #[arg(long, env = "LOGWIRE_PORT", default_value_t = 4433)]
    port: u16,

    /// Connection timeout in milliseconds
    #[arg(long, env = "LOGWIRE_CONNECT_TIMEOUT_MS", default_value_t = 10_000)]
    connect_timeout_ms: u64,

    /// Skip certificate validation (development only)
    #[arg(long, env = "LOGWIRE_ALLOW_INSECURE")]
    allow_insecure: bool,

    /// Console log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOGWIRE_LOG_LEVEL", default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let manager = ConnectionManager::new();
    let client = Arc::new(WebTransportClient::new(manager.clone()));
    let transport: Arc<dyn LogTransport> = client.clone();
    let forwarder = Arc::new(LogForwarder::new(transport));

    // The console layer gets the configured filter; the capture layer
    // applies its own severity policy and must see every event.
    let (capture, guard) = forward_layer(forwarder.clone());
    let console_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_filter(console_filter))
        .with(capture)
        .init();

    install_panic_capture(forwarder.clone(), &guard);

    tokio::spawn(forwarder.clone().run(manager.subscribe_events()));

    let config = TransportConfig {
        server_address: args.server,
        port: args.port,
        connect_timeout_ms: args.connect_timeout_ms,
        allow_insecure: args.allow_insecure,
    };

    tracing::info!("logwire client v{}", env!("CARGO_PKG_VERSION"));
    tracing::info!("connecting to {}", config.url());

    if let Err(err) = client.connect(&config).await {
        // No retry: the process stays up and keeps buffering, and the
        // backlog shows in the shutdown diagnostics.
        tracing::warn!("connection attempt failed: {}", err);
    }

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;

    tracing::info!("shutting down");
    guard.deactivate();
    client.disconnect();

    // Give the driver a moment to finish the stream.
    tokio::time::sleep(Duration::from_millis(100)).await;

    let info = client.manager().info();
    tracing::info!(
        "delivered {} records ({} bytes)",
        info.records_sent,
        info.bytes_sent
    );
    let pending = forwarder.buffer().len();
    if pending > 0 {
        tracing::debug!("{} records were never delivered", pending);
    }

    Ok(())
}
