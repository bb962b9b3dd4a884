//! Gateway binary: config from the environment, serve until ctrl-c.

use relay_gateway::broker::TcpSource;
use relay_gateway::{GatewayConfig, GatewayService};
use tokio::sync::oneshot;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = GatewayConfig::load()?;
    info!(
        addr = %config.http_addr(),
        broker = %config.broker.addr,
        production = config.production,
        "Starting gateway"
    );

    let source = TcpSource::new(config.broker.addr, config.broker.reconnect_backoff);
    let service = GatewayService::new(config)?;

    let (shutdown_tx, shutdown_rx) = oneshot::channel();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for shutdown signal");
            return;
        }
        info!("Ctrl-c received, shutting down");
        let _ = shutdown_tx.send(());
    });

    service.run(source, shutdown_rx).await?;
    Ok(())
}
