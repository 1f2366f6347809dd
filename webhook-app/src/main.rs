use std::sync::Arc;

use anyhow::{Context, Result};
use graph_client::GraphClient;
use subscription_broker::WebhookBroker;
use tracing::{info, warn};
use webhook_server::WebhookServer;

mod config;
mod logging;

use config::Config;

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::from_env().context("Failed to parse configuration")?;

    logging::init_logging(config.log_mode, &config.log_level)
        .context("Failed to initialize logging")?;

    config.log_summary();

    let client = GraphClient::new(config.graph.clone()).context("Failed to create Graph client")?;

    let mut broker = WebhookBroker::new(config.broker.clone(), Arc::new(client))
        .context("Failed to create webhook broker")?;
    broker.start();

    let server = WebhookServer::bind(config.bind, broker.handle())
        .await
        .context("Failed to start webhook server")?;

    info!(
        "Receiving notifications at {}",
        broker.manager().notification_url()
    );

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;
    info!("Shutdown requested");

    // Stopping the broker first cancels requests still waiting on Graph.
    if let Err(e) = broker.shutdown().await {
        warn!("Broker shutdown completed with errors: {}", e);
    }

    server
        .shutdown()
        .await
        .context("Failed to stop webhook server")?;

    info!("Shutdown complete");
    Ok(())
}
