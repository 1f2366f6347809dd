//! Command line arguments and environment overrides.

use std::net::SocketAddr;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use graph_client::GraphConfig;
use subscription_broker::BrokerConfig;
use tracing::info;

use crate::logging::LoggingMode;

/// Call-record webhook service
///
/// Registers Microsoft Graph change-notification subscriptions on behalf of
/// tenants, keeps them renewed and caches the call records they announce.
#[derive(Parser, Debug)]
#[command(name = "callrecord-webhook")]
#[command(about = "Webhook service for Microsoft Graph call-record notifications")]
#[command(version)]
pub struct Args {
    /// Public base URL of this service, as reachable by Microsoft Graph
    #[arg(long, default_value = "http://localhost:5000/")]
    pub public_endpoint: String,

    /// Address the HTTP server binds to
    #[arg(long, default_value = "0.0.0.0:5000")]
    pub bind: SocketAddr,

    /// Renewal scheduler interval in seconds
    #[arg(long, default_value = "600")]
    pub renewal_interval: u64,

    /// Maximum number of cached call records
    #[arg(long, default_value = "1000")]
    pub call_record_capacity: usize,

    /// Microsoft Graph base URL
    #[arg(long, default_value = "https://graph.microsoft.com/v1.0")]
    pub graph_url: String,

    /// Identity platform authority URL
    #[arg(long, default_value = "https://login.microsoftonline.com")]
    pub authority_url: String,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, default_value = "info")]
    pub log_level: String,

    /// Log output (silent, development, debug)
    #[arg(long, default_value = "development")]
    pub log_mode: LoggingMode,
}

impl Args {
    /// Apply `WEBHOOK_*` overrides read through `lookup`.
    fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(endpoint) = lookup("WEBHOOK_PUBLIC_ENDPOINT") {
            self.public_endpoint = endpoint;
        }

        if let Some(bind) = lookup("WEBHOOK_BIND") {
            self.bind = bind
                .parse()
                .context("Invalid WEBHOOK_BIND environment variable")?;
        }

        if let Some(interval) = lookup("WEBHOOK_RENEWAL_INTERVAL") {
            self.renewal_interval = interval
                .parse()
                .context("Invalid WEBHOOK_RENEWAL_INTERVAL environment variable")?;
        }

        if let Some(capacity) = lookup("WEBHOOK_CALL_RECORD_CAPACITY") {
            self.call_record_capacity = capacity
                .parse()
                .context("Invalid WEBHOOK_CALL_RECORD_CAPACITY environment variable")?;
        }

        if let Some(url) = lookup("WEBHOOK_GRAPH_URL") {
            self.graph_url = url;
        }

        if let Some(url) = lookup("WEBHOOK_AUTHORITY_URL") {
            self.authority_url = url;
        }

        if let Some(level) = lookup("WEBHOOK_LOG_LEVEL") {
            self.log_level = level;
        }

        if let Some(mode) = lookup("WEBHOOK_LOG_MODE") {
            self.log_mode = mode
                .parse()
                .context("Invalid WEBHOOK_LOG_MODE environment variable")?;
        }

        Ok(())
    }

    /// Validate command line arguments
    pub fn validate(&self) -> Result<()> {
        if self.renewal_interval == 0 {
            return Err(anyhow::anyhow!("Renewal interval must be positive"));
        }

        if self.call_record_capacity == 0 {
            return Err(anyhow::anyhow!("Call record capacity must be at least 1"));
        }

        match self.log_level.to_lowercase().as_str() {
            "error" | "warn" | "info" | "debug" | "trace" => {}
            _ => {
                return Err(anyhow::anyhow!(
                    "Invalid log level '{}'. Valid levels: error, warn, info, debug, trace",
                    self.log_level
                ));
            }
        }

        Ok(())
    }
}

/// Configuration derived from command line arguments and environment variables
#[derive(Debug, Clone)]
pub struct Config {
    pub bind: SocketAddr,
    pub broker: BrokerConfig,
    pub graph: GraphConfig,
    pub log_level: String,
    pub log_mode: LoggingMode,
}

impl Config {
    /// Create configuration from command line arguments and environment variables
    pub fn from_env() -> Result<Self> {
        Self::from_args(Args::parse(), |name| std::env::var(name).ok())
    }

    fn from_args<F>(mut args: Args, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        args.apply_overrides(lookup)?;
        args.validate()?;

        let broker = BrokerConfig::new()
            .with_public_endpoint(args.public_endpoint)
            .with_renewal_interval(Duration::from_secs(args.renewal_interval))
            .with_call_record_capacity(args.call_record_capacity);
        broker.validate().context("Invalid broker configuration")?;

        let graph = GraphConfig::new()
            .with_graph_url(args.graph_url)
            .with_authority_url(args.authority_url);
        graph.validate().context("Invalid Graph configuration")?;

        Ok(Self {
            bind: args.bind,
            broker,
            graph,
            log_level: args.log_level,
            log_mode: args.log_mode,
        })
    }

    pub fn log_summary(&self) {
        info!("Configuration:");
        info!("  Bind address: {}", self.bind);
        info!("  Public endpoint: {}", self.broker.public_endpoint);
        info!("  Renewal interval: {}s", self.broker.renewal_interval.as_secs());
        info!("  Call record capacity: {}", self.broker.call_record_capacity);
        info!("  Graph URL: {}", self.graph.graph_url);
        info!("  Log level: {}", self.log_level);
    }
}
