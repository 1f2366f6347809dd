//! HTTP server for the webhook endpoints.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};

use subscription_broker::BrokerHandle;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::error::{Result, ServerError};
use crate::routes::routes;

/// HTTP server exposing the subscription and call-record endpoints.
///
/// The server binds immediately, serves requests on a background task and
/// keeps running until [`shutdown`](WebhookServer::shutdown) is called.
///
/// # Example
///
/// ```no_run
/// # use subscription_broker::BrokerHandle;
/// # use webhook_server::WebhookServer;
/// # async fn example(broker: BrokerHandle) {
/// let server = WebhookServer::bind(([0, 0, 0, 0], 5000).into(), broker)
///     .await
///     .expect("Failed to bind webhook server");
///
/// println!("Webhook listening at: {}", server.base_url());
///
/// server.shutdown().await.unwrap();
/// # }
/// ```
pub struct WebhookServer {
    /// The address the server is bound to
    local_addr: SocketAddr,
    /// Base URL for local requests
    base_url: String,
    /// Shutdown signal sender
    shutdown_tx: Option<mpsc::Sender<()>>,
    /// Server task handle
    server_handle: Option<JoinHandle<()>>,
}

impl WebhookServer {
    /// Bind to `addr` and start serving.
    ///
    /// Port 0 binds to any free port; use [`local_addr`](Self::local_addr)
    /// to find out which.
    pub async fn bind(addr: SocketAddr, broker: BrokerHandle) -> Result<Self> {
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);

        let (local_addr, server) = warp::serve(routes(broker))
            .try_bind_with_graceful_shutdown(addr, async move {
                shutdown_rx.recv().await;
            })
            .map_err(|source| ServerError::Bind { addr, source })?;

        let server_handle = tokio::spawn(server);
        let base_url = format!("http://{}", Self::reachable_addr(local_addr));

        tracing::info!(%local_addr, "Webhook server listening");

        Ok(Self {
            local_addr,
            base_url,
            shutdown_tx: Some(shutdown_tx),
            server_handle: Some(server_handle),
        })
    }

    /// Base URL for reaching the server from this host, e.g.
    /// `http://127.0.0.1:5000`.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn port(&self) -> u16 {
        self.local_addr.port()
    }

    /// Stop accepting connections and wait for in-flight requests to finish.
    pub async fn shutdown(mut self) -> Result<()> {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(()).await;
        }

        if let Some(handle) = self.server_handle.take() {
            handle.await?;
        }

        tracing::info!(local_addr = %self.local_addr, "Webhook server stopped");
        Ok(())
    }

    /// Wildcard binds are reached through loopback.
    fn reachable_addr(addr: SocketAddr) -> SocketAddr {
        match addr.ip() {
            IpAddr::V4(ip) if ip.is_unspecified() => {
                SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), addr.port())
            }
            IpAddr::V6(ip) if ip.is_unspecified() => {
                SocketAddr::new(IpAddr::V6(Ipv6Addr::LOCALHOST), addr.port())
            }
            _ => addr,
        }
    }
}

impl Drop for WebhookServer {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.try_send(());
        }
    }
}

impl std::fmt::Debug for WebhookServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebhookServer")
            .field("local_addr", &self.local_addr)
            .field("running", &self.server_handle.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reachable_addr() {
        let wildcard: SocketAddr = "0.0.0.0:5000".parse().unwrap();
        assert_eq!(
            WebhookServer::reachable_addr(wildcard),
            "127.0.0.1:5000".parse::<SocketAddr>().unwrap()
        );

        let wildcard_v6: SocketAddr = "[::]:5000".parse().unwrap();
        assert_eq!(
            WebhookServer::reachable_addr(wildcard_v6),
            "[::1]:5000".parse::<SocketAddr>().unwrap()
        );

        let specific: SocketAddr = "10.0.0.7:8080".parse().unwrap();
        assert_eq!(WebhookServer::reachable_addr(specific), specific);
    }
}
