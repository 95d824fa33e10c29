//! The server: one TCP listener, the accept loop, and lifecycle
//! plumbing.
//!
//! Binding is separated from serving so callers (and tests) can learn
//! the bound address before the loop starts. Only bind failures surface;
//! everything after that is handled per connection.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{info, warn};

use weld_core::{Gateway, ServerConfig, SetupError, SetupResult};
use weld_framework::Router;

use crate::config::validate_config;
use crate::connection;
use crate::queue;

/// Pause after a failed accept before retrying.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// A configured but not yet bound server.
pub struct Server {
    config: Arc<ServerConfig>,
    router: Arc<Router>,
    gateway: Gateway,
    cancel: CancellationToken,
}

impl Server {
    /// Creates a server from a validated configuration and a fully
    /// registered router.
    pub fn new(config: ServerConfig, router: Router) -> SetupResult<Self> {
        validate_config(&config)?;
        Ok(Self {
            config: Arc::new(config),
            router: Arc::new(router),
            gateway: Gateway::new(),
            cancel: CancellationToken::new(),
        })
    }

    /// The server handle usable before and during `serve`.
    pub fn gateway(&self) -> Gateway {
        self.gateway.clone()
    }

    /// Token that stops the accept loop and closes every connection
    /// orderly when cancelled.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Binds the listener. Bind failures are fatal and surface here.
    pub async fn bind(self) -> SetupResult<BoundServer> {
        let addr = self.config.bind_addr();
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|e| SetupError::BindFailed {
                addr: addr.clone(),
                reason: e.to_string(),
            })?;
        let local_addr = listener.local_addr().map_err(|e| SetupError::BindFailed {
            addr,
            reason: e.to_string(),
        })?;
        info!(addr = %local_addr, "listening");
        Ok(BoundServer {
            listener,
            local_addr,
            server: self,
        })
    }

    /// Binds and serves until the shutdown token is cancelled.
    pub async fn run(self) -> SetupResult<()> {
        self.bind().await?.serve().await
    }
}

/// A server with a live listener.
pub struct BoundServer {
    listener: TcpListener,
    local_addr: SocketAddr,
    server: Server,
}

impl std::fmt::Debug for BoundServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoundServer")
            .field("local_addr", &self.local_addr)
            .finish_non_exhaustive()
    }
}

impl BoundServer {
    /// The actual bound address (useful with port 0).
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// The server handle.
    pub fn gateway(&self) -> Gateway {
        self.server.gateway.clone()
    }

    /// Shutdown token.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.server.cancel.clone()
    }

    /// Runs the accept loop and the queue poller until cancellation,
    /// then closes every connection orderly and waits for them.
    pub async fn serve(self) -> SetupResult<()> {
        let Server {
            config,
            router,
            gateway,
            cancel,
        } = self.server;

        let poller = queue::spawn_poller(
            gateway.clone(),
            config.queue_file.clone().into(),
            cancel.clone(),
        );

        let tracker = TaskTracker::new();
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                accepted = self.listener.accept() => {
                    match accepted {
                        Ok((socket, peer)) => {
                            tracker.spawn(connection::drive(
                                socket,
                                peer,
                                gateway.clone(),
                                router.clone(),
                                config.clone(),
                                cancel.clone(),
                            ));
                        }
                        Err(e) => {
                            warn!(error = %e, "accept failed");
                            tokio::time::sleep(ACCEPT_BACKOFF).await;
                        }
                    }
                }
            }
        }

        info!("shutting down, closing {} connection(s)", gateway.client_count());
        tracker.close();
        tracker.wait().await;
        let _ = poller.await;
        info!("server stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> ServerConfig {
        ServerConfig {
            host: "127.0.0.1".into(),
            port: 0,
            ..ServerConfig::default()
        }
    }

    #[tokio::test]
    async fn bind_reports_local_addr() {
        let server = Server::new(test_config(), Router::new()).unwrap();
        let bound = server.bind().await.unwrap();
        assert_ne!(bound.local_addr().port(), 0);
    }

    #[tokio::test]
    async fn bind_conflict_is_fatal() {
        let first = Server::new(test_config(), Router::new())
            .unwrap()
            .bind()
            .await
            .unwrap();
        let mut config = test_config();
        config.port = first.local_addr().port();
        let err = Server::new(config, Router::new())
            .unwrap()
            .bind()
            .await
            .unwrap_err();
        assert!(matches!(err, SetupError::BindFailed { .. }));
    }

    #[tokio::test]
    async fn serve_stops_on_cancellation() {
        let bound = Server::new(test_config(), Router::new())
            .unwrap()
            .bind()
            .await
            .unwrap();
        let token = bound.shutdown_token();
        let handle = tokio::spawn(bound.serve());
        token.cancel();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("serve did not stop")
            .unwrap()
            .unwrap();
    }

    #[test]
    fn invalid_config_is_rejected() {
        let config = ServerConfig {
            max_message_size: 0,
            ..ServerConfig::default()
        };
        assert!(Server::new(config, Router::new()).is_err());
    }
}
