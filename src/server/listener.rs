//! HTTP server listener
//!
//! Binds the listen address, starts the relay and serves the router.

use std::future::{Future, IntoFuture};
use std::net::SocketAddr;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::net::TcpListener;

use crate::error::Result;
use crate::registry::ClientRegistry;
use crate::relay::{PacketRelay, RelayStats};
use crate::server::config::StreamerConfig;
use crate::server::routes;

/// HTTP streaming server
pub struct StreamServer {
    config: StreamerConfig,
    registry: ClientRegistry,
    stats: Arc<RelayStats>,
    /// Taken when the server starts
    relay: Mutex<Option<PacketRelay>>,
}

impl StreamServer {
    /// Create a new server with the given configuration
    pub fn new(config: StreamerConfig) -> Self {
        let (relay, registry) = PacketRelay::new(config.relay_config());
        Self {
            stats: relay.stats(),
            config,
            registry,
            relay: Mutex::new(Some(relay)),
        }
    }

    /// Get the client registry
    pub fn registry(&self) -> &ClientRegistry {
        &self.registry
    }

    /// Get the relay counters
    pub fn stats(&self) -> &Arc<RelayStats> {
        &self.stats
    }

    pub fn config(&self) -> &StreamerConfig {
        &self.config
    }

    /// Run the server
    ///
    /// This method blocks until the server fails.
    pub async fn run(&self) -> Result<()> {
        self.run_until(std::future::pending()).await
    }

    /// Run the server with graceful shutdown
    pub async fn run_until<F>(&self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        let listener = TcpListener::bind((self.config.host.as_str(), self.config.port)).await?;
        self.serve(listener, shutdown).await
    }

    /// Serve on an already bound listener
    pub async fn serve<F>(&self, listener: TcpListener, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        let addr = listener.local_addr()?;
        tracing::info!(addr = %addr, "HTTP server listening");

        let relay_handle = self.relay.lock().take().map(PacketRelay::spawn);
        if relay_handle.is_none() {
            tracing::warn!("Relay already started");
        }

        let app = routes::router(self.registry.clone())
            .into_make_service_with_connect_info::<SocketAddr>();

        let result = tokio::select! {
            _ = shutdown => {
                tracing::info!("Shutdown signal received");
                Ok(())
            }
            result = axum::serve(listener, app).into_future() => result.map_err(Into::into),
        };

        // The server itself holds a registry handle, so the relay never sees
        // its admission channel close
        if let Some(handle) = relay_handle {
            handle.abort();
        }

        result
    }
}
