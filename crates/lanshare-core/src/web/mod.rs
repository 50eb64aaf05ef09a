//! HTTP staging gateway for Lanshare.
//!
//! Any device on the network can drop a file here with a browser and any
//! other device can fetch it. Fetching hands the file out once: the entry
//! leaves the pending list and a history record is written.
//!
//! ## API Endpoints
//!
//! | Method | Endpoint | Description |
//! |--------|----------|-------------|
//! | GET | / | Plain-text service banner |
//! | GET | /api/pending_files | Files waiting to be fetched |
//! | GET | /api/transfer_history | Completed fetches |
//! | GET | /api/peers | Peers found by discovery |
//! | POST | /api/upload | Stage a file (multipart field `file`) |
//! | GET | /api/download/{file_id} | Fetch and remove a staged file |
//! | DELETE | /api/remove/{file_id} | Remove a staged file without fetching |

pub mod error;
pub mod handlers;

use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use axum::extract::DefaultBodyLimit;
use axum::routing::{delete, get, post};
use axum::Router;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower::limit::ConcurrencyLimitLayer;
use tower_http::cors::CorsLayer;
use tower_http::limit::RequestBodyLimitLayer;

use crate::discovery::PeerTable;
use crate::error::{Error, Result};
use crate::registry::TransferRegistry;
use crate::supervisor::ManagedListener;

/// Configuration for the staging gateway.
#[derive(Debug, Clone)]
pub struct WebServerConfig {
    /// Port to listen on
    pub port: u16,
    /// Bind to localhost only
    pub localhost_only: bool,
    /// Largest accepted request body in bytes
    pub max_upload_size: usize,
    /// Requests handled at once
    pub max_concurrent_requests: usize,
}

impl Default for WebServerConfig {
    fn default() -> Self {
        Self {
            port: crate::DEFAULT_WEB_PORT,
            localhost_only: false,
            max_upload_size: 1024 * 1024 * 1024,
            max_concurrent_requests: 32,
        }
    }
}

impl From<&crate::config::Config> for WebServerConfig {
    fn from(config: &crate::config::Config) -> Self {
        Self {
            port: config.network.web_port,
            localhost_only: config.network.localhost_only,
            max_upload_size: config.staging.max_upload_size,
            max_concurrent_requests: config.staging.max_concurrent_requests,
        }
    }
}

impl WebServerConfig {
    /// Get the bind address for the server.
    #[must_use]
    pub fn bind_addr(&self) -> SocketAddr {
        if self.localhost_only {
            SocketAddr::from(([127, 0, 0, 1], self.port))
        } else {
            SocketAddr::from(([0, 0, 0, 0], self.port))
        }
    }
}

/// State shared by every handler.
#[derive(Debug, Clone)]
pub struct AppState {
    /// Staged files and history
    pub registry: Arc<TransferRegistry>,
    /// Peers found by discovery
    pub peers: PeerTable,
    /// Name shown in the banner
    pub device_name: Arc<str>,
}

impl AppState {
    /// Create handler state.
    pub fn new(registry: Arc<TransferRegistry>, peers: PeerTable, device_name: &str) -> Self {
        Self {
            registry,
            peers,
            device_name: Arc::from(device_name),
        }
    }
}

/// Build the staging router with its limits applied.
pub fn router(state: AppState, config: &WebServerConfig) -> Router {
    Router::new()
        .route("/", get(handlers::index))
        .route("/api/pending_files", get(handlers::pending_files))
        .route("/api/transfer_history", get(handlers::transfer_history))
        .route("/api/peers", get(handlers::peers))
        .route("/api/upload", post(handlers::upload))
        .route("/api/download/{file_id}", get(handlers::download))
        .route("/api/remove/{file_id}", delete(handlers::remove))
        .fallback(handlers::not_found)
        .with_state(state)
        .layer(DefaultBodyLimit::disable())
        .layer(RequestBodyLimitLayer::new(config.max_upload_size))
        .layer(ConcurrencyLimitLayer::new(config.max_concurrent_requests.max(1)))
        .layer(CorsLayer::permissive())
}

/// The staging gateway server.
#[derive(Debug, Clone)]
pub struct StagingGateway {
    config: WebServerConfig,
    state: AppState,
}

impl StagingGateway {
    /// Create a gateway over `state`.
    pub fn new(config: WebServerConfig, state: AppState) -> Self {
        Self { config, state }
    }

    /// Gateway configuration.
    #[must_use]
    pub fn config(&self) -> &WebServerConfig {
        &self.config
    }

    /// Build the router for this gateway.
    pub fn router(&self) -> Router {
        router(self.state.clone(), &self.config)
    }

    /// Bind the configured address.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Network`] if the port cannot be bound.
    pub async fn bind(&self) -> Result<TcpListener> {
        let addr = self.config.bind_addr();
        TcpListener::bind(addr)
            .await
            .map_err(|e| Error::Network(format!("failed to bind web port {}: {e}", self.config.port)))
    }

    /// Serve requests on `listener` until `shutdown` is cancelled.
    ///
    /// # Errors
    ///
    /// Returns an error if the server fails.
    pub async fn serve(&self, listener: TcpListener, shutdown: CancellationToken) -> Result<()> {
        if let Ok(addr) = listener.local_addr() {
            tracing::info!("Staging gateway listening on http://{}", addr);
        }

        axum::serve(
            listener,
            self.router()
                .into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
        .map_err(|e| Error::Network(format!("staging gateway failed: {e}")))?;

        tracing::info!("Staging gateway stopped");
        Ok(())
    }
}

#[async_trait]
impl ManagedListener for StagingGateway {
    fn name(&self) -> &str {
        "staging gateway"
    }

    fn port(&self) -> u16 {
        self.config.port
    }

    async fn start(&self, shutdown: CancellationToken) -> Result<()> {
        let listener = self.bind().await?;
        let gateway = self.clone();
        tokio::spawn(async move {
            if let Err(e) = gateway.serve(listener, shutdown).await {
                tracing::error!("{}", e);
            }
        });
        Ok(())
    }
}
