//! fabricd - Fabric AI server daemon
//!
//! Re-upholsters a couch photo with an uploaded fabric swatch using a
//! hosted image-generation model on Replicate.

pub mod api;
pub mod config;
pub mod replicate;
pub mod restyle;

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use axum::Router;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{info, warn};

pub use config::Config;
use replicate::{ModelRef, ReplicateClient};

/// The fabricd server instance
pub struct Server {
    config: Config,
    replicate: Arc<ReplicateClient>,
    model: Arc<ModelRef>,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
}

impl Server {
    /// Create a new server instance
    ///
    /// Fails if the configured model identifier is malformed.
    pub fn new(config: Config) -> Result<Self> {
        let model = ModelRef::parse(&config.generation.model)?;
        let replicate = ReplicateClient::new(&config.replicate)?;
        if !replicate.is_configured() {
            warn!("REPLICATE_API_TOKEN is not set; generation requests will fail");
        }
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        Ok(Self {
            config,
            replicate: Arc::new(replicate),
            model: Arc::new(model),
            shutdown_tx,
            shutdown_rx,
        })
    }

    /// Build the router
    fn router(&self) -> Router {
        let state = api::AppState {
            replicate: self.replicate.clone(),
            model: self.model.clone(),
            params: Arc::new(self.config.generation.clone()),
        };
        api::router(state, self.config.server.max_body_bytes)
    }

    /// Run the server until shutdown
    pub async fn run(&self) -> Result<()> {
        let listener = TcpListener::bind(self.config.server.bind_addr).await?;
        let local_addr = listener.local_addr()?;
        info!("fabricd listening on {}", local_addr);

        let router = self.router();
        let mut shutdown_rx = self.shutdown_rx.clone();

        axum::serve(listener, router)
            .with_graceful_shutdown(async move {
                shutdown_rx.changed().await.ok();
            })
            .await?;

        info!("fabricd shutdown complete");
        Ok(())
    }

    /// Signal the server to shutdown
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }

    /// Get the configured bind address
    pub fn bind_addr(&self) -> SocketAddr {
        self.config.server.bind_addr
    }
}
