//! fabricd - Fabric AI server daemon

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use fabricd::{Config, Server};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Fabric AI server daemon
#[derive(Parser, Debug)]
#[command(name = "fabricd", version, about = "Apply fabric textures to furniture photos")]
struct Args {
    /// TOML config file (defaults to ./fabricd.toml when present)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Address to listen on, overrides server.bind_addr
    #[arg(short, long)]
    bind: Option<SocketAddr>,

    /// Emit logs as JSON
    #[arg(long)]
    log_json: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize tracing
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "fabricd=info,tower_http=debug".into());
    if args.log_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }

    let mut config = Config::load(args.config.as_deref())?;
    if let Some(bind) = args.bind {
        config.server.bind_addr = bind;
    }
    info!("Loaded config: {:?}", config.replicate);

    let server = Arc::new(Server::new(config)?);

    let signal_server = server.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Received Ctrl-C, shutting down");
            signal_server.shutdown();
        }
    });

    server.run().await?;

    Ok(())
}
