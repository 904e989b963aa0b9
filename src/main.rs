//! Responses proxy.
//!
//! # Architecture Overview
//!
//! ```text
//!     Client ──▶ axum router ──▶ rewrite? ──▶ upstream client ──▶ Upstream
//!                (request id,    POST …/v1/responses only:
//!                 tracing)       buffer → gunzip → scan → splice | document
//!
//!     Client ◀── streamed response (hop-by-hop stripped) ◀────────── Upstream
//! ```

use std::net::SocketAddr;
use std::path::PathBuf;

use clap::Parser;
use tokio::net::TcpListener;

use responses_proxy::config::{load_config, validate_config, ConfigError, ProxyConfig};
use responses_proxy::observability::{logging, metrics};
use responses_proxy::{HttpServer, Shutdown};

#[derive(Debug, Parser)]
#[command(name = "responses-proxy", version, about = "Reverse proxy that normalizes responses API request bodies")]
struct Args {
    /// Path to a TOML configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Listen address, overriding `listener.bind_address`.
    #[arg(long)]
    listen: Option<String>,

    /// Upstream base URL, overriding `upstream.url`.
    #[arg(long)]
    upstream: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => load_config(path)?,
        None => ProxyConfig::default(),
    };
    if let Some(listen) = args.listen {
        config.listener.bind_address = listen;
    }
    if let Some(upstream) = args.upstream {
        config.upstream.url = upstream;
    }
    validate_config(&config).map_err(ConfigError::Validation)?;

    logging::init(&config.observability)?;

    tracing::info!("responses-proxy v{} starting", env!("CARGO_PKG_VERSION"));
    tracing::info!(
        bind_address = %config.listener.bind_address,
        upstream = %config.upstream.url,
        path_suffix = %config.rewrite.path_suffix,
        rewrite_enabled = config.rewrite.enabled,
        buffer_pre_grow = config.pool.buffer_pre_grow,
        buffer_max_keep = config.pool.buffer_max_keep,
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        let addr: SocketAddr = config.observability.metrics_address.parse()?;
        metrics::init_metrics(addr)?;
    }

    let server = HttpServer::new(&config)?;
    let listener = TcpListener::bind(&config.listener.bind_address).await?;

    let shutdown = Shutdown::new();
    shutdown.trigger_on_signal();
    server.run(listener, shutdown.subscribe()).await?;

    tracing::info!("Shutdown complete");
    Ok(())
}
