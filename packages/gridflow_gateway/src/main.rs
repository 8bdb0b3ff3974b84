use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use serde_json::json;
use tower_http::cors::CorsLayer;
use tower_http::trace::{MakeSpan, TraceLayer};
use tracing::info;
use tracing_subscriber::prelude::*;
use uuid::Uuid;

mod auth;
mod backend;
mod bus;
mod config;
mod metrics;
mod server;
mod ws;

use crate::config::{FileConfig, GatewayDirs, load_config};
use crate::server::{AppState, build_router};

/// Custom span maker that adds a unique request ID to each incoming request
#[derive(Clone)]
struct RequestIdMakeSpan;

impl<B> MakeSpan<B> for RequestIdMakeSpan {
    fn make_span(&mut self, request: &axum::http::Request<B>) -> tracing::Span {
        let request_id = Uuid::new_v4().to_string();
        tracing::info_span!(
            "request",
            method = %request.method(),
            uri = %request.uri(),
            request_id = %request_id,
        )
    }
}

#[derive(Parser)]
#[command(name = "gridflow-gateway")]
#[command(about = "Realtime collaboration gateway for GridFlow sheets")]
struct Cli {
    /// Host to bind to (overrides the config file)
    #[arg(short = 'b', long)]
    host: Option<String>,

    /// Port for the gateway (overrides the config file)
    #[arg(short, long)]
    port: Option<u16>,

    /// Custom data directory (defaults to ~/.gridflow)
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    run_server(cli).await
}

async fn run_server(cli: Cli) -> Result<()> {
    // Setup logging
    let default_directive = if cli.debug {
        "gridflow_gateway=debug,tower_http=debug,info"
    } else {
        "gridflow_gateway=info,tower_http=info,warn"
    };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_directive));
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(env_filter)
        .init();

    info!("Starting GridFlow Gateway");

    let data_dir = cli
        .data_dir
        .or_else(|| std::env::var("GRIDFLOW_DATA_DIR").ok().map(PathBuf::from));
    let dirs = GatewayDirs::new(data_dir)?;
    info!("Data directory: {}", dirs.data_dir.display());

    let mut file: FileConfig = load_config(&dirs.data_dir)
        .extract()
        .context("Invalid configuration")?;
    if let Some(host) = cli.host {
        file.server.host = host;
    }
    if let Some(port) = cli.port {
        file.server.port = port;
    }

    let state = AppState::from_config(&file)?;
    let registry_for_shutdown = state.registry.clone();
    let bind_addr = state.server.bind_addr();

    let app = build_router(state)
        .layer(TraceLayer::new_for_http().make_span_with(RequestIdMakeSpan))
        .layer(CorsLayer::permissive());

    let addr = bind_addr.parse::<SocketAddr>()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    let actual_addr = listener.local_addr()?;

    info!("GridFlow Gateway listening on http://{}", actual_addr);
    info!("API endpoints:");
    info!("  GET /api/ws      - Multiplexed WebSocket for client sessions");
    info!("  GET /health      - Gateway health");
    info!("  GET /health/live - Liveness probe");
    info!("  GET /metrics     - Metrics snapshot");

    // Create shutdown signal handler
    let shutdown_signal = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
        info!("Received shutdown signal, cleaning up...");
    };

    // Run server with graceful shutdown
    let server_result = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal)
        .await
        .context("Server error");

    // Sessions live on spawned tasks and survive the accept loop. Tell them,
    // give their sender tasks a moment to flush the notice, then cancel.
    let notified = registry_for_shutdown
        .broadcast_event(json!({ "type": "gateway_shutdown" }))
        .await;
    if notified > 0 {
        info!("Notified {} live sessions of shutdown", notified);
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
    }
    let cancelled = registry_for_shutdown.shutdown_all().await;
    if cancelled > 0 {
        info!("Cancelled {} live sessions", cancelled);
    }

    info!("Shutdown complete");
    server_result
}
