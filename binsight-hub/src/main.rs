//! BinSight Hub - Main entry point
//!
//! Central event pipeline for the waste classification system: ingests
//! classification payloads, persists them to SQLite, derives statistics
//! and alerts, and fans events out to grouped WebSocket subscribers.

use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use binsight_common::config::load_hub_config;
use binsight_hub::{build_router, db, upstream, AppState};

/// Command-line arguments for binsight-hub
#[derive(Parser, Debug)]
#[command(name = "binsight-hub")]
#[command(about = "Classification event hub for BinSight")]
#[command(version)]
struct Args {
    /// Port to listen on (overrides the config file)
    #[arg(short, long, env = "BINSIGHT_PORT")]
    port: Option<u16>,

    /// SQLite database file (overrides the config file)
    #[arg(short, long, env = "BINSIGHT_DATABASE")]
    database: Option<PathBuf>,

    /// Configuration file
    #[arg(short, long, env = "BINSIGHT_CONFIG")]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "binsight_hub=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Parse command-line arguments
    let args = Args::parse();

    let mut config = load_hub_config(args.config.as_deref()).context("Failed to load configuration")?;
    if let Some(port) = args.port {
        config.port = port;
    }
    if let Some(database) = args.database {
        config.database_path = database;
    }

    info!("Starting BinSight hub on port {}", config.port);
    info!("Database: {}", config.database_path.display());

    let pool = db::init::init_database(&config.database_path)
        .await
        .context("Failed to initialize database")?;

    let state = AppState::new(config, pool);

    // Reload recent alerts so the ring survives restarts
    match state.alerts.init_from_storage().await {
        Ok(count) => info!("Alert ring seeded with {} stored alerts", count),
        Err(e) => warn!("Could not seed alert ring from storage: {e}"),
    }

    tokio::spawn(upstream::run_probe_loop(state.clone()));
    tokio::spawn(upstream::run_status_loop(state.clone()));

    // Build the application router
    let app = build_router(state.clone());

    let addr = SocketAddr::from(([0, 0, 0, 0], state.config.port));

    info!("Starting HTTP server on {}", addr);
    info!("Hub endpoint: ws://{}/hub", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context("Failed to bind to address")?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("Server shutdown complete");
    Ok(())
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down");
        },
        _ = terminate => {
            info!("Received terminate signal, shutting down");
        },
    }
}
