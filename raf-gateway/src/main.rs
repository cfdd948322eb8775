//! raf-gateway - RAF Calculator API
//!
//! Accepts membership and diagnosis records for a payment year, stages them
//! into the scoring database, runs the scoring routine and returns its rows.
//! Results are memoized per canonical request.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use raf_common::config::TomlConfig;
use raf_gateway::engine::SqliteBackend;
use raf_gateway::{build_router, AppState, Orchestrator};
use tokio::signal;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Command-line arguments for raf-gateway
#[derive(Parser, Debug)]
#[command(name = "raf-gateway")]
#[command(about = "Memoized RAF scoring gateway")]
#[command(version)]
struct Args {
    /// Configuration file (otherwise RAF_CONFIG, then platform defaults)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Port to listen on
    #[arg(short, long, env = "PORT")]
    port: Option<u16>,

    /// Address to bind
    #[arg(long, env = "RAF_BIND")]
    bind: Option<String>,

    /// Staging database URL
    #[arg(long, env = "RAF_DATABASE_URL")]
    database_url: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Start at RUST_LOG (or info) so configuration loading is logged, then
    // switch to the configured level once it is known
    let (filter, filter_handle) = tracing_subscriber::reload::Layer::new(
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    );
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!(
        "Starting RAF gateway v{} [{}] built {} ({})",
        env!("CARGO_PKG_VERSION"),
        env!("GIT_HASH"),
        env!("BUILD_TIMESTAMP"),
        env!("BUILD_PROFILE")
    );

    let mut config = TomlConfig::load(args.config.as_deref()).context("Failed to load configuration")?;
    if let Some(port) = args.port {
        config.server.port = port;
    }
    if let Some(bind) = args.bind {
        config.server.bind = bind;
    }
    if let Some(url) = args.database_url {
        config.database.url = url;
    }

    if std::env::var_os("RUST_LOG").is_none() {
        let level = &config.logging.level;
        filter_handle
            .reload(EnvFilter::new(format!(
                "raf_gateway={0},raf_common={0},tower_http={0}",
                level
            )))
            .context("Failed to apply configured log level")?;
    }

    config.validate().context("Invalid configuration")?;

    let pool = raf_common::db::connect(&config.database)
        .await
        .context("Failed to connect to staging database")?;

    let backend = Arc::new(SqliteBackend::new(pool, config.routine.statement.as_str()));
    let orchestrator = Arc::new(Orchestrator::from_config(backend, &config));
    info!(
        "Result cache: capacity {}, ttl {:?}, invalidation {:?}",
        config.cache.capacity,
        config.cache.ttl(),
        config.cache.invalidation
    );

    let state = AppState::new(orchestrator, config.server.max_body_bytes);
    let app = build_router(state);

    let addr = config.server.socket_addr().context("Invalid bind address")?;

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context("Failed to bind to address")?;
    info!("raf-gateway listening on http://{}", addr);

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
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
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
