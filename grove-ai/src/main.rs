//! grove-ai - Crop suggestion and disease detection service
//!
//! Accepts generation requests over HTTP, runs them in the background and reports
//! progress and results to per-user WebSocket rooms.

use std::fs::OpenOptions;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use grove_common::config::{
    load_module_config, CompiledDefaults, RootFolderInitializer, RootFolderResolver,
};
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use grove_ai::notify::NotificationHub;
use grove_ai::pipeline::PipelineDeps;
use grove_ai::services::TempFileStore;
use grove_ai::AppState;

const MODULE_NAME: &str = "grove-ai";

/// Command-line arguments for grove-ai
#[derive(Parser, Debug)]
#[command(name = "grove-ai")]
#[command(about = "Crop suggestion and disease detection service for Grove")]
#[command(version)]
struct Args {
    /// Root folder holding the database and temporary uploads
    #[arg(short, long, env = "GROVE_ROOT_FOLDER")]
    root_folder: Option<PathBuf>,

    /// TOML config file (default: ~/.config/grove/grove-ai.toml)
    #[arg(short, long, env = "GROVE_CONFIG")]
    config: Option<PathBuf>,

    /// Address to listen on
    #[arg(short, long, env = "GROVE_BIND_ADDRESS")]
    bind: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = load_module_config(MODULE_NAME, args.config.as_deref());

    // RUST_LOG wins over the configured level
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.level));
    let file_layer = match &config.logging.file {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Failed to open log file {}", path.display()))?;
            Some(fmt::layer().with_ansi(false).with_writer(Arc::new(file)))
        }
        None => None,
    };
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer())
        .with(file_layer)
        .init();

    info!("Starting grove-ai");
    info!(
        "Version: {} ({}, {})",
        env!("CARGO_PKG_VERSION"),
        env!("GROVE_GIT_HASH"),
        env!("GROVE_BUILD_PROFILE")
    );

    // Step 1: Resolve and create the root folder
    let root_folder = RootFolderResolver::new(MODULE_NAME)
        .resolve_with_override(args.root_folder.as_deref());
    let initializer = RootFolderInitializer::new(root_folder);
    initializer
        .ensure_directory_exists()
        .context("Failed to initialize root folder")?;
    info!("Root folder: {}", initializer.root_folder().display());

    // Step 2: Open or create the database
    let db_path = initializer.database_path();
    info!("Database: {}", db_path.display());
    let db_pool = grove_ai::db::init_database_pool(&db_path).await?;
    info!("Database connection established");

    // Step 3: Providers and pipeline settings
    let pipeline_config = grove_ai::config::validate_pipeline_config(config.pipeline.clone())?;
    let providers = grove_ai::config::build_providers(&config)?;
    info!(
        similarity_threshold = ?pipeline_config.similarity_threshold,
        enrichment_attempts = pipeline_config.enrichment_attempts,
        weather_days = pipeline_config.weather_days,
        image_hosting = providers.image_host.is_some(),
        "Pipelines configured"
    );

    let hub = Arc::new(NotificationHub::new(pipeline_config.room_capacity));
    let deps = PipelineDeps {
        db: db_pool,
        hub,
        ai: providers.ai,
        weather: providers.weather,
        image_host: providers.image_host,
        temp_files: TempFileStore::new(initializer.uploads_path()),
        config: pipeline_config,
    };

    let state = AppState::new(deps);
    let queue = state.queue.clone();
    let app = grove_ai::build_router(state);

    // Step 4: Serve
    let bind_address = args
        .bind
        .or(config.bind_address.clone())
        .unwrap_or_else(|| CompiledDefaults::for_current_platform().bind_address);
    let listener = tokio::net::TcpListener::bind(&bind_address)
        .await
        .with_context(|| format!("Failed to bind to {}", bind_address))?;
    info!("Listening on http://{}", bind_address);
    info!("Health check: http://{}/health", bind_address);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    queue.shutdown().await;
    info!("Server shutdown complete");
    Ok(())
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!("Failed to install terminate handler: {}", e);
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
