//! nutri-intake - Nomination intake service
//!
//! Stages uploaded nomination sheets, reconciles each row against the
//! eligibility engine and creates case records for approved nominations.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use nutri_common::config::{load_or_create_toml_config, resolve_config_path, DataFolderResolver};
use nutri_common::db::{init_database, PoolSettings};
use nutri_intake::services::{
    spawn_sweep_scheduler, EligibilityGateway, IntakeService, IntakeSettings, Reconciler, ReconcilerSettings,
    SpiffEngine, SqliteCatalogLookup,
};
use nutri_intake::AppState;

/// Command-line arguments for nutri-intake
#[derive(Parser, Debug)]
#[command(name = "nutri-intake")]
#[command(about = "Nomination intake and reconciliation service")]
#[command(version)]
struct Args {
    /// Port to listen on (overrides the config file)
    #[arg(short, long, env = "NUTRI_PORT")]
    port: Option<u16>,

    /// Path to the TOML config file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Folder holding the database and archived uploads
    #[arg(short, long)]
    data_folder: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config_path = resolve_config_path(args.config.as_deref());
    let config = load_or_create_toml_config(&config_path)
        .with_context(|| format!("Failed to load config from {}", config_path.display()))?;

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("nutri_intake={0},nutri_common={0},tower_http=info", config.logging.level).into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting nutri-intake v{}", env!("CARGO_PKG_VERSION"));
    info!("Config: {}", config_path.display());

    let data_folder = DataFolderResolver::new()
        .with_cli(args.data_folder.as_deref())
        .with_toml(&config)
        .resolve();
    std::fs::create_dir_all(&data_folder)
        .with_context(|| format!("Failed to create data folder {}", data_folder.display()))?;

    let db_path = data_folder.join(&config.database.file_name);
    info!("Database: {}", db_path.display());
    let pool = init_database(&db_path, PoolSettings::from(&config.database))
        .await
        .context("Failed to initialize database")?;

    let (bpm, token) = nutri_intake::config::effective_bpm_config(&config);
    let engine = SpiffEngine::new(&bpm, token).context("Failed to build BPM client")?;
    info!("Eligibility engine: {}", engine.endpoint());
    let gateway = EligibilityGateway::new(Arc::new(engine), Duration::from_secs(bpm.timeout_secs.max(1)));

    let settings = ReconcilerSettings::from_config(&config.intake, &config.database);
    let reconciler = Arc::new(Reconciler::new(
        pool.clone(),
        gateway,
        Arc::new(SqliteCatalogLookup::new(pool.clone())),
        settings.clone(),
    ));
    let intake = Arc::new(IntakeService::new(
        pool.clone(),
        IntakeSettings::from_config(&config.intake, &data_folder),
    ));

    let cancel = CancellationToken::new();
    let scheduler = spawn_sweep_scheduler(
        pool.clone(),
        Arc::clone(&reconciler),
        Duration::from_secs(config.intake.sweep_interval_secs),
        settings.default_sweep_limit,
        cancel.clone(),
    );

    let state = AppState::new(pool.clone(), reconciler, intake, config.intake.max_page_size);
    let app = nutri_intake::build_router(state);

    let port = args.port.unwrap_or(config.server.port);
    let addr: SocketAddr = format!("{}:{}", config.server.host, port)
        .parse()
        .with_context(|| format!("Invalid listen address {}:{}", config.server.host, port))?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind to {addr}"))?;
    info!("Listening on http://{}", addr);
    info!("Health check: http://{}/health", addr);

    let shutdown_token = cancel.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            shutdown_token.cancel();
        })
        .await
        .context("Server error")?;

    cancel.cancel();
    if let Some(handle) = scheduler {
        if let Err(e) = handle.await {
            error!(error = %e, "Sweep scheduler task failed");
        }
    }
    pool.close().await;

    info!("Server shutdown complete");
    Ok(())
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
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
                error!(error = %e, "Failed to install SIGTERM handler");
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
