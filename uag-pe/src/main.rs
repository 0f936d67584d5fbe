//! uag-pe - Prediction Engine service
//!
//! Consumes student-profile and OCR domain events, runs the three-stage
//! admission prediction pipeline against the external scoring service, and
//! maintains the per-student prediction result record.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;

use uag_common::config::PredictionTuning;
use uag_common::events::EventBus;
use uag_pe::services::{HttpScoringClient, PredictionOrchestrator};
use uag_pe::AppState;

#[derive(Debug, Parser)]
#[command(name = "uag-pe", about = "UAG prediction engine service")]
struct Args {
    /// Path to the TOML configuration file
    #[arg(long, env = "UAG_CONFIG")]
    config: Option<PathBuf>,

    /// SQLite database path (overrides config file)
    #[arg(long)]
    database: Option<PathBuf>,

    /// Bind address for the health endpoint
    #[arg(long, env = "UAG_BIND", default_value = "127.0.0.1:5741")]
    bind: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    info!("Starting uag-pe (Prediction Engine)");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let toml_config = uag_common::config::load_toml_config(args.config.as_deref())?;

    let db_path = uag_common::config::resolve_database_path(args.database.as_deref(), &toml_config);
    info!("Database: {}", db_path.display());
    let db = uag_common::db::init_database(&db_path).await?;

    let scoring = uag_pe::config::resolve_scoring_config(&toml_config);
    info!("Scoring service: {}", scoring.base_url);
    let backend = Arc::new(
        HttpScoringClient::new(&scoring.base_url, scoring.request_timeout)
            .map_err(|e| anyhow::anyhow!("Failed to build scoring client: {e}"))?,
    );

    let tuning = PredictionTuning::from_sources(&toml_config.prediction);
    let event_bus = EventBus::new(256);

    let shutdown = CancellationToken::new();
    let orchestrator = PredictionOrchestrator::new(db.clone(), backend, &tuning);
    let consumer = {
        let rx = event_bus.subscribe();
        let token = shutdown.clone();
        tokio::spawn(async move { orchestrator.run(rx, token).await })
    };

    let state = AppState::new(db, event_bus);
    let app = uag_pe::build_router(state);
    let listener = tokio::net::TcpListener::bind(&args.bind).await?;
    info!("Listening on http://{}", args.bind);
    info!("Health check: http://{}/health", args.bind);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Received ctrl-c, shutting down");
        })
        .await?;

    shutdown.cancel();
    let _ = consumer.await;

    Ok(())
}
