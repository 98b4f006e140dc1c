//! CDC Indexer Main Entry Point
//!
//! Runs either the ingestion pipeline (source file to Kafka) or the indexing
//! pipeline (Kafka to OpenSearch).

use std::env;
use std::path::PathBuf;

use cdc_indexer::{Dependencies, IndexingError, RunMode, Settings};
use clap::Parser;
use dotenv::dotenv;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser, Debug)]
#[command(name = "cdc-indexer", version, about = "Kong CDC events to OpenSearch")]
struct Cli {
    /// Pipeline to run
    #[arg(long, value_enum, default_value = "ingest")]
    mode: RunMode,

    /// Event source for the ingest mode, overrides INGEST_SOURCE_PATH
    #[arg(long)]
    source: Option<PathBuf>,
}

/// Initialize tracing/logging.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("cdc_indexer=info,cdc_indexer_repository=info"));

    let json = env::var("LOG_FORMAT")
        .map(|format| format.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_target(true)
                    .with_thread_ids(true),
            )
            .init();

        info!(
            service_name = "cdc-indexer",
            service_version = env!("CARGO_PKG_VERSION"),
            "Tracing initialized with JSON format"
        );
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().with_target(true).pretty())
            .init();

        info!(
            service_name = "cdc-indexer",
            service_version = env!("CARGO_PKG_VERSION"),
            "Tracing initialized with console output"
        );
    }
}

#[tokio::main]
async fn main() -> Result<(), IndexingError> {
    // Load environment variables from .env file
    dotenv().ok();

    let cli = Cli::parse();

    init_tracing();

    info!(mode = ?cli.mode, "Starting CDC indexer");

    let settings = Settings::from_env().map_err(|e| {
        error!(error = %e, "Invalid configuration");
        e
    })?;

    let deps = match Dependencies::new(&settings, cli.mode, cli.source).await {
        Ok(deps) => {
            info!("Dependencies initialized successfully");
            deps
        }
        Err(e) => {
            error!(error = %e, "Failed to initialize dependencies");
            return Err(e);
        }
    };

    match deps.orchestrator.run().await {
        Ok(()) => {
            info!("CDC indexer completed successfully");
            Ok(())
        }
        Err(e) => {
            error!(error = %e, "CDC indexer failed");
            Err(e.into())
        }
    }
}
