use std::sync::Arc;

use anyhow::Context;
use clap::Parser;

use attestor::batch::BatchCoordinator;
use attestor::config::Settings;
use attestor::graph::GraphRunner;
use attestor::jobs::{JobManager, MemoryJobStore};
use attestor::registry::ProviderRegistry;
use attestor::server::{AppState, start};

#[derive(Parser, Debug)]
#[command(name = "attestor", version, about = "Control-test evaluation service")]
struct Args {
    /// Log output format.
    #[arg(long, env = "LOG_FORMAT", default_value = "text")]
    log_format: LogFormat,

    /// Number of job dequeue workers.
    #[arg(long, env = "JOB_WORKERS", default_value_t = 1)]
    job_workers: usize,
}

#[derive(Debug, Clone, Copy, clap::ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let args = Args::parse();

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    match args.log_format {
        LogFormat::Json => tracing_subscriber::fmt().with_env_filter(filter).json().init(),
        LogFormat::Text => tracing_subscriber::fmt().with_env_filter(filter).init(),
    }

    let settings = Settings::from_env().context("loading configuration")?;
    tracing::info!(
        llm = settings.llm.provider.as_str(),
        ocr = settings.ocr.provider.as_str(),
        "starting attestor {}",
        env!("CARGO_PKG_VERSION")
    );

    // Provider registry: constructed once, fatal on failure.
    let registry = Arc::new(
        ProviderRegistry::from_settings(&settings).context("constructing provider registry")?,
    );

    let runner = Arc::new(GraphRunner::new(
        registry.llm(),
        registry.ocr(),
        settings.clone(),
    ));
    let coordinator = Arc::new(BatchCoordinator::new(runner, &settings));

    let store = Arc::new(MemoryJobStore::new());
    let manager = Arc::new(JobManager::new(
        store,
        Arc::clone(&coordinator),
        settings.jobs.clone(),
    ));

    for _ in 0..args.job_workers.max(1) {
        tokio::spawn(Arc::clone(&manager).run_worker());
    }
    tokio::spawn(Arc::clone(&manager).run_reaper());

    start(AppState {
        settings,
        registry,
        coordinator,
        manager,
    })
    .await
}
