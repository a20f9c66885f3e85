use anyhow::{Context, Result};
use headcount_core::ReportAggregator;
use headcount_store::{FaceStore, StoreOptions};
use headcountd::{spawn_reporter, spawn_sweeper, Config, LogSink, ReportSchedule, ReportSink, SpoolSink};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    tracing::info!("headcountd starting");

    let config = Config::load().context("failed to load configuration")?;
    tracing::info!(
        db = %config.db_path.display(),
        dimension = config.embedding_dim,
        resolver = ?config.resolver().config(),
        cameras = ?config.cameras,
        "configuration loaded"
    );

    let store = FaceStore::open(
        &config.db_path,
        StoreOptions {
            dimension: config.embedding_dim,
            clock: Arc::new(headcount_core::SystemClock),
        },
    )
    .await
    .with_context(|| format!("failed to open gallery at {}", config.db_path.display()))?;

    let mut sinks: Vec<Box<dyn ReportSink>> = vec![Box::new(LogSink)];
    if let Some(dir) = &config.report_spool_dir {
        tracing::info!(dir = %dir.display(), "spooling reports to disk");
        sinks.push(Box::new(SpoolSink::new(dir)));
    }

    let cancel = CancellationToken::new();
    let sweeper = spawn_sweeper(store.clone(), config.retention_policy(), cancel.clone());
    let reporter = spawn_reporter(
        store.clone(),
        ReportAggregator::local(),
        ReportSchedule {
            interval: Duration::from_secs(config.report_interval_secs),
            window: Duration::from_secs(config.report_window_secs),
            camera_ids: config.cameras.clone(),
            fallback_to_latest: config.report_fallback,
        },
        sinks,
        cancel.clone(),
    );

    tracing::info!("headcountd ready");

    // Keep running until signaled
    tokio::signal::ctrl_c().await?;
    tracing::info!("headcountd shutting down");

    cancel.cancel();
    let _ = tokio::join!(sweeper, reporter);
    store.close().await.context("failed to close gallery")?;

    Ok(())
}
