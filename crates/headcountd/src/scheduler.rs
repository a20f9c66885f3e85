//! Periodic background work: retention sweeps and report publication.

use crate::sink::ReportSink;
use headcount_core::retention::RetentionPolicy;
use headcount_core::{Report, ReportAggregator, ReportRequest};
use headcount_store::{FaceStore, StoreError};
use std::time::Duration;
use thiserror::Error;
use tokio::task::{JoinError, JoinHandle};
use tokio::time::{self, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportSchedule {
    pub interval: Duration,
    /// Window length, ending at each tick.
    pub window: Duration,
    pub camera_ids: Vec<String>,
    pub fallback_to_latest: bool,
}

impl ReportSchedule {
    /// The request for a tick at `now_millis`: `[now - window, now]`.
    pub fn request_at(&self, now_millis: i64) -> ReportRequest {
        let window = i64::try_from(self.window.as_millis()).unwrap_or(i64::MAX);
        ReportRequest {
            camera_ids: self.camera_ids.clone(),
            from: now_millis.saturating_sub(window),
            to: now_millis,
            fallback_to_latest: self.fallback_to_latest,
        }
    }
}

/// Run the retention sweep every `policy.interval` until cancelled. The first sweep runs
/// immediately.
pub fn spawn_sweeper(
    store: FaceStore,
    policy: RetentionPolicy,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        tracing::info!(
            horizon_secs = policy.horizon.as_secs(),
            interval_secs = policy.interval.as_secs(),
            "starting retention sweeper"
        );
        let mut interval = time::interval(policy.interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!("retention sweeper cancelled");
                    break;
                }
                _ = interval.tick() => {
                    // Failures are retried on the next tick.
                    if let Err(e) = store.sweep(policy).await {
                        tracing::warn!(error = %e, "retention sweep failed");
                    }
                }
            }
        }
    })
}

#[derive(Error, Debug)]
pub enum ReportError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("report sinks panicked: {0}")]
    Sinks(#[from] JoinError),
}

/// Build one report and hand it to every sink on the blocking pool. Sink failures are
/// logged, not returned.
pub async fn publish_report(
    store: &FaceStore,
    aggregator: ReportAggregator,
    schedule: &ReportSchedule,
    sinks: &mut Vec<Box<dyn ReportSink>>,
) -> Result<Report, ReportError> {
    let now = store.now_millis();
    let report = store
        .build_report(aggregator, schedule.request_at(now))
        .await?;

    let mut batch = std::mem::take(sinks);
    let (batch, report) = tokio::task::spawn_blocking(move || {
        for sink in batch.iter_mut() {
            if let Err(e) = sink.publish(&report, now) {
                tracing::warn!(sink = sink.name(), error = %e, "report sink failed");
            }
        }
        (batch, report)
    })
    .await?;
    *sinks = batch;
    Ok(report)
}

/// Publish a report every `schedule.interval` until cancelled.
pub fn spawn_reporter(
    store: FaceStore,
    aggregator: ReportAggregator,
    schedule: ReportSchedule,
    mut sinks: Vec<Box<dyn ReportSink>>,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        tracing::info!(
            interval_secs = schedule.interval.as_secs(),
            window_secs = schedule.window.as_secs(),
            cameras = ?schedule.camera_ids,
            fallback = schedule.fallback_to_latest,
            "starting report scheduler"
        );
        let mut interval = time::interval(schedule.interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // Skip the immediate first tick; the first window closes one interval from now.
        interval.tick().await;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!("report scheduler cancelled");
                    break;
                }
                _ = interval.tick() => {
                    if let Err(e) = publish_report(&store, aggregator, &schedule, &mut sinks).await {
                        tracing::warn!(error = %e, "report failed");
                    }
                }
            }
        }
    })
}
