use headcount_core::counters::{frame_counts, FrameCounts, StoredCounts};
use headcount_core::{
    AnalyzerError, BoundingBox, Embedding, FaceAnalyzer, FaceAttributes, IdentityResolver,
    LivenessResult, Resolution,
};
use headcount_store::{FaceStore, StoreError};
use image::RgbImage;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tokio::runtime::Handle;
use tokio::sync::{mpsc, oneshot};

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("analyzer error: {0}")]
    Analyzer(#[from] AnalyzerError),
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error("failed to spawn engine thread: {0}")]
    Spawn(#[source] std::io::Error),
    #[error("engine thread exited")]
    ChannelClosed,
    #[error("spawn_engine must be called from within a tokio runtime")]
    NoRuntime,
}

/// One resolved face.
#[derive(Debug, Clone, Serialize)]
pub struct FaceResult {
    pub bbox: BoundingBox,
    pub resolution: Resolution,
    pub attributes: FaceAttributes,
    pub liveness: Option<LivenessResult>,
}

/// Per-stage timings in milliseconds, averaged over the faces of one frame.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct RecognitionMetrics {
    /// Whole-frame detection time.
    pub detection_ms: f64,
    pub embedding_ms: f64,
    pub liveness_ms: f64,
    pub classification_ms: f64,
    pub resolve_ms: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct FrameReport {
    pub camera_id: String,
    pub faces: Vec<FaceResult>,
    pub frame_counts: FrameCounts,
    pub stored_counts: StoredCounts,
    /// `None` when the frame had no faces.
    pub metrics: Option<RecognitionMetrics>,
}

#[derive(Debug)]
pub enum FrameOutcome {
    Processed(FrameReport),
    /// Another frame from this camera was still in flight.
    Dropped,
}

/// Clears the in-flight flag when the request is finished or abandoned.
struct InFlight(Arc<AtomicBool>);

impl Drop for InFlight {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

struct FrameRequest {
    frame: RgbImage,
    reply: oneshot::Sender<Result<FrameReport, EngineError>>,
    in_flight: InFlight,
}

/// Clone-safe handle to one camera's engine thread.
#[derive(Clone)]
pub struct EngineHandle {
    camera_id: Arc<str>,
    tx: mpsc::Sender<FrameRequest>,
    busy: Arc<AtomicBool>,
}

impl EngineHandle {
    pub fn camera_id(&self) -> &str {
        &self.camera_id
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }

    /// Process `frame`, or drop it if this camera already has a frame in flight.
    pub async fn submit(&self, frame: RgbImage) -> Result<FrameOutcome, EngineError> {
        if self
            .busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            tracing::debug!(camera = %self.camera_id, "frame dropped; previous frame in flight");
            return Ok(FrameOutcome::Dropped);
        }

        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(FrameRequest {
                frame,
                reply: reply_tx,
                in_flight: InFlight(Arc::clone(&self.busy)),
            })
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        let report = reply_rx.await.map_err(|_| EngineError::ChannelClosed)??;
        Ok(FrameOutcome::Processed(report))
    }
}

/// Spawn the engine for `camera_id` on a dedicated OS thread.
///
/// Must be called from within a tokio runtime: the thread drives store calls on it.
/// Outside one this returns [`EngineError::NoRuntime`].
pub fn spawn_engine<A>(
    camera_id: impl Into<String>,
    analyzer: A,
    store: FaceStore,
    resolver: IdentityResolver,
) -> Result<EngineHandle, EngineError>
where
    A: FaceAnalyzer + 'static,
{
    let camera_id: Arc<str> = Arc::from(camera_id.into());
    let runtime = Handle::try_current().map_err(|_| EngineError::NoRuntime)?;
    let (tx, mut rx) = mpsc::channel::<FrameRequest>(1);

    let mut engine = FrameEngine {
        camera_id: Arc::clone(&camera_id),
        analyzer,
        store,
        resolver,
        runtime,
    };

    std::thread::Builder::new()
        .name(format!("headcount-{camera_id}"))
        .spawn(move || {
            tracing::info!(camera = %engine.camera_id, "engine thread started");
            while let Some(FrameRequest { frame, reply, in_flight }) = rx.blocking_recv() {
                let result = engine.process(&frame);
                if let Err(e) = &result {
                    tracing::warn!(camera = %engine.camera_id, error = %e, "frame failed");
                }
                // Clear the flag before the caller can observe the reply.
                drop(in_flight);
                let _ = reply.send(result);
            }
            tracing::info!(camera = %engine.camera_id, "engine thread exiting");
        })
        .map_err(EngineError::Spawn)?;

    Ok(EngineHandle {
        camera_id,
        tx,
        busy: Arc::new(AtomicBool::new(false)),
    })
}

struct FrameEngine<A> {
    camera_id: Arc<str>,
    analyzer: A,
    store: FaceStore,
    resolver: IdentityResolver,
    runtime: Handle,
}

#[derive(Default)]
struct StageTimes {
    embedding: f64,
    liveness: f64,
    classification: f64,
    resolve: f64,
}

impl<A: FaceAnalyzer> FrameEngine<A> {
    fn process(&mut self, frame: &RgbImage) -> Result<FrameReport, EngineError> {
        let started = Instant::now();
        let detected = self.analyzer.detect_faces(frame)?;
        let detection_ms = elapsed_ms(started);

        let mut faces = Vec::with_capacity(detected.len());
        let mut times = StageTimes::default();

        for face in &detected {
            let t = Instant::now();
            // A face that cannot be embedded is skipped; faces already resolved stay committed.
            let raw = match self.analyzer.embed(&face.crop) {
                Ok(raw) => raw,
                Err(e) => {
                    tracing::warn!(camera = %self.camera_id, error = %e, "embedding failed; face skipped");
                    continue;
                }
            };
            let embedding = match Embedding::normalize(&raw) {
                Ok(e) => e,
                // Left un-normalized; the resolver mints an id for it without storing.
                Err(e) => {
                    tracing::warn!(camera = %self.camera_id, error = %e, "embedding could not be normalized");
                    Embedding::new(raw)
                }
            };
            times.embedding += elapsed_ms(t);

            let t = Instant::now();
            let liveness = self.analyzer.check_liveness(frame, &face.bbox);
            times.liveness += elapsed_ms(t);

            let t = Instant::now();
            let attributes = self.analyzer.classify(&face.crop);
            times.classification += elapsed_ms(t);

            let t = Instant::now();
            let resolution = self.runtime.block_on(self.store.resolve(
                self.resolver,
                embedding,
                attributes.clone(),
            ))?;
            times.resolve += elapsed_ms(t);

            faces.push(FaceResult {
                bbox: face.bbox.clone(),
                resolution,
                attributes,
                liveness,
            });
        }

        let frame_counts = frame_counts(faces.iter().map(|f| &f.attributes));
        let stored_counts = self.runtime.block_on(self.store.stored_counts())?;

        let metrics = (!faces.is_empty()).then(|| {
            let n = faces.len() as f64;
            RecognitionMetrics {
                detection_ms,
                embedding_ms: times.embedding / n,
                liveness_ms: times.liveness / n,
                classification_ms: times.classification / n,
                resolve_ms: times.resolve / n,
            }
        });

        tracing::debug!(
            camera = %self.camera_id,
            faces = faces.len(),
            stored = stored_counts.total,
            "frame processed"
        );

        Ok(FrameReport {
            camera_id: self.camera_id.to_string(),
            faces,
            frame_counts,
            stored_counts,
            metrics,
        })
    }
}

fn elapsed_ms(since: Instant) -> f64 {
    since.elapsed().as_secs_f64() * 1_000.0
}
