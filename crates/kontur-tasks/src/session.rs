//! A detector, its heap and an executor wired together.
//!
//! [`Session`] is the intended entry point for applications: construct
//! one per backend, wait for readiness once, then submit detections.
//! Every detection goes through the executor, so at most one runs at a
//! time and each one sees the previous one's retained snapshot.

use std::convert::Infallible;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use kontur_pipeline::{
    BufferHandle, Contour, DetectOptions, Detector, GrayImage, NativeHeap, NoopObserver, Observer,
    PipelineError, PipelineResult, Point, ResourceError, ResourceTracker, Surface,
};

use crate::executor::{Completion, ExecutorConfig, TaskExecutor};
use crate::readiness::{ReadinessPolicy, wait_until_ready};

/// How long the "ready" notice is shown.
const READY_MESSAGE_DURATION: Duration = Duration::from_millis(1400);

/// Session tuning.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SessionConfig {
    /// Queue pacing and failure message timing.
    pub executor: ExecutorConfig,
    /// Backoff used by [`Session::wait_until_ready`].
    pub readiness: ReadinessPolicy,
    /// Capacity of the detector's resource tracker.
    pub tracker_capacity: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            executor: ExecutorConfig::default(),
            readiness: ReadinessPolicy::default(),
            tracker_capacity: ResourceTracker::<BufferHandle>::DEFAULT_CAPACITY,
        }
    }
}

/// Errors from a detection submitted through a [`Session`].
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// The detector rejected the input or found nothing.
    #[error(transparent)]
    Pipeline(#[from] PipelineError),

    /// The blocking worker running the detector panicked or was cancelled.
    #[error("detection worker failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// Serialized access to one [`Detector`].
pub struct Session {
    heap: NativeHeap,
    detector: Arc<Mutex<Detector>>,
    executor: TaskExecutor,
    observer: Arc<dyn Observer>,
    readiness: ReadinessPolicy,
}

impl Session {
    /// Create a session with no observer.
    #[must_use]
    pub fn new(heap: NativeHeap, config: SessionConfig) -> Self {
        Self::with_observer(heap, config, Arc::new(NoopObserver))
    }

    /// Create a session that reports progress and messages to `observer`.
    #[must_use]
    pub fn with_observer(
        heap: NativeHeap,
        config: SessionConfig,
        observer: Arc<dyn Observer>,
    ) -> Self {
        let detector = Detector::new(heap.clone())
            .with_tracker_capacity(config.tracker_capacity)
            .with_observer(Arc::clone(&observer));
        Self {
            heap,
            detector: Arc::new(Mutex::new(detector)),
            executor: TaskExecutor::new(Arc::clone(&observer), config.executor),
            observer,
            readiness: config.readiness,
        }
    }

    /// Poll the backend until it is ready.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::BackendNotReady`] if the readiness policy
    /// times out.
    pub async fn wait_until_ready(&self) -> Result<(), PipelineError> {
        wait_until_ready(&self.heap, &self.readiness).await?;
        tracing::info!("image backend ready");
        self.observer
            .user_message("image backend ready", READY_MESSAGE_DURATION);
        Ok(())
    }

    /// Queue a detection.
    ///
    /// The surface is moved into the task. The returned completion yields
    /// the ranked contours, whose geometry the caller must release.
    pub fn detect(
        &self,
        surface: Surface,
        options: DetectOptions,
    ) -> Completion<PipelineResult, SessionError> {
        let detector = Arc::clone(&self.detector);
        let description = format!(
            "{} detection on {}x{}",
            options.mode,
            surface.width(),
            surface.height()
        );
        self.executor.submit(description, move || async move {
            let result = tokio::task::spawn_blocking(move || {
                lock(&detector).detect(&surface, &options)
            })
            .await??;
            Ok::<_, SessionError>(result)
        })
    }

    /// Copy of the smoothed intensity image from the last successful
    /// detection.
    #[must_use]
    pub fn snapshot(&self) -> Option<GrayImage> {
        lock(&self.detector).snapshot()
    }

    /// Read the outline points of a contour returned by this session.
    ///
    /// # Errors
    ///
    /// Returns [`ResourceError`] if the geometry was already released.
    pub fn shape(&self, contour: &Contour) -> Result<Vec<Point>, ResourceError> {
        lock(&self.detector).shape(contour)
    }

    /// The heap backing this session.
    #[must_use]
    pub const fn heap(&self) -> &NativeHeap {
        &self.heap
    }

    /// The executor serializing this session's detections.
    #[must_use]
    pub const fn executor(&self) -> &TaskExecutor {
        &self.executor
    }

    /// Drop queued detections, wait for the one in flight, then release
    /// the snapshot and every tracked buffer.
    pub async fn shutdown(&self) {
        self.executor.clear();
        let detector = Arc::clone(&self.detector);
        let done = self.executor.submit("shutdown", move || async move {
            lock(&detector).cleanup();
            Ok::<_, Infallible>(())
        });
        if let Err(e) = done.await {
            tracing::warn!(error = %e, "session shutdown did not complete");
        }
    }
}

fn lock(detector: &Mutex<Detector>) -> MutexGuard<'_, Detector> {
    detector.lock().unwrap_or_else(PoisonError::into_inner)
}
