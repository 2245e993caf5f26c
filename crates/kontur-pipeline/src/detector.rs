//! The contour detector: runs every pipeline stage against buffers in a
//! [`NativeHeap`] and hands back ranked contours.
//!
//! ```rust
//! # use kontur_pipeline::{Backend, DetectOptions, Detector, NativeHeap, PipelineError, Surface};
//! # fn run(surface: Surface) -> Result<(), PipelineError> {
//! let heap = NativeHeap::new();
//! heap.probe();
//! let mut detector = Detector::new(heap);
//! let result = detector.detect(&surface, &DetectOptions::default())?;
//! println!("primary contour area: {}", result.primary.area);
//! result.release();
//! # Ok(())
//! # }
//! ```
//!
//! # Buffer ownership
//!
//! Every buffer allocated during an invocation belongs to a per-call
//! [`Scope`]. Transient buffers (surface copy, intensity, smoothed
//! image, derivatives, edge maps, structuring element, extraction
//! scratch list) are registered with the [`ResourceTracker`] and are
//! released when the scope drops, on success, error or unwind alike.
//! Contour geometry is held by the scope but never registered with the
//! tracker, so capacity eviction cannot free an outline before the
//! caller receives it. On success the scope hands that geometry over to
//! the caller.
//!
//! One buffer outlives the call: a copy of the smoothed intensity image
//! from the most recent successful detection. The previous copy is
//! released when a new one replaces it.

use std::sync::Arc;
use std::time::{Duration, Instant};

use image::GrayImage;

use crate::backend::{Backend, Buffer, BufferHandle, NativeHeap};
use crate::morphology::StructuringElement;
use crate::observer::{NoopObserver, Observer};
use crate::resource::{ResourceError, ResourceTracker, safe_release};
use crate::surface::Surface;
use crate::types::{Contour, DetectOptions, EdgeMode, PipelineError, PipelineResult, Point};
use crate::{blur, canny, contour, edge, grayscale, morphology, threshold};

/// How long the success summary is shown to the user.
const SUMMARY_DURATION: Duration = Duration::from_millis(2000);

/// Image-to-contour detector bound to one [`NativeHeap`].
///
/// Construct once, reuse for every invocation, and call
/// [`cleanup`](Self::cleanup) (or drop it) at teardown.
pub struct Detector {
    heap: NativeHeap,
    tracker: ResourceTracker<BufferHandle>,
    snapshot: Option<BufferHandle>,
    observer: Arc<dyn Observer>,
}

impl Detector {
    /// Create a detector with the default tracker capacity and no
    /// observer.
    #[must_use]
    pub fn new(heap: NativeHeap) -> Self {
        Self {
            heap,
            tracker: ResourceTracker::new(),
            snapshot: None,
            observer: Arc::new(NoopObserver),
        }
    }

    /// Report user-facing messages to `observer`.
    #[must_use]
    pub fn with_observer(mut self, observer: Arc<dyn Observer>) -> Self {
        self.observer = observer;
        self
    }

    /// Replace the resource tracker with one of the given capacity.
    #[must_use]
    pub fn with_tracker_capacity(mut self, capacity: usize) -> Self {
        self.tracker.cleanup_all();
        self.tracker = ResourceTracker::with_capacity(capacity);
        self
    }

    /// The heap this detector allocates from.
    #[must_use]
    pub const fn heap(&self) -> &NativeHeap {
        &self.heap
    }

    /// The tracker holding this invocation's transient buffers.
    #[must_use]
    pub const fn tracker(&self) -> &ResourceTracker<BufferHandle> {
        &self.tracker
    }

    /// Number of tracked transient buffers (zero between invocations).
    #[must_use]
    pub fn usage_count(&self) -> usize {
        self.tracker.usage_count()
    }

    /// Copy of the smoothed intensity image from the last successful
    /// detection.
    #[must_use]
    pub fn snapshot(&self) -> Option<GrayImage> {
        let handle = self.snapshot.as_ref()?;
        self.heap.with_gray(handle, GrayImage::clone).ok()
    }

    /// Read the outline points of a contour returned by this detector.
    ///
    /// # Errors
    ///
    /// Returns [`ResourceError`] if the geometry was already released.
    pub fn shape(&self, contour: &Contour) -> Result<Vec<Point>, ResourceError> {
        self.heap.shape(&contour.geometry)
    }

    /// Detect, filter and rank the contours in `surface`.
    ///
    /// # Errors
    ///
    /// - [`PipelineError::BackendNotReady`] if the heap has not passed a
    ///   readiness probe.
    /// - [`PipelineError::InvalidInput`] if either surface dimension is
    ///   zero.
    /// - [`PipelineError::InvalidConfig`] if `options.sensitivity` is not
    ///   in `(0, 1)`.
    /// - [`PipelineError::NoEdgesFound`] if no contour encloses more than
    ///   1% of the image.
    /// - [`PipelineError::ResourceInvalid`] if a buffer in use was freed
    ///   from outside.
    ///
    /// No heap work is attempted for the first three.
    pub fn detect(
        &mut self,
        surface: &Surface,
        options: &DetectOptions,
    ) -> Result<PipelineResult, PipelineError> {
        if !self.heap.is_ready() {
            return Err(PipelineError::BackendNotReady);
        }
        let Some(rgba) = surface.to_rgba_image() else {
            return Err(PipelineError::InvalidInput(format!(
                "surface must be non-empty, got {}x{}",
                surface.width(),
                surface.height()
            )));
        };
        options.validate()?;

        let started = Instant::now();
        let heap = self.heap.clone();
        let mut scope = Scope::new(&mut self.tracker);

        // 1. Surface and intensity.
        let source = scope.adopt(heap.alloc(Buffer::Rgba(rgba)));
        let gray = timed("grayscale", || heap.with_rgba(&source, grayscale::to_intensity))?;
        let gray = scope.adopt(heap.alloc(Buffer::Gray(gray)));

        // 2. Smoothing.
        let smoothed = timed("smooth", || heap.with_gray(&gray, blur::smooth))?;
        let smoothed = scope.adopt(heap.alloc(Buffer::Gray(smoothed)));

        // 3. Adaptive thresholds.
        let mean = heap.with_gray(&smoothed, threshold::mean_intensity)?;
        let thresholds = threshold::adaptive(mean, options.sensitivity);
        tracing::debug!(
            mean,
            lower = thresholds.lower,
            upper = thresholds.upper,
            "adaptive thresholds"
        );

        // 4. Edge map.
        let edges = timed("edges", || -> Result<GrayImage, ResourceError> {
            match options.mode {
                EdgeMode::Auto => {
                    let (gx, gy) = derivatives(&heap, &mut scope, &smoothed)?;
                    heap.with_derivatives(&gx, &gy, |gx, gy| canny::canny(gx, gy, thresholds))
                }
                EdgeMode::Gradient => {
                    let (gx, gy) = derivatives(&heap, &mut scope, &smoothed)?;
                    heap.with_derivatives(&gx, &gy, edge::gradient_magnitude)
                }
                EdgeMode::Curvature => {
                    let lap = heap.with_gray(&smoothed, edge::laplacian)?;
                    let lap = scope.adopt(heap.alloc(Buffer::Derivative(lap)));
                    heap.with_derivative(&lap, edge::saturate_abs)
                }
            }
        })?;
        let edges = scope.adopt(heap.alloc(Buffer::Gray(edges)));

        // 5. Closing.
        let kernel = scope.adopt(heap.alloc(Buffer::Kernel(StructuringElement::DEFAULT)));
        let element = heap.kernel(&kernel)?;
        let closed = timed("close", || {
            heap.with_gray(&edges, |e| morphology::close(e, element))
        })?;
        let closed = scope.adopt(heap.alloc(Buffer::Gray(closed)));

        // 6-7. Extraction and filtering.
        let raw = timed("extract", || heap.with_gray(&closed, contour::extract))?;
        let raw = scope.adopt(heap.alloc(Buffer::Contours(raw)));
        let min_area = contour::min_area(surface.width(), surface.height());
        let candidates = heap.with_contours(&raw, |raw| contour::rank(raw, min_area))?;

        // 8. Nothing qualified.
        if candidates.is_empty() {
            tracing::debug!(min_area, "no contour above area threshold");
            return Err(PipelineError::NoEdgesFound);
        }

        // 9. Ranked outlines become caller-owned geometry.
        let ranked: Vec<Contour> = candidates
            .into_iter()
            .map(|c| Contour {
                geometry: scope.hold(heap.alloc(Buffer::Shape(c.points))),
                area: c.area,
            })
            .collect();

        // 10. Retained snapshot.
        let copy = heap.with_gray(&smoothed, GrayImage::clone)?;
        let next = heap.alloc(Buffer::Gray(copy));
        if let Some(previous) = self.snapshot.replace(next) {
            safe_release(&previous);
        }

        let Some(result) = PipelineResult::from_ranked(ranked) else {
            return Err(PipelineError::NoEdgesFound);
        };
        scope.hand_over();
        // 11. Transient buffers are released when `scope` drops here.
        drop(scope);

        tracing::debug!(
            total = result.total,
            primary_area = result.primary.area,
            elapsed_ms = started.elapsed().as_secs_f64() * 1000.0,
            "detection finished"
        );
        self.observer.user_message(
            &format!("found {} contour(s)", result.total),
            SUMMARY_DURATION,
        );
        Ok(result)
    }

    /// Release the retained snapshot and every tracked buffer.
    ///
    /// Contour geometry already handed to callers is not touched.
    pub fn cleanup(&mut self) {
        if let Some(snapshot) = self.snapshot.take() {
            safe_release(&snapshot);
        }
        self.tracker.cleanup_all();
    }
}

impl Drop for Detector {
    fn drop(&mut self) {
        self.cleanup();
    }
}

/// Allocate Sobel derivatives of `smoothed` into the scope.
fn derivatives(
    heap: &NativeHeap,
    scope: &mut Scope<'_>,
    smoothed: &BufferHandle,
) -> Result<(BufferHandle, BufferHandle), ResourceError> {
    let gx = heap.with_gray(smoothed, edge::horizontal_derivative)?;
    let gx = scope.adopt(heap.alloc(Buffer::Derivative(gx)));
    let gy = heap.with_gray(smoothed, edge::vertical_derivative)?;
    let gy = scope.adopt(heap.alloc(Buffer::Derivative(gy)));
    Ok((gx, gy))
}

fn timed<R>(stage: &'static str, f: impl FnOnce() -> R) -> R {
    let start = Instant::now();
    let out = f();
    tracing::debug!(
        stage,
        elapsed_ms = start.elapsed().as_secs_f64() * 1000.0,
        "stage finished"
    );
    out
}

/// Per-invocation owner of every buffer the detector allocates.
///
/// Dropping the scope releases transient buffers (newest first) and
/// any geometry that was not handed over.
struct Scope<'t> {
    tracker: &'t mut ResourceTracker<BufferHandle>,
    transient: Vec<BufferHandle>,
    held: Vec<BufferHandle>,
}

impl<'t> Scope<'t> {
    fn new(tracker: &'t mut ResourceTracker<BufferHandle>) -> Self {
        Self {
            tracker,
            transient: Vec::new(),
            held: Vec::new(),
        }
    }

    /// Own a transient buffer and register it with the tracker.
    fn adopt(&mut self, handle: BufferHandle) -> BufferHandle {
        self.tracker.track(handle.clone());
        self.transient.push(handle.clone());
        handle
    }

    /// Own a buffer destined for the caller, outside the tracker.
    fn hold(&mut self, handle: BufferHandle) -> BufferHandle {
        self.held.push(handle.clone());
        handle
    }

    /// Give up ownership of held buffers; they now belong to the caller.
    fn hand_over(&mut self) {
        self.held.clear();
    }
}

impl Drop for Scope<'_> {
    fn drop(&mut self) {
        while let Some(handle) = self.transient.pop() {
            self.tracker.release(&handle);
        }
        for handle in self.held.drain(..) {
            safe_release(&handle);
        }
    }
}
