//! kontur-pipeline: Image-to-contour extraction over tracked native
//! buffers (sans-IO).
//!
//! Converts an RGBA surface into closed outlines ranked by enclosed area
//! through:
//! grayscale -> smooth -> adaptive thresholds -> edge detection ->
//! morphological closing -> contour extraction -> area filter -> ranking.
//!
//! Every intermediate image lives in a [`NativeHeap`] and is addressed
//! by a [`BufferHandle`] that must be released by hand. The [`Detector`]
//! owns those buffers for the span of one call and releases them on
//! every exit path; a bounded [`ResourceTracker`] caps how many are held
//! at once.
//!
//! This crate has **no I/O dependencies** and no async runtime. Queueing
//! and readiness polling live in `kontur-tasks`; file decoding lives in
//! the `kontur` binary.

pub mod backend;
pub mod blur;
pub mod canny;
pub mod contour;
pub mod detector;
pub mod edge;
pub mod grayscale;
pub mod morphology;
pub mod observer;
pub mod resource;
pub mod surface;
pub mod threshold;
pub mod types;

pub use backend::{Backend, Buffer, BufferHandle, HeapLoader, NativeHeap};
pub use detector::Detector;
pub use observer::{NoopObserver, Observer};
pub use resource::{NativeHandle, ResourceError, ResourceTracker, safe_release};
pub use surface::Surface;
pub use types::{Contour, DetectOptions, EdgeMode, GrayImage, PipelineError, PipelineResult, Point};
