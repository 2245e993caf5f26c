//! Shared types for the kontur contour pipeline.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::backend::BufferHandle;
use crate::resource::{ResourceError, safe_release};

/// Re-export `GrayImage` so downstream crates can inspect the retained
/// intensity snapshot without depending on `image` directly.
pub use image::GrayImage;

/// A 2D point in image coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    /// Horizontal position (pixels from left edge).
    pub x: f64,
    /// Vertical position (pixels from top edge).
    pub y: f64,
}

impl Point {
    /// Create a new point.
    #[must_use]
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

/// Which edge detector produces the edge map.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EdgeMode {
    /// Multi-stage (Canny) detector with thresholds adapted to the mean
    /// intensity of the smoothed image.
    #[default]
    Auto,
    /// Equal-weight sum of horizontal and vertical first derivatives.
    Gradient,
    /// Magnitude of the second derivative (Laplacian).
    Curvature,
}

impl fmt::Display for EdgeMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Auto => f.write_str("auto"),
            Self::Gradient => f.write_str("gradient"),
            Self::Curvature => f.write_str("curvature"),
        }
    }
}

/// Per-invocation detection options.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectOptions {
    /// Edge detector selection.
    pub mode: EdgeMode,

    /// How far the adaptive thresholds deviate from the mean intensity,
    /// as a fraction in the open interval `(0, 1)`. Higher values widen
    /// the band between the low and high threshold.
    pub sensitivity: f64,
}

impl DetectOptions {
    /// Default sensitivity.
    pub const DEFAULT_SENSITIVITY: f64 = 0.33;

    /// Check that `sensitivity` lies in `(0, 1)`.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::InvalidConfig`] otherwise.
    pub fn validate(&self) -> Result<(), PipelineError> {
        if self.sensitivity.is_finite() && self.sensitivity > 0.0 && self.sensitivity < 1.0 {
            Ok(())
        } else {
            Err(PipelineError::InvalidConfig(format!(
                "sensitivity must be in (0, 1), got {}",
                self.sensitivity
            )))
        }
    }
}

impl Default for DetectOptions {
    fn default() -> Self {
        Self {
            mode: EdgeMode::default(),
            sensitivity: Self::DEFAULT_SENSITIVITY,
        }
    }
}

/// A closed outline found by the detector.
///
/// `geometry` refers to a buffer in the detector's heap. It is owned by
/// the caller once [`Detector::detect`](crate::Detector::detect)
/// returns and must be released by the caller, either directly or via
/// [`PipelineResult::release`].
#[derive(Debug, Clone, PartialEq)]
pub struct Contour {
    /// Handle to the outline points.
    pub geometry: BufferHandle,
    /// Enclosed area in square pixels.
    pub area: f64,
}

/// Ranked contours from one detector invocation.
///
/// Never empty: an image without qualifying contours yields
/// [`PipelineError::NoEdgesFound`] instead.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineResult {
    /// The largest contour.
    pub primary: Contour,
    /// Remaining contours, largest first.
    pub secondary: Vec<Contour>,
    /// `1 + secondary.len()`.
    pub total: usize,
}

impl PipelineResult {
    /// Build a result from contours already sorted by descending area.
    ///
    /// Returns `None` if `ranked` is empty.
    #[must_use]
    pub fn from_ranked(ranked: Vec<Contour>) -> Option<Self> {
        let mut iter = ranked.into_iter();
        let primary = iter.next()?;
        let secondary: Vec<Contour> = iter.collect();
        let total = 1 + secondary.len();
        Some(Self {
            primary,
            secondary,
            total,
        })
    }

    /// All contours, primary first.
    pub fn contours(&self) -> impl Iterator<Item = &Contour> {
        std::iter::once(&self.primary).chain(&self.secondary)
    }

    /// Release every contour geometry buffer.
    ///
    /// Returns the number of buffers actually freed; already-released
    /// geometry is skipped.
    pub fn release(self) -> usize {
        self.contours()
            .filter(|c| safe_release(&c.geometry))
            .count()
    }
}

/// Errors that can occur during contour detection.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// The backend has not passed a readiness probe.
    #[error("image backend is not ready")]
    BackendNotReady,

    /// The input surface is degenerate or malformed.
    #[error("invalid input surface: {0}")]
    InvalidInput(String),

    /// Detection options are out of range.
    #[error("invalid detection options: {0}")]
    InvalidConfig(String),

    /// No contour survived area filtering.
    #[error("no clear edges found in the image")]
    NoEdgesFound,

    /// A buffer the pipeline was using became invalid.
    #[error("native buffer became invalid: {0}")]
    ResourceInvalid(#[from] ResourceError),
}
