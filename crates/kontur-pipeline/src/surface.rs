//! Raster input surface.
//!
//! A [`Surface`] is a plain RGBA pixel grid, the shape in which a
//! caller hands an image (a decoded photo, a canvas readback) to the
//! detector. Zero dimensions are representable on purpose: the detector
//! itself rejects them with [`PipelineError::InvalidInput`] before any
//! backend work happens.

use image::RgbaImage;
use image::imageops::FilterType;

use crate::types::PipelineError;

/// Default pixel budget for [`Surface::fit_to_pixel_budget`].
pub const DEFAULT_MAX_PIXELS: u64 = 2_000_000;

/// Bytes per pixel in [`Surface::pixels`].
pub const CHANNELS: usize = 4;

/// An RGBA raster image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Surface {
    width: u32,
    height: u32,
    pixels: Vec<u8>,
}

impl Surface {
    /// Wrap an RGBA pixel buffer, row-major, 4 bytes per pixel.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::InvalidInput`] if `pixels.len()` is not
    /// `width * height * 4`.
    pub fn new(width: u32, height: u32, pixels: Vec<u8>) -> Result<Self, PipelineError> {
        let expected = (width as usize)
            .checked_mul(height as usize)
            .and_then(|n| n.checked_mul(CHANNELS));
        if expected != Some(pixels.len()) {
            return Err(PipelineError::InvalidInput(format!(
                "{width}x{height} surface needs {} bytes, got {}",
                expected.map_or_else(|| "too many".to_owned(), |n| n.to_string()),
                pixels.len(),
            )));
        }
        Ok(Self {
            width,
            height,
            pixels,
        })
    }

    /// Width in pixels.
    #[must_use]
    pub const fn width(&self) -> u32 {
        self.width
    }

    /// Height in pixels.
    #[must_use]
    pub const fn height(&self) -> u32 {
        self.height
    }

    /// Raw RGBA bytes.
    #[must_use]
    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    /// `width * height`.
    #[must_use]
    pub fn pixel_count(&self) -> u64 {
        u64::from(self.width) * u64::from(self.height)
    }

    /// Whether either dimension is zero.
    #[must_use]
    pub const fn is_degenerate(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// Copy the pixels into an [`RgbaImage`].
    ///
    /// Returns `None` for degenerate surfaces.
    #[must_use]
    pub fn to_rgba_image(&self) -> Option<RgbaImage> {
        if self.is_degenerate() {
            return None;
        }
        RgbaImage::from_raw(self.width, self.height, self.pixels.clone())
    }

    /// Downscale in place so the surface holds at most `max_pixels`
    /// pixels, preserving aspect ratio.
    ///
    /// The scale factor is `sqrt(max_pixels / pixel_count)` and the new
    /// dimensions are floored (never below 1). For extreme aspect ratios
    /// where one side bottoms out at 1, the other side is cut to fit the
    /// budget. Returns `true` if the surface was resized.
    #[allow(
        clippy::cast_precision_loss,
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss
    )]
    pub fn fit_to_pixel_budget(&mut self, max_pixels: u64) -> bool {
        let count = self.pixel_count();
        if max_pixels == 0 || count <= max_pixels {
            return false;
        }
        let Some(image) = self.to_rgba_image() else {
            return false;
        };

        let ratio = (max_pixels as f64 / count as f64).sqrt();
        let max_side = u32::try_from(max_pixels).unwrap_or(u32::MAX);
        let new_w = ((f64::from(self.width) * ratio).floor() as u32).clamp(1, max_side);
        let new_h = ((f64::from(self.height) * ratio).floor() as u32).clamp(1, max_side);
        // A side floored up to 1 leaves the other side over budget.
        let new_h = new_h.min(u32::try_from(max_pixels / u64::from(new_w)).unwrap_or(u32::MAX));
        let new_w = new_w.min(u32::try_from(max_pixels / u64::from(new_h)).unwrap_or(u32::MAX));

        let resized = image::imageops::resize(&image, new_w, new_h, FilterType::Triangle);
        tracing::debug!(
            from_width = self.width,
            from_height = self.height,
            to_width = new_w,
            to_height = new_h,
            "downscaled surface to pixel budget"
        );
        *self = Self::from(resized);
        true
    }
}

impl From<RgbaImage> for Surface {
    fn from(image: RgbaImage) -> Self {
        Self {
            width: image.width(),
            height: image.height(),
            pixels: image.into_raw(),
        }
    }
}
