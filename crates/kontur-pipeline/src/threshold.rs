//! Adaptive hysteresis thresholds.
//!
//! The thresholds for the `auto` edge detector are derived from the
//! mean intensity of the smoothed image, so a dim photo and a bright
//! scan get comparable edge density without manual tuning.

use image::GrayImage;

/// Low and high thresholds for hysteresis edge tracking.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Thresholds {
    /// Gradients above this may extend an existing edge.
    pub lower: f32,
    /// Gradients above this start a new edge.
    pub upper: f32,
}

/// Mean pixel intensity, `0.0` for an empty image.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn mean_intensity(image: &GrayImage) -> f64 {
    let count = u64::from(image.width()) * u64::from(image.height());
    if count == 0 {
        return 0.0;
    }
    let sum: u64 = image.as_raw().iter().copied().map(u64::from).sum();
    sum as f64 / count as f64
}

/// Thresholds `((1 - s) * mean, (1 + s) * mean)` clamped to `[0, 255]`.
#[must_use]
#[allow(clippy::cast_possible_truncation)]
pub fn adaptive(mean: f64, sensitivity: f64) -> Thresholds {
    let lower = ((1.0 - sensitivity) * mean).max(0.0);
    let upper = ((1.0 + sensitivity) * mean).min(255.0);
    Thresholds {
        lower: lower as f32,
        upper: upper as f32,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mean_of_uniform_image() {
        let img = GrayImage::from_pixel(8, 8, image::Luma([100]));
        assert!((mean_intensity(&img) - 100.0).abs() < 1e-9);
    }

    #[test]
    fn mean_of_half_white_image() {
        let img = GrayImage::from_fn(10, 10, |x, _| image::Luma([if x < 5 { 0 } else { 255 }]));
        assert!((mean_intensity(&img) - 127.5).abs() < 1e-9);
    }

    #[test]
    fn mean_of_empty_image_is_zero() {
        assert!(mean_intensity(&GrayImage::new(0, 0)).abs() < f64::EPSILON);
    }

    #[test]
    fn thresholds_bracket_the_mean() {
        let t = adaptive(100.0, 0.33);
        assert!((t.lower - 67.0).abs() < 1e-4);
        assert!((t.upper - 133.0).abs() < 1e-4);
    }

    #[test]
    fn upper_is_clamped_to_255() {
        let t = adaptive(240.0, 0.5);
        assert!((t.upper - 255.0).abs() < f32::EPSILON);
        assert!((t.lower - 120.0).abs() < 1e-4);
    }

    #[test]
    fn black_image_gives_zero_thresholds() {
        let t = adaptive(0.0, 0.33);
        assert!(t.lower.abs() < f32::EPSILON);
        assert!(t.upper.abs() < f32::EPSILON);
    }
}
