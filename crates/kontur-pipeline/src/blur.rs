//! Fixed small-kernel smoothing before edge detection.
//!
//! Wraps [`imageproc::filter::gaussian_blur_f32`] with a constant sigma
//! equivalent to a 5x5 Gaussian kernel. The pass suppresses pixel-level
//! noise that would otherwise produce spurious edges; it is not a tuning
//! knob.

use image::GrayImage;

/// Sigma of the smoothing pass.
///
/// This is the sigma a 5x5 Gaussian kernel implies when none is given
/// explicitly: `0.3 * ((5 - 1) * 0.5 - 1) + 0.8`.
pub const SMOOTHING_SIGMA: f32 = 1.1;

/// Smooth an intensity image with the fixed Gaussian kernel.
#[must_use = "returns the smoothed image"]
pub fn smooth(image: &GrayImage) -> GrayImage {
    imageproc::filter::gaussian_blur_f32(image, SMOOTHING_SIGMA)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Sharp black-to-white boundary at x = 5.
    fn sharp_edge_image() -> GrayImage {
        GrayImage::from_fn(10, 10, |x, _y| {
            if x < 5 {
                image::Luma([0])
            } else {
                image::Luma([255])
            }
        })
    }

    #[test]
    fn output_dimensions_preserved() {
        let smoothed = smooth(&GrayImage::new(17, 31));
        assert_eq!((smoothed.width(), smoothed.height()), (17, 31));
    }

    #[test]
    fn smoothing_softens_sharp_edge() {
        let smoothed = smooth(&sharp_edge_image());
        let left = smoothed.get_pixel(4, 5).0[0];
        let right = smoothed.get_pixel(5, 5).0[0];
        assert!(left > 0, "expected left-of-edge above 0, got {left}");
        assert!(right < 255, "expected right-of-edge below 255, got {right}");
    }

    #[test]
    fn uniform_image_stays_uniform() {
        let smoothed = smooth(&GrayImage::from_pixel(10, 10, image::Luma([128])));
        for pixel in smoothed.pixels() {
            let diff = i16::from(pixel.0[0]) - 128;
            assert!(diff.abs() <= 1, "expected ~128, got {}", pixel.0[0]);
        }
    }
}
