//! Single-channel intensity conversion.
//!
//! First pipeline stage: the RGBA surface buffer in, a [`GrayImage`]
//! out. Alpha is ignored, matching how a canvas readback is flattened
//! before edge detection.

use image::{GrayImage, RgbaImage};

/// Convert an RGBA image to single-channel intensity.
///
/// Uses the `image` crate's weighted luminance conversion, so green
/// contributes most and blue least.
#[must_use = "returns the intensity image"]
pub fn to_intensity(image: &RgbaImage) -> GrayImage {
    image::imageops::grayscale(image)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn single_pixel(r: u8, g: u8, b: u8, a: u8) -> RgbaImage {
        RgbaImage::from_pixel(1, 1, image::Rgba([r, g, b, a]))
    }

    #[test]
    fn white_stays_white() {
        let gray = to_intensity(&RgbaImage::from_pixel(2, 2, image::Rgba([255; 4])));
        for pixel in gray.pixels() {
            assert_eq!(pixel.0[0], 255);
        }
    }

    #[test]
    fn output_dimensions_match_input() {
        let gray = to_intensity(&RgbaImage::new(17, 31));
        assert_eq!((gray.width(), gray.height()), (17, 31));
    }

    #[test]
    fn channels_are_weighted() {
        let r = to_intensity(&single_pixel(255, 0, 0, 255)).get_pixel(0, 0).0[0];
        let g = to_intensity(&single_pixel(0, 255, 0, 255)).get_pixel(0, 0).0[0];
        let b = to_intensity(&single_pixel(0, 0, 255, 255)).get_pixel(0, 0).0[0];
        assert!(
            g > r && r > b,
            "expected green > red > blue luminance, got R={r} G={g} B={b}",
        );
    }

    #[test]
    fn alpha_is_ignored() {
        let opaque = to_intensity(&single_pixel(90, 120, 30, 255));
        let clear = to_intensity(&single_pixel(90, 120, 30, 0));
        assert_eq!(opaque, clear);
    }
}
