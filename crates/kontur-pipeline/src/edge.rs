//! Derivative filters and edge maps for the three detection modes.
//!
//! - [`EdgeMode::Auto`](crate::EdgeMode::Auto): Sobel derivatives fed
//!   into [`crate::canny::canny`] with adaptive thresholds.
//! - [`EdgeMode::Gradient`](crate::EdgeMode::Gradient): saturated
//!   absolute Sobel responses blended 50/50 by [`gradient_magnitude`].
//! - [`EdgeMode::Curvature`](crate::EdgeMode::Curvature): the
//!   [`laplacian`] response made absolute by [`saturate_abs`].
//!
//! The gradient and curvature maps are not binary. Downstream stages
//! treat any non-zero pixel as foreground.

use image::{GrayImage, Luma};

use crate::backend::DerivativeImage;

/// 3x3 aperture second-derivative kernel.
///
/// The diagonal form weights corners as heavily as edges, which keeps
/// the response roughly isotropic for strokes at any angle.
const LAPLACIAN_3X3: [[i32; 3]; 3] = [[2, 0, 2], [0, -8, 0], [2, 0, 2]];

/// Horizontal (x) Sobel derivative.
#[must_use]
pub fn horizontal_derivative(image: &GrayImage) -> DerivativeImage {
    imageproc::gradients::horizontal_sobel(image)
}

/// Vertical (y) Sobel derivative.
#[must_use]
pub fn vertical_derivative(image: &GrayImage) -> DerivativeImage {
    imageproc::gradients::vertical_sobel(image)
}

/// Second-derivative response with clamped borders.
#[must_use]
#[allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]
pub fn laplacian(image: &GrayImage) -> DerivativeImage {
    let (w, h) = image.dimensions();
    let sample = |x: i64, y: i64| -> i32 {
        let cx = x.clamp(0, i64::from(w) - 1) as u32;
        let cy = y.clamp(0, i64::from(h) - 1) as u32;
        i32::from(image.get_pixel(cx, cy).0[0])
    };
    DerivativeImage::from_fn(w, h, |x, y| {
        let mut acc = 0;
        for (ky, row) in LAPLACIAN_3X3.iter().enumerate() {
            for (kx, weight) in row.iter().enumerate() {
                if *weight != 0 {
                    let sx = i64::from(x) + kx as i64 - 1;
                    let sy = i64::from(y) + ky as i64 - 1;
                    acc += weight * sample(sx, sy);
                }
            }
        }
        Luma([acc.clamp(i32::from(i16::MIN), i32::from(i16::MAX)) as i16])
    })
}

/// Absolute value of a derivative response, saturated to `0..=255`.
#[must_use]
pub fn saturate_abs(derivative: &DerivativeImage) -> GrayImage {
    GrayImage::from_fn(derivative.width(), derivative.height(), |x, y| {
        Luma([abs_u8(derivative.get_pixel(x, y).0[0])])
    })
}

/// `0.5 * |gx| + 0.5 * |gy|` with each term saturated to 8 bits first.
#[must_use]
pub fn gradient_magnitude(gx: &DerivativeImage, gy: &DerivativeImage) -> GrayImage {
    GrayImage::from_fn(gx.width(), gx.height(), |x, y| {
        let a = u16::from(abs_u8(gx.get_pixel(x, y).0[0]));
        let b = u16::from(abs_u8(gy.get_pixel(x, y).0[0]));
        // Rounded mean of two bytes always fits in a byte.
        Luma([u8::try_from((a + b).div_ceil(2)).unwrap_or(u8::MAX)])
    })
}

fn abs_u8(value: i16) -> u8 {
    u8::try_from(value.unsigned_abs()).unwrap_or(u8::MAX)
}
