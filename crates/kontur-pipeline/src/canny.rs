//! Canny edge detection over precomputed Sobel derivatives.
//!
//! The smoothing pass has already run by the time this stage sees the
//! image, so unlike `imageproc::edges::canny` there is no internal blur:
//! the detector starts from the horizontal and vertical Sobel responses,
//! thins them with non-maximum suppression and keeps edges by hysteresis.
//!
//! Hysteresis follows all 8 neighbors and bounds-checks every step, so
//! edges touching the image border are tracked without coordinate
//! underflow (see <https://github.com/image-rs/imageproc/issues/705>).
//! Comparisons are strict: a pixel with zero gradient is never an edge,
//! even when both thresholds collapse to the floor on a black image.

use image::{GrayImage, Luma};

use crate::backend::DerivativeImage;
use crate::threshold::Thresholds;

/// Minimum effective threshold.
///
/// A threshold of zero would make every pixel with any gradient an
/// edge candidate, producing an extremely dense edge map that swamps
/// contour extraction.
pub const MIN_THRESHOLD: f32 = 1.0;
const _: () = assert!(MIN_THRESHOLD > 0.0);

const EDGE: Luma<u8> = Luma([255]);

/// Run non-maximum suppression and hysteresis on Sobel responses.
///
/// Returns a binary map: 255 for edge pixels, 0 elsewhere. Both
/// thresholds are floored at [`MIN_THRESHOLD`] and the lower one is
/// clamped to at most the upper one.
#[must_use = "returns the binary edge map"]
pub fn canny(gx: &DerivativeImage, gy: &DerivativeImage, thresholds: Thresholds) -> GrayImage {
    let high = thresholds.upper.max(MIN_THRESHOLD);
    let low = thresholds.lower.max(MIN_THRESHOLD).min(high);
    let thinned = non_maximum_suppression(gx, gy);
    hysteresis(&thinned, low, high)
}

/// Gradient magnitude with everything but local maxima along the
/// gradient direction zeroed. Border pixels are always zero.
fn non_maximum_suppression(gx: &DerivativeImage, gy: &DerivativeImage) -> Magnitude {
    let (w, h) = gx.dimensions();
    let full = Magnitude::from_fn(w, h, |x, y| {
        let dx = f32::from(gx.get_pixel(x, y).0[0]);
        let dy = f32::from(gy.get_pixel(x, y).0[0]);
        dx.hypot(dy)
    });

    let mut out = Magnitude::zeros(w, h);
    if w < 3 || h < 3 {
        return out;
    }
    for y in 1..h - 1 {
        for x in 1..w - 1 {
            let dx = f32::from(gx.get_pixel(x, y).0[0]);
            let dy = f32::from(gy.get_pixel(x, y).0[0]);
            let mut angle = dy.atan2(dx).to_degrees();
            if angle < 0.0 {
                angle += 180.0;
            }
            let (a, b) = if (22.5..67.5).contains(&angle) {
                (full.at(x + 1, y + 1), full.at(x - 1, y - 1))
            } else if (67.5..112.5).contains(&angle) {
                (full.at(x, y - 1), full.at(x, y + 1))
            } else if (112.5..157.5).contains(&angle) {
                (full.at(x - 1, y + 1), full.at(x + 1, y - 1))
            } else {
                (full.at(x - 1, y), full.at(x + 1, y))
            };
            let m = full.at(x, y);
            if m >= a && m >= b {
                out.set(x, y, m);
            }
        }
    }
    out
}

/// Keep strong pixels (`> high`) and every weak pixel (`> low`)
/// 8-connected to one. Iterative depth-first search.
fn hysteresis(input: &Magnitude, low: f32, high: f32) -> GrayImage {
    let (w, h) = (input.width, input.height);
    let mut out = GrayImage::new(w, h);
    let mut stack = Vec::new();

    for y in 0..h {
        for x in 0..w {
            if input.at(x, y) <= high || out.get_pixel(x, y).0[0] != 0 {
                continue;
            }
            out.put_pixel(x, y, EDGE);
            stack.push((x, y));
            while let Some((cx, cy)) = stack.pop() {
                for (nx, ny) in neighbors(cx, cy, w, h) {
                    if input.at(nx, ny) > low && out.get_pixel(nx, ny).0[0] == 0 {
                        out.put_pixel(nx, ny, EDGE);
                        stack.push((nx, ny));
                    }
                }
            }
        }
    }
    out
}

/// The in-bounds members of the 8-neighborhood of `(x, y)`.
fn neighbors(x: u32, y: u32, w: u32, h: u32) -> impl Iterator<Item = (u32, u32)> {
    const OFFSETS: [(i64, i64); 8] = [
        (-1, -1),
        (0, -1),
        (1, -1),
        (-1, 0),
        (1, 0),
        (-1, 1),
        (0, 1),
        (1, 1),
    ];
    OFFSETS.into_iter().filter_map(move |(dx, dy)| {
        let nx = u32::try_from(i64::from(x) + dx).ok()?;
        let ny = u32::try_from(i64::from(y) + dy).ok()?;
        (nx < w && ny < h).then_some((nx, ny))
    })
}

/// Dense `f32` plane, row-major.
struct Magnitude {
    width: u32,
    height: u32,
    data: Vec<f32>,
}

impl Magnitude {
    fn zeros(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            data: vec![0.0; width as usize * height as usize],
        }
    }

    fn from_fn(width: u32, height: u32, f: impl Fn(u32, u32) -> f32) -> Self {
        let data = (0..height)
            .flat_map(|y| (0..width).map(move |x| (x, y)))
            .map(|(x, y)| f(x, y))
            .collect();
        Self {
            width,
            height,
            data,
        }
    }

    fn index(&self, x: u32, y: u32) -> usize {
        y as usize * self.width as usize + x as usize
    }

    fn at(&self, x: u32, y: u32) -> f32 {
        self.data[self.index(x, y)]
    }

    fn set(&mut self, x: u32, y: u32, value: f32) {
        let idx = self.index(x, y);
        self.data[idx] = value;
    }
}
