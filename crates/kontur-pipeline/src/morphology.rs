//! Morphological closing to bridge small gaps in an edge map.
//!
//! Closing is a dilation followed by an erosion with the same square
//! neighborhood. Gaps narrower than the neighborhood are filled while
//! the outline of larger shapes is restored to its original extent.

use image::{GrayImage, Luma};
use imageproc::distance_transform::Norm;

/// Square structuring element: every pixel within `radius` in the L∞
/// norm, i.e. a `(2 * radius + 1)`-wide square.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StructuringElement {
    radius: u8,
}

impl StructuringElement {
    /// The 3x3 neighborhood used by the detector.
    pub const DEFAULT: Self = Self::square(1);

    /// A square element of the given radius.
    #[must_use]
    pub const fn square(radius: u8) -> Self {
        Self { radius }
    }

    /// Radius in pixels.
    #[must_use]
    pub const fn radius(self) -> u8 {
        self.radius
    }

    /// Side length in pixels.
    #[must_use]
    pub fn size(self) -> u32 {
        2 * u32::from(self.radius) + 1
    }
}

/// Close the foreground (non-zero pixels) of `edges`.
///
/// The result is binary: 255 for foreground, 0 for background.
#[must_use = "returns the closed edge map"]
pub fn close(edges: &GrayImage, element: StructuringElement) -> GrayImage {
    let binary = binarize(edges);
    if element.radius == 0 {
        return binary;
    }
    imageproc::morphology::close(&binary, Norm::LInf, element.radius)
}

/// Map every non-zero pixel to 255.
#[must_use]
pub fn binarize(image: &GrayImage) -> GrayImage {
    GrayImage::from_fn(image.width(), image.height(), |x, y| {
        Luma([if image.get_pixel(x, y).0[0] > 0 { 255 } else { 0 }])
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_is_three_by_three() {
        assert_eq!(StructuringElement::DEFAULT.size(), 3);
        assert_eq!(StructuringElement::DEFAULT.radius(), 1);
    }

    #[test]
    fn one_pixel_gap_is_bridged() {
        let mut img = GrayImage::new(13, 11);
        for x in 2..=10 {
            if x != 6 {
                img.put_pixel(x, 5, Luma([255]));
            }
        }
        let closed = close(&img, StructuringElement::DEFAULT);
        assert_eq!(closed.get_pixel(6, 5).0[0], 255);
    }

    #[test]
    fn closing_never_removes_foreground() {
        let img = GrayImage::from_fn(16, 16, |x, y| Luma([if (x * 7 + y * 3) % 5 == 0 { 90 } else { 0 }]));
        let closed = close(&img, StructuringElement::DEFAULT);
        for (x, y, p) in img.enumerate_pixels() {
            if p.0[0] > 0 {
                assert_eq!(closed.get_pixel(x, y).0[0], 255, "lost pixel at ({x},{y})");
            }
        }
    }

    #[test]
    fn empty_map_stays_empty() {
        let closed = close(&GrayImage::new(8, 8), StructuringElement::DEFAULT);
        assert!(closed.pixels().all(|p| p.0[0] == 0));
    }

    #[test]
    fn zero_radius_only_binarizes() {
        let mut img = GrayImage::new(4, 4);
        img.put_pixel(1, 1, Luma([3]));
        let closed = close(&img, StructuringElement::square(0));
        assert_eq!(closed.get_pixel(1, 1).0[0], 255);
        assert_eq!(closed.get_pixel(2, 2).0[0], 0);
    }
}
