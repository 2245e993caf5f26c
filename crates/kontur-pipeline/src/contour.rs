//! Contour extraction, area filtering and ranking.
//!
//! Border following (Suzuki-Abe, via [`imageproc::contours::find_contours`])
//! yields both the outer border of every foreground component and the
//! border of every hole inside one. For a closed edge ring the hole
//! border is the same outline traced from the inside, so only outer
//! borders are kept. The result is a flat list; nesting is ignored.

use geo::{Area, LineString, Polygon};
use image::GrayImage;
use imageproc::contours::{BorderType, Contour as RawContour};

use crate::types::Point;

/// Contours must enclose more than this fraction of the image area.
pub const MIN_AREA_FRACTION: f64 = 0.01;

/// An outline that passed area filtering, not yet stored in the heap.
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    /// Border points in tracing order.
    pub points: Vec<Point>,
    /// Enclosed area in square pixels.
    pub area: f64,
}

/// Trace every border in a binary edge map.
#[must_use]
pub fn extract(edges: &GrayImage) -> Vec<RawContour<u32>> {
    imageproc::contours::find_contours::<u32>(edges)
}

/// Minimum qualifying area for a `width` x `height` image.
#[must_use]
pub fn min_area(width: u32, height: u32) -> f64 {
    f64::from(width) * f64::from(height) * MIN_AREA_FRACTION
}

/// Polygon area enclosed by a traced border.
#[must_use]
pub fn enclosed_area(points: &[Point]) -> f64 {
    if points.len() < 3 {
        return 0.0;
    }
    let ring: LineString<f64> = points.iter().map(|p| (p.x, p.y)).collect();
    Polygon::new(ring, Vec::new()).unsigned_area()
}

/// Outer borders enclosing more than `min_area`, largest first.
///
/// Everything else is dropped here and never materialized.
#[must_use]
pub fn rank(raw: &[RawContour<u32>], min_area: f64) -> Vec<Candidate> {
    let mut kept: Vec<Candidate> = raw
        .iter()
        .filter(|c| c.border_type == BorderType::Outer)
        .filter_map(|c| {
            let points: Vec<Point> = c
                .points
                .iter()
                .map(|p| Point::new(f64::from(p.x), f64::from(p.y)))
                .collect();
            let area = enclosed_area(&points);
            (area > min_area).then_some(Candidate { points, area })
        })
        .collect();
    kept.sort_by(|a, b| b.area.total_cmp(&a.area));
    kept
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;

    fn filled_rect(img: &mut GrayImage, x0: u32, y0: u32, x1: u32, y1: u32) {
        for y in y0..y1 {
            for x in x0..x1 {
                img.put_pixel(x, y, Luma([255]));
            }
        }
    }

    #[test]
    fn empty_map_has_no_contours() {
        assert!(extract(&GrayImage::new(10, 10)).is_empty());
    }

    #[test]
    fn filled_rectangle_area_uses_pixel_centers() {
        let mut img = GrayImage::new(20, 20);
        filled_rect(&mut img, 5, 5, 15, 15);
        let ranked = rank(&extract(&img), 0.0);
        assert_eq!(ranked.len(), 1);
        assert!((ranked[0].area - 81.0).abs() < 1e-9, "got {}", ranked[0].area);
    }

    #[test]
    fn ring_counts_once() {
        let mut img = GrayImage::new(30, 30);
        filled_rect(&mut img, 5, 5, 25, 25);
        for y in 7..23 {
            for x in 7..23 {
                img.put_pixel(x, y, Luma([0]));
            }
        }
        let raw = extract(&img);
        assert!(raw.iter().any(|c| c.border_type == BorderType::Hole));
        let ranked = rank(&raw, 0.0);
        assert_eq!(ranked.len(), 1);
        assert!((ranked[0].area - 361.0).abs() < 1e-9);
    }

    #[test]
    fn ranking_is_descending_and_filtered() {
        let mut img = GrayImage::new(60, 60);
        filled_rect(&mut img, 2, 2, 12, 12); // area 81
        filled_rect(&mut img, 20, 20, 41, 41); // area 400
        filled_rect(&mut img, 50, 50, 53, 53); // area 4
        let ranked = rank(&extract(&img), min_area(60, 60));
        let areas: Vec<f64> = ranked.iter().map(|c| c.area).collect();
        assert_eq!(areas, vec![400.0, 81.0]);
    }

    #[test]
    fn threshold_is_strict() {
        let mut img = GrayImage::new(20, 20);
        filled_rect(&mut img, 5, 5, 15, 15);
        assert!(rank(&extract(&img), 81.0).is_empty());
    }

    #[test]
    fn degenerate_outlines_have_zero_area() {
        assert!(enclosed_area(&[Point::new(0.0, 0.0), Point::new(5.0, 0.0)]).abs() < f64::EPSILON);
    }

    #[test]
    fn one_percent_threshold() {
        assert!((min_area(200, 200) - 400.0).abs() < 1e-9);
    }
}
