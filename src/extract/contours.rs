//! Edge detection and contour bounding rectangles.

use image::{GrayImage, RgbImage};
use imageproc::contours::{find_contours, Contour};
use imageproc::edges::canny;

use super::geometry::Rect;

/// Grayscale + Canny edge map of an RGB frame.
pub fn edge_map(frame: &RgbImage, low_threshold: f32, high_threshold: f32) -> GrayImage {
    let gray = image::imageops::grayscale(frame);
    canny(&gray, low_threshold, high_threshold)
}

/// Bounding rectangles of every contour (outer borders and holes) in raster
/// order of their starting points.
pub fn contour_rects(edges: &GrayImage) -> Vec<Rect> {
    find_contours::<u32>(edges)
        .iter()
        .filter_map(bounding_rect)
        .collect()
}

/// Smallest rectangle containing every contour point. Width and height count
/// pixels inclusively, so a single point is 1x1.
pub fn bounding_rect(contour: &Contour<u32>) -> Option<Rect> {
    let first = contour.points.first()?;
    let (mut min_x, mut min_y, mut max_x, mut max_y) = (first.x, first.y, first.x, first.y);
    for point in &contour.points[1..] {
        min_x = min_x.min(point.x);
        min_y = min_y.min(point.y);
        max_x = max_x.max(point.x);
        max_y = max_y.max(point.y);
    }
    Some(Rect::new(min_x, min_y, max_x - min_x + 1, max_y - min_y + 1))
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;

    #[test]
    fn rectangle_outline_yields_its_bounds() {
        let mut edges = GrayImage::new(40, 30);
        for x in 5..=24 {
            edges.put_pixel(x, 8, Luma([255]));
            edges.put_pixel(x, 17, Luma([255]));
        }
        for y in 8..=17 {
            edges.put_pixel(5, y, Luma([255]));
            edges.put_pixel(24, y, Luma([255]));
        }

        let rects = contour_rects(&edges);
        assert!(rects.contains(&Rect::new(5, 8, 20, 10)), "{:?}", rects);
    }

    #[test]
    fn blank_image_has_no_contours() {
        assert!(contour_rects(&GrayImage::new(16, 16)).is_empty());
    }

    #[test]
    fn edge_map_finds_plate_edges() {
        let frame = crate::ingest::synthetic::render_scene(160, 120, 1);
        let edges = edge_map(&frame, 50.0, 150.0);
        assert!(edges.pixels().any(|p| p.0[0] > 0));
    }
}
