// src/detection/edges.rs
//
// Edge map for lane-line extraction: blur, Canny, then keep only the
// bottom-anchored trapezoid where lane markings can appear. The trapezoid
// is rasterised once into a mask and ANDed with the edge map.

use crate::config::LaneConfig;
use image::{GrayImage, Luma, RgbImage};
use imageproc::drawing::draw_polygon_mut;
use imageproc::point::Point;

/// ITU-R BT.601 luma, same weights the rest of the pipeline assumes.
pub fn to_gray(rgb: &RgbImage) -> GrayImage {
    image::imageops::grayscale(rgb)
}

pub fn detect_edges(gray: &GrayImage, config: &LaneConfig) -> GrayImage {
    let blurred = imageproc::filter::gaussian_blur_f32(gray, config.blur_sigma);
    imageproc::edges::canny(&blurred, config.canny_low, config.canny_high)
}

/// Trapezoid `(0,h) (l*w, t*h) (r*w, t*h) (w,h)` filled with 255.
pub fn trapezoid_mask(width: u32, height: u32, config: &LaneConfig) -> GrayImage {
    let mut mask = GrayImage::new(width, height);
    if width < 2 || height < 2 {
        return mask;
    }
    let (wf, hf) = (width as f32, height as f32);
    let top_y = (hf * config.mask_top_ratio).round() as i32;
    let bottom = height as i32 - 1;
    let right = width as i32 - 1;
    let corners = [
        Point::new(0, bottom),
        Point::new((wf * config.mask_top_left_ratio).round() as i32, top_y),
        Point::new((wf * config.mask_top_right_ratio).round() as i32, top_y),
        Point::new(right, bottom),
    ];
    draw_polygon_mut(&mut mask, &corners, Luma([255]));
    mask
}

/// Zero every edge pixel outside the lane trapezoid.
pub fn mask_trapezoid(edges: &GrayImage, config: &LaneConfig) -> GrayImage {
    let (w, h) = edges.dimensions();
    let mut out = trapezoid_mask(w, h, config);
    for (m, e) in out.pixels_mut().zip(edges.pixels()) {
        m[0] &= e[0];
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mask_removes_upper_region() {
        let edges = GrayImage::from_pixel(200, 100, Luma([255]));
        let masked = mask_trapezoid(&edges, &LaneConfig::default());

        // Above the apex row everything is cleared
        assert_eq!(masked.get_pixel(100, 10)[0], 0);
        // Bottom row is fully kept
        assert_eq!(masked.get_pixel(0, 99)[0], 255);
        assert_eq!(masked.get_pixel(199, 99)[0], 255);
        // Apex row corners are outside
        assert_eq!(masked.get_pixel(5, 56)[0], 0);
        assert_eq!(masked.get_pixel(100, 56)[0], 255);
    }

    #[test]
    fn test_mask_keeps_edge_values_inside() {
        let edges = GrayImage::from_fn(200, 100, |x, _| Luma([if x % 2 == 0 { 255 } else { 0 }]));
        let masked = mask_trapezoid(&edges, &LaneConfig::default());
        assert_eq!(masked.get_pixel(100, 90)[0], 255);
        assert_eq!(masked.get_pixel(101, 90)[0], 0);
    }

    #[test]
    fn test_degenerate_frame_gives_empty_mask() {
        let mask = trapezoid_mask(1, 40, &LaneConfig::default());
        assert!(mask.pixels().all(|p| p[0] == 0));
    }

    #[test]
    fn test_flat_image_has_no_edges() {
        let gray = GrayImage::from_pixel(120, 80, Luma([90]));
        let edges = detect_edges(&gray, &LaneConfig::default());
        assert!(edges.pixels().all(|p| p[0] == 0));
    }
}
