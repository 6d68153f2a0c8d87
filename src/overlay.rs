// src/overlay.rs
//
// Annotated frame rendering.
//
//   ┌─────────────────────────────────────────────┐
//   │ ████ WARNING: TOO CLOSE (narrow lane)       │
//   │ ████ DROWSINESS ALERT!                      │
//   │ ROI Scale / Speed / FPS                     │
//   │               /  LOW   \      green         │
//   │              /   MID    \     orange        │
//   │  side (or.) /    HIGH    \  side (orange)   │
//   │            / RISK ID: 7   \   red           │
//   │              [RISK BOX]                     │
//   └─────────────────────────────────────────────┘
//
// Zones are alpha-blended over the frame, lane lines and risky boxes are
// drawn opaque on top. Drawing never fails: degenerate polygons are
// skipped, and without a font the banners are drawn unlabeled.

use crate::analysis::risk::RiskAssessment;
use crate::pipeline::FrameOutput;
use crate::types::{LaneLine, Point as ZonePoint, Zone};
use ab_glyph::{FontVec, PxScale};
use anyhow::{Context, Result};
use image::{GrayImage, Luma, Rgb, RgbImage};
use imageproc::drawing::{
    draw_filled_rect_mut, draw_hollow_rect_mut, draw_line_segment_mut, draw_polygon_mut,
    draw_text_mut,
};
use imageproc::point::Point;
use imageproc::rect::Rect;
use std::path::Path;
use tracing::{info, warn};

/// Zone and marker colors (RGB).
pub mod colors {
    use image::Rgb;

    pub const ZONE_HIGH: Rgb<u8> = Rgb([255, 0, 0]);
    pub const ZONE_MID: Rgb<u8> = Rgb([255, 165, 0]);
    pub const ZONE_LOW: Rgb<u8> = Rgb([0, 255, 0]);
    pub const ZONE_SIDE: Rgb<u8> = Rgb([255, 140, 0]);
    pub const LANE_LINE: Rgb<u8> = Rgb([255, 255, 0]);
    pub const RISK_BOX: Rgb<u8> = Rgb([255, 0, 0]);
    pub const TOO_CLOSE: Rgb<u8> = Rgb([220, 0, 0]);
    pub const DROWSY: Rgb<u8> = Rgb([255, 0, 255]);
    pub const HUD_TEXT: Rgb<u8> = Rgb([0, 0, 0]);
    pub const BANNER_TEXT: Rgb<u8> = Rgb([255, 255, 255]);
}

pub const ZONE_ALPHA: f32 = 0.4;
/// Lane narrower than this share of the reference width raises the banner.
pub const TOO_CLOSE_RATIO: f32 = 0.4;
const LANE_THICKNESS: i32 = 3;

const BANNER_HEIGHT: u32 = 28;
const BANNER_SCALE: f32 = 24.0;
const HUD_SCALE: f32 = 22.0;
const HUD_LINE_SPACING: i32 = 30;
const LABEL_SCALE: f32 = 16.0;

pub const TOO_CLOSE_TEXT: &str = "WARNING: TOO CLOSE";
pub const DROWSY_TEXT: &str = "DROWSINESS ALERT!";

fn zone_color(zone: Zone) -> Rgb<u8> {
    match zone {
        Zone::High => colors::ZONE_HIGH,
        Zone::Mid => colors::ZONE_MID,
        Zone::Low => colors::ZONE_LOW,
        Zone::SideLeft | Zone::SideRight => colors::ZONE_SIDE,
    }
}

/// Integer vertices usable by `draw_polygon_mut`: consecutive duplicates
/// removed, open (last != first), at least three points.
fn to_drawable(poly: &[ZonePoint]) -> Option<Vec<Point<i32>>> {
    let mut pts: Vec<Point<i32>> = Vec::with_capacity(poly.len());
    for p in poly {
        if !p.x.is_finite() || !p.y.is_finite() {
            return None;
        }
        let q = Point::new(p.x.round() as i32, p.y.round() as i32);
        if pts.last() != Some(&q) {
            pts.push(q);
        }
    }
    while pts.len() > 1 && pts.first() == pts.last() {
        pts.pop();
    }
    (pts.len() >= 3).then_some(pts)
}

/// Fill `poly` with `color` at `alpha` over `img`.
pub fn blend_polygon(img: &mut RgbImage, poly: &[ZonePoint], color: Rgb<u8>, alpha: f32) {
    let Some(pts) = to_drawable(poly) else {
        return;
    };
    let (w, h) = img.dimensions();
    let mut mask = GrayImage::new(w, h);
    draw_polygon_mut(&mut mask, &pts, Luma([255]));

    let a = alpha.clamp(0.0, 1.0);
    for (x, y, m) in mask.enumerate_pixels() {
        if m[0] == 0 {
            continue;
        }
        let px = img.get_pixel_mut(x, y);
        for c in 0..3 {
            px[c] = (px[c] as f32 * (1.0 - a) + color[c] as f32 * a).round() as u8;
        }
    }
}

pub fn draw_lane_line(img: &mut RgbImage, line: &LaneLine, color: Rgb<u8>) {
    if !line.is_finite() {
        return;
    }
    let half = LANE_THICKNESS / 2;
    for d in -half..=half {
        let d = d as f32;
        draw_line_segment_mut(img, (line.x1 + d, line.y1), (line.x2 + d, line.y2), color);
    }
}

/// Two-pixel rectangle outline, clipped to the image.
pub fn draw_box(img: &mut RgbImage, x1: f32, y1: f32, x2: f32, y2: f32, color: Rgb<u8>) {
    let (w, h) = img.dimensions();
    let x1 = (x1.max(0.0) as i32).min(w as i32 - 1);
    let y1 = (y1.max(0.0) as i32).min(h as i32 - 1);
    let x2 = (x2.max(0.0) as i32).min(w as i32 - 1);
    let y2 = (y2.max(0.0) as i32).min(h as i32 - 1);
    if x2 <= x1 || y2 <= y1 {
        return;
    }
    for inset in 0..2 {
        let bw = (x2 - x1 - 2 * inset).max(1) as u32;
        let bh = (y2 - y1 - 2 * inset).max(1) as u32;
        draw_hollow_rect_mut(img, Rect::at(x1 + inset, y1 + inset).of_size(bw, bh), color);
    }
}

pub fn risk_label(assessment: &RiskAssessment) -> String {
    format!(
        "RISK ID: {} ({:.1})",
        assessment.track_id, assessment.smoothed_score
    )
}

/// Status lines for the top-left corner. ROI scale only while a ROI exists.
pub fn hud_lines(output: &FrameOutput, fps: f32) -> Vec<String> {
    let mut lines = Vec::with_capacity(3);
    if let Some(roi) = &output.roi {
        lines.push(format!("ROI Scale: {:.3}", roi.scale));
    }
    lines.push(format!("Speed: {:.2}", output.ego_speed));
    lines.push(format!("FPS: {:.2}", fps));
    lines
}

pub fn is_too_close(output: &FrameOutput, reference_lane_width: f32) -> bool {
    output
        .roi
        .as_ref()
        .is_some_and(|roi| roi.lane_width < reference_lane_width * TOO_CLOSE_RATIO)
}

pub struct OverlayRenderer {
    font: Option<FontVec>,
    reference_lane_width: f32,
}

impl OverlayRenderer {
    pub fn new(font: Option<FontVec>, reference_lane_width: f32) -> Self {
        Self {
            font,
            reference_lane_width,
        }
    }

    /// Renderer with the configured label font. A missing or unreadable
    /// font is logged and the overlay runs without text.
    pub fn from_font_path(font_path: Option<&str>, reference_lane_width: f32) -> Self {
        let font = match font_path {
            Some(path) => match load_font(path) {
                Ok(font) => {
                    info!("✓ Overlay font loaded from {}", path);
                    Some(font)
                }
                Err(e) => {
                    warn!("Overlay labels disabled: {:#}", e);
                    None
                }
            },
            None => None,
        };
        Self::new(font, reference_lane_width)
    }

    #[cfg(test)]
    pub fn has_font(&self) -> bool {
        self.font.is_some()
    }

    /// Full annotation for one processed frame. `fps` is the measured
    /// processing rate shown in the status lines.
    pub fn render(&self, frame: &RgbImage, output: &FrameOutput, fps: f32) -> RgbImage {
        let mut img = frame.clone();

        if let Some(roi) = &output.roi {
            // Far zones first so nearer ones blend on top
            for zone in [Zone::Low, Zone::Mid, Zone::High, Zone::SideLeft, Zone::SideRight] {
                if let Some(poly) = roi.get(zone) {
                    blend_polygon(&mut img, poly, zone_color(zone), ZONE_ALPHA);
                }
            }
        }

        for line in [output.lanes.left, output.lanes.right].iter().flatten() {
            draw_lane_line(&mut img, line, colors::LANE_LINE);
        }

        for a in output.risky() {
            draw_box(&mut img, a.bbox.x1, a.bbox.y1, a.bbox.x2, a.bbox.y2, colors::RISK_BOX);
            let label_x = a.bbox.x1.max(0.0) as i32;
            let label_y = (a.bbox.y1 - LABEL_SCALE - 4.0).max(0.0) as i32;
            let label = risk_label(a);
            self.text(&mut img, &label, label_x, label_y, LABEL_SCALE, colors::RISK_BOX);
        }

        let mut banner_y = 0;
        if is_too_close(output, self.reference_lane_width) {
            self.banner(&mut img, banner_y, colors::TOO_CLOSE, TOO_CLOSE_TEXT);
            banner_y += BANNER_HEIGHT as i32;
        }
        if output.drowsy {
            self.banner(&mut img, banner_y, colors::DROWSY, DROWSY_TEXT);
            banner_y += BANNER_HEIGHT as i32;
        }

        let mut y = banner_y + 6;
        for line in hud_lines(output, fps) {
            self.text(&mut img, &line, 15, y, HUD_SCALE, colors::HUD_TEXT);
            y += HUD_LINE_SPACING;
        }

        img
    }

    fn banner(&self, img: &mut RgbImage, y: i32, color: Rgb<u8>, caption: &str) {
        let w = img.width().max(1);
        draw_filled_rect_mut(img, Rect::at(0, y).of_size(w, BANNER_HEIGHT), color);
        self.text(img, caption, 15, y + 2, BANNER_SCALE, colors::BANNER_TEXT);
    }

    fn text(&self, img: &mut RgbImage, text: &str, x: i32, y: i32, scale: f32, color: Rgb<u8>) {
        if let Some(font) = &self.font {
            draw_text_mut(img, color, x, y, PxScale::from(scale), font, text);
        }
    }
}

fn load_font(path: &str) -> Result<FontVec> {
    let path = Path::new(path);
    let data = std::fs::read(path)
        .with_context(|| format!("Failed to read font {}", path.display()))?;
    FontVec::try_from_vec(data).with_context(|| format!("Invalid font file {}", path.display()))
}
