// src/detection/segments.rs
//
// Probabilistic-style line segments from an edge map.
//
// Hough voting finds candidate infinite lines; each candidate is then walked
// pixel by pixel to recover the actual edge runs on it. A run survives when
// it is at least `min_line_length` long, and runs are broken by gaps longer
// than `max_line_gap`.

use crate::config::LaneConfig;
use crate::types::Point;
use image::GrayImage;
use imageproc::hough::{detect_lines, LineDetectionOptions, PolarLine};

/// Pixels on either side of the ideal line that still count as "on" it.
/// Absorbs the 1-degree / 1-pixel quantization of the accumulator.
const LINE_TOLERANCE_PX: i32 = 2;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Segment {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
}

impl Segment {
    pub fn new(x1: f32, y1: f32, x2: f32, y2: f32) -> Self {
        Self { x1, y1, x2, y2 }
    }

    #[cfg(test)]
    pub fn length(&self) -> f32 {
        Point::new(self.x1, self.y1).distance(&Point::new(self.x2, self.y2))
    }

    /// Least-squares fit through the two endpoints. `None` for vertical segments.
    pub fn slope_intercept(&self) -> Option<(f32, f32)> {
        let dx = self.x2 - self.x1;
        if dx.abs() < f32::EPSILON {
            return None;
        }
        let slope = (self.y2 - self.y1) / dx;
        Some((slope, self.y1 - slope * self.x1))
    }
}

pub fn detect_segments(edges: &GrayImage, config: &LaneConfig) -> Vec<Segment> {
    let options = LineDetectionOptions {
        vote_threshold: config.hough_vote_threshold,
        suppression_radius: config.hough_suppression_radius,
    };
    detect_lines(edges, options)
        .iter()
        .flat_map(|line| trace_line(edges, line, config))
        .collect()
}

/// Keep segments whose slope magnitude lies strictly inside the band.
pub fn filter_by_slope(segments: &[Segment], config: &LaneConfig) -> Vec<Segment> {
    segments
        .iter()
        .copied()
        .filter(|s| match s.slope_intercept() {
            Some((m, _)) => m.abs() > config.min_abs_slope && m.abs() < config.max_abs_slope,
            None => false,
        })
        .collect()
}

fn is_edge_near(edges: &GrayImage, x: f32, y: f32, nx: f32, ny: f32) -> bool {
    let (w, h) = edges.dimensions();
    (-LINE_TOLERANCE_PX..=LINE_TOLERANCE_PX).any(|k| {
        let px = (x + k as f32 * nx).round();
        let py = (y + k as f32 * ny).round();
        px >= 0.0
            && py >= 0.0
            && (px as u32) < w
            && (py as u32) < h
            && edges.get_pixel(px as u32, py as u32)[0] > 0
    })
}

/// Walk `line` (x cos t + y sin t = r) across the image and split it into
/// edge runs.
fn trace_line(edges: &GrayImage, line: &PolarLine, config: &LaneConfig) -> Vec<Segment> {
    let (w, h) = edges.dimensions();
    let theta = (line.angle_in_degrees as f32).to_radians();
    let (sin, cos) = theta.sin_cos();

    // Step along the axis the line is closest to, one pixel at a time
    let samples: Vec<Point> = if sin.abs() >= cos.abs() {
        (0..w)
            .map(|x| {
                let x = x as f32;
                Point::new(x, (line.r - x * cos) / sin)
            })
            .collect()
    } else {
        (0..h)
            .map(|y| {
                let y = y as f32;
                Point::new((line.r - y * sin) / cos, y)
            })
            .collect()
    };

    let mut segments = Vec::new();
    let mut run: Option<(Point, Point)> = None;

    for p in samples {
        if is_edge_near(edges, p.x, p.y, cos, sin) {
            run = match run {
                Some((start, _)) => Some((start, p)),
                None => Some((p, p)),
            };
        } else if let Some((start, last)) = run {
            if last.distance(&p) > config.max_line_gap {
                push_run(&mut segments, start, last, config);
                run = None;
            }
        }
    }
    if let Some((start, last)) = run {
        push_run(&mut segments, start, last, config);
    }

    segments
}

fn push_run(out: &mut Vec<Segment>, start: Point, end: Point, config: &LaneConfig) {
    if start.distance(&end) >= config.min_line_length {
        out.push(Segment::new(start.x, start.y, end.x, end.y));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;

    #[test]
    fn test_slope_filter_rejects_flat_and_vertical() {
        let cfg = LaneConfig::default();
        let segs = vec![
            Segment::new(0.0, 100.0, 100.0, 0.0),  // slope -1, kept
            Segment::new(0.0, 0.0, 100.0, 10.0),   // slope 0.1, too flat
            Segment::new(50.0, 0.0, 50.0, 100.0),  // vertical
            Segment::new(0.0, 0.0, 10.0, 100.0),   // slope 10, too steep
        ];
        let kept = filter_by_slope(&segs, &cfg);
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].slope_intercept().unwrap().0, -1.0);
    }

    #[test]
    fn test_detects_drawn_diagonal() {
        let mut img = GrayImage::new(300, 300);
        for i in 20..280u32 {
            img.put_pixel(i, 299 - i, Luma([255]));
        }
        let cfg = LaneConfig::default();
        let segs = detect_segments(&img, &cfg);
        assert!(!segs.is_empty(), "diagonal should produce a segment");
        let longest = segs
            .iter()
            .max_by(|a, b| a.length().partial_cmp(&b.length()).unwrap())
            .unwrap();
        let (m, _) = longest.slope_intercept().unwrap();
        assert!((m + 1.0).abs() < 0.1, "slope was {}", m);
        assert!(longest.length() > 200.0);
    }

    #[test]
    fn test_short_runs_are_dropped() {
        let mut img = GrayImage::new(200, 200);
        for i in 0..30u32 {
            img.put_pixel(50 + i, 150 - i, Luma([255]));
        }
        let cfg = LaneConfig {
            hough_vote_threshold: 10,
            ..LaneConfig::default()
        };
        assert!(detect_segments(&img, &cfg).is_empty());
    }
}
