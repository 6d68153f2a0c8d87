// src/detection/lane_estimator.rs
//
// Classical lane geometry: edges -> masked Hough segments -> one averaged
// line per side -> temporal smoothing -> scene validity.
//
// Left/right are split purely by slope sign in image coordinates: the
// left boundary rises to the right (negative slope), the right boundary
// rises to the left.

use super::edges::{detect_edges, mask_trapezoid};
use super::lane_smoother::LineSmoother;
use super::segments::{detect_segments, filter_by_slope, Segment};
use crate::config::LaneConfig;
use crate::types::LaneLine;
use anyhow::{bail, Result};
use image::GrayImage;
use tracing::{debug, warn};

/// Smallest frame side the estimator will work on.
const MIN_FRAME_SIDE: u32 = 16;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LaneEstimate {
    pub left: Option<LaneLine>,
    pub right: Option<LaneLine>,
    pub scene_valid: bool,
}

impl LaneEstimate {
    pub fn invalid() -> Self {
        Self {
            left: None,
            right: None,
            scene_valid: false,
        }
    }

    #[cfg(test)]
    pub fn lines(&self) -> Option<(LaneLine, LaneLine)> {
        Some((self.left?, self.right?))
    }
}

pub struct LaneGeometryEstimator {
    config: LaneConfig,
    left: LineSmoother,
    right: LineSmoother,
}

impl LaneGeometryEstimator {
    pub fn new(config: LaneConfig) -> Self {
        let window = config.smoother_window;
        Self {
            config,
            left: LineSmoother::new(window),
            right: LineSmoother::new(window),
        }
    }

    /// Never fails: any internal error yields an invalid scene with no lines.
    pub fn estimate(&mut self, gray: &GrayImage) -> LaneEstimate {
        match self.try_estimate(gray) {
            Ok(estimate) => estimate,
            Err(e) => {
                warn!("Lane estimation failed: {:#}", e);
                LaneEstimate::invalid()
            }
        }
    }

    fn try_estimate(&mut self, gray: &GrayImage) -> Result<LaneEstimate> {
        let (w, h) = gray.dimensions();
        if w < MIN_FRAME_SIDE || h < MIN_FRAME_SIDE {
            bail!("frame too small for lane detection: {}x{}", w, h);
        }

        let edges = mask_trapezoid(&detect_edges(gray, &self.config), &self.config);
        let segments = filter_by_slope(&detect_segments(&edges, &self.config), &self.config);
        let (left_params, right_params) = average_slope_intercept(&segments);

        let y_bottom = h as f32;
        let y_top = h as f32 * self.config.extrapolate_top_ratio;
        let to_line = |(m, b): (f32, f32)| {
            Some(LaneLine::from_slope_intercept(m, b, y_bottom, y_top)).filter(|l| l.is_finite())
        };
        let raw_left = left_params.and_then(to_line);
        let raw_right = right_params.and_then(to_line);

        debug!(
            "Lane segments: {} (left raw: {}, right raw: {})",
            segments.len(),
            raw_left.is_some(),
            raw_right.is_some()
        );

        let left = self.left.push(raw_left);
        let right = self.right.push(raw_right);
        let scene_valid = is_valid_scene(left.as_ref(), right.as_ref(), h, &self.config);

        Ok(LaneEstimate {
            left,
            right,
            scene_valid,
        })
    }
}

/// Mean slope/intercept per side.
pub fn average_slope_intercept(segments: &[Segment]) -> (Option<(f32, f32)>, Option<(f32, f32)>) {
    let mut left = Vec::new();
    let mut right = Vec::new();
    for seg in segments {
        if let Some((m, b)) = seg.slope_intercept() {
            if m < 0.0 {
                left.push((m, b));
            } else {
                right.push((m, b));
            }
        }
    }
    (mean_pair(&left), mean_pair(&right))
}

fn mean_pair(values: &[(f32, f32)]) -> Option<(f32, f32)> {
    if values.is_empty() {
        return None;
    }
    let n = values.len() as f32;
    let (sm, sb) = values
        .iter()
        .fold((0.0, 0.0), |acc, (m, b)| (acc.0 + m, acc.1 + b));
    Some((sm / n, sb / n))
}

/// Both lines present, far enough apart at the bottom, and long enough
/// vertically to be real boundaries rather than fragments.
pub fn is_valid_scene(
    left: Option<&LaneLine>,
    right: Option<&LaneLine>,
    frame_height: u32,
    config: &LaneConfig,
) -> bool {
    let (Some(left), Some(right)) = (left, right) else {
        return false;
    };
    let min_line_height = frame_height as f32 * config.min_line_height_ratio;
    let lane_width = (left.x1 - right.x1).abs();

    lane_width >= config.min_lane_width
        && left.vertical_span() >= min_line_height
        && right.vertical_span() >= min_line_height
}
