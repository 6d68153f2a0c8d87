// src/analysis/ego_speed.rs
//
// Ego speed from apparent road-surface motion.
//
// Block matching (SAD) between consecutive grayscale frames inside a
// horizontal band of the frame gives a sparse flow field. The mean flow
// magnitude is a proxy for how fast the road is passing under the camera:
// not calibrated to km/h, but monotonic enough to stretch the danger zones.
//
// Robustness:
//   - a short frame history is kept and every consecutive pair is matched;
//     pairs that fail are dropped, not fatal
//   - zero usable pairs falls back to the previous smoothed value and bumps
//     a failure counter; after N consecutive failures the estimate is halved
//   - near-zero results are treated as noise and hold the previous value

use crate::config::EgoSpeedConfig;
use anyhow::{bail, Result};
use image::GrayImage;
use std::collections::VecDeque;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy)]
pub struct BlockMatchConfig {
    pub blocks_x: usize,
    pub blocks_y: usize,
    pub block_size: usize,
    /// Maximum displacement searched in each axis (±px)
    pub search_range: usize,
}

impl From<&EgoSpeedConfig> for BlockMatchConfig {
    fn from(cfg: &EgoSpeedConfig) -> Self {
        Self {
            blocks_x: cfg.blocks_x,
            blocks_y: cfg.blocks_y,
            block_size: cfg.block_size,
            search_range: cfg.search_range,
        }
    }
}

/// SAD between the block at (rx, ry) in `prev` and (cx, cy) in `curr`.
#[inline]
fn sad_block(
    prev: &GrayImage,
    curr: &GrayImage,
    rx: usize,
    ry: usize,
    cx: usize,
    cy: usize,
    size: usize,
) -> u32 {
    let pw = prev.width() as usize;
    let cw = curr.width() as usize;
    let (p, c) = (prev.as_raw(), curr.as_raw());
    let mut sum: u32 = 0;
    for dy in 0..size {
        let p_row = (ry + dy) * pw + rx;
        let c_row = (cy + dy) * cw + cx;
        for dx in 0..size {
            let diff = p[p_row + dx] as i32 - c[c_row + dx] as i32;
            sum += diff.unsigned_abs();
        }
    }
    sum
}

/// Best 2-D displacement of one block within ±search_range.
fn match_block(
    prev: &GrayImage,
    curr: &GrayImage,
    bx: usize,
    by: usize,
    cfg: &BlockMatchConfig,
) -> (f32, f32) {
    let bs = cfg.block_size;
    let sr = cfg.search_range;
    let (w, h) = (curr.width() as usize, curr.height() as usize);
    let min_x = bx.saturating_sub(sr);
    let max_x = (bx + sr).min(w - bs);
    let min_y = by.saturating_sub(sr);
    let max_y = (by + sr).min(h - bs);

    let mut best = (u32::MAX, 0i32, 0i32);
    for cy in min_y..=max_y {
        for cx in min_x..=max_x {
            let dx = cx as i32 - bx as i32;
            let dy = cy as i32 - by as i32;
            let score = sad_block(prev, curr, bx, by, cx, cy, bs);
            // Prefer the smaller displacement on ties so flat texture reads as still
            let better = score < best.0
                || (score == best.0 && dx.abs() + dy.abs() < best.1.abs() + best.2.abs());
            if better {
                best = (score, dx, dy);
            }
        }
    }
    (best.1 as f32, best.2 as f32)
}

/// Mean flow magnitude (px/frame) inside the band
/// `[top_ratio * h, bottom_ratio * h)`.
pub fn estimate_flow(
    prev: &GrayImage,
    curr: &GrayImage,
    top_ratio: f32,
    bottom_ratio: f32,
    cfg: &BlockMatchConfig,
) -> Result<f32> {
    if prev.dimensions() != curr.dimensions() {
        bail!(
            "frame size changed: {:?} -> {:?}",
            prev.dimensions(),
            curr.dimensions()
        );
    }
    let (w, h) = (curr.width() as usize, curr.height() as usize);
    let top = (h as f32 * top_ratio) as usize;
    let bottom = ((h as f32 * bottom_ratio) as usize).min(h);
    let bs = cfg.block_size;
    let sr = cfg.search_range;

    if bs == 0 || cfg.blocks_x == 0 || cfg.blocks_y == 0 {
        bail!("block matcher is not configured");
    }
    if bottom <= top || bottom - top < bs * 2 {
        bail!("flow band too thin: rows {}..{}", top, bottom);
    }
    if w < bs + 2 * sr {
        bail!("frame too narrow for block matching: {}", w);
    }

    // Evenly space blocks, leaving search margin on both sides
    let usable_w = w - bs - 2 * sr;
    let step_x = if cfg.blocks_x > 1 {
        usable_w / (cfg.blocks_x - 1)
    } else {
        0
    };
    let usable_h = bottom - top - bs;
    let step_y = if cfg.blocks_y > 1 {
        usable_h / (cfg.blocks_y - 1)
    } else {
        0
    };

    let mut magnitudes = Vec::with_capacity(cfg.blocks_x * cfg.blocks_y);
    for by_idx in 0..cfg.blocks_y {
        let by = top + by_idx * step_y;
        for bx_idx in 0..cfg.blocks_x {
            let bx = sr + bx_idx * step_x;
            let (dx, dy) = match_block(prev, curr, bx, by, cfg);
            magnitudes.push((dx * dx + dy * dy).sqrt());
        }
    }

    if magnitudes.is_empty() {
        bail!("no blocks matched");
    }
    Ok(magnitudes.iter().sum::<f32>() / magnitudes.len() as f32)
}

// ============================================================================
// SMOOTHED ESTIMATOR
// ============================================================================

pub struct EgoSpeedEstimator {
    config: EgoSpeedConfig,
    matcher: BlockMatchConfig,
    roi_top_ratio: f32,
    roi_bottom_ratio: f32,
    gray_history: VecDeque<GrayImage>,
    smoothed_speed: f32,
    fail_count: u32,
}

impl EgoSpeedEstimator {
    pub fn new(config: EgoSpeedConfig, roi_top_ratio: f32, roi_bottom_ratio: f32) -> Self {
        let matcher = BlockMatchConfig::from(&config);
        let capacity = config.history_frames.max(2);
        Self {
            config,
            matcher,
            roi_top_ratio,
            roi_bottom_ratio,
            gray_history: VecDeque::with_capacity(capacity),
            smoothed_speed: 0.0,
            fail_count: 0,
        }
    }

    /// Feed the next processed frame, get the smoothed speed back.
    pub fn update(&mut self, gray: &GrayImage) -> f32 {
        self.gray_history.push_back(gray.clone());
        while self.gray_history.len() > self.config.history_frames.max(2) {
            self.gray_history.pop_front();
        }

        let samples: Vec<f32> = self
            .gray_history
            .iter()
            .zip(self.gray_history.iter().skip(1))
            .filter_map(|(prev, curr)| {
                match estimate_flow(prev, curr, self.roi_top_ratio, self.roi_bottom_ratio, &self.matcher) {
                    Ok(v) => Some(v),
                    Err(e) => {
                        debug!("Optical flow pair dropped: {:#}", e);
                        None
                    }
                }
            })
            .collect();

        let previous = self.smoothed_speed;
        let raw = if samples.is_empty() {
            self.fail_count += 1;
            previous
        } else {
            self.fail_count = 0;
            samples.iter().sum::<f32>() / samples.len() as f32
        };

        let alpha = self.config.smoothing_alpha;
        let mut speed = alpha * raw + (1.0 - alpha) * previous;
        if speed < self.config.noise_floor {
            speed = previous;
        }
        if self.fail_count >= self.config.max_fail_count {
            warn!(
                "Ego speed unavailable for {} frames, decaying estimate {:.2}",
                self.fail_count, speed
            );
            speed *= 0.5;
        }

        self.smoothed_speed = speed;
        speed
    }

    pub fn speed(&self) -> f32 {
        self.smoothed_speed
    }

    #[cfg(test)]
    pub fn fail_count(&self) -> u32 {
        self.fail_count
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;

    /// Checkerboard-ish texture translated by (shift_x, shift_y).
    fn textured(width: u32, height: u32, shift_x: i32, shift_y: i32) -> GrayImage {
        GrayImage::from_fn(width, height, |x, y| {
            let sx = x as i32 - shift_x;
            let sy = y as i32 - shift_y;
            let v = ((sx.rem_euclid(13) * 7 + sy.rem_euclid(11) * 11) % 97) as u8;
            Luma([v * 2 + 30])
        })
    }

    fn matcher() -> BlockMatchConfig {
        BlockMatchConfig::from(&EgoSpeedConfig::default())
    }

    #[test]
    fn test_no_motion_gives_zero_flow() {
        let f = textured(320, 240, 0, 0);
        let flow = estimate_flow(&f, &f, 0.5, 0.95, &matcher()).unwrap();
        assert!(flow < 0.01, "flow was {}", flow);
    }

    #[test]
    fn test_translation_magnitude() {
        let a = textured(320, 240, 0, 0);
        let b = textured(320, 240, 3, 4);
        let flow = estimate_flow(&a, &b, 0.4, 0.95, &matcher()).unwrap();
        assert!((flow - 5.0).abs() < 0.5, "flow was {}", flow);
    }

    #[test]
    fn test_thin_band_is_an_error() {
        let f = textured(320, 240, 0, 0);
        assert!(estimate_flow(&f, &f, 0.5, 0.52, &matcher()).is_err());
    }

    #[test]
    fn test_size_change_is_an_error() {
        let a = textured(320, 240, 0, 0);
        let b = textured(160, 120, 0, 0);
        assert!(estimate_flow(&a, &b, 0.5, 0.95, &matcher()).is_err());
    }

    #[test]
    fn test_smoothing_converges_toward_flow() {
        let mut est = EgoSpeedEstimator::new(EgoSpeedConfig::default(), 0.4, 0.95);
        let mut last = 0.0;
        for i in 0..12 {
            // Road texture moving down 2px per frame
            last = est.update(&textured(320, 240, 0, 2 * i));
        }
        assert!(last > 1.5 && last <= 2.0 + 1e-3, "speed was {}", last);
        assert_eq!(est.fail_count(), 0);
    }

    #[test]
    fn test_first_frame_counts_as_failure_and_holds() {
        let mut est = EgoSpeedEstimator::new(EgoSpeedConfig::default(), 0.4, 0.95);
        assert_eq!(est.update(&textured(320, 240, 0, 0)), 0.0);
        assert_eq!(est.fail_count(), 1);
    }

    #[test]
    fn test_repeated_failures_halve_speed() {
        let mut est = EgoSpeedEstimator::new(EgoSpeedConfig::default(), 0.4, 0.95);
        for i in 0..10 {
            est.update(&textured(320, 240, 0, 2 * i));
        }
        // Tiny frames can never be matched; the first one still leaves one
        // good pair in the history
        let tiny = GrayImage::new(8, 8);
        est.update(&tiny);
        let before = est.speed();
        assert!(before > 1.0);
        assert_eq!(est.fail_count(), 0);

        est.update(&tiny);
        est.update(&tiny);
        assert!((est.speed() - before).abs() < 1e-4, "held while under the limit");
        let after = est.update(&tiny);
        assert!((after - before * 0.5).abs() < 1e-4);
        assert_eq!(est.fail_count(), 3);
    }

    #[test]
    fn test_still_scene_holds_at_noise_floor() {
        let config = EgoSpeedConfig::default();
        let floor = config.noise_floor;
        let mut est = EgoSpeedEstimator::new(config, 0.4, 0.95);
        for i in 0..10 {
            est.update(&textured(320, 240, 0, 2 * i));
        }
        assert!(est.speed() > 1.0);

        // Motion stops: the estimate decays but never drops under the floor
        let still = textured(320, 240, 0, 18);
        let mut settled = est.update(&still);
        for _ in 0..40 {
            settled = est.update(&still);
            assert!(settled >= floor, "fell to {}", settled);
        }
        assert_eq!(est.fail_count(), 0);
        assert!(settled < floor / (1.0 - EgoSpeedConfig::default().smoothing_alpha));
        assert_eq!(est.update(&still), settled);
    }
}
