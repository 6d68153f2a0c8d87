// src/config.rs
//
// Strongly typed configuration. `risk_params` mirrors the scoring keys and
// every field there is mandatory: a missing key fails the YAML parse.
// The remaining sections are tuning knobs with sensible defaults.

use crate::types::Zone;
use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub risk_params: RiskParams,
    #[serde(default)]
    pub lane: LaneConfig,
    #[serde(default)]
    pub roi: RoiConfig,
    #[serde(default)]
    pub ego: EgoSpeedConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub alerts: AlertConfig,
    #[serde(default)]
    pub video: VideoConfig,
}

// ============================================================================
// RISK PARAMETERS (all mandatory)
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskParams {
    pub speed: SpeedParams,
    pub base_score: ZoneWeights,
    pub stay_weight: ZoneWeights,
    pub score_threshold: ScoreThresholds,
    pub id_stability: IdStability,
    pub decay: DecayParams,
    pub optical_flow: OpticalFlowParams,
    pub warning: WarningThresholds,
    pub smoothing: SmoothingParams,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpeedParams {
    /// Center displacement (px) above which a frame-to-frame move is tracker noise
    pub jump_threshold: f32,
    /// Cap on per-object speed (px/s)
    pub max_speed: f32,
    pub gamma: f32,
    pub log_scale: bool,
    /// Weight of the |vx| term; the only optional key in this section
    #[serde(default = "default_lateral_weight")]
    pub lateral_weight: f32,
}

fn default_lateral_weight() -> f32 {
    0.5
}

/// One coefficient per danger zone.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ZoneWeights {
    pub high: f32,
    pub mid: f32,
    pub low: f32,
    pub side_left: f32,
    pub side_right: f32,
}

impl ZoneWeights {
    pub fn get(&self, zone: Zone) -> f32 {
        match zone {
            Zone::High => self.high,
            Zone::Mid => self.mid,
            Zone::Low => self.low,
            Zone::SideLeft => self.side_left,
            Zone::SideRight => self.side_right,
        }
    }

    fn iter(&self) -> impl Iterator<Item = (Zone, f32)> + '_ {
        Zone::PRIORITY.iter().map(move |&z| (z, self.get(z)))
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ScoreThresholds {
    pub high: f32,
    pub mid: f32,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct IdStability {
    pub decay_on_jump: bool,
    /// Stay-counter decrement applied on a jump inside the same zone
    pub decay_rate: u32,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct DecayParams {
    pub speed_threshold: f32,
    pub decay_frame_threshold: u32,
    pub decay_rate: f32,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct OpticalFlowParams {
    pub roi_top_ratio: f32,
    pub roi_bottom_ratio: f32,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct WarningThresholds {
    pub yellow_score_threshold: f32,
    pub red_score_threshold: f32,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SmoothingParams {
    pub history_length: usize,
}

// ============================================================================
// TUNING SECTIONS (optional)
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LaneConfig {
    pub blur_sigma: f32,
    pub canny_low: f32,
    pub canny_high: f32,
    /// Trapezoid mask apex height as a fraction of frame height
    pub mask_top_ratio: f32,
    pub mask_top_left_ratio: f32,
    pub mask_top_right_ratio: f32,
    pub hough_vote_threshold: u32,
    pub hough_suppression_radius: u32,
    pub min_line_length: f32,
    pub max_line_gap: f32,
    pub min_abs_slope: f32,
    pub max_abs_slope: f32,
    /// Upper extrapolation target as a fraction of frame height
    pub extrapolate_top_ratio: f32,
    pub smoother_window: usize,
    pub min_lane_width: f32,
    pub min_line_height_ratio: f32,
}

impl Default for LaneConfig {
    fn default() -> Self {
        Self {
            blur_sigma: 1.1,
            canny_low: 50.0,
            canny_high: 150.0,
            mask_top_ratio: 0.55,
            mask_top_left_ratio: 0.4,
            mask_top_right_ratio: 0.6,
            hough_vote_threshold: 50,
            hough_suppression_radius: 8,
            min_line_length: 80.0,
            max_line_gap: 60.0,
            min_abs_slope: 0.3,
            max_abs_slope: 5.0,
            extrapolate_top_ratio: 0.6,
            smoother_window: 5,
            min_lane_width: 100.0,
            min_line_height_ratio: 0.2,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RoiConfig {
    pub high_height: f32,
    pub mid_height: f32,
    pub low_height: f32,
    /// Lane width that maps to scale 1.0 before clamping
    pub reference_lane_width: f32,
    pub min_base_scale: f32,
    pub max_base_scale: f32,
    pub speed_gain: f32,
    pub speed_scale_factor: f32,
    pub side_offset_ratio: f32,
    /// Side zones reach this many pixels above the high zone top
    pub side_raise_px: f32,
}

impl Default for RoiConfig {
    fn default() -> Self {
        Self {
            high_height: 150.0,
            mid_height: 70.0,
            low_height: 180.0,
            reference_lane_width: 400.0,
            min_base_scale: 0.5,
            max_base_scale: 0.6,
            speed_gain: 0.005,
            speed_scale_factor: 1.0,
            side_offset_ratio: 0.9,
            side_raise_px: 100.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EgoSpeedConfig {
    pub history_frames: usize,
    pub smoothing_alpha: f32,
    pub noise_floor: f32,
    pub max_fail_count: u32,
    pub blocks_x: usize,
    pub blocks_y: usize,
    pub block_size: usize,
    pub search_range: usize,
}

impl Default for EgoSpeedConfig {
    fn default() -> Self {
        Self {
            history_frames: 3,
            smoothing_alpha: 0.3,
            noise_floor: 0.05,
            max_fail_count: 3,
            blocks_x: 6,
            blocks_y: 2,
            block_size: 16,
            search_range: 8,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Nominal input frame rate, used for px/s speeds and frame timestamps
    pub fps: f32,
    /// Process every Nth frame
    pub frame_skip: u32,
    /// Frames a track may stay unseen before its state is evicted
    pub track_ttl_frames: u64,
    /// Frames the last good ROI set may stand in for a missing one
    pub roi_reuse_frames: u32,
    pub side_zones_as_high: bool,
    pub center_history: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            fps: 30.0,
            frame_skip: 1,
            track_ttl_frames: 90,
            roi_reuse_frames: 10,
            side_zones_as_high: true,
            center_history: 5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AlertConfig {
    pub enabled: bool,
    pub queue_capacity: usize,
    pub clip_dir: PathBuf,
    pub clip_duration_ms: u64,
    pub risk_side_cooldown_s: f64,
    pub risk_high_cooldown_s: f64,
    pub drowsiness_cooldown_s: f64,
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            queue_capacity: 5,
            clip_dir: PathBuf::from("audio_cache"),
            clip_duration_ms: 1500,
            risk_side_cooldown_s: 5.0,
            risk_high_cooldown_s: 5.0,
            drowsiness_cooldown_s: 5.0,
        }
    }
}

const DEFAULT_FONT_PATH: &str = "/usr/share/fonts/truetype/dejavu/DejaVuSans.ttf";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VideoConfig {
    pub input_dir: String,
    pub detections_file: String,
    pub output_dir: String,
    pub save_annotated: bool,
    /// TrueType font for overlay labels. Without a loadable font the
    /// overlay falls back to unlabeled banners.
    pub font_path: Option<String>,
}

impl Default for VideoConfig {
    fn default() -> Self {
        Self {
            input_dir: "frames".to_string(),
            detections_file: "detections.jsonl".to_string(),
            output_dir: "output".to_string(),
            save_annotated: true,
            font_path: Some(DEFAULT_FONT_PATH.to_string()),
        }
    }
}

// ============================================================================
// LOADING
// ============================================================================

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        Self::from_yaml(&contents).with_context(|| format!("Invalid config {}", path.display()))
    }

    pub fn from_yaml(contents: &str) -> Result<Self> {
        let config: Config = serde_yaml::from_str(contents).context("Failed to parse YAML")?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values that parse but make no sense. Called once at startup.
    pub fn validate(&self) -> Result<()> {
        let rp = &self.risk_params;

        if rp.speed.jump_threshold <= 0.0 {
            bail!("speed.jump_threshold must be > 0");
        }
        if rp.speed.max_speed <= 0.0 {
            bail!("speed.max_speed must be > 0");
        }
        if rp.speed.gamma < 0.0 || rp.speed.lateral_weight < 0.0 {
            bail!("speed.gamma and speed.lateral_weight must be >= 0");
        }
        for (zone, v) in rp.base_score.iter() {
            if v < 0.0 {
                bail!("base_score.{} must be >= 0", zone.as_str());
            }
        }
        for (zone, v) in rp.stay_weight.iter() {
            if v < 0.0 {
                bail!("stay_weight.{} must be >= 0", zone.as_str());
            }
        }
        if rp.score_threshold.mid > rp.score_threshold.high {
            bail!("score_threshold.mid must not exceed score_threshold.high");
        }
        if !(rp.decay.decay_rate > 0.0 && rp.decay.decay_rate <= 1.0) {
            bail!("decay.decay_rate must be in (0, 1]");
        }
        let flow = &rp.optical_flow;
        if !(0.0..1.0).contains(&flow.roi_top_ratio)
            || !(flow.roi_top_ratio < flow.roi_bottom_ratio && flow.roi_bottom_ratio <= 1.0)
        {
            bail!("optical_flow ratios must satisfy 0 <= top < bottom <= 1");
        }
        if rp.smoothing.history_length == 0 {
            bail!("smoothing.history_length must be >= 1");
        }

        if self.lane.blur_sigma <= 0.0 {
            bail!("lane.blur_sigma must be > 0");
        }
        if self.lane.canny_low > self.lane.canny_high {
            bail!("lane.canny_low must not exceed lane.canny_high");
        }
        if self.lane.smoother_window == 0 {
            bail!("lane.smoother_window must be >= 1");
        }
        if self.roi.min_base_scale > self.roi.max_base_scale || self.roi.min_base_scale <= 0.0 {
            bail!("roi base scale bounds are inverted or non-positive");
        }
        if !(0.0..=1.0).contains(&self.ego.smoothing_alpha) {
            bail!("ego.smoothing_alpha must be in [0, 1]");
        }
        if self.ego.history_frames < 2 {
            bail!("ego.history_frames must be >= 2");
        }
        if self.pipeline.fps <= 0.0 {
            bail!("pipeline.fps must be > 0");
        }
        if self.pipeline.frame_skip == 0 || self.pipeline.center_history == 0 {
            bail!("pipeline.frame_skip and pipeline.center_history must be >= 1");
        }
        if self.alerts.queue_capacity == 0 {
            bail!("alerts.queue_capacity must be >= 1");
        }

        Ok(())
    }
}
