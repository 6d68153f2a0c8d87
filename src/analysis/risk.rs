// src/analysis/risk.rs
//
// Per-track risk scoring.
//
// Every tracked object that overlaps a danger zone gets a score each frame:
//
//   score = base[zone] + stay_weight[zone] * stay
//         + gamma * f(speed) + lateral_weight * |vx|
//
// where `stay` is the consecutive-frame dwell in the current zone and
// f is log1p or identity. Near-static objects decay after a while, and the
// level is classified on the mean of the recent score history rather than
// the raw per-frame value.
//
// State is owned here, keyed by the external tracker's id, and evicted once
// an id has not been seen for `track_ttl_frames`.

use crate::config::{PipelineConfig, RiskParams};
use crate::roi::RoiSet;
use crate::tracking::TrackedDetection;
use crate::types::{BBox, Point, RiskLevel, Zone};
use std::collections::{HashMap, VecDeque};
use tracing::debug;

/// Output of the per-track speed step.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpeedSample {
    /// px/s, capped at `speed.max_speed`
    pub speed: f32,
    pub is_jump: bool,
    /// Position recorded in history; the previous center on a jump
    pub smoothed_center: Point,
    /// Signed horizontal displacement since the last recorded center (px/frame)
    pub vx: f32,
}

impl SpeedSample {
    fn first_sighting(center: Point) -> Self {
        Self {
            speed: 0.0,
            is_jump: false,
            smoothed_center: center,
            vx: 0.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RiskAssessment {
    pub track_id: u32,
    pub bbox: BBox,
    pub zone: Zone,
    pub raw_score: f32,
    pub smoothed_score: f32,
    pub level: RiskLevel,
    pub stay_counter: u32,
    pub speed: f32,
    pub is_jump: bool,
    pub vx: f32,
}

#[derive(Debug, Clone)]
pub struct TrackState {
    pub center_history: VecDeque<Point>,
    pub score_history: VecDeque<f32>,
    pub last_zone: Option<Zone>,
    pub stay_counter: u32,
    pub static_frames: u32,
    pub last_seen: u64,
}

impl TrackState {
    fn new(frame_index: u64) -> Self {
        Self {
            center_history: VecDeque::new(),
            score_history: VecDeque::new(),
            last_zone: None,
            stay_counter: 0,
            static_frames: 0,
            last_seen: frame_index,
        }
    }

    pub fn last_center(&self) -> Option<Point> {
        self.center_history.back().copied()
    }

    /// Mean of the retained score history.
    pub fn smoothed_score(&self) -> Option<f32> {
        if self.score_history.is_empty() {
            return None;
        }
        Some(self.score_history.iter().sum::<f32>() / self.score_history.len() as f32)
    }
}

pub struct RiskAnalyzer {
    params: RiskParams,
    fps: f32,
    center_history_len: usize,
    ttl_frames: u64,
    tracks: HashMap<u32, TrackState>,
}

impl RiskAnalyzer {
    pub fn new(params: RiskParams, pipeline: &PipelineConfig) -> Self {
        Self {
            params,
            fps: pipeline.fps,
            center_history_len: pipeline.center_history.max(1),
            ttl_frames: pipeline.track_ttl_frames,
            tracks: HashMap::new(),
        }
    }

    // ========================================================================
    // SPEED
    // ========================================================================

    /// Distance-based speed against the last recorded center. A jump larger
    /// than `jump_threshold` is treated as tracker noise: the recorded center
    /// stays where it was.
    pub fn compute_speed(&mut self, track_id: u32, center: Point, frame_index: u64) -> SpeedSample {
        let cap = self.center_history_len;
        let speed_cfg = &self.params.speed;
        let fps = self.fps;

        let state = self
            .tracks
            .entry(track_id)
            .or_insert_with(|| TrackState::new(frame_index));
        state.last_seen = frame_index;

        let Some(last) = state.last_center() else {
            push_bounded(&mut state.center_history, center, cap);
            return SpeedSample::first_sighting(center);
        };

        let distance = center.distance(&last);
        let is_jump = distance > speed_cfg.jump_threshold;
        let smoothed_center = if is_jump { last } else { center };
        push_bounded(&mut state.center_history, smoothed_center, cap);

        if is_jump {
            debug!(
                "Track {} jumped {:.1}px (threshold {:.1}), holding last center",
                track_id, distance, speed_cfg.jump_threshold
            );
        }

        SpeedSample {
            speed: (distance * fps).min(speed_cfg.max_speed),
            is_jump,
            smoothed_center,
            vx: center.x - last.x,
        }
    }

    // ========================================================================
    // ASSESSMENT
    // ========================================================================

    /// Speed step, zone classification, dwell update, score and level.
    /// `None` when the box overlaps no zone; motion history is still updated.
    pub fn assess(
        &mut self,
        det: &TrackedDetection,
        roi: &RoiSet,
        frame_index: u64,
    ) -> Option<RiskAssessment> {
        let sample = self.compute_speed(det.track_id, det.bbox.center(), frame_index);
        let zone = roi.classify(&det.bbox)?;

        let params = &self.params;
        let state = self.tracks.get_mut(&det.track_id)?;

        update_stay(state, zone, sample.is_jump, params);
        let stay = state.stay_counter;

        let speed_term = if params.speed.log_scale {
            sample.speed.ln_1p()
        } else {
            sample.speed
        };
        let score = params.base_score.get(zone)
            + params.stay_weight.get(zone) * stay as f32
            + params.speed.gamma * speed_term
            + params.speed.lateral_weight * sample.vx.abs();
        let raw_score = decay_static(state, score, sample.speed, params).max(0.0);

        push_bounded(
            &mut state.score_history,
            raw_score,
            params.smoothing.history_length.max(1),
        );
        let smoothed_score = state.smoothed_score().unwrap_or(raw_score);
        let level = self.classify_level(smoothed_score);

        debug!(
            "[track {}] zone={}, stay={}, speed={:.2}, score={:.2}, smoothed={:.2}, level={}",
            det.track_id, zone, stay, sample.speed, raw_score, smoothed_score, level
        );

        Some(RiskAssessment {
            track_id: det.track_id,
            bbox: det.bbox,
            zone,
            raw_score,
            smoothed_score,
            level,
            stay_counter: stay,
            speed: sample.speed,
            is_jump: sample.is_jump,
            vx: sample.vx,
        })
    }

    /// Strictly-greater comparisons against the configured thresholds.
    pub fn classify_level(&self, score: f32) -> RiskLevel {
        let t = &self.params.score_threshold;
        if score > t.high {
            RiskLevel::High
        } else if score > t.mid {
            RiskLevel::Mid
        } else {
            RiskLevel::Low
        }
    }

    // ========================================================================
    // LIFECYCLE
    // ========================================================================

    /// Drop every track unseen for more than the TTL. Returns evicted ids.
    pub fn evict_stale(&mut self, frame_index: u64) -> Vec<u32> {
        let ttl = self.ttl_frames;
        let mut evicted: Vec<u32> = self
            .tracks
            .iter()
            .filter(|(_, s)| frame_index.saturating_sub(s.last_seen) > ttl)
            .map(|(&id, _)| id)
            .collect();
        evicted.sort_unstable();
        for id in &evicted {
            self.tracks.remove(id);
        }
        if !evicted.is_empty() {
            debug!("Evicted {} stale tracks: {:?}", evicted.len(), evicted);
        }
        evicted
    }

    #[cfg(test)]
    pub fn track(&self, track_id: u32) -> Option<&TrackState> {
        self.tracks.get(&track_id)
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.tracks.len()
    }
}

fn push_bounded<T>(buf: &mut VecDeque<T>, value: T, cap: usize) {
    buf.push_back(value);
    while buf.len() > cap {
        buf.pop_front();
    }
}

/// Dwell state machine: reset on zone change, +1 on steady presence,
/// optional decrement (floored at 1) on a jump inside the same zone.
fn update_stay(state: &mut TrackState, zone: Zone, is_jump: bool, params: &RiskParams) {
    if state.last_zone != Some(zone) {
        state.stay_counter = 1;
    } else if !is_jump {
        state.stay_counter += 1;
    } else if params.id_stability.decay_on_jump {
        state.stay_counter = state
            .stay_counter
            .saturating_sub(params.id_stability.decay_rate)
            .max(1);
    }
    state.last_zone = Some(zone);
}

fn decay_static(state: &mut TrackState, score: f32, speed: f32, params: &RiskParams) -> f32 {
    let decay = &params.decay;
    if speed < decay.speed_threshold {
        state.static_frames += 1;
        if state.static_frames >= decay.decay_frame_threshold {
            debug!(
                "Static decay after {} frames: {:.2} -> {:.2}",
                state.static_frames,
                score,
                score * decay.decay_rate
            );
            return score * decay.decay_rate;
        }
    } else {
        state.static_frames = 0;
    }
    score
}
