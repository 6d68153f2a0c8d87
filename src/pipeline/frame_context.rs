// src/pipeline/frame_context.rs
//
// Everything the pipeline produced for one frame. The overlay and the
// binary read from this instead of reaching into component state.

use crate::alert::AlertKey;
use crate::analysis::risk::RiskAssessment;
use crate::detection::LaneEstimate;
use crate::roi::RoiSet;
use crate::types::RiskLevel;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// Lane lines missing or implausible
    InvalidScene,
    /// No ROI this frame and the reuse budget is spent
    RoiUnavailable,
}

impl SkipReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            SkipReason::InvalidScene => "invalid_scene",
            SkipReason::RoiUnavailable => "roi_unavailable",
        }
    }
}

/// Alert request ready for the sink.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PendingAlert {
    pub key: AlertKey,
    pub cooldown: Duration,
    /// `None` for alerts not tied to a tracked object
    pub track_id: Option<u32>,
}

#[derive(Debug, Clone)]
pub struct FrameOutput {
    pub frame_index: u64,
    pub lanes: LaneEstimate,
    pub roi: Option<RoiSet>,
    /// ROI came from an earlier frame
    pub roi_reused: bool,
    pub ego_speed: f32,
    pub assessments: Vec<RiskAssessment>,
    pub alerts: Vec<PendingAlert>,
    pub drowsy: bool,
    pub skip: Option<SkipReason>,
}

impl FrameOutput {
    #[cfg(test)]
    pub fn skipped(&self) -> bool {
        self.skip.is_some()
    }

    /// Assessments the overlay draws as risky.
    pub fn risky(&self) -> impl Iterator<Item = &RiskAssessment> {
        self.assessments
            .iter()
            .filter(|a| a.level == RiskLevel::High || a.zone.is_side())
    }
}
