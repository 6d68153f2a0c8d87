// src/analysis/warning.rs
//
// Decides when a risk assessment turns into an alert request.
//
// Two independent policies per track:
//   - Yellow: fires at most once for the lifetime of a track id
//   - Red: re-fires with a dwell-adaptive interval,
//     max(0.5, 2.0 - 0.1 * stay) seconds, so danger that persists is
//     announced more often

use super::risk::RiskAssessment;
use crate::alert::AlertKey;
use crate::config::WarningThresholds;
use crate::types::RiskLevel;
use std::collections::{HashMap, HashSet};
use tracing::info;

const RED_BASE_INTERVAL_S: f64 = 2.0;
const RED_INTERVAL_STEP_S: f64 = 0.1;
const RED_MIN_INTERVAL_S: f64 = 0.5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WarningClass {
    Yellow,
    Red,
}

impl WarningClass {
    pub fn alert_key(&self) -> AlertKey {
        match self {
            WarningClass::Yellow => AlertKey::RiskSide,
            WarningClass::Red => AlertKey::RiskHigh,
        }
    }

    /// Classes an assessment is eligible for. Both may apply at once.
    pub fn for_assessment(assessment: &RiskAssessment, side_zones_as_high: bool) -> Vec<WarningClass> {
        let red = assessment.level == RiskLevel::High
            || (side_zones_as_high && assessment.zone.is_side());
        let yellow = red || assessment.level >= RiskLevel::Mid;

        let mut classes = Vec::with_capacity(2);
        if yellow {
            classes.push(WarningClass::Yellow);
        }
        if red {
            classes.push(WarningClass::Red);
        }
        classes
    }
}

/// Minimum gap between red warnings for a track that has stayed
/// `stay_duration` frames in its zone.
pub fn red_interval(stay_duration: u32) -> f64 {
    (RED_BASE_INTERVAL_S - stay_duration as f64 * RED_INTERVAL_STEP_S).max(RED_MIN_INTERVAL_S)
}

pub struct WarningController {
    thresholds: WarningThresholds,
    yellow_warned: HashSet<u32>,
    last_red: HashMap<u32, f64>,
}

impl WarningController {
    pub fn new(thresholds: WarningThresholds) -> Self {
        Self {
            thresholds,
            yellow_warned: HashSet::new(),
            last_red: HashMap::new(),
        }
    }

    /// `now` is in seconds on the stream clock.
    pub fn should_warn(
        &mut self,
        track_id: u32,
        now: f64,
        class: WarningClass,
        score: f32,
        stay_duration: u32,
    ) -> bool {
        match class {
            WarningClass::Yellow => {
                if score < self.thresholds.yellow_score_threshold {
                    return false;
                }
                let first = self.yellow_warned.insert(track_id);
                if first {
                    info!("Yellow warning: track {} score {:.2}", track_id, score);
                }
                first
            }
            WarningClass::Red => {
                if score < self.thresholds.red_score_threshold {
                    return false;
                }
                let interval = red_interval(stay_duration);
                let due = self
                    .last_red
                    .get(&track_id)
                    .map_or(true, |&last| now - last > interval);
                if due {
                    self.last_red.insert(track_id, now);
                    info!(
                        "Red warning: track {} score {:.2} stay {} (interval {:.1}s)",
                        track_id, score, stay_duration, interval
                    );
                }
                due
            }
        }
    }

    /// Drop all warning state of an evicted track.
    pub fn forget(&mut self, track_id: u32) {
        self.yellow_warned.remove(&track_id);
        self.last_red.remove(&track_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{BBox, Zone};

    fn controller() -> WarningController {
        WarningController::new(WarningThresholds {
            yellow_score_threshold: 5.0,
            red_score_threshold: 8.0,
        })
    }

    fn assessment(zone: Zone, level: RiskLevel) -> RiskAssessment {
        RiskAssessment {
            track_id: 1,
            bbox: BBox::new(0.0, 0.0, 10.0, 10.0),
            zone,
            raw_score: 6.0,
            smoothed_score: 6.0,
            level,
            stay_counter: 1,
            speed: 0.0,
            is_jump: false,
            vx: 0.0,
        }
    }

    #[test]
    fn test_yellow_fires_once_per_lifetime() {
        let mut w = controller();
        assert!(w.should_warn(1, 0.0, WarningClass::Yellow, 6.0, 1));
        for t in 1..100 {
            assert!(!w.should_warn(1, t as f64, WarningClass::Yellow, 9.0, 1));
        }
        // Another id is independent
        assert!(w.should_warn(2, 0.0, WarningClass::Yellow, 6.0, 1));
    }

    #[test]
    fn test_yellow_below_threshold_does_not_consume() {
        let mut w = controller();
        assert!(!w.should_warn(1, 0.0, WarningClass::Yellow, 4.9, 1));
        assert!(w.should_warn(1, 1.0, WarningClass::Yellow, 5.0, 1));
    }

    #[test]
    fn test_red_interval_bounds() {
        assert_eq!(red_interval(0), 2.0);
        assert!((red_interval(10) - 1.0).abs() < 1e-9);
        assert_eq!(red_interval(15), 0.5);
        assert_eq!(red_interval(1000), 0.5);
    }

    #[test]
    fn test_red_rate_limited_at_zero_stay() {
        let mut w = controller();
        assert!(w.should_warn(1, 10.0, WarningClass::Red, 9.0, 0));
        assert!(!w.should_warn(1, 11.0, WarningClass::Red, 9.0, 0));
        // Exactly the interval is not enough
        assert!(!w.should_warn(1, 12.0, WarningClass::Red, 9.0, 0));
        assert!(w.should_warn(1, 12.01, WarningClass::Red, 9.0, 0));
    }

    #[test]
    fn test_red_refires_faster_with_long_stay() {
        let mut w = controller();
        assert!(w.should_warn(1, 0.0, WarningClass::Red, 9.0, 40));
        assert!(!w.should_warn(1, 0.5, WarningClass::Red, 9.0, 40));
        assert!(w.should_warn(1, 0.51, WarningClass::Red, 9.0, 40));
    }

    #[test]
    fn test_red_needs_red_score() {
        let mut w = controller();
        assert!(!w.should_warn(1, 0.0, WarningClass::Red, 7.9, 5));
    }

    #[test]
    fn test_forget_clears_state() {
        let mut w = controller();
        assert!(w.should_warn(1, 0.0, WarningClass::Yellow, 6.0, 1));
        assert!(w.should_warn(1, 0.0, WarningClass::Red, 9.0, 1));
        w.forget(1);
        assert!(w.should_warn(1, 0.1, WarningClass::Yellow, 6.0, 1));
        assert!(w.should_warn(1, 0.1, WarningClass::Red, 9.0, 1));
    }

    #[test]
    fn test_class_mapping() {
        let high = assessment(Zone::High, RiskLevel::High);
        assert_eq!(
            WarningClass::for_assessment(&high, true),
            vec![WarningClass::Yellow, WarningClass::Red]
        );

        let side_low = assessment(Zone::SideLeft, RiskLevel::Low);
        assert_eq!(
            WarningClass::for_assessment(&side_low, true),
            vec![WarningClass::Yellow, WarningClass::Red]
        );
        assert!(WarningClass::for_assessment(&side_low, false).is_empty());

        let mid = assessment(Zone::Mid, RiskLevel::Mid);
        assert_eq!(WarningClass::for_assessment(&mid, true), vec![WarningClass::Yellow]);

        let low = assessment(Zone::Low, RiskLevel::Low);
        assert!(WarningClass::for_assessment(&low, true).is_empty());
    }
}
