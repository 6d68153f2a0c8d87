// src/pipeline/orchestrator.rs
//
// One frame, start to finish:
//
//   gray -> lanes -> (invalid scene: skip) -> ego speed -> ROI
//        -> (no ROI: reuse last good one for a few frames, else skip)
//        -> dedup tracker rows -> per-track risk -> warning policy
//        -> alert requests
//
// Nothing here returns an error to the frame loop. Each stage degrades to
// a skipped frame instead.

use super::frame_context::{FrameOutput, PendingAlert, SkipReason};
use super::metrics::PipelineMetrics;
use crate::alert::AlertKey;
use crate::analysis::ego_speed::EgoSpeedEstimator;
use crate::analysis::risk::RiskAnalyzer;
use crate::analysis::warning::{WarningClass, WarningController};
use crate::config::Config;
use crate::detection::{to_gray, LaneEstimate, LaneGeometryEstimator};
use crate::roi::{RoiBuilder, RoiSet};
use crate::tracking::dedup_tracks;
use crate::types::Frame;
use image::GrayImage;
use std::time::Instant;
use tracing::{debug, info, warn};

pub struct RiskPipeline {
    config: Config,
    lanes: LaneGeometryEstimator,
    ego: EgoSpeedEstimator,
    roi_builder: RoiBuilder,
    analyzer: RiskAnalyzer,
    warnings: WarningController,
    last_roi: Option<RoiSet>,
    roi_reuse_count: u32,
    scene_valid: bool,
    metrics: PipelineMetrics,
}

impl RiskPipeline {
    pub fn new(config: Config) -> Self {
        let flow = config.risk_params.optical_flow;
        Self {
            lanes: LaneGeometryEstimator::new(config.lane.clone()),
            ego: EgoSpeedEstimator::new(config.ego.clone(), flow.roi_top_ratio, flow.roi_bottom_ratio),
            roi_builder: RoiBuilder::new(config.roi.clone()),
            analyzer: RiskAnalyzer::new(config.risk_params.clone(), &config.pipeline),
            warnings: WarningController::new(config.risk_params.warning),
            last_roi: None,
            roi_reuse_count: 0,
            scene_valid: false,
            metrics: PipelineMetrics::new(),
            config,
        }
    }

    pub fn metrics(&self) -> &PipelineMetrics {
        &self.metrics
    }

    #[cfg(test)]
    pub fn analyzer(&self) -> &RiskAnalyzer {
        &self.analyzer
    }

    /// Full per-frame pass. `rows` are the tracker rows for this frame,
    /// `drowsy` the external fatigue flag.
    pub fn process_frame<R: AsRef<[f32]>>(
        &mut self,
        frame: &Frame,
        rows: &[R],
        drowsy: bool,
    ) -> FrameOutput {
        let started = Instant::now();
        let gray = to_gray(&frame.image);
        let lanes = self.lanes.estimate(&gray);
        let output = self.process_with_lanes(frame.index, frame.timestamp_s, &gray, lanes, rows, drowsy);
        self.metrics
            .set_timing(&self.metrics.frame_time_us, started.elapsed().as_micros() as u64);
        output
    }

    /// Everything after lane estimation.
    pub fn process_with_lanes<R: AsRef<[f32]>>(
        &mut self,
        frame_index: u64,
        timestamp_s: f64,
        gray: &GrayImage,
        lanes: LaneEstimate,
        rows: &[R],
        drowsy: bool,
    ) -> FrameOutput {
        self.metrics.inc(&self.metrics.total_frames);
        self.evict(frame_index);

        let mut output = FrameOutput {
            frame_index,
            lanes,
            roi: None,
            roi_reused: false,
            ego_speed: self.ego.speed(),
            assessments: Vec::new(),
            alerts: Vec::new(),
            drowsy,
            skip: None,
        };

        if drowsy {
            output.alerts.push(PendingAlert {
                key: AlertKey::Drowsiness,
                cooldown: AlertKey::Drowsiness.cooldown(&self.config.alerts),
                track_id: None,
            });
        }

        if lanes.scene_valid != self.scene_valid {
            if lanes.scene_valid {
                info!("Lane scene acquired at frame {}", frame_index);
            } else {
                info!("Lane scene lost at frame {}", frame_index);
            }
            self.scene_valid = lanes.scene_valid;
        }
        if !lanes.scene_valid {
            self.metrics.inc(&self.metrics.skipped_invalid_scene);
            output.skip = Some(SkipReason::InvalidScene);
            return self.finish(output);
        }
        self.metrics.inc(&self.metrics.frames_with_lanes);

        output.ego_speed = self.ego.update(gray);

        let built = self.roi_builder.build(
            lanes.left.as_ref(),
            lanes.right.as_ref(),
            gray.dimensions(),
            output.ego_speed,
        );
        let roi = match built {
            Some(roi) => {
                self.last_roi = Some(roi.clone());
                self.roi_reuse_count = 0;
                roi
            }
            None => match self.reuse_roi(frame_index) {
                Some(roi) => {
                    output.roi_reused = true;
                    roi
                }
                None => {
                    self.metrics.inc(&self.metrics.roi_unavailable);
                    output.skip = Some(SkipReason::RoiUnavailable);
                    return self.finish(output);
                }
            },
        };

        let now = timestamp_s;
        let side_as_high = self.config.pipeline.side_zones_as_high;
        for det in dedup_tracks(rows) {
            let Some(assessment) = self.analyzer.assess(&det, &roi, frame_index) else {
                continue;
            };
            for class in WarningClass::for_assessment(&assessment, side_as_high) {
                let fire = self.warnings.should_warn(
                    assessment.track_id,
                    now,
                    class,
                    assessment.smoothed_score,
                    assessment.stay_counter,
                );
                if fire {
                    let key = class.alert_key();
                    output.alerts.push(PendingAlert {
                        key,
                        cooldown: key.cooldown(&self.config.alerts),
                        track_id: Some(assessment.track_id),
                    });
                }
            }
            output.assessments.push(assessment);
        }

        self.metrics
            .add(&self.metrics.assessments, output.assessments.len() as u64);
        output.roi = Some(roi);
        self.finish(output)
    }

    fn finish(&self, output: FrameOutput) -> FrameOutput {
        self.metrics
            .add(&self.metrics.alerts_requested, output.alerts.len() as u64);
        if let Some(reason) = output.skip {
            debug!("Frame {} skipped: {}", output.frame_index, reason.as_str());
        }
        output
    }

    fn reuse_roi(&mut self, frame_index: u64) -> Option<RoiSet> {
        let roi = self.last_roi.as_ref()?;
        if self.roi_reuse_count >= self.config.pipeline.roi_reuse_frames {
            warn!(
                "ROI unavailable at frame {} and reuse budget ({}) spent",
                frame_index, self.config.pipeline.roi_reuse_frames
            );
            return None;
        }
        self.roi_reuse_count += 1;
        self.metrics.inc(&self.metrics.roi_reused);
        debug!(
            "Reusing last ROI at frame {} ({}/{})",
            frame_index, self.roi_reuse_count, self.config.pipeline.roi_reuse_frames
        );
        Some(roi.clone())
    }

    fn evict(&mut self, frame_index: u64) {
        let evicted = self.analyzer.evict_stale(frame_index);
        if evicted.is_empty() {
            return;
        }
        for id in &evicted {
            self.warnings.forget(*id);
        }
        self.metrics
            .add(&self.metrics.tracks_evicted, evicted.len() as u64);
        info!("Evicted {} stale tracks at frame {}", evicted.len(), frame_index);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::tests::sample;
    use crate::detection::lane_estimator::tests::lane_frame;
    use crate::roi::tests::lane_pair;
    use crate::types::{LaneLine, RiskLevel, Zone};
    use image::{DynamicImage, Luma};

    fn valid_lanes() -> LaneEstimate {
        let (left, right) = lane_pair();
        LaneEstimate {
            left: Some(left),
            right: Some(right),
            scene_valid: true,
        }
    }

    fn gray() -> GrayImage {
        GrayImage::from_pixel(1280, 720, Luma([60]))
    }

    fn row(id: f32, x1: f32, y1: f32, x2: f32, y2: f32) -> Vec<f32> {
        vec![x1, y1, x2, y2, 0.9, 2.0, id]
    }

    fn at(pipeline: &mut RiskPipeline, i: u64, lanes: LaneEstimate, rows: &[Vec<f32>]) -> FrameOutput {
        pipeline.process_with_lanes(i, i as f64 / 30.0, &gray(), lanes, rows, false)
    }

    #[test]
    fn test_invalid_scene_skips_analysis() {
        let mut p = RiskPipeline::new(sample());
        let out = at(&mut p, 0, LaneEstimate::invalid(), &[row(1.0, 600.0, 650.0, 680.0, 700.0)]);
        assert_eq!(out.skip, Some(SkipReason::InvalidScene));
        assert!(out.assessments.is_empty());
        assert!(out.roi.is_none());
        assert_eq!(p.analyzer().len(), 0);
    }

    #[test]
    fn test_static_object_in_high_zone_raises_red_alert() {
        let mut p = RiskPipeline::new(sample());
        let rows = vec![row(7.0, 600.0, 650.0, 680.0, 700.0)];
        let mut red = 0;
        let mut yellow = 0;
        let mut last = None;
        for i in 0..10 {
            let out = at(&mut p, i, valid_lanes(), &rows);
            assert!(out.skip.is_none());
            red += out.alerts.iter().filter(|a| a.key == AlertKey::RiskHigh).count();
            yellow += out.alerts.iter().filter(|a| a.key == AlertKey::RiskSide).count();
            last = Some(out);
        }
        let last = last.unwrap();
        let a = &last.assessments[0];
        assert_eq!(a.zone, Zone::High);
        assert_eq!(a.level, RiskLevel::High);
        assert_eq!(yellow, 1);
        assert!(red >= 1);
    }

    #[test]
    fn test_roi_reused_for_bounded_frames() {
        let mut config = sample();
        config.pipeline.roi_reuse_frames = 2;
        let mut p = RiskPipeline::new(config);
        at(&mut p, 0, valid_lanes(), &Vec::<Vec<f32>>::new());

        // Scene reported valid but both lines collapse onto each other
        let line = LaneLine::new(600.0, 720.0, 600.0, 432.0);
        let degenerate = LaneEstimate {
            left: Some(line),
            right: Some(line),
            scene_valid: true,
        };
        let first = at(&mut p, 1, degenerate, &Vec::<Vec<f32>>::new());
        assert!(first.roi_reused && first.roi.is_some());
        let second = at(&mut p, 2, degenerate, &Vec::<Vec<f32>>::new());
        assert!(second.roi_reused);
        let third = at(&mut p, 3, degenerate, &Vec::<Vec<f32>>::new());
        assert_eq!(third.skip, Some(SkipReason::RoiUnavailable));

        // A good frame refills the budget
        assert!(at(&mut p, 4, valid_lanes(), &Vec::<Vec<f32>>::new()).skip.is_none());
        assert!(at(&mut p, 5, degenerate, &Vec::<Vec<f32>>::new()).roi_reused);
    }

    #[test]
    fn test_drowsiness_requested_even_when_skipped() {
        let mut p = RiskPipeline::new(sample());
        let out = p.process_with_lanes(0, 0.0, &gray(), LaneEstimate::invalid(), &Vec::<Vec<f32>>::new(), true);
        assert!(out.skipped());
        assert_eq!(out.alerts.len(), 1);
        assert_eq!(out.alerts[0].key, AlertKey::Drowsiness);
        assert_eq!(out.alerts[0].track_id, None);
    }

    #[test]
    fn test_duplicate_rows_assessed_once() {
        let mut p = RiskPipeline::new(sample());
        let rows = vec![
            row(3.0, 600.0, 650.0, 680.0, 700.0),
            row(3.0, 100.0, 100.0, 120.0, 120.0),
            vec![1.0, 2.0, 3.0],
        ];
        let out = at(&mut p, 0, valid_lanes(), &rows);
        assert_eq!(out.assessments.len(), 1);
        assert_eq!(out.assessments[0].bbox.x1, 600.0);
    }

    #[test]
    fn test_stale_tracks_evicted() {
        let mut p = RiskPipeline::new(sample());
        at(&mut p, 0, valid_lanes(), &[row(1.0, 600.0, 650.0, 680.0, 700.0)]);
        assert_eq!(p.analyzer().len(), 1);
        at(&mut p, 200, valid_lanes(), &Vec::<Vec<f32>>::new());
        assert_eq!(p.analyzer().len(), 0);
        assert_eq!(p.metrics().summary().tracks_evicted, 1);
    }

    #[test]
    fn test_full_frame_path_runs_on_synthetic_road() {
        let mut p = RiskPipeline::new(sample());
        let image = DynamicImage::ImageLuma8(lane_frame(640, 360)).to_rgb8();
        let frame = Frame {
            index: 0,
            timestamp_s: 0.0,
            image,
        };
        let out = p.process_frame(&frame, &Vec::<Vec<f32>>::new(), false);
        assert!(out.lanes.scene_valid);
        assert!(out.roi.is_some());
        assert_eq!(p.metrics().summary().total_frames, 1);
    }
}
