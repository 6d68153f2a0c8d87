// src/pipeline/metrics.rs
//
// Counters for the frame loop, logged as a summary at end of stream.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

#[derive(Debug, Clone)]
pub struct PipelineMetrics {
    pub total_frames: Arc<AtomicU64>,
    pub frames_with_lanes: Arc<AtomicU64>,
    pub skipped_invalid_scene: Arc<AtomicU64>,
    pub roi_reused: Arc<AtomicU64>,
    pub roi_unavailable: Arc<AtomicU64>,
    pub assessments: Arc<AtomicU64>,
    pub alerts_requested: Arc<AtomicU64>,
    pub tracks_evicted: Arc<AtomicU64>,
    pub frame_time_us: Arc<AtomicU64>,
    pub started_at: Instant,
}

impl Default for PipelineMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl PipelineMetrics {
    pub fn new() -> Self {
        Self {
            total_frames: Arc::new(AtomicU64::new(0)),
            frames_with_lanes: Arc::new(AtomicU64::new(0)),
            skipped_invalid_scene: Arc::new(AtomicU64::new(0)),
            roi_reused: Arc::new(AtomicU64::new(0)),
            roi_unavailable: Arc::new(AtomicU64::new(0)),
            assessments: Arc::new(AtomicU64::new(0)),
            alerts_requested: Arc::new(AtomicU64::new(0)),
            tracks_evicted: Arc::new(AtomicU64::new(0)),
            frame_time_us: Arc::new(AtomicU64::new(0)),
            started_at: Instant::now(),
        }
    }

    pub fn inc(&self, counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add(&self, counter: &AtomicU64, n: u64) {
        counter.fetch_add(n, Ordering::Relaxed);
    }

    pub fn set_timing(&self, counter: &AtomicU64, duration_us: u64) {
        counter.store(duration_us, Ordering::Relaxed);
    }

    pub fn fps(&self) -> f64 {
        let frames = self.total_frames.load(Ordering::Relaxed);
        let elapsed = self.started_at.elapsed().as_secs_f64();
        if elapsed > 0.01 {
            frames as f64 / elapsed
        } else {
            0.0
        }
    }

    pub fn summary(&self) -> MetricsSummary {
        MetricsSummary {
            total_frames: self.total_frames.load(Ordering::Relaxed),
            fps: self.fps(),
            frames_with_lanes: self.frames_with_lanes.load(Ordering::Relaxed),
            skipped_invalid_scene: self.skipped_invalid_scene.load(Ordering::Relaxed),
            roi_reused: self.roi_reused.load(Ordering::Relaxed),
            roi_unavailable: self.roi_unavailable.load(Ordering::Relaxed),
            assessments: self.assessments.load(Ordering::Relaxed),
            alerts_requested: self.alerts_requested.load(Ordering::Relaxed),
            tracks_evicted: self.tracks_evicted.load(Ordering::Relaxed),
            last_frame_us: self.frame_time_us.load(Ordering::Relaxed),
            elapsed_secs: self.started_at.elapsed().as_secs_f64(),
        }
    }
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct MetricsSummary {
    pub total_frames: u64,
    pub fps: f64,
    pub frames_with_lanes: u64,
    pub skipped_invalid_scene: u64,
    pub roi_reused: u64,
    pub roi_unavailable: u64,
    pub assessments: u64,
    pub alerts_requested: u64,
    pub tracks_evicted: u64,
    pub last_frame_us: u64,
    pub elapsed_secs: f64,
}
