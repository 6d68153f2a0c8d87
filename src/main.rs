// src/main.rs

mod alert;
mod analysis;
mod config;
mod detection;
mod geometry;
mod overlay;
mod pipeline;
mod roi;
mod tracking;
mod types;
mod video_processor;

use alert::{AlertSink, ClipPlayer};
use anyhow::Result;
use config::Config;
use overlay::OverlayRenderer;
use pipeline::{FrameOutput, RiskPipeline};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;
use video_processor::{AnnotatedWriter, SourceFrame, VideoProcessor};

const DEFAULT_CONFIG_PATH: &str = "config.yaml";
const PROGRESS_EVERY: u64 = 100;

#[tokio::main]
async fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("driver_risk_alert=info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("🚗 Driver Risk Alert starting");

    let config_path =
        std::env::var("RISK_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
    let config = Config::load(&config_path)?;
    info!("✓ Configuration loaded from {}", config_path);
    info!(
        "Score thresholds: high={:.2}, mid={:.2} | warning: yellow={:.2}, red={:.2}",
        config.risk_params.score_threshold.high,
        config.risk_params.score_threshold.mid,
        config.risk_params.warning.yellow_score_threshold,
        config.risk_params.warning.red_score_threshold,
    );

    let sink = if config.alerts.enabled {
        let player = Arc::new(ClipPlayer::from_config(&config.alerts));
        info!("✓ Alert sink ready (clips in {})", player.clip_dir().display());
        Some(AlertSink::spawn(&config.alerts, player))
    } else {
        info!("Audio alerts disabled");
        None
    };

    let processor = VideoProcessor::new(config.video.clone());
    let mut source = processor.open(config.pipeline.fps, config.pipeline.frame_skip)?;
    if source.total_frames() == 0 {
        error!("No frames found in {}", config.video.input_dir);
        return Ok(());
    }
    let mut writer = processor.create_writer()?;
    let renderer = writer.as_ref().map(|_| {
        OverlayRenderer::from_font_path(
            config.video.font_path.as_deref(),
            config.roi.reference_lane_width,
        )
    });

    let mut pipeline = RiskPipeline::new(config);

    loop {
        let SourceFrame { frame, detections } = match source.read_frame() {
            Ok(Some(next)) => next,
            Ok(None) => break,
            Err(e) => {
                warn!("Skipping unreadable frame: {:#}", e);
                continue;
            }
        };

        let started = Instant::now();
        let output = pipeline.process_frame(&frame, &detections.rows, detections.drowsy);

        if let Some(sink) = &sink {
            for alert in &output.alerts {
                if !sink.notify(alert.key, alert.cooldown) {
                    debug!("Alert {} not queued", alert.key);
                }
            }
        }

        if let (Some(writer), Some(renderer)) = (writer.as_mut(), renderer.as_ref()) {
            let fps = 1.0 / started.elapsed().as_secs_f32().max(1e-6);
            write_annotated(writer, renderer, &frame.image, &output, fps);
        }

        if frame.index % PROGRESS_EVERY == 0 {
            info!(
                "Frame {} ({:.1}%): ego_speed={:.2}, assessed={}, alerts={}",
                frame.index,
                source.progress(),
                output.ego_speed,
                output.assessments.len(),
                output.alerts.len()
            );
        }
    }

    let summary = pipeline.metrics().summary();
    info!("\n========================================");
    info!("✓ Stream finished");
    info!("  Frames processed: {} ({:.1} fps)", summary.total_frames, summary.fps);
    info!(
        "  Frames with lanes: {} ({:.1}%)",
        summary.frames_with_lanes,
        100.0 * summary.frames_with_lanes as f64 / summary.total_frames.max(1) as f64
    );
    info!("  Skipped (invalid scene): {}", summary.skipped_invalid_scene);
    info!(
        "  ROI reused: {}, unavailable: {}",
        summary.roi_reused, summary.roi_unavailable
    );
    info!("  Risk assessments: {}", summary.assessments);
    info!("  Alerts requested: {}", summary.alerts_requested);
    info!("  Tracks evicted: {}", summary.tracks_evicted);
    if let Some(writer) = &writer {
        info!("  Annotated frames written: {}", writer.written());
    }

    if let Some(sink) = sink {
        let stats = sink.shutdown().await;
        info!(
            "  Audio: played={}, failed={}, cooldown={}, busy={}, dropped={}",
            stats.played,
            stats.failed,
            stats.rejected_cooldown,
            stats.rejected_busy,
            stats.dropped_full
        );
    }
    info!("========================================");

    Ok(())
}

fn write_annotated(
    writer: &mut AnnotatedWriter,
    renderer: &OverlayRenderer,
    image: &image::RgbImage,
    output: &FrameOutput,
    fps: f32,
) {
    let annotated = renderer.render(image, output, fps);
    if let Err(e) = writer.write(output.frame_index, &annotated) {
        warn!("Failed to save annotated frame {}: {:#}", output.frame_index, e);
    }
}
