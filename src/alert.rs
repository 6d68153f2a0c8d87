// src/alert.rs
//
// Audio alert sink.
//
// The frame loop never waits on audio: requests go through a small bounded
// queue with `try_send` and are dropped when it is full. A single worker
// task owns playback and enforces:
//   - per-key cooldowns (one lock over all timestamps)
//   - at most one clip playing at a time
//   - a strictly higher-priority request may skip the busy check, but it
//     waits for the current clip to finish instead of cutting it off
//
// Playback failures (missing clip, player error) are logged and counted;
// they never reach the caller.

use crate::config::AlertConfig;
use anyhow::{bail, Result};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum AlertKey {
    RiskSide,
    RiskHigh,
    Drowsiness,
}

impl AlertKey {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertKey::RiskSide => "risk_side_alert",
            AlertKey::RiskHigh => "risk_high_alert",
            AlertKey::Drowsiness => "drowsiness_alert",
        }
    }

    /// Higher wins when the player is busy.
    pub fn priority(&self) -> u8 {
        match self {
            AlertKey::RiskSide => 1,
            AlertKey::RiskHigh => 2,
            AlertKey::Drowsiness => 3,
        }
    }

    /// Preset clip file name inside the clip directory.
    pub fn clip_name(&self) -> &'static str {
        match self {
            AlertKey::RiskSide => "yellow.mp3",
            AlertKey::RiskHigh => "red.mp3",
            AlertKey::Drowsiness => "tierd.mp3",
        }
    }

    /// Configured cooldown for this key.
    pub fn cooldown(&self, config: &AlertConfig) -> Duration {
        let secs = match self {
            AlertKey::RiskSide => config.risk_side_cooldown_s,
            AlertKey::RiskHigh => config.risk_high_cooldown_s,
            AlertKey::Drowsiness => config.drowsiness_cooldown_s,
        };
        Duration::from_secs_f64(secs.max(0.0))
    }
}

impl std::fmt::Display for AlertKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ============================================================================
// PLAYERS
// ============================================================================

/// Blocking playback backend. Called from a blocking thread, one clip at a
/// time; returns once the clip has finished.
pub trait AlertPlayer: Send + Sync + 'static {
    fn play(&self, key: AlertKey) -> Result<()>;
}

/// Resolves the preset clip for a key and reserves the player slot for the
/// clip duration. Produces no sound itself: an external playback backend
/// picks up the resolved clip, this type only keeps the one-at-a-time
/// timing the worker relies on.
pub struct ClipPlayer {
    clip_dir: PathBuf,
    clip_duration: Duration,
}

impl ClipPlayer {
    pub fn new(clip_dir: impl Into<PathBuf>, clip_duration: Duration) -> Self {
        Self {
            clip_dir: clip_dir.into(),
            clip_duration,
        }
    }

    pub fn from_config(config: &AlertConfig) -> Self {
        Self::new(
            config.clip_dir.clone(),
            Duration::from_millis(config.clip_duration_ms),
        )
    }

    pub fn clip_path(&self, key: AlertKey) -> PathBuf {
        self.clip_dir.join(key.clip_name())
    }

    pub fn clip_dir(&self) -> &Path {
        &self.clip_dir
    }
}

impl AlertPlayer for ClipPlayer {
    fn play(&self, key: AlertKey) -> Result<()> {
        let path = self.clip_path(key);
        if !path.is_file() {
            bail!("preset clip for {} not found at {}", key, path.display());
        }
        info!(
            "Alert {} dispatched, reserving player for {:?} ({})",
            key,
            self.clip_duration,
            path.display()
        );
        std::thread::sleep(self.clip_duration);
        Ok(())
    }
}

// ============================================================================
// SINK
// ============================================================================

#[derive(Debug, Default)]
pub struct AlertStats {
    pub played: AtomicU64,
    pub failed: AtomicU64,
    pub rejected_cooldown: AtomicU64,
    pub rejected_busy: AtomicU64,
    pub dropped_full: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct AlertStatsSnapshot {
    pub played: u64,
    pub failed: u64,
    pub rejected_cooldown: u64,
    pub rejected_busy: u64,
    pub dropped_full: u64,
}

impl AlertStats {
    pub fn snapshot(&self) -> AlertStatsSnapshot {
        AlertStatsSnapshot {
            played: self.played.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            rejected_cooldown: self.rejected_cooldown.load(Ordering::Relaxed),
            rejected_busy: self.rejected_busy.load(Ordering::Relaxed),
            dropped_full: self.dropped_full.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug)]
struct AlertRequest {
    key: AlertKey,
    cooldown: Duration,
}

#[derive(Default)]
struct PlaybackState {
    last_played: HashMap<AlertKey, Instant>,
    playing: Option<AlertKey>,
}

pub struct AlertSink {
    sender: mpsc::Sender<AlertRequest>,
    worker: JoinHandle<()>,
    stats: Arc<AlertStats>,
}

impl AlertSink {
    /// Start the playback worker on the current tokio runtime.
    pub fn spawn(config: &AlertConfig, player: Arc<dyn AlertPlayer>) -> Self {
        let capacity = config.queue_capacity.max(1);
        let (sender, rx) = mpsc::channel::<AlertRequest>(capacity);
        let stats = Arc::new(AlertStats::default());
        let worker = tokio::spawn(run_worker(rx, player, Arc::clone(&stats)));
        debug!("Alert sink started (queue capacity {})", capacity);
        Self {
            sender,
            worker,
            stats,
        }
    }

    /// Queue a request without blocking. `false` when the queue is full or
    /// the worker is gone; the request is dropped in both cases.
    pub fn notify(&self, key: AlertKey, cooldown: Duration) -> bool {
        match self.sender.try_send(AlertRequest { key, cooldown }) {
            Ok(()) => true,
            Err(TrySendError::Full(req)) => {
                self.stats.dropped_full.fetch_add(1, Ordering::Relaxed);
                debug!("Alert queue full, dropping {}", req.key);
                false
            }
            Err(TrySendError::Closed(req)) => {
                warn!("Alert worker stopped, dropping {}", req.key);
                false
            }
        }
    }

    /// Close the queue, let the worker drain it and finish the clip in
    /// flight.
    pub async fn shutdown(self) -> AlertStatsSnapshot {
        drop(self.sender);
        if let Err(err) = self.worker.await {
            if !err.is_cancelled() {
                error!("Alert worker task error: {}", err);
            }
        }
        self.stats.snapshot()
    }
}

async fn run_worker(
    mut rx: mpsc::Receiver<AlertRequest>,
    player: Arc<dyn AlertPlayer>,
    stats: Arc<AlertStats>,
) {
    let state = Arc::new(Mutex::new(PlaybackState::default()));
    let mut in_flight: Option<JoinHandle<()>> = None;

    while let Some(req) = rx.recv().await {
        let busy_with = {
            let guard = state.lock().await;
            if let Some(last) = guard.last_played.get(&req.key) {
                if last.elapsed() < req.cooldown {
                    stats.rejected_cooldown.fetch_add(1, Ordering::Relaxed);
                    debug!("{} in cooldown, skipping", req.key);
                    continue;
                }
            }
            guard.playing
        };

        if let Some(current) = busy_with {
            if req.key.priority() <= current.priority() {
                stats.rejected_busy.fetch_add(1, Ordering::Relaxed);
                debug!("Player busy with {}, rejecting {}", current, req.key);
                continue;
            }
            info!("{} preempts busy check, waiting for {} to finish", req.key, current);
            if let Some(handle) = in_flight.take() {
                let _ = handle.await;
            }
        }

        {
            let mut guard = state.lock().await;
            guard.last_played.insert(req.key, Instant::now());
            guard.playing = Some(req.key);
        }

        in_flight = Some(tokio::spawn(play_one(
            req.key,
            Arc::clone(&player),
            Arc::clone(&state),
            Arc::clone(&stats),
        )));
    }

    if let Some(handle) = in_flight.take() {
        let _ = handle.await;
    }
    debug!("Alert worker stopped");
}

async fn play_one(
    key: AlertKey,
    player: Arc<dyn AlertPlayer>,
    state: Arc<Mutex<PlaybackState>>,
    stats: Arc<AlertStats>,
) {
    let result = tokio::task::spawn_blocking(move || player.play(key)).await;
    match result {
        Ok(Ok(())) => {
            stats.played.fetch_add(1, Ordering::Relaxed);
        }
        Ok(Err(e)) => {
            stats.failed.fetch_add(1, Ordering::Relaxed);
            warn!("Alert playback failed for {}: {:#}", key, e);
        }
        Err(e) => {
            stats.failed.fetch_add(1, Ordering::Relaxed);
            error!("Alert playback task panicked for {}: {}", key, e);
        }
    }
    state.lock().await.playing = None;
}
