//! Couples playout to the pipeline-control state machine.
//!
//! Playout may only start once the state machine allows it *and* the
//! playback queue holds at least the playable threshold set by latency
//! control. Any surplus above the threshold at start time is fast-forwarded
//! so playback begins right at the target latency.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;

use crate::playback_queue::PlaybackQueue;
use crate::stats::{Indicator, StatisticsStorage};

/// Commands for the playout task.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PlayoutCommand {
    Start { ffwd_ms: i64 },
    Stop,
}

/// Threshold-gated playout switch.
pub struct PlayoutControl {
    commands: mpsc::UnboundedSender<PlayoutCommand>,
    queue: Arc<Mutex<PlaybackQueue>>,
    allowed: AtomicBool,
    running: AtomicBool,
    threshold_ms: AtomicU64,
    stats: StatisticsStorage,
}

impl PlayoutControl {
    pub fn new(
        commands: mpsc::UnboundedSender<PlayoutCommand>,
        queue: Arc<Mutex<PlaybackQueue>>,
        stats: StatisticsStorage,
    ) -> Self {
        PlayoutControl {
            commands,
            queue,
            allowed: AtomicBool::new(false),
            running: AtomicBool::new(false),
            threshold_ms: AtomicU64::new(150),
            stats,
        }
    }

    /// Playable threshold gating start, ms. Set by latency control.
    pub fn set_threshold(&self, threshold_ms: f64) {
        self.threshold_ms
            .store(threshold_ms.max(0.).round() as u64, Ordering::Relaxed);
        self.stats.set(Indicator::BufferTargetSize, threshold_ms);
    }

    pub fn threshold_ms(&self) -> u64 {
        self.threshold_ms.load(Ordering::Relaxed)
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }

    /// Permits or forbids playout. Forbidding stops it immediately;
    /// permitting starts it as soon as the queue passes the threshold.
    pub fn allow_playout(&self, allow: bool) {
        self.allowed.store(allow, Ordering::Relaxed);
        self.check_playout();
    }

    /// Call whenever a new sample becomes playable: a deferred start fires
    /// once the threshold is met.
    pub fn on_new_sample_ready(&self) {
        self.check_playout();
    }

    fn check_playout(&self) {
        let allowed = self.allowed.load(Ordering::Relaxed);
        let running = self.running.load(Ordering::Relaxed);
        if running == allowed {
            return;
        }
        if allowed {
            let queued_ms = self.queue.lock().size_ms();
            let threshold = self.threshold_ms.load(Ordering::Relaxed) as i64;
            if queued_ms >= threshold {
                log::info!(
                    "[PlayoutControl] playback queue size ({}) passed target size ({}), starting playout",
                    queued_ms,
                    threshold
                );
                self.running.store(true, Ordering::Relaxed);
                let _ = self.commands.send(PlayoutCommand::Start {
                    ffwd_ms: queued_ms - threshold,
                });
            }
        } else {
            log::info!("[PlayoutControl] stopping playout");
            self.running.store(false, Ordering::Relaxed);
            let _ = self.commands.send(PlayoutCommand::Stop);
        }
    }
}
