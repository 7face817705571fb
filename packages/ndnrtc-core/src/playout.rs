//! Playout: releasing samples to the decoder on time.
//!
//! The playout task pops the playback queue at producer-declared intervals.
//! [`JitterTiming`] measures the wall-clock cost of each extraction and
//! shortens the next timer accordingly, so the observed extraction rate
//! converges on the sample rate regardless of processing jitter. A
//! fast-forward at start seeds a negative delay adjustment: the first
//! samples play back-to-back until the surplus is absorbed.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::buffer::BufferSlot;
use crate::clock;
use crate::playback_queue::PlaybackQueue;
use crate::playout_control::PlayoutCommand;
use crate::stats::{Indicator, StatisticsStorage};

// ─────────────────────────────────────────────────────────────────────────────
// Jitter timing
// ─────────────────────────────────────────────────────────────────────────────

/// Self-correcting frame timer.
///
/// Each iteration: [`start_frame_playout`](JitterTiming::start_frame_playout)
/// measures how much longer the previous iteration ran than its scheduled
/// interval and accumulates the excess;
/// [`update_playout_time`](JitterTiming::update_playout_time) then shaves
/// whole milliseconds of that excess off the next interval (clamping at
/// zero and carrying any remainder forward).
pub struct JitterTiming {
    frame_playout_time_ms: i64,
    processing_time_us: i64,
    playout_timestamp_us: i64,
}

impl JitterTiming {
    pub fn new() -> Self {
        JitterTiming {
            frame_playout_time_ms: 0,
            processing_time_us: 0,
            playout_timestamp_us: 0,
        }
    }

    pub fn flush(&mut self) {
        self.frame_playout_time_ms = 0;
        self.processing_time_us = 0;
        self.playout_timestamp_us = 0;
        log::trace!("[JitterTiming] flushed");
    }

    /// Marks the start of an extraction and accounts the previous
    /// iteration's overhead.
    pub fn start_frame_playout(&mut self) -> i64 {
        self.start_frame_playout_at(clock::micros())
    }

    pub(crate) fn start_frame_playout_at(&mut self, now_us: i64) -> i64 {
        if self.playout_timestamp_us == 0 {
            self.playout_timestamp_us = now_us;
        } else {
            let full_iteration_us = now_us - self.playout_timestamp_us;
            let overhead_us = (full_iteration_us - self.frame_playout_time_ms * 1000).max(0);
            self.processing_time_us += overhead_us;
            self.playout_timestamp_us = now_us;
        }
        self.playout_timestamp_us
    }

    /// Sets the next interval, absorbing accumulated processing overhead.
    pub fn update_playout_time(&mut self, frame_playout_time_ms: i64) {
        let mut playout_time_us = frame_playout_time_ms.max(0) * 1000;

        if self.processing_time_us >= 1000 {
            // absorb whole milliseconds of overhead
            let absorb_us = (self.processing_time_us / 1000) * 1000;
            if absorb_us > playout_time_us {
                // overhead exceeds the interval: fire immediately and carry
                // the remainder
                self.processing_time_us -= playout_time_us;
                playout_time_us = 0;
            } else {
                playout_time_us -= absorb_us;
                self.processing_time_us -= absorb_us;
            }
        }

        self.frame_playout_time_ms = playout_time_us / 1000;
    }

    /// The interval to wait before the next extraction.
    pub fn wait_interval(&self) -> Duration {
        Duration::from_millis(self.frame_playout_time_ms.max(0) as u64)
    }

    pub fn current_interval_ms(&self) -> i64 {
        self.frame_playout_time_ms
    }
}

impl Default for JitterTiming {
    fn default() -> Self {
        JitterTiming::new()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Playout
// ─────────────────────────────────────────────────────────────────────────────

/// Receives extracted samples. Video hands frames to the decode queue;
/// audio feeds bundles to the renderer.
pub trait PlayoutSink: Send {
    fn process_sample(&mut self, slot: &BufferSlot);
}

/// The extraction loop. Owns the jitter timer and runs on the playout task.
pub struct Playout {
    queue: Arc<Mutex<PlaybackQueue>>,
    sink: Box<dyn PlayoutSink>,
    timing: JitterTiming,
    delay_adjustment_ms: i64,
    last_timestamp_ms: i64,
    last_delay_ms: i64,
    stats: StatisticsStorage,
}

impl Playout {
    pub fn new(
        queue: Arc<Mutex<PlaybackQueue>>,
        sink: Box<dyn PlayoutSink>,
        stats: StatisticsStorage,
    ) -> Self {
        Playout {
            queue,
            sink,
            timing: JitterTiming::new(),
            delay_adjustment_ms: 0,
            last_timestamp_ms: -1,
            last_delay_ms: -1,
            stats,
        }
    }

    /// Runs the playout loop until cancelled. Extraction happens between a
    /// `Start` and the next `Stop` command.
    pub async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<PlayoutCommand>,
        cancel: CancellationToken,
    ) {
        let mut running = false;
        loop {
            if !running {
                tokio::select! {
                    _ = cancel.cancelled() => return,
                    cmd = commands.recv() => match cmd {
                        Some(PlayoutCommand::Start { ffwd_ms }) => {
                            self.start(ffwd_ms);
                            running = true;
                        }
                        Some(PlayoutCommand::Stop) | None => {}
                    },
                }
                continue;
            }

            self.extract_sample();

            tokio::select! {
                _ = cancel.cancelled() => return,
                cmd = commands.recv() => match cmd {
                    Some(PlayoutCommand::Stop) => {
                        self.stop();
                        running = false;
                    }
                    Some(PlayoutCommand::Start { ffwd_ms }) => {
                        self.start(ffwd_ms);
                    }
                    None => return,
                },
                _ = tokio::time::sleep(self.timing.wait_interval()) => {}
            }
        }
    }

    fn start(&mut self, ffwd_ms: i64) {
        self.timing.flush();
        self.last_timestamp_ms = -1;
        self.last_delay_ms = -1;
        // negative adjustment: the first samples play back-to-back until
        // the fast-forward is absorbed
        self.delay_adjustment_ms = -ffwd_ms;
        log::info!("[Playout] started (‣‣{}ms)", ffwd_ms);
    }

    fn stop(&mut self) {
        self.timing.flush();
        log::info!("[Playout] stopped");
    }

    /// One extraction iteration: pop the head sample (or account an empty
    /// queue), then arm the timer for the next one.
    fn extract_sample(&mut self) {
        let sample_period = {
            let q = self.queue.lock();
            q.sample_period().round() as i64
        };
        self.timing.start_frame_playout();

        let mut sample_delay = sample_period;
        let mut extracted_ts: Option<i64> = None;

        let popped = {
            let mut q = self.queue.lock();
            q.pop(|slot, play_time_ms| {
                self.sink.process_sample(slot);
                extracted_ts = slot.common_header().map(|h| h.publish_timestamp_ms);
                sample_delay = play_time_ms.round() as i64;
            })
        };

        if popped {
            if let Some(ts) = extracted_ts {
                self.correct_adjustment(ts);
                self.last_timestamp_ms = ts;
            }
            self.stats.inc(Indicator::PlayedNum);
        } else {
            self.last_timestamp_ms += sample_delay;
            log::warn!("[Playout] playback queue is empty");
            self.stats.inc(Indicator::SkippedNum);
        }

        self.last_delay_ms = sample_delay;
        let actual_delay = self.adjust_delay(sample_delay);
        self.timing.update_playout_time(actual_delay);
    }

    /// Compensates for the gap between the nominal delay used last time and
    /// the hard timestamp distance the producer declared.
    fn correct_adjustment(&mut self, new_sample_timestamp_ms: i64) {
        if self.last_delay_ms >= 0 && self.last_timestamp_ms >= 0 {
            let hard_delay = new_sample_timestamp_ms - self.last_timestamp_ms;
            self.delay_adjustment_ms += hard_delay - self.last_delay_ms;
        }
    }

    /// Applies the accumulated adjustment to the nominal delay; a negative
    /// balance larger than the delay drains gradually.
    fn adjust_delay(&mut self, delay_ms: i64) -> i64 {
        if self.delay_adjustment_ms < 0 && self.delay_adjustment_ms.abs() > delay_ms {
            self.delay_adjustment_ms += delay_ms;
            0
        } else {
            let adjusted = delay_ms + self.delay_adjustment_ms;
            self.delay_adjustment_ms = 0;
            adjusted
        }
    }
}

/// Feeds decoded frames into the decode queue.
pub struct VideoPlayoutSink {
    decode_queue: Arc<Mutex<crate::decode_queue::DecodeQueue>>,
    stats: StatisticsStorage,
}

impl VideoPlayoutSink {
    pub fn new(
        decode_queue: Arc<Mutex<crate::decode_queue::DecodeQueue>>,
        stats: StatisticsStorage,
    ) -> Self {
        VideoPlayoutSink {
            decode_queue,
            stats,
        }
    }
}

impl PlayoutSink for VideoPlayoutSink {
    fn process_sample(&mut self, slot: &BufferSlot) {
        let Some(seq) = slot.sample_no() else { return };
        match slot.assembled_frame() {
            Ok((wire, recovered)) => match crate::packets::VideoFramePacket::from_wire(wire) {
                Ok(packet) => {
                    if recovered {
                        self.stats.inc(Indicator::RecoveredNum);
                    }
                    self.decode_queue.lock().push(
                        seq,
                        packet.header.frame_type,
                        &packet.payload,
                    );
                }
                Err(e) => {
                    log::warn!("[VideoPlayout] frame {} undecodable: {}", seq, e);
                    self.stats.inc(Indicator::IncompleteNum);
                }
            },
            Err(e) => {
                log::warn!("[VideoPlayout] frame {} not assembled: {}", seq, e);
                self.stats.inc(Indicator::IncompleteNum);
            }
        }
    }
}

/// Audio renderer capability: sinks for RTP media and RTCP control blobs.
pub trait AudioRenderer: Send {
    fn on_rtp(&mut self, payload: &[u8]);
    fn on_rtcp(&mut self, payload: &[u8]);
}

/// Unpacks audio bundles and feeds each blob to the renderer.
pub struct AudioPlayoutSink {
    renderer: Box<dyn AudioRenderer>,
    stats: StatisticsStorage,
}

impl AudioPlayoutSink {
    pub fn new(renderer: Box<dyn AudioRenderer>, stats: StatisticsStorage) -> Self {
        AudioPlayoutSink { renderer, stats }
    }
}

impl PlayoutSink for AudioPlayoutSink {
    fn process_sample(&mut self, slot: &BufferSlot) {
        match slot.assembled_frame() {
            Ok((wire, _)) => match crate::packets::AudioBundlePacket::from_wire(wire) {
                Ok(bundle) => {
                    for sample in &bundle.samples {
                        if sample.is_rtcp {
                            self.renderer.on_rtcp(&sample.payload);
                        } else {
                            self.renderer.on_rtp(&sample.payload);
                        }
                    }
                }
                Err(e) => {
                    log::warn!("[AudioPlayout] bundle undecodable: {}", e);
                    self.stats.inc(Indicator::IncompleteNum);
                }
            },
            Err(e) => {
                log::warn!("[AudioPlayout] bundle not assembled: {}", e);
                self.stats.inc(Indicator::IncompleteNum);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    mod jitter_timing {
        use super::*;

        #[test]
        fn first_iteration_sets_the_anchor() {
            let mut t = JitterTiming::new();
            t.start_frame_playout_at(1_000_000);
            t.update_playout_time(33);
            assert_eq!(t.current_interval_ms(), 33);
        }

        #[test]
        fn overhead_is_subtracted_from_the_next_interval() {
            let mut t = JitterTiming::new();
            t.start_frame_playout_at(0);
            t.update_playout_time(33);

            // iteration ran 36ms instead of the scheduled 33: 3ms overhead
            t.start_frame_playout_at(36_000);
            t.update_playout_time(33);
            assert_eq!(
                t.current_interval_ms(),
                30,
                "3ms of overhead shaved off the next wait"
            );
        }

        #[test]
        fn excess_overhead_clamps_to_zero_and_carries() {
            let mut t = JitterTiming::new();
            t.start_frame_playout_at(0);
            t.update_playout_time(33);

            // a 100ms stall: 67ms of overhead against a 33ms interval
            t.start_frame_playout_at(100_000);
            t.update_playout_time(33);
            assert_eq!(t.current_interval_ms(), 0, "timer fires immediately");

            // the remaining overhead drains from the following interval
            t.start_frame_playout_at(100_500);
            t.update_playout_time(33);
            assert!(
                t.current_interval_ms() < 33,
                "carried overhead still draining, got {}ms",
                t.current_interval_ms()
            );
        }

        #[test]
        fn mean_interval_converges_on_the_period() {
            // steady extraction costing 2ms each: over 30 iterations the
            // scheduled wait must average period - overhead
            let mut t = JitterTiming::new();
            let period = 33i64;
            let overhead_us = 2_000i64;
            let mut now = 0i64;
            let mut total_elapsed = 0i64;
            let n = 30;

            t.start_frame_playout_at(now);
            t.update_playout_time(period);
            for _ in 0..n {
                let step = t.current_interval_ms() * 1000 + overhead_us;
                now += step;
                total_elapsed += step;
                t.start_frame_playout_at(now);
                t.update_playout_time(period);
            }

            let mean = total_elapsed as f64 / n as f64 / 1000.;
            assert!(
                (mean - period as f64).abs() < 1.5,
                "mean inter-extraction {}ms should track the {}ms period",
                mean,
                period
            );
        }
    }

    mod adjustment {
        use super::*;
        use crate::buffer::{Buffer, SlotPool};

        fn playout() -> Playout {
            struct NullSink;
            impl PlayoutSink for NullSink {
                fn process_sample(&mut self, _slot: &BufferSlot) {}
            }
            let stats = StatisticsStorage::consumer();
            let buffer = Arc::new(Mutex::new(Buffer::new(SlotPool::new(4), stats.clone())));
            let queue = Arc::new(Mutex::new(PlaybackQueue::new(buffer, stats.clone())));
            Playout::new(queue, Box::new(NullSink), stats)
        }

        #[test]
        fn fast_forward_plays_back_to_back_until_absorbed() {
            let mut p = playout();
            p.start(100);

            // 33ms nominal delays: the first three fire immediately
            assert_eq!(p.adjust_delay(33), 0);
            assert_eq!(p.adjust_delay(33), 0);
            assert_eq!(p.adjust_delay(33), 0);
            // 1ms of debt left: next interval is short, then nominal
            assert_eq!(p.adjust_delay(33), 32);
            assert_eq!(p.adjust_delay(33), 33);
        }

        #[test]
        fn timestamp_gaps_feed_back_into_the_adjustment() {
            let mut p = playout();
            p.start(0);
            p.last_timestamp_ms = 1000;
            p.last_delay_ms = 33;

            // producer timestamps actually 40ms apart: 7ms owed
            p.correct_adjustment(1040);
            assert_eq!(p.delay_adjustment_ms, 7);
            assert_eq!(p.adjust_delay(33), 40, "positive adjustment stretches");
        }
    }
}
