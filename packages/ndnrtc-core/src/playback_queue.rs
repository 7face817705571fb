//! Timestamp-ordered view over assembled slots, feeding playout.
//!
//! Samples order by the producer's publish timestamp (ties broken by
//! insertion order), so pop order is monotonically non-decreasing. The
//! queue holds sample names, not slots: the buffer keeps ownership, and a
//! popped sample is locked only for the duration of the extraction callback.

use std::collections::BTreeSet;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::buffer::{Buffer, BufferSlot, SlotState};
use crate::name::Name;
use crate::stats::{Indicator, StatisticsStorage};

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
struct Sample {
    timestamp_ms: i64,
    insertion: u64,
    slot_name: Name,
}

/// Playback ordering over Ready slots.
pub struct PlaybackQueue {
    buffer: Arc<Mutex<Buffer>>,
    queue: BTreeSet<Sample>,
    packet_rate: f64,
    next_insertion: u64,
    stats: StatisticsStorage,
}

impl PlaybackQueue {
    pub fn new(buffer: Arc<Mutex<Buffer>>, stats: StatisticsStorage) -> Self {
        PlaybackQueue {
            buffer,
            queue: BTreeSet::new(),
            packet_rate: 0.,
            next_insertion: 0,
            stats,
        }
    }

    /// Producer-declared sample rate, updated from packet headers and
    /// `_live` metadata.
    pub fn update_packet_rate(&mut self, rate: f64) {
        if rate > 0. {
            self.packet_rate = rate;
        }
    }

    pub fn sample_rate(&self) -> f64 {
        self.packet_rate
    }

    /// Nominal inter-sample interval, ms.
    pub fn sample_period(&self) -> f64 {
        if self.packet_rate > 0. {
            1000. / self.packet_rate
        } else {
            0.
        }
    }

    /// Adds an assembled slot. Call when a buffer receipt reports
    /// `Assembling → Ready`.
    pub fn on_sample_ready(&mut self, slot_name: &Name) {
        let timestamp_ms = {
            let mut buffer = self.buffer.lock();
            buffer
                .with_slot(slot_name, |slot| {
                    slot.common_header().map(|h| h.publish_timestamp_ms)
                })
                .flatten()
        };
        let Some(timestamp_ms) = timestamp_ms else {
            log::warn!(
                "[PlaybackQueue] ready slot {} has no packet header, skipping",
                slot_name
            );
            return;
        };
        self.queue.insert(Sample {
            timestamp_ms,
            insertion: self.next_insertion,
            slot_name: slot_name.clone(),
        });
        self.next_insertion += 1;
        self.stats
            .set(Indicator::BufferPlayableSize, self.size_ms() as f64);
        self.stats.inc(Indicator::AcquiredNum);
    }

    /// Pops the head sample and hands the locked slot to `extract` together
    /// with its playout duration (gap to the next sample, or the nominal
    /// sample period when the queue runs dry). The slot is released back to
    /// the pool afterwards.
    pub fn pop(&mut self, extract: impl FnOnce(&mut BufferSlot, f64)) -> bool {
        let Some(head) = self.queue.iter().next().cloned() else {
            return false;
        };
        self.queue.remove(&head);

        let play_time_ms = self
            .queue
            .iter()
            .next()
            .map(|next| (next.timestamp_ms - head.timestamp_ms) as f64)
            .filter(|gap| *gap >= 0.)
            .unwrap_or_else(|| self.sample_period());

        let mut buffer = self.buffer.lock();
        let extracted = buffer
            .with_slot(&head.slot_name, |slot| {
                if slot.state() != SlotState::Ready {
                    return false;
                }
                slot.toggle_lock();
                extract(slot, play_time_ms);
                slot.toggle_lock();
                true
            })
            .unwrap_or(false);

        if extracted {
            buffer.release_slot(&head.slot_name);
        } else {
            log::trace!(
                "[PlaybackQueue] sample {} vanished before playout",
                head.slot_name
            );
        }
        drop(buffer);

        self.stats
            .set(Indicator::BufferPlayableSize, self.size_ms() as f64);
        extracted
    }

    /// Playable duration queued up, ms: the timestamp span of ready samples
    /// plus one nominal period for the last one.
    pub fn size_ms(&self) -> i64 {
        let mut it = self.queue.iter();
        let Some(first) = it.next() else { return 0 };
        let last = self.queue.iter().next_back().unwrap();
        (last.timestamp_ms - first.timestamp_ms) + self.sample_period().round() as i64
    }

    /// Expected duration of samples requested but not yet assembled, ms.
    pub fn pending_size_ms(&self) -> i64 {
        let pending = {
            let buffer = self.buffer.lock();
            buffer.slots_num(|s| matches!(s, SlotState::New | SlotState::Assembling))
        };
        (pending as f64 * self.sample_period()).round() as i64
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Forgets all queued samples (buffer reset handles the slots).
    pub fn reset(&mut self) {
        self.queue.clear();
        self.stats.set(Indicator::BufferPlayableSize, 0.);
    }
}
