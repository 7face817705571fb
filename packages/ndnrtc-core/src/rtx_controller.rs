//! Deadline-driven retransmissions.
//!
//! Every newly requested slot gets a playback deadline: delta frames play
//! after the content already queued (playable plus pending); key frames get
//! a GOP worth of periods. When a slot's deadline closes to within one DRD
//! and the slot has not assembled, its outstanding Interests are
//! re-expressed once (fresh nonces, elevated priority). A second
//! retransmission requires the slot to be tracked anew.

use std::collections::HashMap;

use crate::buffer::SlotState;
use crate::clock;
use crate::name::Name;
use crate::namespace::SampleClass;
use crate::stats::{Indicator, StatisticsStorage};
use crate::transport::Interest;

/// Current view of a tracked slot, provided by the buffer at check time.
pub struct SlotView {
    pub state: SlotState,
    pub pending_interests: Vec<Interest>,
}

pub struct RtxController {
    active: HashMap<Name, i64>,
    enabled: bool,
    gop_size: u32,
    stats: StatisticsStorage,
}

impl RtxController {
    pub fn new(gop_size: u32, stats: StatisticsStorage) -> Self {
        RtxController {
            active: HashMap::new(),
            enabled: false,
            gop_size,
            stats,
        }
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
        log::trace!(
            "[RtxController] {}",
            if enabled { "enabled" } else { "disabled" }
        );
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn set_gop_size(&mut self, gop_size: u32) {
        if gop_size > 0 {
            self.gop_size = gop_size;
        }
    }

    /// Starts tracking a freshly requested slot.
    ///
    /// `queued_ms` is the playback content ahead of this sample (playable
    /// plus pending durations); `sample_period_ms` sizes the key-frame
    /// deadline.
    pub fn on_new_request(
        &mut self,
        slot_name: &Name,
        sample_class: SampleClass,
        queued_ms: i64,
        sample_period_ms: f64,
    ) {
        if !self.enabled {
            return;
        }
        if self.active.contains_key(slot_name) {
            log::trace!("[RtxController] slot {} already tracked", slot_name);
            return;
        }
        let now = clock::millis();
        let deadline = match sample_class {
            SampleClass::Key => now + (self.gop_size as f64 * sample_period_ms) as i64,
            _ => now + queued_ms,
        };
        self.active.insert(slot_name.clone(), deadline);
    }

    /// Sweeps the active set: slots whose deadline is within `min_drd_ms`
    /// and that have not assembled get their pending Interests collected
    /// for re-expression; assembled or vanished slots are dropped.
    ///
    /// Runs on every buffer event, and additionally on a periodic tick when
    /// the `rtx-tick` feature is enabled.
    pub fn check_retransmissions(
        &mut self,
        min_drd_ms: f64,
        mut slot_view: impl FnMut(&Name) -> Option<SlotView>,
    ) -> Vec<Interest> {
        self.check_retransmissions_at(clock::millis(), min_drd_ms, &mut slot_view)
    }

    fn check_retransmissions_at(
        &mut self,
        now_ms: i64,
        min_drd_ms: f64,
        slot_view: &mut impl FnMut(&Name) -> Option<SlotView>,
    ) -> Vec<Interest> {
        if !self.enabled {
            return vec![];
        }

        let mut to_retransmit = vec![];
        self.active.retain(|name, deadline| {
            let Some(view) = slot_view(name) else {
                return false; // slot released
            };
            let assembled_or_cleared =
                view.state >= SlotState::Ready || view.state == SlotState::Free;
            let needs_rtx = (*deadline - now_ms) < min_drd_ms as i64;

            if assembled_or_cleared {
                return false;
            }
            if needs_rtx {
                if !view.pending_interests.is_empty() {
                    log::trace!(
                        "[RtxController] rtx required for {}, playback in {}ms",
                        name,
                        *deadline - now_ms
                    );
                    to_retransmit.extend(view.pending_interests);
                }
                return false; // one retransmission per deadline breach
            }
            true
        });

        if !to_retransmit.is_empty() {
            self.stats.add(Indicator::RtxNum, to_retransmit.len() as f64);
        }
        to_retransmit
    }

    pub fn reset(&mut self) {
        self.active.clear();
    }

    pub fn tracked(&self) -> usize {
        self.active.len()
    }
}
