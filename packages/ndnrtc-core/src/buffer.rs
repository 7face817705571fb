//! The frame buffer: per-sample slots, the slot pool, and segment assembly.
//!
//! A [`BufferSlot`] collects everything fetched for one sample: data and
//! parity segments, the frame's `_meta` packet, its `_manifest`, and the
//! Interests still outstanding. Slots walk
//! `Free → New → Assembling → Ready → Locked` and are recycled through the
//! [`SlotPool`] without reallocation.
//!
//! The [`Buffer`] owns all active slots, keyed by sample prefix. Operations
//! return receipts; routing them to dependents (playback queue, validators,
//! retransmission, controls) happens on the face task, outside the buffer
//! lock.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use bytes::Bytes;

use crate::clock;
use crate::error::{NdnRtcError, NdnRtcResult};
use crate::fec::{self, Rs28Decoder};
use crate::name::Name;
use crate::namespace::{NamespaceInfo, SampleClass, SegmentClass};
use crate::packets::{
    merge_slices, CommonHeader, FrameMeta, SegmentsManifest, WireSegment,
};
use crate::request::DataRequest;
use crate::stats::{Indicator, StatisticsStorage};
use crate::transport::Interest;

/// Slot assembly state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum SlotState {
    /// In the pool, not in use.
    Free,
    /// Interests expressed, nothing arrived yet.
    New,
    /// Some segments arrived.
    Assembling,
    /// Enough segments to reconstruct the frame payload.
    Ready,
    /// Owned by playout; must not be mutated or recycled.
    Locked,
}

/// Outcome of manifest-based verification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerificationStatus {
    Unknown,
    Failed,
    Verified,
}

/// One requested (and possibly fetched) segment inside a slot.
pub struct SlotSegment {
    request: Arc<DataRequest>,
    segment: Option<WireSegment>,
    request_time_us: i64,
    arrival_time_us: i64,
    request_num: u32,
}

impl SlotSegment {
    fn new(request: Arc<DataRequest>) -> Self {
        SlotSegment {
            request,
            segment: None,
            request_time_us: clock::micros(),
            arrival_time_us: 0,
            request_num: 1,
        }
    }

    pub fn is_fetched(&self) -> bool {
        self.segment.is_some()
    }

    pub fn is_original(&self) -> bool {
        self.segment.as_ref().is_some_and(|s| s.is_original())
    }

    pub fn request(&self) -> &Arc<DataRequest> {
        &self.request
    }

    pub fn segment(&self) -> Option<&WireSegment> {
        self.segment.as_ref()
    }

    pub fn request_num(&self) -> u32 {
        self.request_num
    }

    /// Round-trip delay in microseconds, `None` until data arrives. For
    /// original replies the producer's generation delay is subtracted, so
    /// the value reflects network delay alone.
    pub fn drd_usec(&self) -> Option<i64> {
        if self.arrival_time_us <= 0 {
            return None;
        }
        let rtt = self.arrival_time_us - self.request_time_us;
        if self.is_original() {
            let d_gen_us =
                (self.segment.as_ref().unwrap().header.generation_delay_ms() * 1000.) as i64;
            Some(rtt - d_gen_us)
        } else {
            Some(rtt)
        }
    }

    pub fn generation_delay_ms(&self) -> f64 {
        self.segment
            .as_ref()
            .map(|s| s.header.generation_delay_ms())
            .unwrap_or(0.)
    }
}

/// What changed when a segment landed in the buffer.
#[derive(Debug, Clone)]
pub struct BufferReceipt {
    pub slot_name: Name,
    pub segment_info: NamespaceInfo,
    pub old_state: SlotState,
    pub new_state: SlotState,
    pub is_original: bool,
    pub sample_class: SampleClass,
    /// Set when this receipt completed assembly (`Assembling → Ready`).
    pub became_ready: bool,
    /// Late segment for an already-Ready slot, dropped without effect.
    pub discarded: bool,
    pub drd_usec: Option<i64>,
    pub generation_delay_ms: f64,
}

/// A per-sample record of requested Interests and fetched segments.
pub struct BufferSlot {
    name: Name,
    info: Option<NamespaceInfo>,
    state: SlotState,
    requested: BTreeMap<Name, SlotSegment>,
    fetched: BTreeMap<Name, SlotSegment>,
    n_data_segments: Option<usize>,
    n_parity_segments: Option<usize>,
    playback_no: Option<i64>,
    common_header: Option<CommonHeader>,
    frame_meta: Option<FrameMeta>,
    manifest: Option<Bytes>,
    manifest_trusted: Option<bool>,
    verification: VerificationStatus,
    assembled_bytes: usize,
    assembled_level: f64,
    n_rtx: u32,
    has_original_segments: bool,
    request_time_us: i64,
    first_segment_time_us: i64,
    assembled_time_us: i64,
}

impl BufferSlot {
    pub fn new() -> Self {
        BufferSlot {
            name: Name::new(),
            info: None,
            state: SlotState::Free,
            requested: BTreeMap::new(),
            fetched: BTreeMap::new(),
            n_data_segments: None,
            n_parity_segments: None,
            playback_no: None,
            common_header: None,
            frame_meta: None,
            manifest: None,
            manifest_trusted: None,
            verification: VerificationStatus::Unknown,
            assembled_bytes: 0,
            assembled_level: 0.,
            n_rtx: 0,
            has_original_segments: false,
            request_time_us: 0,
            first_segment_time_us: 0,
            assembled_time_us: 0,
        }
    }

    /// Returns the slot to its pristine state. No deallocation beyond map
    /// entries, so pooled reuse stays cheap.
    pub fn clear(&mut self) {
        *self = BufferSlot {
            requested: std::mem::take(&mut self.requested),
            fetched: std::mem::take(&mut self.fetched),
            ..BufferSlot::new()
        };
        self.requested.clear();
        self.fetched.clear();
    }

    pub fn state(&self) -> SlotState {
        self.state
    }

    pub fn name(&self) -> &Name {
        &self.name
    }

    pub fn name_info(&self) -> Option<&NamespaceInfo> {
        self.info.as_ref()
    }

    pub fn sample_class(&self) -> SampleClass {
        self.info
            .as_ref()
            .map(|i| i.sample_class)
            .unwrap_or(SampleClass::Unknown)
    }

    pub fn sample_no(&self) -> Option<u64> {
        self.info.as_ref().filter(|i| i.has_seq_no).map(|i| i.sample_no)
    }

    pub fn verification_status(&self) -> VerificationStatus {
        self.verification
    }

    pub fn set_verification_status(&mut self, status: VerificationStatus) {
        self.verification = status;
    }

    pub fn manifest(&self) -> Option<&Bytes> {
        self.manifest.as_ref()
    }

    pub fn set_manifest(&mut self, content: Bytes, trusted: bool) {
        self.manifest = Some(content);
        self.manifest_trusted = Some(trusted);
    }

    pub fn manifest_trusted(&self) -> Option<bool> {
        self.manifest_trusted
    }

    pub fn frame_meta(&self) -> Option<&FrameMeta> {
        self.frame_meta.as_ref()
    }

    pub fn set_frame_meta(&mut self, meta: FrameMeta) {
        self.frame_meta = Some(meta);
    }

    pub fn common_header(&self) -> Option<&CommonHeader> {
        self.common_header.as_ref()
    }

    pub fn playback_number(&self) -> Option<i64> {
        self.playback_no
    }

    pub fn assembled_level(&self) -> f64 {
        self.assembled_level
    }

    pub fn assembled_bytes(&self) -> usize {
        self.assembled_bytes
    }

    pub fn fetched_num(&self) -> usize {
        self.fetched.len()
    }

    pub fn rtx_num(&self) -> u32 {
        self.n_rtx
    }

    pub fn has_original_segments(&self) -> bool {
        self.has_original_segments
    }

    pub fn data_segments_num(&self) -> Option<usize> {
        self.n_data_segments
    }

    pub fn parity_segments_num(&self) -> Option<usize> {
        self.n_parity_segments
    }

    /// Time from first request to first arrived segment, µs.
    pub fn shortest_drd_usec(&self) -> i64 {
        if self.state >= SlotState::Assembling && self.first_segment_time_us > 0 {
            self.first_segment_time_us - self.request_time_us
        } else {
            0
        }
    }

    /// Time from first request to assembly completion, µs.
    pub fn longest_drd_usec(&self) -> i64 {
        if self.state >= SlotState::Ready && self.assembled_time_us > 0 {
            self.assembled_time_us - self.request_time_us
        } else {
            0
        }
    }

    /// Time from first segment to assembly completion, µs.
    pub fn assembling_time_usec(&self) -> i64 {
        if self.state >= SlotState::Ready {
            self.assembled_time_us - self.first_segment_time_us
        } else {
            0
        }
    }

    /// Interests expressed but not yet answered.
    pub fn pending_interests(&self) -> Vec<Interest> {
        self.requested
            .values()
            .map(|s| s.request.interest().clone())
            .collect()
    }

    pub fn fetched_segments(&self) -> impl Iterator<Item = &SlotSegment> {
        self.fetched.values()
    }

    /// Registers issued Interests. All must address this slot's sample
    /// (same sample prefix, a sample-level name with a sequence number).
    fn segments_requested(&mut self, requests: &[Arc<DataRequest>]) -> NdnRtcResult<()> {
        for request in requests {
            let info = request.info();
            if !info.is_sample() {
                return Err(NdnRtcError::BadRequestSet(format!(
                    "not a sample-level name: {}",
                    request.name()
                )));
            }
            let sample_prefix = info.sample_prefix();
            if self.state == SlotState::Free {
                self.name = sample_prefix.clone();
                self.info = Some(info.clone());
                self.state = SlotState::New;
                self.request_time_us = clock::micros();
            } else if self.name != sample_prefix {
                return Err(NdnRtcError::BadRequestSet(format!(
                    "interest {} does not match slot sample {}",
                    request.name(),
                    self.name
                )));
            }

            let segment_name = request.name().clone();
            if let Some(existing) = self.requested.get_mut(&segment_name) {
                // same segment re-expressed: a retransmission
                existing.request = Arc::clone(request);
                existing.request_num += 1;
                existing.request_time_us = clock::micros();
                self.n_rtx += 1;
            } else if !self.fetched.contains_key(&segment_name) {
                self.requested
                    .insert(segment_name, SlotSegment::new(Arc::clone(request)));
            }
        }
        Ok(())
    }

    /// Accepts a received segment, updating consistency and state.
    fn segment_received(&mut self, wire: WireSegment) -> NdnRtcResult<BufferReceipt> {
        let old_state = self.state;
        let segment_name = wire.info.segment_name();

        if self.state >= SlotState::Ready {
            log::trace!(
                "[Buffer] slot {} already assembled, discarding {}",
                self.name,
                segment_name
            );
            return Ok(self.receipt(&wire, old_state, false, true, None));
        }

        let slot_segment = match self.requested.remove(&segment_name) {
            Some(mut s) => {
                s.arrival_time_us = clock::micros();
                s.segment = Some(wire.clone());
                s
            }
            None if self.fetched.contains_key(&segment_name) => {
                log::trace!("[Buffer] duplicate segment {} discarded", segment_name);
                return Ok(self.receipt(&wire, old_state, false, true, None));
            }
            None => {
                return Err(NdnRtcError::UnknownSegment(segment_name));
            }
        };

        if self.first_segment_time_us == 0 {
            self.first_segment_time_us = slot_segment.arrival_time_us;
        }
        self.has_original_segments |= slot_segment.is_original();
        let drd = slot_segment.drd_usec();

        self.update_consistency(&wire);
        self.assembled_bytes += wire.payload.len();
        self.fetched.insert(segment_name, slot_segment);
        self.update_assembled_level();

        self.state = SlotState::Assembling;
        let became_ready = self.check_ready();
        if became_ready {
            self.assembled_time_us = clock::micros();
        }

        Ok(self.receipt(&wire, old_state, became_ready, false, drd))
    }

    fn receipt(
        &self,
        wire: &WireSegment,
        old_state: SlotState,
        became_ready: bool,
        discarded: bool,
        drd_usec: Option<i64>,
    ) -> BufferReceipt {
        BufferReceipt {
            slot_name: self.name.clone(),
            segment_info: wire.info.clone(),
            old_state,
            new_state: self.state,
            is_original: wire.is_original(),
            sample_class: self.sample_class(),
            became_ready,
            discarded,
            drd_usec,
            generation_delay_ms: wire.header.generation_delay_ms(),
        }
    }

    /// Learns segment counts and packet headers from arriving segments:
    /// any video segment header carries the segment geometry; segment 0
    /// carries the packet-level header at the front of its payload.
    fn update_consistency(&mut self, wire: &WireSegment) {
        if let Some(video) = wire.header.as_video() {
            if self.n_data_segments.is_none() && video.total_segments_num > 0 {
                self.n_data_segments = Some(video.total_segments_num as usize);
                self.n_parity_segments = Some(video.parity_segments_num.max(0) as usize);
                self.playback_no = Some(video.playback_no as i64);
            }
        } else if self.n_data_segments.is_none() && wire.info.segment_class == SegmentClass::Data {
            // audio segments carry no geometry; the producer's FinalBlockId
            // bounds the bundle
            self.n_data_segments = wire.slices_num().map(|n| n as usize);
            self.n_parity_segments = Some(0);
        }

        if wire.info.segment_class == SegmentClass::Data
            && wire.info.has_seg_no
            && wire.info.seg_no == 0
            && self.common_header.is_none()
        {
            let mut payload = wire.payload.clone();
            if let Ok(header) = CommonHeader::decode(&mut payload) {
                self.common_header = Some(header);
            }
        }
    }

    fn update_assembled_level(&mut self) {
        let Some(n_data) = self.n_data_segments else {
            return;
        };
        if n_data == 0 {
            return;
        }
        let mut level = 0.;
        for s in self.fetched.values() {
            if let Some(seg) = &s.segment {
                level += match seg.info.segment_class {
                    SegmentClass::Data => 1. / n_data as f64,
                    SegmentClass::Parity => fec::parity_weight() / n_data as f64,
                    _ => 0.,
                };
            }
        }
        self.assembled_level = level;
    }

    fn counted_segments(&self, class: SegmentClass) -> usize {
        self.fetched
            .values()
            .filter(|s| {
                s.segment
                    .as_ref()
                    .is_some_and(|seg| seg.info.segment_class == class)
            })
            .count()
    }

    /// Ready once enough original-or-parity slices exist to reconstruct the
    /// payload: `data + parity ≥ n_data`.
    fn check_ready(&mut self) -> bool {
        let Some(n_data) = self.n_data_segments else {
            return false;
        };
        let fetched =
            self.counted_segments(SegmentClass::Data) + self.counted_segments(SegmentClass::Parity);
        if fetched >= n_data && n_data > 0 {
            self.state = SlotState::Ready;
            true
        } else {
            false
        }
    }

    /// Locks for playout / releases back. A Locked slot is owned by the
    /// playout side; the buffer refuses to recycle it.
    pub fn toggle_lock(&mut self) {
        self.state = match self.state {
            SlotState::Ready => SlotState::Locked,
            SlotState::Locked => SlotState::Ready,
            other => other,
        };
    }

    /// Reconstructs the frame packet wire form, via FEC when data segments
    /// are missing. The `recovered` flag reports that parity was used.
    pub fn assembled_frame(&self) -> NdnRtcResult<(Bytes, bool)> {
        let n_data = self.n_data_segments.ok_or_else(|| {
            NdnRtcError::InvalidState(format!("slot {} has no segment geometry", self.name))
        })?;

        let mut data_slices: Vec<(usize, &WireSegment)> = vec![];
        let mut parity_slices: Vec<(usize, &WireSegment)> = vec![];
        for s in self.fetched.values() {
            if let Some(seg) = &s.segment {
                match seg.info.segment_class {
                    SegmentClass::Data => data_slices.push((seg.info.seg_no as usize, seg)),
                    SegmentClass::Parity => parity_slices.push((seg.info.seg_no as usize, seg)),
                    _ => {}
                }
            }
        }
        data_slices.sort_by_key(|(i, _)| *i);

        if data_slices.len() >= n_data {
            let ordered: Vec<Bytes> = data_slices
                .iter()
                .take(n_data)
                .map(|(_, seg)| seg.payload.clone())
                .collect();
            return Ok((merge_slices(&ordered), false));
        }

        // parity slices are always full-length, so any one of them fixes
        // the slice geometry for the decoder
        let slice_len = parity_slices
            .iter()
            .map(|(_, seg)| seg.payload.len())
            .max()
            .ok_or_else(|| {
                NdnRtcError::InvalidState(format!(
                    "slot {} is missing data segments and has no parity",
                    self.name
                ))
            })?;
        let n_parity = self.n_parity_segments.unwrap_or(parity_slices.len());

        let decoder = Rs28Decoder::new(n_data, n_parity, slice_len)?;
        let data_refs: Vec<(usize, &[u8])> = data_slices
            .iter()
            .map(|(i, seg)| (*i, seg.payload.as_ref()))
            .collect();
        let parity_refs: Vec<(usize, &[u8])> = parity_slices
            .iter()
            .map(|(i, seg)| (*i, seg.payload.as_ref()))
            .collect();
        let payload = decoder.decode(&data_refs, &parity_refs)?;
        Ok((Bytes::from(payload), true))
    }

    /// Checks every fetched segment against the slot's manifest.
    pub fn verify_against_manifest(&mut self) -> VerificationStatus {
        let Some(manifest) = &self.manifest else {
            return self.verification;
        };
        if self.manifest_trusted == Some(false) {
            self.verification = VerificationStatus::Failed;
            return self.verification;
        }
        let all_listed = self
            .fetched
            .values()
            .filter_map(|s| s.segment.as_ref())
            .all(|seg| SegmentsManifest::has_data(manifest, &seg.data));
        self.verification = if all_listed {
            VerificationStatus::Verified
        } else {
            VerificationStatus::Failed
        };
        self.verification
    }
}

impl Default for BufferSlot {
    fn default() -> Self {
        BufferSlot::new()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Slot pool
// ─────────────────────────────────────────────────────────────────────────────

/// Pre-allocated pool of free slots. The pool is the only owner of slots
/// outside the buffer's active set; slots transfer, never copy.
pub struct SlotPool {
    capacity: usize,
    pool: Vec<Box<BufferSlot>>,
}

impl SlotPool {
    pub fn new(capacity: usize) -> Self {
        let mut pool = Vec::with_capacity(capacity);
        pool.resize_with(capacity, || Box::new(BufferSlot::new()));
        SlotPool { capacity, pool }
    }

    pub fn pop(&mut self) -> Option<Box<BufferSlot>> {
        self.pool.pop()
    }

    /// Returns a slot to the pool. Locked slots and overflow are refused.
    pub fn push(&mut self, mut slot: Box<BufferSlot>) -> bool {
        if slot.state() == SlotState::Locked || self.pool.len() >= self.capacity {
            return false;
        }
        slot.clear();
        self.pool.push(slot);
        true
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn size(&self) -> usize {
        self.pool.len()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Buffer
// ─────────────────────────────────────────────────────────────────────────────

/// Event returned from [`Buffer::requested`].
#[derive(Debug, Clone)]
pub struct NewRequestEvent {
    pub slot_name: Name,
    pub sample_class: SampleClass,
    /// First time this sample was requested (a fresh slot was allocated).
    pub is_new_slot: bool,
}

/// Owns all active slots.
pub struct Buffer {
    pool: SlotPool,
    active: HashMap<Name, Box<BufferSlot>>,
    stats: StatisticsStorage,
}

impl Buffer {
    pub fn new(pool: SlotPool, stats: StatisticsStorage) -> Self {
        Buffer {
            pool,
            active: HashMap::new(),
            stats,
        }
    }

    /// Records a batch of issued Interests. All must share one sample
    /// prefix; a slot is allocated from the pool on first sight.
    pub fn requested(&mut self, requests: &[Arc<DataRequest>]) -> NdnRtcResult<NewRequestEvent> {
        let first = requests
            .first()
            .ok_or_else(|| NdnRtcError::BadRequestSet("empty request set".into()))?;
        if !first.info().is_sample() {
            return Err(NdnRtcError::BadRequestSet(format!(
                "not a sample-level name: {}",
                first.name()
            )));
        }
        let sample_prefix = first.info().sample_prefix();

        let is_new_slot = !self.active.contains_key(&sample_prefix);
        if is_new_slot {
            let slot = self.pool.pop().ok_or_else(|| {
                NdnRtcError::InvalidState("slot pool exhausted".to_string())
            })?;
            self.active.insert(sample_prefix.clone(), slot);
        }

        let slot = self.active.get_mut(&sample_prefix).unwrap();
        if let Err(e) = slot.segments_requested(requests) {
            if is_new_slot {
                let slot = self.active.remove(&sample_prefix).unwrap();
                self.pool.push(slot);
            }
            return Err(e);
        }

        Ok(NewRequestEvent {
            slot_name: sample_prefix,
            sample_class: slot.sample_class(),
            is_new_slot,
        })
    }

    /// Accepts a received segment for an active slot.
    pub fn received(&mut self, wire: WireSegment) -> NdnRtcResult<BufferReceipt> {
        let sample_prefix = wire.info.sample_prefix();
        let slot = self
            .active
            .get_mut(&sample_prefix)
            .ok_or_else(|| NdnRtcError::UnknownSegment(wire.info.segment_name()))?;

        let receipt = slot.segment_received(wire)?;
        if receipt.became_ready {
            self.stats.inc(Indicator::AssembledNum);
            if receipt.sample_class == SampleClass::Key {
                self.stats.inc(Indicator::AssembledKeyNum);
            }
        }
        self.stats.inc(Indicator::SegmentsReceivedNum);
        Ok(receipt)
    }

    /// Attaches a frame `_meta` packet to its slot.
    pub fn meta_received(&mut self, info: &NamespaceInfo, meta: FrameMeta) -> NdnRtcResult<()> {
        let slot = self
            .active
            .get_mut(&info.sample_prefix())
            .ok_or_else(|| NdnRtcError::UnknownSegment(info.segment_name()))?;
        slot.set_frame_meta(meta);
        slot.requested.remove(&info.segment_name());
        Ok(())
    }

    /// Marks a non-segment request (manifest, meta) of an active slot as
    /// answered, so it no longer counts as outstanding.
    pub fn request_fulfilled(&mut self, info: &NamespaceInfo) {
        if let Some(slot) = self.active.get_mut(&info.sample_prefix()) {
            slot.requested.remove(&info.segment_name());
        }
    }

    /// True when the segment is among the outstanding Interests of an
    /// active slot.
    pub fn is_requested(&self, info: &NamespaceInfo) -> bool {
        self.active
            .get(&info.sample_prefix())
            .is_some_and(|slot| slot.requested.contains_key(&info.segment_name()))
    }

    /// Read/modify access to an active slot.
    pub fn with_slot<R>(&mut self, name: &Name, f: impl FnOnce(&mut BufferSlot) -> R) -> Option<R> {
        self.active.get_mut(name).map(|slot| f(slot))
    }

    pub fn slot_state(&self, name: &Name) -> Option<SlotState> {
        self.active.get(name).map(|s| s.state())
    }

    /// Number of active slots matching the state predicate.
    pub fn slots_num(&self, predicate: impl Fn(SlotState) -> bool) -> usize {
        self.active.values().filter(|s| predicate(s.state())).count()
    }

    /// Releases a slot back to the pool (playout finished with it, or it
    /// was abandoned). Locked slots are refused.
    pub fn release_slot(&mut self, name: &Name) -> bool {
        match self.active.get(name).map(|s| s.state()) {
            Some(SlotState::Locked) | None => false,
            Some(_) => {
                let slot = self.active.remove(name).unwrap();
                self.pool.push(slot);
                true
            }
        }
    }

    /// Drops every active slot back into the pool. Locked slots are
    /// released too: reset means playout is being torn down as well.
    pub fn reset(&mut self) {
        for (_, mut slot) in self.active.drain() {
            if slot.state() == SlotState::Locked {
                slot.toggle_lock();
            }
            self.pool.push(slot);
        }
        log::debug!("[Buffer] reset, pool size {}", self.pool.size());
    }

    pub fn pool(&self) -> &SlotPool {
        &self.pool
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::namespace::{NameComponents, StreamType};
    use crate::packets::{
        payload_length, slice_payload, DataSegmentHeader, FrameType, VideoFrameHeader,
        VideoFramePacket, VideoFrameSegmentHeader,
    };
    use crate::transport::Data;
    use bytes::BytesMut;
    use std::collections::BTreeMap as SyncMap;

    fn stream_prefix() -> Name {
        NameComponents::video_stream_prefix(&Name::from("/prod"), "cam")
    }

    fn frame_packet(payload_len: usize, publish_ts: i64) -> VideoFramePacket {
        VideoFramePacket {
            common: CommonHeader {
                sample_rate: 30.,
                publish_timestamp_ms: publish_ts,
                publish_unix_timestamp_ms: 1.65e12,
            },
            header: VideoFrameHeader {
                encoded_width: 320,
                encoded_height: 240,
                timestamp: 9000,
                capture_time_ms: 1,
                frame_type: FrameType::Delta,
                complete_frame: true,
            },
            sync_list: SyncMap::new(),
            payload: Bytes::from((0..payload_len).map(|i| (i % 247) as u8).collect::<Vec<_>>()),
        }
    }

    /// Builds requests plus wire segments for one full frame, returning
    /// (requests, data segments, parity segments).
    fn publish_frame(
        seq: u64,
        packet: &VideoFramePacket,
        segment_size: usize,
        parity_ratio: f64,
    ) -> (Vec<Arc<DataRequest>>, Vec<WireSegment>, Vec<WireSegment>) {
        let wire = packet.to_wire();
        let payload_len = payload_length(segment_size, StreamType::Video);
        let slices = slice_payload(&wire, payload_len);
        let n_data = slices.len();
        let n_parity = fec::parity_segments_num(n_data, parity_ratio);

        let enc = crate::fec::Rs28Encoder::new(n_data, n_parity, payload_len).unwrap();
        let parity = enc.encode(&wire).unwrap();

        let frame_prefix = stream_prefix().append_sequence_number(seq);
        let mut requests = vec![];
        let mut data_segments = vec![];
        let mut parity_segments = vec![];

        for (i, slice) in slices.iter().enumerate() {
            let name = frame_prefix.clone().append_segment(i as u64);
            let interest = Interest::new(name.clone());
            requests.push(DataRequest::new(interest.clone()).unwrap());

            let header = VideoFrameSegmentHeader {
                common: DataSegmentHeader {
                    interest_nonce: interest.nonce,
                    interest_arrival_ms: 0.,
                    generation_delay_ms: 5.,
                },
                total_segments_num: n_data as i32,
                playback_no: seq as i32,
                paired_sequence_no: (seq / 30) as i32,
                parity_segments_num: n_parity as i32,
            };
            let mut content = BytesMut::new();
            header.encode_into(&mut content);
            content.extend_from_slice(slice);
            let mut data = Data::new(name.clone());
            data.set_content(content.freeze());
            let info = NameComponents::extract_info(&name).unwrap();
            data_segments.push(WireSegment::parse(info, data, interest).unwrap());
        }

        for (i, pslice) in parity.iter().enumerate() {
            let name = frame_prefix
                .clone()
                .append_str(NameComponents::PARITY)
                .append_segment(i as u64);
            let interest = Interest::new(name.clone());
            requests.push(DataRequest::new(interest.clone()).unwrap());

            let header = VideoFrameSegmentHeader {
                common: DataSegmentHeader {
                    interest_nonce: interest.nonce,
                    ..Default::default()
                },
                total_segments_num: n_data as i32,
                playback_no: seq as i32,
                paired_sequence_no: 0,
                parity_segments_num: n_parity as i32,
            };
            let mut content = BytesMut::new();
            header.encode_into(&mut content);
            content.extend_from_slice(pslice);
            let mut data = Data::new(name.clone());
            data.set_content(content.freeze());
            let info = NameComponents::extract_info(&name).unwrap();
            parity_segments.push(WireSegment::parse(info, data, interest).unwrap());
        }

        (requests, data_segments, parity_segments)
    }

    fn test_buffer() -> Buffer {
        Buffer::new(SlotPool::new(10), StatisticsStorage::consumer())
    }

    mod requested {
        use super::*;

        #[test]
        fn allocates_and_reuses_slots_by_sample_prefix() {
            let mut buffer = test_buffer();
            let packet = frame_packet(5000, 100);
            let (requests, _, _) = publish_frame(1, &packet, 1000, 0.2);

            let ev = buffer.requested(&requests[..2]).unwrap();
            assert!(ev.is_new_slot);
            assert_eq!(buffer.slot_state(&ev.slot_name), Some(SlotState::New));

            let ev2 = buffer.requested(&requests[2..]).unwrap();
            assert!(!ev2.is_new_slot, "same sample reuses the slot");
            assert_eq!(ev.slot_name, ev2.slot_name);
        }

        #[test]
        fn mixed_sample_prefixes_are_rejected() {
            let mut buffer = test_buffer();
            let packet = frame_packet(2000, 100);
            let (mut requests, _, _) = publish_frame(1, &packet, 1000, 1.0);
            let (requests2, _, _) = publish_frame(2, &packet, 1000, 1.0);
            requests.push(requests2[0].clone());

            let err = buffer.requested(&requests).unwrap_err();
            assert!(matches!(err, NdnRtcError::BadRequestSet(_)), "{:?}", err);
        }

        #[test]
        fn rightmost_interests_are_rejected() {
            let mut buffer = test_buffer();
            let rightmost = DataRequest::new(Interest::new(stream_prefix())).unwrap();
            let err = buffer.requested(&[rightmost]).unwrap_err();
            assert!(matches!(err, NdnRtcError::BadRequestSet(_)));
        }

        #[test]
        fn reexpressed_segment_counts_as_rtx() {
            let mut buffer = test_buffer();
            let packet = frame_packet(3000, 100);
            let (requests, _, _) = publish_frame(1, &packet, 1000, 1.0);

            let ev = buffer.requested(&requests).unwrap();
            buffer.requested(&requests[..1]).unwrap();
            let rtx = buffer.with_slot(&ev.slot_name, |s| s.rtx_num()).unwrap();
            assert_eq!(rtx, 1);
        }
    }

    mod received {
        use super::*;

        #[test]
        fn assembles_all_data_segments_to_ready() {
            let mut buffer = test_buffer();
            let packet = frame_packet(5000, 200);
            let (requests, data_segments, _) = publish_frame(7, &packet, 1000, 1.0);
            let ev = buffer.requested(&requests).unwrap();

            let n = data_segments.len();
            for (i, seg) in data_segments.into_iter().enumerate() {
                let receipt = buffer.received(seg).unwrap();
                if i + 1 < n {
                    assert_eq!(receipt.new_state, SlotState::Assembling);
                    assert!(!receipt.became_ready);
                } else {
                    assert_eq!(receipt.new_state, SlotState::Ready);
                    assert!(receipt.became_ready);
                }
            }

            let (wire, recovered) = buffer
                .with_slot(&ev.slot_name, |s| s.assembled_frame())
                .unwrap()
                .unwrap();
            assert!(!recovered);
            let decoded = VideoFramePacket::from_wire(wire).unwrap();
            assert_eq!(decoded, packet, "assembled frame must be byte-identical");
        }

        #[test]
        fn fec_recovers_missing_data_segments() {
            let mut buffer = test_buffer();
            let packet = frame_packet(4200, 300);
            // 5 data segments at 1000-byte budget, parity ratio 0.4 -> 2
            let (requests, data_segments, parity_segments) =
                publish_frame(9, &packet, 1000, 0.4);
            assert_eq!(data_segments.len(), 5);
            assert_eq!(parity_segments.len(), 2);
            let ev = buffer.requested(&requests).unwrap();

            // segments 2 and 3 never arrive; both parity segments do
            for (i, seg) in data_segments.into_iter().enumerate() {
                if i == 2 || i == 3 {
                    continue;
                }
                assert!(!buffer.received(seg).unwrap().became_ready);
            }
            let mut last_receipt = None;
            for seg in parity_segments {
                last_receipt = Some(buffer.received(seg).unwrap());
            }
            assert!(
                last_receipt.unwrap().became_ready,
                "parity substitutes for data in the ready count"
            );

            let (wire, recovered) = buffer
                .with_slot(&ev.slot_name, |s| s.assembled_frame())
                .unwrap()
                .unwrap();
            assert!(recovered, "assembly used parity");
            let decoded = VideoFramePacket::from_wire(wire).unwrap();
            assert_eq!(decoded, packet, "recovered payload must byte-equal input");
        }

        #[test]
        fn unknown_sample_is_an_error() {
            let mut buffer = test_buffer();
            let packet = frame_packet(500, 1);
            let (_, data_segments, _) = publish_frame(55, &packet, 1000, 1.0);
            let err = buffer.received(data_segments[0].clone()).unwrap_err();
            assert!(matches!(err, NdnRtcError::UnknownSegment(_)));
        }

        #[test]
        fn ready_slot_discards_late_segments() {
            let mut buffer = test_buffer();
            let packet = frame_packet(800, 10);
            let (requests, data_segments, parity_segments) =
                publish_frame(3, &packet, 1000, 1.0);
            buffer.requested(&requests).unwrap();
            for seg in data_segments {
                buffer.received(seg).unwrap();
            }
            let receipt = buffer.received(parity_segments[0].clone()).unwrap();
            assert!(receipt.discarded, "late parity after Ready is dropped");
            assert_eq!(receipt.new_state, SlotState::Ready);
        }

        #[test]
        fn first_segment_learns_header_and_geometry() {
            let mut buffer = test_buffer();
            let packet = frame_packet(2500, 4242);
            let (requests, data_segments, _) = publish_frame(3, &packet, 1000, 1.0);
            let ev = buffer.requested(&requests).unwrap();
            buffer.received(data_segments[0].clone()).unwrap();

            buffer
                .with_slot(&ev.slot_name, |slot| {
                    assert_eq!(slot.data_segments_num(), Some(3));
                    assert_eq!(slot.parity_segments_num(), Some(3));
                    assert_eq!(slot.playback_number(), Some(3));
                    let header = slot.common_header().expect("segment 0 carries the header");
                    assert_eq!(header.publish_timestamp_ms, 4242);
                })
                .unwrap();
        }
    }

    mod lifecycle {
        use super::*;

        #[test]
        fn locked_slots_survive_release_but_not_reset() {
            let mut buffer = test_buffer();
            let packet = frame_packet(700, 5);
            let (requests, data_segments, _) = publish_frame(2, &packet, 1000, 1.0);
            let ev = buffer.requested(&requests).unwrap();
            for seg in data_segments {
                buffer.received(seg).unwrap();
            }

            buffer.with_slot(&ev.slot_name, |s| s.toggle_lock());
            assert_eq!(buffer.slot_state(&ev.slot_name), Some(SlotState::Locked));
            assert!(!buffer.release_slot(&ev.slot_name), "locked slot not released");

            let pool_before = buffer.pool().size();
            buffer.reset();
            assert_eq!(buffer.pool().size(), pool_before + 1);
        }

        #[test]
        fn pool_recycles_cleared_slots() {
            let mut pool = SlotPool::new(2);
            assert_eq!(pool.size(), 2);
            let slot = pool.pop().unwrap();
            assert_eq!(pool.size(), 1);
            assert!(pool.push(slot));
            assert_eq!(pool.size(), 2);
        }
    }

    mod verification {
        use super::*;
        use crate::packets::SegmentsManifest;

        #[test]
        fn manifest_verifies_clean_segments_and_flags_tampered() {
            let mut buffer = test_buffer();
            let packet = frame_packet(2000, 50);
            let (requests, data_segments, _) = publish_frame(4, &packet, 1000, 1.0);
            let ev = buffer.requested(&requests).unwrap();

            let datas: Vec<&Data> = data_segments.iter().map(|s| &s.data).collect();
            let manifest = SegmentsManifest::pack(
                ev.slot_name.clone().append_str(NameComponents::MANIFEST),
                &datas,
            );

            for seg in data_segments.clone() {
                buffer.received(seg).unwrap();
            }

            buffer
                .with_slot(&ev.slot_name, |slot| {
                    slot.set_manifest(manifest.content.clone(), true);
                    assert_eq!(
                        slot.verify_against_manifest(),
                        VerificationStatus::Verified
                    );
                })
                .unwrap();

            // tampered segment: re-assemble a fresh slot where segment 1 was
            // corrupted in flight
            let mut buffer2 = test_buffer();
            let (requests2, mut segs2, _) = publish_frame(4, &packet, 1000, 1.0);
            let ev2 = buffer2.requested(&requests2).unwrap();
            let mut corrupted = segs2[1].data.content.to_vec();
            let flip_at = corrupted.len() - 1;
            corrupted[flip_at] ^= 0xFF;
            segs2[1].data.set_content(corrupted);
            for seg in segs2 {
                buffer2.received(seg).unwrap();
            }
            buffer2
                .with_slot(&ev2.slot_name, |slot| {
                    slot.set_manifest(manifest.content.clone(), true);
                    assert_eq!(slot.verify_against_manifest(), VerificationStatus::Failed);
                })
                .unwrap();
        }

        #[test]
        fn untrusted_manifest_fails_the_slot() {
            let mut slot = BufferSlot::new();
            slot.set_manifest(Bytes::from(vec![0u8; 32]), false);
            assert_eq!(slot.verify_against_manifest(), VerificationStatus::Failed);
        }
    }
}
