//! The pipeliner builds Interest batches toward samples.
//!
//! Each batch covers one sample: its `_meta` and `_manifest`, the expected
//! data segments, and (with FEC) the expected parity segments, sized by the
//! [`SampleEstimator`]. The rightmost Interest is the special case used to
//! discover the producer's current sequence number: a single MustBeFresh
//! Interest under the stream prefix with no segment component.

use std::sync::Arc;

use crate::error::NdnRtcResult;
use crate::name::Name;
use crate::namespace::{NameComponents, SampleClass, SegmentClass};
use crate::request::{DataRequest, PacketNumber};
use crate::sample_estimator::SampleEstimator;
use crate::stats::{Indicator, StatisticsStorage};
use crate::transport::Interest;

/// Per-class sequence counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SequenceCounter {
    pub delta: PacketNumber,
    pub key: PacketNumber,
}

impl SequenceCounter {
    pub fn get(&self, class: SampleClass) -> PacketNumber {
        match class {
            SampleClass::Key => self.key,
            _ => self.delta,
        }
    }

    pub fn set(&mut self, class: SampleClass, seq: PacketNumber) {
        match class {
            SampleClass::Key => self.key = seq,
            _ => self.delta = seq,
        }
    }
}

/// Maps a sample class onto concrete names under the thread prefix.
pub trait NameScheme: Send {
    /// Prefix all segments of a `class` sample share (without the sequence
    /// number).
    fn sample_prefix(&self, thread_prefix: &Name, class: SampleClass) -> Name;

    /// Rightmost Interest for discovering the live sequence number.
    fn rightmost_interest(
        &self,
        thread_prefix: &Name,
        class: SampleClass,
        lifetime_ms: u64,
    ) -> Interest;
}

/// Video naming. Generalized-object streams put sequence numbers directly
/// under the thread prefix; threaded streams scope them by a `d`/`k` class
/// component.
pub struct VideoNameScheme {
    pub threaded: bool,
}

impl NameScheme for VideoNameScheme {
    fn sample_prefix(&self, thread_prefix: &Name, class: SampleClass) -> Name {
        if self.threaded {
            let token = if class == SampleClass::Key {
                NameComponents::KEY
            } else {
                NameComponents::DELTA
            };
            thread_prefix.clone().append_str(token)
        } else {
            thread_prefix.clone()
        }
    }

    fn rightmost_interest(
        &self,
        thread_prefix: &Name,
        class: SampleClass,
        lifetime_ms: u64,
    ) -> Interest {
        Interest::new(self.sample_prefix(thread_prefix, class))
            .with_lifetime(lifetime_ms)
            .with_must_be_fresh(true)
            .with_can_be_prefix(true)
    }
}

/// Audio naming: a single delta namespace.
pub struct AudioNameScheme;

impl NameScheme for AudioNameScheme {
    fn sample_prefix(&self, thread_prefix: &Name, _class: SampleClass) -> Name {
        thread_prefix.clone()
    }

    fn rightmost_interest(
        &self,
        thread_prefix: &Name,
        _class: SampleClass,
        lifetime_ms: u64,
    ) -> Interest {
        Interest::new(thread_prefix.clone())
            .with_lifetime(lifetime_ms)
            .with_must_be_fresh(true)
            .with_can_be_prefix(true)
    }
}

/// A built batch, ready for the request queue (and, unless rightmost, the
/// buffer).
pub struct PipelinerBatch {
    pub requests: Vec<Arc<DataRequest>>,
    pub sample_class: SampleClass,
    pub is_rightmost: bool,
}

pub struct Pipeliner {
    name_scheme: Box<dyn NameScheme>,
    interest_lifetime_ms: u64,
    use_fec: bool,
    step: i32,
    seq_counter: SequenceCounter,
    next_sample_priority: SampleClass,
    /// `None` means no sample was requested yet: the next express issues a
    /// rightmost Interest.
    last_requested: Option<SampleClass>,
    stats: StatisticsStorage,
}

impl Pipeliner {
    pub fn new(
        name_scheme: Box<dyn NameScheme>,
        interest_lifetime_ms: u64,
        use_fec: bool,
        step: i32,
        stats: StatisticsStorage,
    ) -> Self {
        Pipeliner {
            name_scheme,
            interest_lifetime_ms,
            use_fec,
            step,
            seq_counter: SequenceCounter::default(),
            next_sample_priority: SampleClass::Delta,
            last_requested: None,
            stats,
        }
    }

    pub fn set_interest_lifetime(&mut self, lifetime_ms: u64) {
        self.interest_lifetime_ms = lifetime_ms;
    }

    /// Prioritizes `class` for the next batch.
    pub fn set_need_sample(&mut self, class: SampleClass) {
        self.next_sample_priority = class;
    }

    /// Forces a rightmost Interest on the next express.
    pub fn set_need_rightmost(&mut self) {
        self.last_requested = None;
    }

    pub fn set_sequence_number(&mut self, seq: PacketNumber, class: SampleClass) {
        self.seq_counter.set(class, seq);
    }

    pub fn sequence_number(&self, class: SampleClass) -> PacketNumber {
        self.seq_counter.get(class)
    }

    pub fn sequence_counter(&self) -> SequenceCounter {
        self.seq_counter
    }

    pub fn reset(&mut self) {
        self.seq_counter = SequenceCounter::default();
        self.next_sample_priority = SampleClass::Delta;
        self.last_requested = None;
        log::debug!("[Pipeliner] reset");
    }

    /// Expresses toward the current target: a batch for the next sample of
    /// the current priority class, or a rightmost Interest when no sample
    /// has been requested yet.
    pub fn express(
        &mut self,
        thread_prefix: &Name,
        estimator: &SampleEstimator,
    ) -> NdnRtcResult<PipelinerBatch> {
        if self.last_requested.is_none() {
            let interest = self.name_scheme.rightmost_interest(
                thread_prefix,
                self.next_sample_priority,
                self.interest_lifetime_ms,
            );
            log::debug!("[Pipeliner] rightmost interest {}", interest.name);
            let request = DataRequest::new(interest)?;
            return Ok(PipelinerBatch {
                requests: vec![request],
                sample_class: self.next_sample_priority,
                is_rightmost: true,
            });
        }
        self.next_batch(thread_prefix, estimator)
    }

    /// Builds the batch for the next sample of the priority class and
    /// advances the class's sequence counter. The priority reverts to Delta
    /// afterwards.
    pub fn next_batch(
        &mut self,
        thread_prefix: &Name,
        estimator: &SampleEstimator,
    ) -> NdnRtcResult<PipelinerBatch> {
        let class = self.next_sample_priority;
        let seq = self.seq_counter.get(class);
        let batch = self.batch_for(thread_prefix, class, seq, estimator)?;

        self.seq_counter
            .set(class, seq.wrapping_add(self.step.unsigned_abs() as u64));
        self.last_requested = Some(class);
        self.next_sample_priority = SampleClass::Delta;

        self.stats.inc(Indicator::RequestedNum);
        if class == SampleClass::Key {
            self.stats.inc(Indicator::RequestedKeyNum);
        }
        Ok(batch)
    }

    /// Builds the request set for one specific sample without touching the
    /// counters (used for re-expression).
    pub fn batch_for(
        &self,
        thread_prefix: &Name,
        class: SampleClass,
        seq: PacketNumber,
        estimator: &SampleEstimator,
    ) -> NdnRtcResult<PipelinerBatch> {
        let frame_prefix = self
            .name_scheme
            .sample_prefix(thread_prefix, class)
            .append_sequence_number(seq);

        let n_data = estimator.segments_num(class, SegmentClass::Data);
        let n_parity = if self.use_fec {
            estimator.segments_num(class, SegmentClass::Parity)
        } else {
            0
        };

        let mut requests = Vec::with_capacity(n_data + n_parity + 2);

        let meta = Interest::new(frame_prefix.clone().append_str(NameComponents::META))
            .with_lifetime(self.interest_lifetime_ms);
        requests.push(DataRequest::new(meta)?);

        let manifest = Interest::new(frame_prefix.clone().append_str(NameComponents::MANIFEST))
            .with_lifetime(self.interest_lifetime_ms);
        requests.push(DataRequest::new(manifest)?);

        for seg in 0..n_data {
            let interest = Interest::new(frame_prefix.clone().append_segment(seg as u64))
                .with_lifetime(self.interest_lifetime_ms);
            requests.push(DataRequest::new(interest)?);
        }
        for seg in 0..n_parity {
            let interest = Interest::new(
                frame_prefix
                    .clone()
                    .append_str(NameComponents::PARITY)
                    .append_segment(seg as u64),
            )
            .with_lifetime(self.interest_lifetime_ms);
            requests.push(DataRequest::new(interest)?);
        }

        log::trace!(
            "[Pipeliner] batch for {} ({} data, {} parity)",
            frame_prefix,
            n_data,
            n_parity
        );

        Ok(PipelinerBatch {
            requests,
            sample_class: class,
            is_rightmost: false,
        })
    }
}
