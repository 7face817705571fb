//! Estimates how many data and parity segments the next sample will need.
//!
//! Seeded from `_live` metadata at startup, then refined from the geometry
//! carried in arriving video segment headers. The pipeliner sizes its
//! Interest batches from these estimates.

use crate::estimators::{Average, Window};
use crate::namespace::{SampleClass, SegmentClass};
use crate::packets::LiveMeta;
use crate::protocol::{DEFAULT_DATA_OUTSTANDING, DEFAULT_PARITY_OUTSTANDING};
use crate::stats::{Indicator, StatisticsStorage};

pub struct SampleEstimator {
    delta_data: Average,
    delta_parity: Average,
    key_data: Average,
    key_parity: Average,
    stats: StatisticsStorage,
}

impl SampleEstimator {
    pub fn new(stats: StatisticsStorage) -> Self {
        SampleEstimator {
            delta_data: Average::new(Window::samples(30)),
            delta_parity: Average::new(Window::samples(30)),
            // key frames are rare; a couple of observations is all we get
            key_data: Average::new(Window::samples(2)),
            key_parity: Average::new(Window::samples(2)),
            stats,
        }
    }

    /// Seeds the estimators from `_live` metadata.
    pub fn bootstrap(&mut self, live: &LiveMeta) {
        if live.segnum_delta > 0 {
            self.delta_data.new_value(live.segnum_delta as f64);
            self.delta_parity.new_value(live.segnum_delta_parity as f64);
        }
        if live.segnum_key > 0 {
            self.key_data.new_value(live.segnum_key as f64);
            self.key_parity.new_value(live.segnum_key_parity as f64);
        }
        self.publish_stats();
    }

    /// Learns the actual geometry from an arrived segment header.
    pub fn segment_arrived(
        &mut self,
        sample_class: SampleClass,
        total_segments: usize,
        parity_segments: usize,
    ) {
        let (data_avg, parity_avg) = match sample_class {
            SampleClass::Key => (&mut self.key_data, &mut self.key_parity),
            _ => (&mut self.delta_data, &mut self.delta_parity),
        };
        data_avg.new_value(total_segments as f64);
        parity_avg.new_value(parity_segments as f64);
        self.publish_stats();
    }

    /// Expected number of segments for the next sample of the class.
    pub fn segments_num(&self, sample_class: SampleClass, segment_class: SegmentClass) -> usize {
        let avg = match (sample_class, segment_class) {
            (SampleClass::Key, SegmentClass::Parity) => &self.key_parity,
            (SampleClass::Key, _) => &self.key_data,
            (_, SegmentClass::Parity) => &self.delta_parity,
            (_, _) => &self.delta_data,
        };
        if avg.count() == 0 {
            return match segment_class {
                SegmentClass::Parity => DEFAULT_PARITY_OUTSTANDING,
                _ => DEFAULT_DATA_OUTSTANDING,
            };
        }
        (avg.value().ceil() as usize).max(1)
    }

    pub fn reset(&mut self) {
        self.delta_data = Average::new(Window::samples(30));
        self.delta_parity = Average::new(Window::samples(30));
        self.key_data = Average::new(Window::samples(2));
        self.key_parity = Average::new(Window::samples(2));
    }

    fn publish_stats(&self) {
        self.stats
            .set(Indicator::SegmentsDeltaAvgNum, self.delta_data.value());
        self.stats
            .set(Indicator::SegmentsDeltaParityAvgNum, self.delta_parity.value());
        self.stats
            .set(Indicator::SegmentsKeyAvgNum, self.key_data.value());
        self.stats
            .set(Indicator::SegmentsKeyParityAvgNum, self.key_parity.value());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn estimator() -> SampleEstimator {
        SampleEstimator::new(StatisticsStorage::consumer())
    }

    #[test]
    fn defaults_apply_before_any_observation() {
        let e = estimator();
        assert_eq!(
            e.segments_num(SampleClass::Delta, SegmentClass::Data),
            DEFAULT_DATA_OUTSTANDING
        );
        assert_eq!(
            e.segments_num(SampleClass::Delta, SegmentClass::Parity),
            DEFAULT_PARITY_OUTSTANDING
        );
    }

    #[test]
    fn live_meta_seeds_the_estimates() {
        let mut e = estimator();
        e.bootstrap(&LiveMeta {
            timestamp: None,
            framerate: 30.,
            segnum_estimate: 4,
            framesize_estimate: 28_000,
            segnum_delta: 4,
            segnum_delta_parity: 1,
            segnum_key: 12,
            segnum_key_parity: 3,
        });
        assert_eq!(e.segments_num(SampleClass::Delta, SegmentClass::Data), 4);
        assert_eq!(e.segments_num(SampleClass::Key, SegmentClass::Data), 12);
        assert_eq!(e.segments_num(SampleClass::Key, SegmentClass::Parity), 3);
    }

    #[test]
    fn observed_geometry_refines_the_estimate() {
        let mut e = estimator();
        for _ in 0..5 {
            e.segment_arrived(SampleClass::Delta, 6, 2);
        }
        assert_eq!(e.segments_num(SampleClass::Delta, SegmentClass::Data), 6);
        assert_eq!(e.segments_num(SampleClass::Delta, SegmentClass::Parity), 2);
        // key estimates are untouched by delta traffic
        assert_eq!(
            e.segments_num(SampleClass::Key, SegmentClass::Data),
            DEFAULT_DATA_OUTSTANDING
        );
    }

    #[test]
    fn estimate_rounds_up_and_never_hits_zero() {
        let mut e = estimator();
        e.segment_arrived(SampleClass::Delta, 2, 1);
        e.segment_arrived(SampleClass::Delta, 3, 0);
        // avg 2.5 -> 3
        assert_eq!(e.segments_num(SampleClass::Delta, SegmentClass::Data), 3);
        // parity avg 0.5 -> 1
        assert_eq!(e.segments_num(SampleClass::Delta, SegmentClass::Parity), 1);
    }
}
