//! Buffer control: the single intake point for arriving segments.
//!
//! Adds each received segment to the frame buffer and feeds its delay
//! sample into the DRD estimator, classifying replies as original or
//! cached by the echoed Interest nonce. The returned [`SegmentArrival`]
//! carries everything downstream dependents need; the consumer routes it
//! outside the buffer lock.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::buffer::{Buffer, BufferReceipt, SlotState};
use crate::drd_estimator::{DrdEstimator, DrdUpdate};
use crate::error::NdnRtcResult;
use crate::packets::WireSegment;
use crate::stats::{Indicator, StatisticsStorage};

/// Routed outcome of one segment arrival.
pub struct SegmentArrival {
    pub receipt: BufferReceipt,
    /// Present when this segment moved a DRD window.
    pub drd_update: Option<DrdUpdate>,
    /// Producer-declared sample rate, when first learned for this sample.
    pub sample_rate: Option<f64>,
    /// Video segment geometry, for the sample estimator.
    pub geometry: Option<(usize, usize)>,
    pub paired_sequence_no: Option<i64>,
}

pub struct BufferControl {
    drd: DrdEstimator,
    stats: StatisticsStorage,
}

impl BufferControl {
    pub fn new(drd: DrdEstimator, stats: StatisticsStorage) -> Self {
        BufferControl { drd, stats }
    }

    pub fn drd(&self) -> &DrdEstimator {
        &self.drd
    }

    pub fn drd_mut(&mut self) -> &mut DrdEstimator {
        &mut self.drd
    }

    /// Adds the segment to the buffer and updates the DRD estimation.
    pub fn segment_arrived(
        &mut self,
        wire: WireSegment,
        buffer: &Arc<Mutex<Buffer>>,
    ) -> NdnRtcResult<SegmentArrival> {
        let geometry = wire
            .header
            .as_video()
            .map(|h| (h.total_segments_num.max(0) as usize, h.parity_segments_num.max(0) as usize));
        let paired_sequence_no = wire.header.as_video().map(|h| h.paired_sequence_no as i64);

        let receipt = buffer.lock().received(wire)?;
        if receipt.discarded {
            return Ok(SegmentArrival {
                receipt,
                drd_update: None,
                sample_rate: None,
                geometry: None,
                paired_sequence_no,
            });
        }

        let drd_update = receipt.drd_usec.and_then(|drd_us| {
            self.drd.new_value(
                drd_us as f64 / 1000.,
                receipt.is_original,
                receipt.generation_delay_ms,
            )
        });
        self.stats
            .set(Indicator::DrdOriginalEstimation, self.drd.original_estimation_ms());
        self.stats
            .set(Indicator::DrdCachedEstimation, self.drd.cached_estimation_ms());

        // the packet-level header becomes readable once segment 0 landed
        let sample_rate = if receipt.old_state == SlotState::New {
            buffer
                .lock()
                .with_slot(&receipt.slot_name, |slot| {
                    slot.common_header().map(|h| h.sample_rate)
                })
                .flatten()
                .filter(|r| *r > 0.)
        } else {
            None
        };

        Ok(SegmentArrival {
            receipt,
            drd_update,
            sample_rate,
            geometry,
            paired_sequence_no,
        })
    }

    pub fn reset(&mut self) {
        self.drd.reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::SlotPool;
    use crate::drd_estimator::DrdKind;
    use crate::name::Name;
    use crate::namespace::NameComponents;
    use crate::packets::{DataSegmentHeader, VideoFrameSegmentHeader};
    use crate::request::DataRequest;
    use crate::transport::{Data, Interest};
    use bytes::BytesMut;

    fn wire_segment(seq: u64, seg: u64, original: bool) -> (Arc<DataRequest>, WireSegment) {
        let name = NameComponents::video_stream_prefix(&Name::from("/p"), "cam")
            .append_sequence_number(seq)
            .append_segment(seg);
        let interest = Interest::new(name.clone());
        let request = DataRequest::new(interest.clone()).unwrap();

        let header = VideoFrameSegmentHeader {
            common: DataSegmentHeader {
                interest_nonce: if original {
                    interest.nonce
                } else {
                    interest.nonce.wrapping_add(1)
                },
                interest_arrival_ms: 0.,
                generation_delay_ms: 4.,
            },
            total_segments_num: 2,
            playback_no: seq as i32,
            paired_sequence_no: (seq as i32) - 3,
            parity_segments_num: 1,
        };
        let mut content = BytesMut::new();
        header.encode_into(&mut content);
        // enough payload to host a packet header on segment 0
        content.extend_from_slice(&[0u8; 64]);
        let mut data = Data::new(name.clone());
        data.set_content(content.freeze());
        let info = NameComponents::extract_info(&name).unwrap();
        (
            request,
            WireSegment::parse(info, data, interest).unwrap(),
        )
    }

    fn harness() -> (BufferControl, Arc<Mutex<Buffer>>) {
        let stats = StatisticsStorage::consumer();
        (
            BufferControl::new(DrdEstimator::new(150, 200), stats.clone()),
            Arc::new(Mutex::new(Buffer::new(SlotPool::new(8), stats))),
        )
    }

    #[test]
    fn original_segments_feed_the_original_window() {
        let (mut bc, buffer) = harness();
        let (request, wire) = wire_segment(1, 0, true);
        buffer.lock().requested(&[request]).unwrap();

        let arrival = bc.segment_arrived(wire, &buffer).unwrap();
        let update = arrival.drd_update.expect("first sample moves the window");
        assert_eq!(update.kind, DrdKind::Original);
        assert_eq!(bc.drd().cached_average().count(), 0, "windows are disjoint");
        assert_eq!(arrival.geometry, Some((2, 1)));
        assert_eq!(arrival.paired_sequence_no, Some(-2));
    }

    #[test]
    fn cached_segments_feed_the_cached_window() {
        let (mut bc, buffer) = harness();
        let (request, wire) = wire_segment(2, 0, false);
        buffer.lock().requested(&[request]).unwrap();

        let arrival = bc.segment_arrived(wire, &buffer).unwrap();
        assert_eq!(arrival.drd_update.unwrap().kind, DrdKind::Cached);
        assert_eq!(bc.drd().original_average().count(), 0);
    }

    #[test]
    fn unknown_segments_propagate_the_error() {
        let (mut bc, buffer) = harness();
        let (_, wire) = wire_segment(3, 0, true);
        assert!(bc.segment_arrived(wire, &buffer).is_err());
    }
}
