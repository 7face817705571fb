//! Producer-side stream publisher.
//!
//! Publishes each encoded frame as a generalized object: data segments
//! (digest-signed), Reed-Solomon parity segments, a signed `_manifest`, and
//! a signed frame `_meta`; key frames additionally refresh the GOP
//! pointers. `_latest` and `_live` packets are generated on demand when the
//! content cache sees Interests for them. The consumer's wire expectations
//! are defined by what this module emits.

use bytes::{Bytes, BytesMut};
use prost::Message;

use crate::clock;
use crate::config::{Freshness, PublisherConfig};
use crate::error::NdnRtcResult;
use crate::estimators::{Filter, FreqMeter, Window};
use crate::fec::{self, Rs28Encoder};
use crate::name::{Component, Name};
use crate::namespace::{NameComponents, StreamType};
use crate::packets::{
    payload_length, slice_payload, CommonHeader, ContentMetaInfo, DataSegmentHeader,
    DelegationSet, FrameMeta, FrameType, LiveMeta, SegmentsManifest, StreamMeta, Timestamp,
    VideoFrameHeader, VideoFramePacket, VideoFrameSegmentHeader,
};
use crate::protocol;
use crate::stats::{Indicator, StatisticsStorage};
use crate::transport::Data;

/// Signing capability for packets that carry a real signature (manifests,
/// metadata, pointers). Key management and trust policy are the caller's.
pub trait Signer: Send + Sync {
    fn sign(&self, data: &mut Data);
}

/// Integrity-only placeholder signature. Segments ride on the signed
/// manifest, so their own signature is a zeroed digest.
pub struct DigestSigner;

impl Signer for DigestSigner {
    fn sign(&self, data: &mut Data) {
        data.signature_value = Bytes::from_static(&[0u8; 32]);
    }
}

/// A pending-Interest observation from the content cache: used to echo the
/// consumer's nonce and report generation delay.
#[derive(Debug, Clone, Copy)]
pub struct PitEntry {
    pub nonce: u32,
    pub arrival_ms: f64,
}

/// One encoded frame handed in by the encoder.
pub struct EncodedFrame<'a> {
    pub frame_type: FrameType,
    pub width: u32,
    pub height: u32,
    pub codec_timestamp: u32,
    pub capture_time_ms: i64,
    pub data: &'a [u8],
}

/// Producer-observed live parameters behind the `_live` packet.
struct LiveMetadata {
    rate_meter: FreqMeter,
    frame_size_filter: Filter,
}

impl LiveMetadata {
    fn new() -> Self {
        LiveMetadata {
            rate_meter: FreqMeter::new(Window::time(1000)),
            frame_size_filter: Filter::with_variation(15. / 16., 15. / 16.),
        }
    }

    fn update(&mut self, frame_size_bytes: usize) {
        self.rate_meter.tick();
        self.frame_size_filter.new_value(frame_size_bytes as f64);
    }

    fn rate(&self) -> f64 {
        self.rate_meter.value()
    }

    /// Conservative frame-size estimate: mean plus four variations.
    fn frame_size_estimate(&self) -> f64 {
        (self.frame_size_filter.value() + 4. * self.frame_size_filter.variation()).ceil()
    }
}

/// Publisher for one video stream.
pub struct VideoStream {
    stream_prefix: Name,
    config: PublisherConfig,
    freshness: Freshness,
    signer: Box<dyn Signer>,
    live_metadata: LiveMetadata,

    frame_seq: u64,
    gop_pos: u64,
    gop_seq: u64,
    last_frame_prefix: Name,
    last_gop_prefix: Name,
    last_publish_epoch_ms: i64,

    meta_packet: Data,
    meta_published: bool,
    stats: StatisticsStorage,
}

impl VideoStream {
    pub fn new(
        base_prefix: &Name,
        stream_name: &str,
        config: PublisherConfig,
        signer: Box<dyn Signer>,
    ) -> Self {
        let stream_prefix = NameComponents::video_stream_prefix(base_prefix, stream_name);
        let freshness = Freshness::from_publisher(&config);
        let stats = StatisticsStorage::producer();

        let meta = StreamMeta {
            width: config.width,
            height: config.height,
            bitrate: config.bitrate,
            gop_size: config.gop_size,
            description: config.description.clone(),
        };
        let mut meta_packet =
            Data::new(stream_prefix.clone().append_str(NameComponents::META));
        meta_packet.meta_info.freshness_ms = freshness.meta as u64;
        meta_packet.set_content(meta.encode_to_vec());
        signer.sign(&mut meta_packet);

        VideoStream {
            last_frame_prefix: stream_prefix.clone().append_sequence_number(u64::MAX),
            stream_prefix,
            config,
            freshness,
            signer,
            live_metadata: LiveMetadata::new(),
            frame_seq: 0,
            gop_pos: 0,
            gop_seq: 0,
            last_gop_prefix: Name::new(),
            last_publish_epoch_ms: 0,
            meta_packet,
            meta_published: false,
            stats,
        }
    }

    pub fn stream_prefix(&self) -> &Name {
        &self.stream_prefix
    }

    pub fn seq_no(&self) -> u64 {
        self.frame_seq.saturating_sub(1)
    }

    pub fn gop_no(&self) -> u64 {
        self.gop_seq
    }

    pub fn stats(&self) -> &StatisticsStorage {
        &self.stats
    }

    /// Publishes one encoded frame. Returns every Data packet to be placed
    /// into the content cache; `pit_lookup` reports pending Interests so
    /// segment headers can echo nonces and generation delays.
    pub fn process_frame(
        &mut self,
        frame: &EncodedFrame<'_>,
        mut pit_lookup: impl FnMut(&Name) -> Option<PitEntry>,
    ) -> NdnRtcResult<Vec<Data>> {
        let now_epoch_ms = clock::millis_since_epoch();
        self.last_publish_epoch_ms = now_epoch_ms;
        let mut packets = vec![];

        if !self.meta_published {
            packets.push(self.meta_packet.clone());
            self.meta_published = true;
        }

        if frame.frame_type == FrameType::Key && self.frame_seq != 0 {
            self.gop_seq += 1;
            self.gop_pos = 0;
        }

        let frame_prefix = self
            .stream_prefix
            .clone()
            .append_sequence_number(self.frame_seq);
        let sample_freshness = if frame.frame_type == FrameType::Key {
            self.freshness.key_sample
        } else {
            self.freshness.sample
        } as u64;

        // frame packet wire form
        let packet = VideoFramePacket {
            common: CommonHeader {
                sample_rate: self.live_metadata.rate(),
                publish_timestamp_ms: clock::millis(),
                publish_unix_timestamp_ms: now_epoch_ms as f64,
            },
            header: VideoFrameHeader {
                encoded_width: frame.width,
                encoded_height: frame.height,
                timestamp: frame.codec_timestamp,
                capture_time_ms: frame.capture_time_ms,
                frame_type: frame.frame_type,
                complete_frame: true,
            },
            sync_list: Default::default(),
            payload: Bytes::copy_from_slice(frame.data),
        };
        let wire = packet.to_wire();

        let payload_len = payload_length(self.config.segment_size, StreamType::Video);
        let slices = slice_payload(&wire, payload_len);
        let n_data = slices.len();
        let n_parity = if self.config.use_fec {
            fec::parity_segments_num(n_data, protocol::PARITY_RATIO)
        } else {
            0
        };

        let parity_slices = if n_parity > 0 {
            Rs28Encoder::new(n_data, n_parity, payload_len)?.encode(&wire)?
        } else {
            vec![]
        };

        let data_final_block = Component::from_segment(n_data.saturating_sub(1) as u64);
        let parity_final_block = Component::from_segment(n_parity.saturating_sub(1) as u64);

        let mut frame_packets = vec![];
        let mut max_generation_delay = 0u64;

        for (seg, slice) in slices.iter().enumerate() {
            let name = frame_prefix.clone().append_segment(seg as u64);
            let header = self.segment_header(
                &name,
                n_data,
                n_parity,
                &mut pit_lookup,
                now_epoch_ms,
                &mut max_generation_delay,
            );
            let mut d = Data::new(name);
            d.meta_info.freshness_ms = sample_freshness;
            d.meta_info.final_block_id = Some(data_final_block.clone());
            let mut content = BytesMut::new();
            header.encode_into(&mut content);
            content.extend_from_slice(slice);
            d.set_content(content.freeze());
            DigestSigner.sign(&mut d);
            self.stats
                .add(Indicator::BytesPublished, d.content.len() as f64);
            self.count_published(&d);
            frame_packets.push(d);
        }

        for (seg, slice) in parity_slices.iter().enumerate() {
            let name = frame_prefix
                .clone()
                .append_str(NameComponents::PARITY)
                .append_segment(seg as u64);
            let header = self.segment_header(
                &name,
                n_data,
                n_parity,
                &mut pit_lookup,
                now_epoch_ms,
                &mut max_generation_delay,
            );
            let mut d = Data::new(name);
            d.meta_info.freshness_ms = sample_freshness;
            d.meta_info.final_block_id = Some(parity_final_block.clone());
            let mut content = BytesMut::new();
            header.encode_into(&mut content);
            content.extend_from_slice(slice);
            d.set_content(content.freeze());
            DigestSigner.sign(&mut d);
            self.stats
                .add(Indicator::FecBytesPublished, d.content.len() as f64);
            self.stats.inc(Indicator::FecPublishedSegmentsNum);
            self.count_published(&d);
            frame_packets.push(d);
        }

        log::trace!(
            "[VideoStream] generated {} segments ({} data {} parity) for {}",
            frame_packets.len(),
            n_data,
            n_parity,
            frame_prefix
        );

        // signed manifest over all segments, data then parity
        let refs: Vec<&Data> = frame_packets.iter().collect();
        let mut manifest = SegmentsManifest::pack(
            frame_prefix.clone().append_str(NameComponents::MANIFEST),
            &refs,
        );
        manifest.meta_info.freshness_ms = sample_freshness;
        self.signer.sign(&mut manifest);
        self.count_published(&manifest);
        packets.extend(frame_packets);
        packets.push(manifest);

        packets.push(self.frame_meta(
            &frame_prefix,
            frame.frame_type,
            n_data,
            n_parity,
            sample_freshness,
            now_epoch_ms,
            max_generation_delay,
        ));

        if frame.frame_type == FrameType::Key {
            self.publish_gop_pointers(&frame_prefix, &mut packets);
        }

        self.live_metadata.update(frame.data.len());
        self.stats
            .set(Indicator::CurrentProducerFramerate, self.live_metadata.rate());
        self.stats.inc(Indicator::PublishedNum);
        self.stats.inc(Indicator::ProcessedNum);
        if frame.frame_type == FrameType::Key {
            self.stats.inc(Indicator::PublishedKeyNum);
        }
        self.stats.set(
            Indicator::FrameSizeEstimate,
            self.live_metadata.frame_size_estimate(),
        );

        self.gop_pos = (self.gop_pos + 1) % self.config.gop_size.max(1) as u64;
        self.frame_seq += 1;
        self.last_frame_prefix = frame_prefix;

        log::debug!("[VideoStream] published frame {}", self.last_frame_prefix);
        Ok(packets)
    }

    fn segment_header(
        &self,
        name: &Name,
        n_data: usize,
        n_parity: usize,
        pit_lookup: &mut impl FnMut(&Name) -> Option<PitEntry>,
        now_epoch_ms: i64,
        max_generation_delay: &mut u64,
    ) -> VideoFrameSegmentHeader {
        let pit = pit_lookup(name);
        if let Some(p) = pit {
            let delay = (now_epoch_ms as f64 - p.arrival_ms).max(0.);
            *max_generation_delay = (*max_generation_delay).max(delay as u64);
            log::trace!("[VideoStream] PIT hit for {}", name);
        }
        VideoFrameSegmentHeader {
            common: DataSegmentHeader {
                interest_nonce: pit.map(|p| p.nonce).unwrap_or(0),
                interest_arrival_ms: pit.map(|p| p.arrival_ms).unwrap_or(0.),
                generation_delay_ms: pit
                    .map(|p| (now_epoch_ms as f64 - p.arrival_ms).max(0.))
                    .unwrap_or(0.),
            },
            total_segments_num: n_data as i32,
            playback_no: self.frame_seq as i32,
            // the first frame of the current GOP: where coherent delta
            // fetching starts
            paired_sequence_no: (self.frame_seq - self.gop_pos) as i32,
            parity_segments_num: n_parity as i32,
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn frame_meta(
        &self,
        frame_prefix: &Name,
        frame_type: FrameType,
        n_data: usize,
        n_parity: usize,
        freshness_ms: u64,
        now_epoch_ms: i64,
        generation_delay_ms: u64,
    ) -> Data {
        let capture_ns = clock::nanos();
        let meta = FrameMeta {
            capture_timestamp: Some(Timestamp {
                seconds: capture_ns / 1_000_000_000,
                nanos: (capture_ns % 1_000_000_000) as i32,
            }),
            dataseg_num: n_data as u64,
            parity_size: n_parity as u64,
            gop_number: self.gop_seq,
            gop_position: self.gop_pos,
            r#type: frame_type as i32,
            generation_delay_ms,
        };
        let envelope = ContentMetaInfo {
            content_type: protocol::FRAME_CONTENT_TYPE.to_string(),
            timestamp: now_epoch_ms as u64,
            has_segments: true,
            other: Bytes::from(meta.encode_to_vec()),
        };

        let mut d = Data::new(frame_prefix.clone().append_str(NameComponents::META));
        d.meta_info.freshness_ms = freshness_ms;
        d.set_content(envelope.encode());
        self.signer.sign(&mut d);
        self.count_published(&d);
        d
    }

    /// On every key frame: close the previous GOP with an `_gop_end`
    /// pointer and open the new one with `_gop_start`.
    fn publish_gop_pointers(&mut self, frame_prefix: &Name, packets: &mut Vec<Data>) {
        let gop_prefix = self.stream_prefix.clone().append_str(NameComponents::GOP);

        if self.gop_seq > 0 {
            let mut set = DelegationSet::new();
            set.add(0, self.last_frame_prefix.clone());
            let mut d = Data::new(
                gop_prefix
                    .clone()
                    .append_sequence_number(self.gop_seq - 1)
                    .append_str(NameComponents::GOP_END),
            );
            d.meta_info.freshness_ms = self.freshness.gop as u64;
            d.set_content(set.encode());
            self.signer.sign(&mut d);
            log::debug!("[VideoStream] end gop {}", d.name);
            self.count_published(&d);
            packets.push(d);
        }

        let mut set = DelegationSet::new();
        set.add(0, frame_prefix.clone());
        let mut d = Data::new(
            gop_prefix
                .clone()
                .append_sequence_number(self.gop_seq)
                .append_str(NameComponents::GOP_START),
        );
        d.meta_info.freshness_ms = self.freshness.gop as u64;
        d.set_content(set.encode());
        self.signer.sign(&mut d);
        log::debug!("[VideoStream] start gop {}", d.name);
        self.count_published(&d);
        packets.push(d);

        self.last_gop_prefix = gop_prefix.append_sequence_number(self.gop_seq);
    }

    /// `_latest` pointer: the last published frame and the current GOP.
    pub fn generate_latest(&mut self) -> Data {
        let mut set = DelegationSet::new();
        set.add(0, self.last_frame_prefix.clone());
        set.add(1, self.last_gop_prefix.clone());

        let mut d = Data::new(
            self.stream_prefix
                .clone()
                .append_str(NameComponents::LATEST)
                .append_version(self.last_publish_epoch_ms.max(0) as u64),
        );
        d.meta_info.freshness_ms = self.freshness.latest as u64;
        d.set_content(set.encode());
        self.signer.sign(&mut d);
        self.stats.inc(Indicator::RdrPointerNum);
        self.count_published(&d);
        d
    }

    /// `_live` metadata: rate, segment-count and frame-size estimates.
    pub fn generate_live(&mut self) -> Data {
        let frame_estimate = self.live_metadata.frame_size_estimate();
        let payload_len = payload_length(self.config.segment_size, StreamType::Video) as f64;
        let segnum = if payload_len > 0. {
            (frame_estimate / payload_len).ceil() as u64
        } else {
            0
        };
        let segnum_parity = (segnum as f64 * protocol::PARITY_RATIO).ceil() as u64;

        let now_ns = clock::nanos();
        let live = LiveMeta {
            timestamp: Some(Timestamp {
                seconds: now_ns / 1_000_000_000,
                nanos: (now_ns % 1_000_000_000) as i32,
            }),
            framerate: self.live_metadata.rate(),
            segnum_estimate: segnum,
            framesize_estimate: frame_estimate as u64,
            segnum_delta: segnum.max(1),
            segnum_delta_parity: segnum_parity.max(1),
            segnum_key: segnum.max(1),
            segnum_key_parity: segnum_parity.max(1),
        };

        let mut d = Data::new(
            self.stream_prefix
                .clone()
                .append_str(NameComponents::LIVE)
                .append_version(self.last_publish_epoch_ms.max(0) as u64),
        );
        d.meta_info.freshness_ms = self.freshness.live as u64;
        d.set_content(live.encode_to_vec());
        self.signer.sign(&mut d);
        self.count_published(&d);
        d
    }

    /// The stream `_meta` packet (published once, served on request).
    pub fn stream_meta_packet(&self) -> Data {
        self.meta_packet.clone()
    }

    fn count_published(&self, d: &Data) {
        self.stats
            .add(Indicator::RawBytesPublished, d.encode().len() as f64);
        self.stats.inc(Indicator::PublishedSegmentsNum);
        self.stats.inc(Indicator::SignNum);
    }
}
