//! Application packet model: frame packets, segment headers, slicing and
//! merging, manifests, metadata payloads, and pointer objects.
//!
//! A frame travels as a *generalized object*: the frame packet wire form is
//! cut into fixed-size data segments (plus Reed-Solomon parity segments),
//! each published as one Data packet whose content is
//! `segment header || payload slice`. A signed `_manifest` lists the
//! implicit digests of every segment; `_meta` carries the FrameMeta
//! protobuf wrapped in a content-meta-info envelope.
//!
//! All multi-byte header fields are packed little-endian.

use std::collections::BTreeMap;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use prost::Message;

use crate::error::{NdnRtcError, NdnRtcResult};
use crate::name::Name;
use crate::namespace::{NamespaceInfo, PointerKind, SegmentClass, StreamType};
use crate::tlv;
use crate::transport::{Data, Interest};

// ─────────────────────────────────────────────────────────────────────────────
// Segment headers
// ─────────────────────────────────────────────────────────────────────────────

/// Header prepended to every published segment. The echoed Interest nonce
/// classifies replies as original (hit the producer) vs cached.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct DataSegmentHeader {
    pub interest_nonce: u32,
    pub interest_arrival_ms: f64,
    pub generation_delay_ms: f64,
}

impl DataSegmentHeader {
    pub const WIRE_LEN: usize = 20;

    pub fn encode_into(&self, buf: &mut BytesMut) {
        buf.put_u32_le(self.interest_nonce);
        buf.put_f64_le(self.interest_arrival_ms);
        buf.put_f64_le(self.generation_delay_ms);
    }

    pub fn decode(buf: &mut Bytes) -> NdnRtcResult<Self> {
        if buf.remaining() < Self::WIRE_LEN {
            return Err(NdnRtcError::MalformedPacket("short segment header".into()));
        }
        Ok(DataSegmentHeader {
            interest_nonce: buf.get_u32_le(),
            interest_arrival_ms: buf.get_f64_le(),
            generation_delay_ms: buf.get_f64_le(),
        })
    }
}

/// Segment header for video data and parity segments.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct VideoFrameSegmentHeader {
    pub common: DataSegmentHeader,
    pub total_segments_num: i32,
    pub playback_no: i32,
    pub paired_sequence_no: i32,
    pub parity_segments_num: i32,
}

impl VideoFrameSegmentHeader {
    pub const WIRE_LEN: usize = DataSegmentHeader::WIRE_LEN + 16;

    pub fn encode_into(&self, buf: &mut BytesMut) {
        self.common.encode_into(buf);
        buf.put_i32_le(self.total_segments_num);
        buf.put_i32_le(self.playback_no);
        buf.put_i32_le(self.paired_sequence_no);
        buf.put_i32_le(self.parity_segments_num);
    }

    pub fn decode(buf: &mut Bytes) -> NdnRtcResult<Self> {
        let common = DataSegmentHeader::decode(buf)?;
        if buf.remaining() < 16 {
            return Err(NdnRtcError::MalformedPacket(
                "short video segment header".into(),
            ));
        }
        Ok(VideoFrameSegmentHeader {
            common,
            total_segments_num: buf.get_i32_le(),
            playback_no: buf.get_i32_le(),
            paired_sequence_no: buf.get_i32_le(),
            parity_segments_num: buf.get_i32_le(),
        })
    }
}

/// Parsed segment header of either flavor.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SegmentHeader {
    Common(DataSegmentHeader),
    Video(VideoFrameSegmentHeader),
}

impl SegmentHeader {
    pub fn interest_nonce(&self) -> u32 {
        match self {
            SegmentHeader::Common(h) => h.interest_nonce,
            SegmentHeader::Video(h) => h.common.interest_nonce,
        }
    }

    pub fn generation_delay_ms(&self) -> f64 {
        match self {
            SegmentHeader::Common(h) => h.generation_delay_ms,
            SegmentHeader::Video(h) => h.common.generation_delay_ms,
        }
    }

    pub fn as_video(&self) -> Option<&VideoFrameSegmentHeader> {
        match self {
            SegmentHeader::Video(h) => Some(h),
            SegmentHeader::Common(_) => None,
        }
    }

    pub fn wire_len(&self) -> usize {
        match self {
            SegmentHeader::Common(_) => DataSegmentHeader::WIRE_LEN,
            SegmentHeader::Video(_) => VideoFrameSegmentHeader::WIRE_LEN,
        }
    }
}

/// Header length used by segments of the given stream type.
pub fn segment_header_len(stream_type: StreamType) -> usize {
    match stream_type {
        StreamType::Audio => DataSegmentHeader::WIRE_LEN,
        StreamType::Video => VideoFrameSegmentHeader::WIRE_LEN,
    }
}

/// Payload bytes available per segment for the given content budget.
pub fn payload_length(segment_size: usize, stream_type: StreamType) -> usize {
    segment_size.saturating_sub(segment_header_len(stream_type))
}

/// Number of data segments a payload of `len` bytes slices into.
pub fn num_slices(len: usize, payload_len: usize) -> usize {
    if payload_len == 0 {
        return 0;
    }
    len / payload_len + usize::from(len % payload_len != 0)
}

/// Cuts a packet wire form into payload slices of `payload_len` bytes; the
/// last slice is short unless the length divides evenly. Slices share the
/// underlying buffer.
pub fn slice_payload(wire: &Bytes, payload_len: usize) -> Vec<Bytes> {
    let mut slices = vec![];
    if payload_len == 0 {
        return slices;
    }
    let mut offset = 0;
    while offset < wire.len() {
        let end = (offset + payload_len).min(wire.len());
        slices.push(wire.slice(offset..end));
        offset = end;
    }
    slices
}

/// Reassembles the packet wire form from ordered payload slices.
pub fn merge_slices(slices: &[Bytes]) -> Bytes {
    let total = slices.iter().map(|s| s.len()).sum();
    let mut buf = BytesMut::with_capacity(total);
    for s in slices {
        buf.extend_from_slice(s);
    }
    buf.freeze()
}

// ─────────────────────────────────────────────────────────────────────────────
// Frame packets
// ─────────────────────────────────────────────────────────────────────────────

/// Packet-level header common to video frames and audio bundles.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct CommonHeader {
    /// Producer's current packet rate, samples per second.
    pub sample_rate: f64,
    /// Producer-side monotonic timestamp, ms. Playback ordering key.
    pub publish_timestamp_ms: i64,
    /// Producer-side wall-clock timestamp, ms since epoch.
    pub publish_unix_timestamp_ms: f64,
}

impl CommonHeader {
    pub const WIRE_LEN: usize = 24;

    fn encode_into(&self, buf: &mut BytesMut) {
        buf.put_f64_le(self.sample_rate);
        buf.put_i64_le(self.publish_timestamp_ms);
        buf.put_f64_le(self.publish_unix_timestamp_ms);
    }

    pub fn decode(buf: &mut Bytes) -> NdnRtcResult<Self> {
        if buf.remaining() < Self::WIRE_LEN {
            return Err(NdnRtcError::MalformedPacket("short common header".into()));
        }
        Ok(CommonHeader {
            sample_rate: buf.get_f64_le(),
            publish_timestamp_ms: buf.get_i64_le(),
            publish_unix_timestamp_ms: buf.get_f64_le(),
        })
    }
}

/// Encoded-frame attributes carried with every video frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VideoFrameHeader {
    pub encoded_width: u32,
    pub encoded_height: u32,
    /// Codec timestamp of the frame.
    pub timestamp: u32,
    pub capture_time_ms: i64,
    pub frame_type: FrameType,
    pub complete_frame: bool,
}

impl VideoFrameHeader {
    const WIRE_LEN: usize = 22;

    fn encode_into(&self, buf: &mut BytesMut) {
        buf.put_u32_le(self.encoded_width);
        buf.put_u32_le(self.encoded_height);
        buf.put_u32_le(self.timestamp);
        buf.put_i64_le(self.capture_time_ms);
        buf.put_u8(self.frame_type as i32 as u8);
        buf.put_u8(u8::from(self.complete_frame));
    }

    fn decode(buf: &mut Bytes) -> NdnRtcResult<Self> {
        if buf.remaining() < Self::WIRE_LEN {
            return Err(NdnRtcError::MalformedPacket("short frame header".into()));
        }
        Ok(VideoFrameHeader {
            encoded_width: buf.get_u32_le(),
            encoded_height: buf.get_u32_le(),
            timestamp: buf.get_u32_le(),
            capture_time_ms: buf.get_i64_le(),
            frame_type: if buf.get_u8() == FrameType::Key as i32 as u8 {
                FrameType::Key
            } else {
                FrameType::Delta
            },
            complete_frame: buf.get_u8() != 0,
        })
    }
}

/// A full video frame as published: headers, thread sync list, and the
/// encoded payload. The wire form carries an explicit payload length so that
/// FEC-recovered (zero-padded) buffers decode identically.
#[derive(Debug, Clone, PartialEq)]
pub struct VideoFramePacket {
    pub common: CommonHeader,
    pub header: VideoFrameHeader,
    /// Peer-thread name → last published sequence number. Lets a consumer
    /// switch threads onto a coherent sample.
    pub sync_list: BTreeMap<String, u64>,
    pub payload: Bytes,
}

impl VideoFramePacket {
    pub fn to_wire(&self) -> Bytes {
        let mut buf = BytesMut::new();
        self.common.encode_into(&mut buf);
        self.header.encode_into(&mut buf);
        buf.put_u16_le(self.sync_list.len() as u16);
        for (thread, seq) in &self.sync_list {
            buf.put_u16_le(thread.len() as u16);
            buf.put_slice(thread.as_bytes());
            buf.put_u64_le(*seq);
        }
        buf.put_u32_le(self.payload.len() as u32);
        buf.put_slice(&self.payload);
        buf.freeze()
    }

    /// Decodes a frame packet, tolerating FEC zero-padding after the
    /// payload.
    pub fn from_wire(mut wire: Bytes) -> NdnRtcResult<Self> {
        let common = CommonHeader::decode(&mut wire)?;
        let header = VideoFrameHeader::decode(&mut wire)?;
        if wire.remaining() < 2 {
            return Err(NdnRtcError::MalformedPacket("short sync list".into()));
        }
        let n_sync = wire.get_u16_le();
        let mut sync_list = BTreeMap::new();
        for _ in 0..n_sync {
            if wire.remaining() < 2 {
                return Err(NdnRtcError::MalformedPacket("short sync entry".into()));
            }
            let name_len = wire.get_u16_le() as usize;
            if wire.remaining() < name_len + 8 {
                return Err(NdnRtcError::MalformedPacket("short sync entry".into()));
            }
            let name_bytes = wire.split_to(name_len);
            let thread = String::from_utf8(name_bytes.to_vec())
                .map_err(|_| NdnRtcError::MalformedPacket("sync entry not utf-8".into()))?;
            sync_list.insert(thread, wire.get_u64_le());
        }
        if wire.remaining() < 4 {
            return Err(NdnRtcError::MalformedPacket("missing payload length".into()));
        }
        let payload_len = wire.get_u32_le() as usize;
        if wire.remaining() < payload_len {
            return Err(NdnRtcError::MalformedPacket(format!(
                "payload truncated: {} declared, {} present",
                payload_len,
                wire.remaining()
            )));
        }
        let payload = wire.split_to(payload_len);
        Ok(VideoFramePacket {
            common,
            header,
            sync_list,
            payload,
        })
    }
}

/// One audio blob inside a bundle.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioSampleBlob {
    /// RTCP control payload rather than RTP media.
    pub is_rtcp: bool,
    pub payload: Bytes,
}

/// Several audio samples bundled into one sample packet.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioBundlePacket {
    pub common: CommonHeader,
    pub samples: Vec<AudioSampleBlob>,
}

impl AudioBundlePacket {
    pub fn to_wire(&self) -> Bytes {
        let mut buf = BytesMut::new();
        self.common.encode_into(&mut buf);
        buf.put_u16_le(self.samples.len() as u16);
        for s in &self.samples {
            buf.put_u8(u8::from(s.is_rtcp));
            buf.put_u32_le(s.payload.len() as u32);
            buf.put_slice(&s.payload);
        }
        buf.freeze()
    }

    pub fn from_wire(mut wire: Bytes) -> NdnRtcResult<Self> {
        let common = CommonHeader::decode(&mut wire)?;
        if wire.remaining() < 2 {
            return Err(NdnRtcError::MalformedPacket("short audio bundle".into()));
        }
        let n = wire.get_u16_le();
        let mut samples = Vec::with_capacity(n as usize);
        for _ in 0..n {
            if wire.remaining() < 5 {
                return Err(NdnRtcError::MalformedPacket("short audio blob".into()));
            }
            let is_rtcp = wire.get_u8() != 0;
            let len = wire.get_u32_le() as usize;
            if wire.remaining() < len {
                return Err(NdnRtcError::MalformedPacket("audio blob truncated".into()));
            }
            samples.push(AudioSampleBlob {
                is_rtcp,
                payload: wire.split_to(len),
            });
        }
        Ok(AudioBundlePacket { common, samples })
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Metadata payloads (protobuf)
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Clone, Copy, Debug, PartialEq, Eq, ::prost::Enumeration)]
#[repr(i32)]
pub enum FrameType {
    Key = 0,
    Delta = 1,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Timestamp {
    #[prost(int64, tag = "1")]
    pub seconds: i64,
    #[prost(int32, tag = "2")]
    pub nanos: i32,
}

/// Per-frame metadata published alongside the frame's segments.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct FrameMeta {
    #[prost(message, optional, tag = "1")]
    pub capture_timestamp: Option<Timestamp>,
    #[prost(uint64, tag = "2")]
    pub dataseg_num: u64,
    #[prost(uint64, tag = "3")]
    pub parity_size: u64,
    #[prost(uint64, tag = "4")]
    pub gop_number: u64,
    #[prost(uint64, tag = "5")]
    pub gop_position: u64,
    #[prost(enumeration = "FrameType", tag = "6")]
    pub r#type: i32,
    #[prost(uint64, tag = "7")]
    pub generation_delay_ms: u64,
}

/// Long-lived stream description.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct StreamMeta {
    #[prost(uint32, tag = "1")]
    pub width: u32,
    #[prost(uint32, tag = "2")]
    pub height: u32,
    #[prost(uint32, tag = "3")]
    pub bitrate: u32,
    #[prost(uint32, tag = "4")]
    pub gop_size: u32,
    #[prost(string, tag = "5")]
    pub description: String,
}

/// Producer-observed live parameters, refreshed roughly once per GOP.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct LiveMeta {
    #[prost(message, optional, tag = "1")]
    pub timestamp: Option<Timestamp>,
    #[prost(double, tag = "2")]
    pub framerate: f64,
    #[prost(uint64, tag = "3")]
    pub segnum_estimate: u64,
    #[prost(uint64, tag = "4")]
    pub framesize_estimate: u64,
    #[prost(uint64, tag = "5")]
    pub segnum_delta: u64,
    #[prost(uint64, tag = "6")]
    pub segnum_delta_parity: u64,
    #[prost(uint64, tag = "7")]
    pub segnum_key: u64,
    #[prost(uint64, tag = "8")]
    pub segnum_key_parity: u64,
}

// ─────────────────────────────────────────────────────────────────────────────
// Content meta info envelope
// ─────────────────────────────────────────────────────────────────────────────

const TLV_CONTENT_META_INFO: u64 = 128;
const TLV_CMI_CONTENT_TYPE: u64 = 129;
const TLV_CMI_TIMESTAMP: u64 = 130;
const TLV_CMI_HAS_SEGMENTS: u64 = 131;
const TLV_CMI_OTHER: u64 = 132;

/// Generalized-object envelope wrapped around frame metadata.
#[derive(Debug, Clone, PartialEq)]
pub struct ContentMetaInfo {
    pub content_type: String,
    /// Producer wall-clock publish time, ms since epoch.
    pub timestamp: u64,
    pub has_segments: bool,
    pub other: Bytes,
}

impl ContentMetaInfo {
    pub fn encode(&self) -> Bytes {
        let mut inner = BytesMut::new();
        tlv::write_tlv(&mut inner, TLV_CMI_CONTENT_TYPE, self.content_type.as_bytes());
        tlv::write_tlv(
            &mut inner,
            TLV_CMI_TIMESTAMP,
            &tlv::encode_nonneg_integer(self.timestamp),
        );
        tlv::write_tlv(
            &mut inner,
            TLV_CMI_HAS_SEGMENTS,
            &[u8::from(self.has_segments)],
        );
        tlv::write_tlv(&mut inner, TLV_CMI_OTHER, &self.other);
        let mut buf = BytesMut::new();
        tlv::write_tlv(&mut buf, TLV_CONTENT_META_INFO, &inner);
        buf.freeze()
    }

    pub fn decode(mut wire: Bytes) -> NdnRtcResult<Self> {
        let (typ, mut value) = tlv::read_tlv(&mut wire)?;
        if typ != TLV_CONTENT_META_INFO {
            return Err(NdnRtcError::MalformedPacket(
                "expected content meta info".into(),
            ));
        }
        let mut info = ContentMetaInfo {
            content_type: String::new(),
            timestamp: 0,
            has_segments: false,
            other: Bytes::new(),
        };
        while !value.is_empty() {
            let (t, v) = tlv::read_tlv(&mut value)?;
            match t {
                TLV_CMI_CONTENT_TYPE => {
                    info.content_type = String::from_utf8(v.to_vec())
                        .map_err(|_| NdnRtcError::MalformedPacket("bad content type".into()))?;
                }
                TLV_CMI_TIMESTAMP => info.timestamp = tlv::decode_nonneg_integer(&v)?,
                TLV_CMI_HAS_SEGMENTS => info.has_segments = v.first().copied() == Some(1),
                TLV_CMI_OTHER => info.other = v,
                _ => {}
            }
        }
        Ok(info)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Delegation-set pointers
// ─────────────────────────────────────────────────────────────────────────────

const TLV_DELEGATION: u64 = 31;
const TLV_PREFERENCE: u64 = 30;

/// One `(preference, name)` delegation.
#[derive(Debug, Clone, PartialEq)]
pub struct Delegation {
    pub preference: u64,
    pub name: Name,
}

/// Ordered delegation set, the content of `_latest` and `_gop_*` pointers.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct DelegationSet {
    delegations: Vec<Delegation>,
}

impl DelegationSet {
    pub fn new() -> Self {
        DelegationSet::default()
    }

    pub fn add(&mut self, preference: u64, name: Name) {
        self.delegations.push(Delegation { preference, name });
        self.delegations.sort_by_key(|d| d.preference);
    }

    pub fn get(&self, index: usize) -> Option<&Delegation> {
        self.delegations.get(index)
    }

    pub fn len(&self) -> usize {
        self.delegations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.delegations.is_empty()
    }

    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::new();
        for d in &self.delegations {
            let mut inner = BytesMut::new();
            tlv::write_tlv(
                &mut inner,
                TLV_PREFERENCE,
                &tlv::encode_nonneg_integer(d.preference),
            );
            inner.extend_from_slice(&d.name.encode());
            tlv::write_tlv(&mut buf, TLV_DELEGATION, &inner);
        }
        buf.freeze()
    }

    pub fn decode(mut wire: Bytes) -> NdnRtcResult<Self> {
        let mut set = DelegationSet::new();
        while !wire.is_empty() {
            let (typ, mut value) = tlv::read_tlv(&mut wire)?;
            if typ != TLV_DELEGATION {
                return Err(NdnRtcError::MalformedPacket(format!(
                    "expected delegation, got tlv {}",
                    typ
                )));
            }
            let (pt, pv) = tlv::read_tlv(&mut value)?;
            if pt != TLV_PREFERENCE {
                return Err(NdnRtcError::MalformedPacket("missing preference".into()));
            }
            let preference = tlv::decode_nonneg_integer(&pv)?;
            let name = Name::decode(&mut value)?;
            set.delegations.push(Delegation { preference, name });
        }
        set.delegations.sort_by_key(|d| d.preference);
        Ok(set)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Segments manifest
// ─────────────────────────────────────────────────────────────────────────────

/// Signed list of implicit digests for all segments of one frame.
pub struct SegmentsManifest;

impl SegmentsManifest {
    pub const DIGEST_SIZE: usize = 32;

    /// Packs a manifest Data for the given segments (data first, then
    /// parity, in segment order).
    pub fn pack(name: Name, segments: &[&Data]) -> Data {
        let mut payload = Vec::with_capacity(Self::DIGEST_SIZE * segments.len());
        for d in segments {
            payload.extend_from_slice(&d.implicit_digest());
        }
        let mut manifest = Data::new(name);
        manifest.set_content(payload);
        manifest
    }

    /// True iff `d`'s implicit digest appears in the manifest.
    pub fn has_data(manifest_content: &[u8], d: &Data) -> bool {
        let digest = d.implicit_digest();
        manifest_content
            .chunks_exact(Self::DIGEST_SIZE)
            .any(|chunk| chunk == digest)
    }

    /// Number of digests listed.
    pub fn size(manifest_content: &[u8]) -> usize {
        manifest_content.len() / Self::DIGEST_SIZE
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Received-segment view and packet dispatch
// ─────────────────────────────────────────────────────────────────────────────

/// A received frame segment paired with the Interest that fetched it.
#[derive(Debug, Clone)]
pub struct WireSegment {
    pub info: NamespaceInfo,
    pub data: Data,
    pub interest: Interest,
    pub header: SegmentHeader,
    /// Payload slice, segment header stripped.
    pub payload: Bytes,
}

impl WireSegment {
    pub fn parse(info: NamespaceInfo, data: Data, interest: Interest) -> NdnRtcResult<Self> {
        let mut content = data.content.clone();
        let header = match info.stream_type {
            StreamType::Video => SegmentHeader::Video(VideoFrameSegmentHeader::decode(&mut content)?),
            StreamType::Audio => SegmentHeader::Common(DataSegmentHeader::decode(&mut content)?),
        };
        Ok(WireSegment {
            info,
            data,
            interest,
            header,
            payload: content,
        })
    }

    /// A reply is original iff the producer echoed this Interest's nonce:
    /// the same Interest reached the producer, so the delay sample reflects
    /// live latency rather than a cache hit.
    pub fn is_original(&self) -> bool {
        self.header.interest_nonce() == self.interest.nonce
    }

    /// Total number of slices (from the producer's FinalBlockId).
    pub fn slices_num(&self) -> Option<u64> {
        self.data.final_segment().map(|n| n + 1)
    }
}

/// Any decoded NDN-RTC packet, dispatched on the name.
#[derive(Debug, Clone)]
pub enum NdnrtcPacket {
    StreamMeta(StreamMeta),
    LiveMeta(LiveMeta),
    FrameMeta {
        envelope: ContentMetaInfo,
        meta: FrameMeta,
    },
    Pointer(DelegationSet),
    Manifest(Bytes),
    Segment(WireSegment),
}

impl NdnrtcPacket {
    /// Decodes a reply according to its namespace classification.
    pub fn from_reply(
        info: &NamespaceInfo,
        data: &Data,
        interest: &Interest,
    ) -> NdnRtcResult<Self> {
        match info.segment_class {
            SegmentClass::Data | SegmentClass::Parity => Ok(NdnrtcPacket::Segment(
                WireSegment::parse(info.clone(), data.clone(), interest.clone())?,
            )),
            SegmentClass::Manifest => Ok(NdnrtcPacket::Manifest(data.content.clone())),
            SegmentClass::Pointer => Ok(NdnrtcPacket::Pointer(DelegationSet::decode(
                data.content.clone(),
            )?)),
            SegmentClass::Meta => {
                if info.is_live_meta {
                    let meta = LiveMeta::decode(data.content.as_ref())
                        .map_err(|e| NdnRtcError::MalformedPacket(format!("live meta: {}", e)))?;
                    Ok(NdnrtcPacket::LiveMeta(meta))
                } else if info.has_seq_no {
                    let envelope = ContentMetaInfo::decode(data.content.clone())?;
                    let meta = FrameMeta::decode(envelope.other.as_ref())
                        .map_err(|e| NdnRtcError::MalformedPacket(format!("frame meta: {}", e)))?;
                    Ok(NdnrtcPacket::FrameMeta { envelope, meta })
                } else {
                    let meta = StreamMeta::decode(data.content.as_ref())
                        .map_err(|e| NdnRtcError::MalformedPacket(format!("stream meta: {}", e)))?;
                    Ok(NdnrtcPacket::StreamMeta(meta))
                }
            }
            SegmentClass::Unknown => Err(NdnRtcError::MalformedPacket(format!(
                "cannot classify reply {}",
                data.name
            ))),
        }
    }

    /// Pointer kind convenience for `_latest` / `_gop_*` replies.
    pub fn pointer_kind(info: &NamespaceInfo) -> Option<PointerKind> {
        info.pointer_kind
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_frame(payload_len: usize) -> VideoFramePacket {
        VideoFramePacket {
            common: CommonHeader {
                sample_rate: 30.,
                publish_timestamp_ms: 100_000,
                publish_unix_timestamp_ms: 1.65e12,
            },
            header: VideoFrameHeader {
                encoded_width: 1280,
                encoded_height: 720,
                timestamp: 90_000,
                capture_time_ms: 1_650_000_000_000,
                frame_type: FrameType::Delta,
                complete_frame: true,
            },
            sync_list: BTreeMap::from([("hi".to_string(), 42u64), ("low".to_string(), 40u64)]),
            payload: Bytes::from((0..payload_len).map(|i| (i % 251) as u8).collect::<Vec<_>>()),
        }
    }

    mod headers {
        use super::*;

        #[test]
        fn data_segment_header_round_trips() {
            let h = DataSegmentHeader {
                interest_nonce: 0xDEADBEEF,
                interest_arrival_ms: 1234.5,
                generation_delay_ms: 7.25,
            };
            let mut buf = BytesMut::new();
            h.encode_into(&mut buf);
            assert_eq!(buf.len(), DataSegmentHeader::WIRE_LEN);
            let decoded = DataSegmentHeader::decode(&mut buf.freeze()).unwrap();
            assert_eq!(decoded, h);
        }

        #[test]
        fn video_segment_header_round_trips() {
            let h = VideoFrameSegmentHeader {
                common: DataSegmentHeader {
                    interest_nonce: 7,
                    interest_arrival_ms: 0.,
                    generation_delay_ms: 3.,
                },
                total_segments_num: 5,
                playback_no: 123,
                paired_sequence_no: 120,
                parity_segments_num: 2,
            };
            let mut buf = BytesMut::new();
            h.encode_into(&mut buf);
            assert_eq!(buf.len(), VideoFrameSegmentHeader::WIRE_LEN);
            let decoded = VideoFrameSegmentHeader::decode(&mut buf.freeze()).unwrap();
            assert_eq!(decoded, h);
        }
    }

    mod slicing {
        use super::*;

        #[test]
        fn slice_then_merge_is_identity() {
            let frame = test_frame(9500);
            let wire = frame.to_wire();
            let payload_len = payload_length(8000, StreamType::Video);
            let slices = slice_payload(&wire, payload_len);

            assert_eq!(slices.len(), num_slices(wire.len(), payload_len));
            let merged = merge_slices(&slices);
            assert_eq!(merged, wire);
            let decoded = VideoFramePacket::from_wire(merged).unwrap();
            assert_eq!(decoded, frame);
        }

        #[test]
        fn exact_multiple_has_no_short_tail() {
            let payload_len = 100;
            let wire = Bytes::from(vec![7u8; 500]);
            let slices = slice_payload(&wire, payload_len);
            assert_eq!(slices.len(), 5);
            assert!(slices.iter().all(|s| s.len() == payload_len));
        }

        #[test]
        fn short_frame_yields_one_segment() {
            let wire = Bytes::from(vec![1u8; 10]);
            let slices = slice_payload(&wire, 7936);
            assert_eq!(slices.len(), 1);
            assert_eq!(num_slices(10, 7936), 1);
        }

        #[test]
        fn frame_decode_tolerates_fec_padding() {
            let frame = test_frame(1000);
            let wire = frame.to_wire();
            let mut padded = BytesMut::from(&wire[..]);
            padded.resize(wire.len() + 500, 0);
            let decoded = VideoFramePacket::from_wire(padded.freeze()).unwrap();
            assert_eq!(decoded, frame, "zero padding must not change decoding");
        }
    }

    mod audio {
        use super::*;

        #[test]
        fn bundle_round_trips() {
            let bundle = AudioBundlePacket {
                common: CommonHeader {
                    sample_rate: 50.,
                    publish_timestamp_ms: 555,
                    publish_unix_timestamp_ms: 1.6e12,
                },
                samples: vec![
                    AudioSampleBlob {
                        is_rtcp: false,
                        payload: Bytes::from(vec![1u8; 160]),
                    },
                    AudioSampleBlob {
                        is_rtcp: true,
                        payload: Bytes::from(vec![2u8; 60]),
                    },
                ],
            };
            let decoded = AudioBundlePacket::from_wire(bundle.to_wire()).unwrap();
            assert_eq!(decoded, bundle);
        }
    }

    mod meta {
        use super::*;

        #[test]
        fn frame_meta_envelope_round_trips() {
            let meta = FrameMeta {
                capture_timestamp: Some(Timestamp {
                    seconds: 1_650_000_000,
                    nanos: 500,
                }),
                dataseg_num: 5,
                parity_size: 2,
                gop_number: 3,
                gop_position: 7,
                r#type: FrameType::Key as i32,
                generation_delay_ms: 12,
            };
            let envelope = ContentMetaInfo {
                content_type: crate::protocol::FRAME_CONTENT_TYPE.to_string(),
                timestamp: 1_650_000_000_123,
                has_segments: true,
                other: Bytes::from(meta.encode_to_vec()),
            };
            let decoded = ContentMetaInfo::decode(envelope.encode()).unwrap();
            assert_eq!(decoded, envelope);
            let decoded_meta = FrameMeta::decode(decoded.other.as_ref()).unwrap();
            assert_eq!(decoded_meta, meta);
        }

        #[test]
        fn live_meta_round_trips() {
            let live = LiveMeta {
                timestamp: Some(Timestamp {
                    seconds: 10,
                    nanos: 0,
                }),
                framerate: 29.97,
                segnum_estimate: 4,
                framesize_estimate: 28_000,
                segnum_delta: 4,
                segnum_delta_parity: 1,
                segnum_key: 12,
                segnum_key_parity: 3,
            };
            let decoded = LiveMeta::decode(live.encode_to_vec().as_slice()).unwrap();
            assert_eq!(decoded, live);
        }
    }

    mod pointers {
        use super::*;

        #[test]
        fn delegation_set_round_trips_in_preference_order() {
            let mut set = DelegationSet::new();
            set.add(1, Name::from("/s/gop"));
            set.add(0, Name::from("/s/frame"));
            let decoded = DelegationSet::decode(set.encode()).unwrap();
            assert_eq!(decoded.get(0).unwrap().name.to_uri(), "/s/frame");
            assert_eq!(decoded.get(1).unwrap().name.to_uri(), "/s/gop");
        }
    }

    mod manifest {
        use super::*;

        fn segment_data(seq: u64, seg: u64, body: &[u8]) -> Data {
            let mut d = Data::new(
                Name::from("/s/ndnrtc")
                    .append_version(4)
                    .append_str("video")
                    .append_str("cam")
                    .append_sequence_number(seq)
                    .append_segment(seg),
            );
            d.set_content(body.to_vec());
            d
        }

        #[test]
        fn packed_manifest_contains_every_segment() {
            let segments: Vec<Data> = (0..4).map(|i| segment_data(9, i, &[i as u8; 10])).collect();
            let refs: Vec<&Data> = segments.iter().collect();
            let manifest = SegmentsManifest::pack(Name::from("/m"), &refs);

            assert_eq!(SegmentsManifest::size(&manifest.content), 4);
            for s in &segments {
                assert!(SegmentsManifest::has_data(&manifest.content, s));
            }
        }

        #[test]
        fn bit_flipped_segment_fails_membership() {
            let good = segment_data(9, 0, &[1, 2, 3, 4]);
            let manifest = SegmentsManifest::pack(Name::from("/m"), &[&good]);

            let mut tampered = good.clone();
            tampered.set_content(vec![1, 2, 3, 5]);
            assert!(!SegmentsManifest::has_data(&manifest.content, &tampered));
        }
    }

    mod dispatch {
        use super::*;
        use crate::namespace::NameComponents;

        fn video_prefix() -> Name {
            NameComponents::video_stream_prefix(&Name::from("/prod"), "cam")
        }

        #[test]
        fn classifies_segment_reply_and_originality() {
            let name = video_prefix().append_sequence_number(5).append_segment(0);
            let interest = Interest::new(name.clone());

            let header = VideoFrameSegmentHeader {
                common: DataSegmentHeader {
                    interest_nonce: interest.nonce,
                    interest_arrival_ms: 1.,
                    generation_delay_ms: 2.,
                },
                total_segments_num: 1,
                playback_no: 5,
                paired_sequence_no: 4,
                parity_segments_num: 1,
            };
            let mut content = BytesMut::new();
            header.encode_into(&mut content);
            content.extend_from_slice(&[9u8; 100]);
            let mut data = Data::new(name.clone());
            data.set_content(content.freeze());

            let info = NameComponents::extract_info(&name).unwrap();
            let packet = NdnrtcPacket::from_reply(&info, &data, &interest).unwrap();
            match packet {
                NdnrtcPacket::Segment(seg) => {
                    assert!(seg.is_original(), "echoed nonce means original reply");
                    assert_eq!(seg.payload.len(), 100);
                    assert_eq!(seg.header.as_video().unwrap().paired_sequence_no, 4);
                }
                other => panic!("expected segment, got {:?}", other),
            }
        }

        #[test]
        fn cached_reply_is_not_original() {
            let name = video_prefix().append_sequence_number(5).append_segment(0);
            let interest = Interest::new(name.clone());

            let header = VideoFrameSegmentHeader {
                common: DataSegmentHeader {
                    // some other consumer's nonce
                    interest_nonce: interest.nonce.wrapping_add(1),
                    ..Default::default()
                },
                ..Default::default()
            };
            let mut content = BytesMut::new();
            header.encode_into(&mut content);
            let mut data = Data::new(name.clone());
            data.set_content(content.freeze());

            let info = NameComponents::extract_info(&name).unwrap();
            let packet = NdnrtcPacket::from_reply(&info, &data, &interest).unwrap();
            match packet {
                NdnrtcPacket::Segment(seg) => assert!(!seg.is_original()),
                other => panic!("expected segment, got {:?}", other),
            }
        }
    }
}
