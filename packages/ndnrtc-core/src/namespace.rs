//! The NDN-RTC name grammar.
//!
//! ```text
//! <base>/<ndnrtc>/<v=api>/{audio|video}/<stream>[/<ts>/<thread>]
//!       [ /{_meta|_live|_latest|d|k|_gop} ...]
//!       [ /<seq> [/_parity]/<segment> ]
//!       [ /_manifest ]
//! ```
//!
//! [`NameComponents::extract_info`] parses any legitimate NDN-RTC name into a
//! [`NamespaceInfo`]; [`NamespaceInfo::prefix`] re-emits it. Extraction is
//! bijective: any name a producer emits parses back to an info whose
//! `prefix(NameFilter::Segment)` equals the name bit-for-bit.
//!
//! The stream timestamp component is only ever emitted between the stream
//! and thread components, i.e. when a thread name is present; names without
//! threads (the generalized-object layout) go straight from the stream name
//! to pointers, metadata, or sequence numbers.

use std::fmt;

use crate::error::{NdnRtcError, NdnRtcResult};
use crate::name::{Component, Name};
use crate::protocol;

/// Stream media type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamType {
    Audio,
    Video,
}

/// Sample class within a video thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleClass {
    Unknown,
    Key,
    Delta,
}

/// What a name addresses below the sample level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmentClass {
    Unknown,
    Data,
    Parity,
    Manifest,
    Meta,
    Pointer,
}

/// Kind of delegation-set pointer a `Pointer`-class name addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PointerKind {
    Latest,
    GopStart,
    GopEnd,
}

/// Emission level for [`NamespaceInfo::prefix`]. Levels are cumulative:
/// each one includes everything the previous level emits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum NameFilter {
    Base,
    Library,
    Stream,
    StreamTs,
    ThreadNoClass,
    Thread,
    Sample,
    Segment,
}

/// Fixed name tokens.
pub struct NameComponents;

impl NameComponents {
    pub const APP: &'static str = "ndnrtc";
    pub const AUDIO: &'static str = "audio";
    pub const VIDEO: &'static str = "video";
    pub const META: &'static str = "_meta";
    pub const LIVE: &'static str = "_live";
    pub const LATEST: &'static str = "_latest";
    pub const GOP: &'static str = "_gop";
    pub const GOP_START: &'static str = "_gop_start";
    pub const GOP_END: &'static str = "_gop_end";
    pub const DELTA: &'static str = "d";
    pub const KEY: &'static str = "k";
    pub const PARITY: &'static str = "_parity";
    pub const MANIFEST: &'static str = "_manifest";

    /// `<ndnrtc>/<v=api>` suffix appended after the base prefix.
    pub fn ndnrtc_suffix() -> Name {
        Name::new()
            .append_str(Self::APP)
            .append_version(protocol::NAME_API_VERSION)
    }

    /// Full stream prefix: `<base>/<ndnrtc>/<v=api>/{audio|video}/<stream>`.
    pub fn stream_prefix(stream_type: StreamType, base_prefix: &Name, stream_name: &str) -> Name {
        let type_token = match stream_type {
            StreamType::Audio => Self::AUDIO,
            StreamType::Video => Self::VIDEO,
        };
        base_prefix
            .clone()
            .append_name(&Self::ndnrtc_suffix())
            .append_str(type_token)
            .append_str(stream_name)
    }

    pub fn audio_stream_prefix(base_prefix: &Name, stream_name: &str) -> Name {
        Self::stream_prefix(StreamType::Audio, base_prefix, stream_name)
    }

    pub fn video_stream_prefix(base_prefix: &Name, stream_name: &str) -> Name {
        Self::stream_prefix(StreamType::Video, base_prefix, stream_name)
    }

    /// Parses a legitimate NDN-RTC name (Interest or Data).
    pub fn extract_info(name: &Name) -> NdnRtcResult<NamespaceInfo> {
        // locate the `ndnrtc` marker scanning backwards; everything before
        // it is the application base prefix
        let mut marker = None;
        for i in (1..name.len().saturating_sub(1)).rev() {
            if component_is(name.at(i as isize), Self::APP) {
                marker = Some(i);
                break;
            }
        }
        let marker =
            marker.ok_or_else(|| NdnRtcError::BadName(format!("no '{}' component: {}", Self::APP, name)))?;

        let version = name
            .at((marker + 1) as isize)
            .filter(|c| c.is_version())
            .ok_or_else(|| NdnRtcError::BadName(format!("missing api version: {}", name)))?
            .to_version()?;
        if version != protocol::NAME_API_VERSION {
            return Err(NdnRtcError::BadName(format!(
                "unsupported namespace api version {} (current is {})",
                version,
                protocol::NAME_API_VERSION
            )));
        }

        let stream_type = match name.at((marker + 2) as isize).and_then(|c| c.as_str()) {
            Some(t) if t == Self::AUDIO => StreamType::Audio,
            Some(t) if t == Self::VIDEO => StreamType::Video,
            _ => {
                return Err(NdnRtcError::BadName(format!(
                    "missing stream type component: {}",
                    name
                )))
            }
        };

        let mut info = NamespaceInfo::new(name.prefix(marker as isize), version, stream_type);
        let rest = name.sub_name((marker + 3) as isize);
        info.parse_stream_suffix(&rest)?;
        Ok(info)
    }
}

/// The parsed identity of an NDN-RTC name.
#[derive(Debug, Clone, PartialEq)]
pub struct NamespaceInfo {
    pub base_prefix: Name,
    pub api_version: u64,
    pub stream_type: StreamType,
    pub stream_name: String,
    pub thread_name: String,
    pub stream_timestamp: u64,
    pub has_stream_ts: bool,
    pub sample_class: SampleClass,
    pub segment_class: SegmentClass,
    pub pointer_kind: Option<PointerKind>,
    /// Sample sequence number; the GOP sequence number for GOP pointers.
    /// Valid iff `has_seq_no`.
    pub sample_no: u64,
    pub has_seq_no: bool,
    /// Segment number, valid iff `has_seg_no`.
    pub seg_no: u64,
    pub has_seg_no: bool,
    pub meta_version: u64,
    pub has_meta_version: bool,
    pub is_meta: bool,
    pub is_live_meta: bool,
    pub is_parity: bool,
    pub is_delta: bool,
}

impl NamespaceInfo {
    fn new(base_prefix: Name, api_version: u64, stream_type: StreamType) -> Self {
        NamespaceInfo {
            base_prefix,
            api_version,
            stream_type,
            stream_name: String::new(),
            thread_name: String::new(),
            stream_timestamp: 0,
            has_stream_ts: false,
            sample_class: SampleClass::Unknown,
            segment_class: SegmentClass::Unknown,
            pointer_kind: None,
            sample_no: 0,
            has_seq_no: false,
            seg_no: 0,
            has_seg_no: false,
            meta_version: 0,
            has_meta_version: false,
            is_meta: false,
            is_live_meta: false,
            is_parity: false,
            is_delta: false,
        }
    }

    // ─────────────────────────────────────────────────────────────────────
    // Extraction
    // ─────────────────────────────────────────────────────────────────────

    fn parse_stream_suffix(&mut self, rest: &Name) -> NdnRtcResult<()> {
        if rest.is_empty() {
            return Err(NdnRtcError::BadName("missing stream name".into()));
        }
        self.stream_name = generic_token(rest.at(0))?;

        if rest.len() == 1 {
            return Ok(());
        }

        let second = rest.at(1).unwrap();

        // threaded layout: <stream>/<ts>/<thread>/...
        if second.is_timestamp() {
            self.stream_timestamp = second.to_timestamp()?;
            self.has_stream_ts = true;
            if rest.len() == 2 {
                return Ok(());
            }
            self.thread_name = generic_token(rest.at(2))?;
            return self.parse_thread_suffix(&rest.sub_name(3));
        }

        match second.as_str() {
            Some(NameComponents::META) => {
                self.is_meta = true;
                self.segment_class = SegmentClass::Meta;
                self.parse_meta_suffix(&rest.sub_name(2))
            }
            Some(NameComponents::LIVE) => {
                self.is_meta = true;
                self.is_live_meta = true;
                self.segment_class = SegmentClass::Meta;
                self.parse_version_suffix(&rest.sub_name(2))
            }
            Some(NameComponents::LATEST) => {
                self.segment_class = SegmentClass::Pointer;
                self.pointer_kind = Some(PointerKind::Latest);
                self.parse_version_suffix(&rest.sub_name(2))
            }
            Some(NameComponents::GOP) => self.parse_gop_suffix(&rest.sub_name(2)),
            _ => {
                // generalized-object layout: sequence number right after the
                // stream name, no thread and no sample-class component
                if second.is_sequence_number() {
                    self.sample_no = second.to_sequence_number()?;
                    self.has_seq_no = true;
                    if self.stream_type == StreamType::Audio {
                        self.is_delta = true;
                        self.sample_class = SampleClass::Delta;
                    }
                    self.parse_segment_suffix(&rest.sub_name(2))
                } else {
                    Err(NdnRtcError::BadName(format!(
                        "unexpected component after stream name: {}",
                        second
                    )))
                }
            }
        }
    }

    fn parse_thread_suffix(&mut self, rest: &Name) -> NdnRtcResult<()> {
        if rest.is_empty() {
            return Ok(());
        }
        let first = rest.at(0).unwrap();

        match first.as_str() {
            Some(NameComponents::META) => {
                self.is_meta = true;
                self.segment_class = SegmentClass::Meta;
                return self.parse_meta_suffix(&rest.sub_name(1));
            }
            Some(NameComponents::GOP) => return self.parse_gop_suffix(&rest.sub_name(1)),
            Some(NameComponents::DELTA) | Some(NameComponents::KEY)
                if self.stream_type == StreamType::Video =>
            {
                self.is_delta = component_is(Some(first), NameComponents::DELTA);
                self.sample_class = if self.is_delta {
                    SampleClass::Delta
                } else {
                    SampleClass::Key
                };
                let seq = rest.at(1);
                match seq {
                    None => return Ok(()),
                    Some(c) => {
                        self.sample_no = c.to_sequence_number()?;
                        self.has_seq_no = true;
                        return self.parse_segment_suffix(&rest.sub_name(2));
                    }
                }
            }
            _ => {}
        }

        // audio thread layout (no sample-class component); threaded video
        // names always carry a class component
        if first.is_sequence_number() && self.stream_type == StreamType::Audio {
            self.is_delta = true;
            self.sample_class = SampleClass::Delta;
            self.sample_no = first.to_sequence_number()?;
            self.has_seq_no = true;
            return self.parse_segment_suffix(&rest.sub_name(1));
        }

        Err(NdnRtcError::BadName(format!(
            "unexpected component after thread name: {}",
            first
        )))
    }

    /// Parses `[/_parity]/<segment>`, `/_manifest`, or `/_meta` after a
    /// sample sequence number.
    fn parse_segment_suffix(&mut self, rest: &Name) -> NdnRtcResult<()> {
        if rest.is_empty() {
            self.segment_class = if self.segment_class == SegmentClass::Meta {
                SegmentClass::Meta
            } else {
                SegmentClass::Unknown
            };
            return Ok(());
        }
        let first = rest.at(0).unwrap();

        if component_is(Some(first), NameComponents::PARITY) {
            let seg = rest
                .at(1)
                .ok_or_else(|| NdnRtcError::BadName("parity component without segment".into()))?;
            self.is_parity = true;
            self.has_seg_no = true;
            self.seg_no = seg.to_segment()?;
            self.segment_class = SegmentClass::Parity;
            return Ok(());
        }
        if component_is(Some(first), NameComponents::MANIFEST) {
            self.segment_class = SegmentClass::Manifest;
            return Ok(());
        }
        if component_is(Some(first), NameComponents::META) {
            self.is_meta = true;
            self.segment_class = SegmentClass::Meta;
            return Ok(());
        }
        self.seg_no = first.to_segment()?;
        self.has_seg_no = true;
        self.segment_class = SegmentClass::Data;
        Ok(())
    }

    /// Parses `[/<version>[/<segment>]]` after a `_meta` component.
    fn parse_meta_suffix(&mut self, rest: &Name) -> NdnRtcResult<()> {
        if rest.is_empty() {
            return Ok(());
        }
        let version = rest.at(0).unwrap();
        if !version.is_version() {
            return Err(NdnRtcError::BadName(format!(
                "expected meta version, got {}",
                version
            )));
        }
        self.meta_version = version.to_version()?;
        self.has_meta_version = true;
        if let Some(seg) = rest.at(1) {
            self.seg_no = seg.to_segment()?;
            self.has_seg_no = true;
        }
        Ok(())
    }

    /// Parses `[/<version>]` after `_live` / `_latest`.
    fn parse_version_suffix(&mut self, rest: &Name) -> NdnRtcResult<()> {
        if let Some(version) = rest.at(0) {
            self.meta_version = version.to_version()?;
            self.has_meta_version = true;
        }
        Ok(())
    }

    /// Parses `/<gop-seq>/{_gop_start|_gop_end}` after a `_gop` component.
    fn parse_gop_suffix(&mut self, rest: &Name) -> NdnRtcResult<()> {
        self.segment_class = SegmentClass::Pointer;
        let seq = rest
            .at(0)
            .ok_or_else(|| NdnRtcError::BadName("gop pointer without sequence number".into()))?;
        self.sample_no = seq.to_sequence_number()?;
        self.has_seq_no = true;
        match rest.at(1).and_then(|c| c.as_str()) {
            Some(NameComponents::GOP_START) => {
                self.pointer_kind = Some(PointerKind::GopStart);
                Ok(())
            }
            Some(NameComponents::GOP_END) => {
                self.pointer_kind = Some(PointerKind::GopEnd);
                Ok(())
            }
            None => Ok(()),
            Some(other) => Err(NdnRtcError::BadName(format!(
                "unexpected gop pointer component '{}'",
                other
            ))),
        }
    }

    // ─────────────────────────────────────────────────────────────────────
    // Emission
    // ─────────────────────────────────────────────────────────────────────

    /// Re-emits the name up to the requested level.
    pub fn prefix(&self, filter: NameFilter) -> Name {
        let mut name = self.base_prefix.clone();
        if filter < NameFilter::Library {
            return name;
        }
        name = name
            .append_str(NameComponents::APP)
            .append_version(self.api_version);
        if filter < NameFilter::Stream {
            return name;
        }
        name = name
            .append_str(match self.stream_type {
                StreamType::Audio => NameComponents::AUDIO,
                StreamType::Video => NameComponents::VIDEO,
            })
            .append_str(&self.stream_name);

        if filter >= NameFilter::StreamTs && self.has_stream_ts && !self.thread_name.is_empty() {
            name = name.append_timestamp(self.stream_timestamp);
        }
        if filter >= NameFilter::ThreadNoClass && !self.thread_name.is_empty() {
            name = name.append_str(&self.thread_name);
        }

        match self.kind() {
            NameKind::StreamLevelMeta => {
                if filter >= NameFilter::Sample {
                    name = name.append_str(if self.is_live_meta {
                        NameComponents::LIVE
                    } else {
                        NameComponents::META
                    });
                }
                if filter >= NameFilter::Segment {
                    if self.has_meta_version {
                        name = name.append_version(self.meta_version);
                    }
                    if self.has_seg_no {
                        name = name.append_segment(self.seg_no);
                    }
                }
            }
            NameKind::LatestPointer => {
                if filter >= NameFilter::Sample {
                    name = name.append_str(NameComponents::LATEST);
                }
                if filter >= NameFilter::Segment && self.has_meta_version {
                    name = name.append_version(self.meta_version);
                }
            }
            NameKind::GopPointer => {
                if filter >= NameFilter::Sample {
                    name = name
                        .append_str(NameComponents::GOP)
                        .append_sequence_number(self.sample_no);
                }
                if filter >= NameFilter::Segment {
                    match self.pointer_kind {
                        Some(PointerKind::GopStart) => {
                            name = name.append_str(NameComponents::GOP_START)
                        }
                        Some(PointerKind::GopEnd) => name = name.append_str(NameComponents::GOP_END),
                        _ => {}
                    }
                }
            }
            NameKind::Frame => {
                if filter >= NameFilter::Thread
                    && self.stream_type == StreamType::Video
                    && !self.thread_name.is_empty()
                    && self.sample_class != SampleClass::Unknown
                {
                    name = name.append_str(if self.is_delta {
                        NameComponents::DELTA
                    } else {
                        NameComponents::KEY
                    });
                }
                if filter >= NameFilter::Sample && self.has_seq_no {
                    name = name.append_sequence_number(self.sample_no);
                }
                if filter >= NameFilter::Segment {
                    match self.segment_class {
                        SegmentClass::Manifest => name = name.append_str(NameComponents::MANIFEST),
                        SegmentClass::Meta => name = name.append_str(NameComponents::META),
                        SegmentClass::Parity => {
                            name = name
                                .append_str(NameComponents::PARITY)
                                .append_segment(self.seg_no)
                        }
                        SegmentClass::Data if self.has_seg_no => {
                            name = name.append_segment(self.seg_no)
                        }
                        _ => {}
                    }
                }
            }
        }
        name
    }

    /// Name shared by every segment of the same sample. Buffer slots key on
    /// this.
    pub fn sample_prefix(&self) -> Name {
        self.prefix(NameFilter::Sample)
    }

    /// The full segment-level name.
    pub fn segment_name(&self) -> Name {
        self.prefix(NameFilter::Segment)
    }

    /// True for names that address a frame's data/parity/manifest/meta (as
    /// opposed to stream-level metadata and pointers).
    pub fn is_sample(&self) -> bool {
        matches!(self.kind(), NameKind::Frame) && self.has_seq_no
    }

    fn kind(&self) -> NameKind {
        if self.segment_class == SegmentClass::Pointer {
            if self.pointer_kind == Some(PointerKind::Latest) {
                NameKind::LatestPointer
            } else {
                NameKind::GopPointer
            }
        } else if self.is_meta && !self.has_seq_no {
            NameKind::StreamLevelMeta
        } else {
            NameKind::Frame
        }
    }
}

#[derive(PartialEq)]
enum NameKind {
    StreamLevelMeta,
    LatestPointer,
    GopPointer,
    Frame,
}

impl fmt::Display for NamespaceInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.prefix(NameFilter::Segment))
    }
}

fn component_is(component: Option<&Component>, token: &str) -> bool {
    component.and_then(|c| c.as_str()) == Some(token)
}

fn generic_token(component: Option<&Component>) -> NdnRtcResult<String> {
    component
        .and_then(|c| c.as_str())
        .map(str::to_string)
        .ok_or_else(|| NdnRtcError::BadName("expected a generic component".into()))
}
