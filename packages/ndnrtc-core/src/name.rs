//! Hierarchical NDN names with typed components.
//!
//! Versions, timestamps, segment numbers, and sequence numbers use the
//! canonical typed-component encodings (TLV types 54, 56, 50, 58); all
//! other components are generic UTF-8 tokens. Names order canonically
//! (component type, then length, then value) so they can key ordered maps.

use std::fmt;

use bytes::{Bytes, BytesMut};

use crate::error::{NdnRtcError, NdnRtcResult};
use crate::tlv;

/// TLV type of a Name element.
pub(crate) const TLV_NAME: u64 = 7;

const TLV_IMPLICIT_DIGEST: u64 = 1;
const TLV_GENERIC: u64 = 8;
const TLV_SEGMENT: u64 = 50;
const TLV_VERSION: u64 = 54;
const TLV_TIMESTAMP: u64 = 56;
const TLV_SEQUENCE: u64 = 58;

/// One name component: a TLV type plus an opaque value.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Component {
    typ: u64,
    value: Vec<u8>,
}

impl Component {
    pub fn generic(token: impl AsRef<[u8]>) -> Self {
        Component {
            typ: TLV_GENERIC,
            value: token.as_ref().to_vec(),
        }
    }

    pub fn from_segment(seg_no: u64) -> Self {
        Component {
            typ: TLV_SEGMENT,
            value: tlv::encode_nonneg_integer(seg_no),
        }
    }

    pub fn from_version(version: u64) -> Self {
        Component {
            typ: TLV_VERSION,
            value: tlv::encode_nonneg_integer(version),
        }
    }

    pub fn from_timestamp(timestamp_us: u64) -> Self {
        Component {
            typ: TLV_TIMESTAMP,
            value: tlv::encode_nonneg_integer(timestamp_us),
        }
    }

    pub fn from_sequence_number(seq_no: u64) -> Self {
        Component {
            typ: TLV_SEQUENCE,
            value: tlv::encode_nonneg_integer(seq_no),
        }
    }

    pub fn implicit_digest(digest: impl AsRef<[u8]>) -> Self {
        Component {
            typ: TLV_IMPLICIT_DIGEST,
            value: digest.as_ref().to_vec(),
        }
    }

    pub fn is_generic(&self) -> bool {
        self.typ == TLV_GENERIC
    }
    pub fn is_segment(&self) -> bool {
        self.typ == TLV_SEGMENT
    }
    pub fn is_version(&self) -> bool {
        self.typ == TLV_VERSION
    }
    pub fn is_timestamp(&self) -> bool {
        self.typ == TLV_TIMESTAMP
    }
    pub fn is_sequence_number(&self) -> bool {
        self.typ == TLV_SEQUENCE
    }
    pub fn is_implicit_digest(&self) -> bool {
        self.typ == TLV_IMPLICIT_DIGEST
    }

    pub fn to_segment(&self) -> NdnRtcResult<u64> {
        self.typed_value(TLV_SEGMENT, "segment")
    }
    pub fn to_version(&self) -> NdnRtcResult<u64> {
        self.typed_value(TLV_VERSION, "version")
    }
    pub fn to_timestamp(&self) -> NdnRtcResult<u64> {
        self.typed_value(TLV_TIMESTAMP, "timestamp")
    }
    pub fn to_sequence_number(&self) -> NdnRtcResult<u64> {
        self.typed_value(TLV_SEQUENCE, "sequence number")
    }

    fn typed_value(&self, expected: u64, what: &str) -> NdnRtcResult<u64> {
        if self.typ != expected {
            return Err(NdnRtcError::BadName(format!(
                "component {} is not a {}",
                self, what
            )));
        }
        tlv::decode_nonneg_integer(&self.value)
    }

    pub fn value(&self) -> &[u8] {
        &self.value
    }

    /// Component value as a UTF-8 token, for generic components.
    pub fn as_str(&self) -> Option<&str> {
        if self.is_generic() {
            std::str::from_utf8(&self.value).ok()
        } else {
            None
        }
    }

    /// NDN URI form of this component.
    pub fn to_uri(&self) -> String {
        match self.typ {
            TLV_SEGMENT => format!("seg={}", tlv::decode_nonneg_integer(&self.value).unwrap_or(0)),
            TLV_VERSION => format!("v={}", tlv::decode_nonneg_integer(&self.value).unwrap_or(0)),
            TLV_TIMESTAMP => format!("t={}", tlv::decode_nonneg_integer(&self.value).unwrap_or(0)),
            TLV_SEQUENCE => format!("seq={}", tlv::decode_nonneg_integer(&self.value).unwrap_or(0)),
            TLV_IMPLICIT_DIGEST => format!("sha256digest={}", hex::encode(&self.value)),
            _ => escape_generic(&self.value),
        }
    }

    fn encode_into(&self, buf: &mut BytesMut) {
        tlv::write_tlv(buf, self.typ, &self.value);
    }

    fn decode(typ: u64, value: Bytes) -> Self {
        Component {
            typ,
            value: value.to_vec(),
        }
    }
}

impl PartialOrd for Component {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Component {
    /// Canonical NDN component order: type, then length, then value bytes.
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.typ
            .cmp(&other.typ)
            .then(self.value.len().cmp(&other.value.len()))
            .then(self.value.cmp(&other.value))
    }
}

impl fmt::Debug for Component {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_uri())
    }
}

impl fmt::Display for Component {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_uri())
    }
}

fn escape_generic(value: &[u8]) -> String {
    let mut out = String::new();
    for &b in value {
        let c = b as char;
        if c.is_ascii_alphanumeric() || matches!(c, '-' | '.' | '_' | '~') {
            out.push(c);
        } else {
            out.push_str(&format!("%{:02X}", b));
        }
    }
    if out.is_empty() {
        out.push_str("...");
    }
    out
}

/// A hierarchical name: an ordered list of components.
#[derive(Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Name {
    components: Vec<Component>,
}

impl Name {
    pub fn new() -> Self {
        Name::default()
    }

    /// Parses an NDN URI (`/a/b/v=4/seq=10/seg=0`, with `%XX` escapes in
    /// generic components).
    pub fn from_uri(uri: &str) -> NdnRtcResult<Self> {
        let mut name = Name::new();
        for token in uri.split('/').filter(|t| !t.is_empty()) {
            let component = if let Some(v) = token.strip_prefix("v=") {
                Component::from_version(parse_decimal(v, token)?)
            } else if let Some(v) = token.strip_prefix("seg=") {
                Component::from_segment(parse_decimal(v, token)?)
            } else if let Some(v) = token.strip_prefix("seq=") {
                Component::from_sequence_number(parse_decimal(v, token)?)
            } else if let Some(v) = token.strip_prefix("t=") {
                Component::from_timestamp(parse_decimal(v, token)?)
            } else {
                Component::generic(unescape_generic(token)?)
            };
            name.push(component);
        }
        Ok(name)
    }

    pub fn len(&self) -> usize {
        self.components.len()
    }

    pub fn is_empty(&self) -> bool {
        self.components.is_empty()
    }

    pub fn push(&mut self, component: Component) {
        self.components.push(component);
    }

    pub fn append(mut self, component: Component) -> Self {
        self.push(component);
        self
    }

    pub fn append_str(self, token: &str) -> Self {
        self.append(Component::generic(token))
    }

    pub fn append_version(self, version: u64) -> Self {
        self.append(Component::from_version(version))
    }

    pub fn append_timestamp(self, timestamp_us: u64) -> Self {
        self.append(Component::from_timestamp(timestamp_us))
    }

    pub fn append_segment(self, seg_no: u64) -> Self {
        self.append(Component::from_segment(seg_no))
    }

    pub fn append_sequence_number(self, seq_no: u64) -> Self {
        self.append(Component::from_sequence_number(seq_no))
    }

    pub fn append_name(mut self, other: &Name) -> Self {
        self.components.extend(other.components.iter().cloned());
        self
    }

    /// Component at `index`; negative indices count from the end.
    pub fn at(&self, index: isize) -> Option<&Component> {
        let idx = if index < 0 {
            self.components.len().checked_sub(index.unsigned_abs())?
        } else {
            index as usize
        };
        self.components.get(idx)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Component> {
        self.components.iter()
    }

    /// First `count` components; negative `count` drops components from the
    /// end.
    pub fn prefix(&self, count: isize) -> Name {
        let n = if count < 0 {
            self.components.len().saturating_sub(count.unsigned_abs())
        } else {
            (count as usize).min(self.components.len())
        };
        Name {
            components: self.components[..n].to_vec(),
        }
    }

    /// Sub-name starting at `offset` (negative counts from the end).
    pub fn sub_name(&self, offset: isize) -> Name {
        let start = if offset < 0 {
            self.components.len().saturating_sub(offset.unsigned_abs())
        } else {
            (offset as usize).min(self.components.len())
        };
        Name {
            components: self.components[start..].to_vec(),
        }
    }

    pub fn is_prefix_of(&self, other: &Name) -> bool {
        self.components.len() <= other.components.len()
            && self
                .components
                .iter()
                .zip(other.components.iter())
                .all(|(a, b)| a == b)
    }

    pub fn to_uri(&self) -> String {
        if self.components.is_empty() {
            return "/".to_string();
        }
        let mut out = String::new();
        for c in &self.components {
            out.push('/');
            out.push_str(&c.to_uri());
        }
        out
    }

    /// TLV wire encoding of the whole Name element.
    pub fn encode(&self) -> Bytes {
        let mut inner = BytesMut::new();
        for c in &self.components {
            c.encode_into(&mut inner);
        }
        let mut buf = BytesMut::new();
        tlv::write_tlv(&mut buf, TLV_NAME, &inner);
        buf.freeze()
    }

    /// Decodes the component list of a Name element (the TLV value, without
    /// the outer type/length).
    pub fn decode_value(mut value: Bytes) -> NdnRtcResult<Self> {
        let mut name = Name::new();
        while !value.is_empty() {
            let (typ, v) = tlv::read_tlv(&mut value)?;
            name.push(Component::decode(typ, v));
        }
        Ok(name)
    }

    /// Decodes a full Name TLV element.
    pub fn decode(buf: &mut Bytes) -> NdnRtcResult<Self> {
        let (typ, value) = tlv::read_tlv(buf)?;
        if typ != TLV_NAME {
            return Err(NdnRtcError::MalformedPacket(format!(
                "expected Name element, got tlv type {}",
                typ
            )));
        }
        Name::decode_value(value)
    }
}

impl fmt::Debug for Name {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_uri())
    }
}

impl fmt::Display for Name {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_uri())
    }
}

impl From<&str> for Name {
    /// Builds a name of generic components from a plain path. Typed
    /// components must go through [`Name::from_uri`] or the append methods.
    fn from(path: &str) -> Self {
        let mut name = Name::new();
        for token in path.split('/').filter(|t| !t.is_empty()) {
            name.push(Component::generic(token));
        }
        name
    }
}

fn parse_decimal(digits: &str, token: &str) -> NdnRtcResult<u64> {
    digits
        .parse::<u64>()
        .map_err(|_| NdnRtcError::BadName(format!("bad numeric component '{}'", token)))
}

fn unescape_generic(token: &str) -> NdnRtcResult<Vec<u8>> {
    let bytes = token.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            if i + 3 > bytes.len() {
                return Err(NdnRtcError::BadName(format!("bad escape in '{}'", token)));
            }
            let hex = std::str::from_utf8(&bytes[i + 1..i + 3])
                .ok()
                .and_then(|h| u8::from_str_radix(h, 16).ok())
                .ok_or_else(|| NdnRtcError::BadName(format!("bad escape in '{}'", token)))?;
            out.push(hex);
            i += 3;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn typed_components_round_trip() {
        let name = Name::from("/producer/ndnrtc")
            .append_version(4)
            .append_str("video")
            .append_str("camera")
            .append_sequence_number(123)
            .append_segment(5);

        assert_eq!(name.at(2).unwrap().to_version().unwrap(), 4);
        assert_eq!(name.at(-2).unwrap().to_sequence_number().unwrap(), 123);
        assert_eq!(name.at(-1).unwrap().to_segment().unwrap(), 5);
        assert_eq!(
            name.to_uri(),
            "/producer/ndnrtc/v=4/video/camera/seq=123/seg=5"
        );
    }

    #[test]
    fn uri_parse_matches_builder() {
        let built = Name::from("/a/b")
            .append_version(4)
            .append_sequence_number(7)
            .append_segment(0);
        let parsed = Name::from_uri("/a/b/v=4/seq=7/seg=0").unwrap();
        assert_eq!(built, parsed);
    }

    #[test]
    fn uri_unescapes_generic_components() {
        let parsed = Name::from_uri("/hello%20world/x").unwrap();
        assert_eq!(parsed.at(0).unwrap().value(), b"hello world");
    }

    #[test]
    fn tlv_encode_decode_round_trips() {
        let name = Name::from("/producer/ndnrtc")
            .append_version(4)
            .append_str("video")
            .append_str("camera")
            .append_timestamp(1_234_567)
            .append_sequence_number(42)
            .append_segment(3);
        let mut wire = name.encode();
        let decoded = Name::decode(&mut wire).unwrap();
        assert_eq!(decoded, name);
        assert!(wire.is_empty(), "no trailing bytes expected");
    }

    #[test]
    fn prefix_and_subname_with_negative_indices() {
        let name = Name::from("/a/b/c/d");
        assert_eq!(name.prefix(-1).to_uri(), "/a/b/c");
        assert_eq!(name.prefix(2).to_uri(), "/a/b");
        assert_eq!(name.sub_name(-2).to_uri(), "/c/d");
        assert!(name.prefix(2).is_prefix_of(&name));
        assert!(!name.is_prefix_of(&name.prefix(2)));
    }

    #[test]
    fn canonical_order_sorts_by_type_then_length_then_value() {
        let generic = Component::generic("z");
        let segment = Component::from_segment(0);
        assert!(generic < segment, "generic (type 8) before segment (type 50)");

        let short = Component::generic("b");
        let long = Component::generic("aa");
        assert!(short < long, "shorter value sorts first");
    }

    #[test]
    fn sequence_numbers_order_numerically_within_same_width() {
        let a = Name::from("/s").append_sequence_number(100);
        let b = Name::from("/s").append_sequence_number(101);
        assert!(a < b);
        // width growth keeps ordering: 255 (1 byte) < 256 (2 bytes)
        let c = Name::from("/s").append_sequence_number(255);
        let d = Name::from("/s").append_sequence_number(256);
        assert!(c < d);
    }
}
