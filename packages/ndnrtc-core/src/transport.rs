//! The named-data transport boundary.
//!
//! The engine talks to a forwarder through the [`Face`] trait: Interests go
//! out through [`Face::express_interest`], replies come back as
//! [`FaceEvent`]s on a channel. Expression never blocks; face-level Interest
//! lifetimes assert [`FaceEvent::Timeout`] when no Data arrives in time.
//!
//! [`TcpFace`] is a thin adapter speaking the NDN TLV packet format over a
//! TCP connection to a local forwarder. Forwarding, routing, and the content
//! store are not this crate's concern.

use std::collections::VecDeque;
use std::time::Duration;

use bytes::{Buf, Bytes, BytesMut};
use rand::Rng;
use sha2::{Digest, Sha256};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::error::{NdnRtcError, NdnRtcResult};
use crate::name::{Component, Name, TLV_NAME};
use crate::protocol;
use crate::tlv;

const TLV_INTEREST: u64 = 5;
const TLV_DATA: u64 = 6;
const TLV_NONCE: u64 = 10;
const TLV_INTEREST_LIFETIME: u64 = 12;
const TLV_MUST_BE_FRESH: u64 = 18;
const TLV_META_INFO: u64 = 20;
const TLV_CONTENT: u64 = 21;
const TLV_SIGNATURE_INFO: u64 = 22;
const TLV_SIGNATURE_VALUE: u64 = 23;
const TLV_CONTENT_TYPE: u64 = 24;
const TLV_FRESHNESS_PERIOD: u64 = 25;
const TLV_FINAL_BLOCK_ID: u64 = 26;
const TLV_SIGNATURE_TYPE: u64 = 27;
const TLV_KEY_LOCATOR: u64 = 28;
const TLV_CAN_BE_PREFIX: u64 = 33;

const TLV_LP_PACKET: u64 = 100;
const TLV_LP_FRAGMENT: u64 = 80;
const TLV_LP_NACK: u64 = 800;
const TLV_LP_NACK_REASON: u64 = 801;

// ─────────────────────────────────────────────────────────────────────────────
// Interest
// ─────────────────────────────────────────────────────────────────────────────

/// An Interest packet.
#[derive(Debug, Clone, PartialEq)]
pub struct Interest {
    pub name: Name,
    pub can_be_prefix: bool,
    pub must_be_fresh: bool,
    pub nonce: u32,
    pub lifetime_ms: u64,
}

impl Interest {
    /// New Interest with a fresh random nonce and the default lifetime.
    pub fn new(name: Name) -> Self {
        Interest {
            name,
            can_be_prefix: false,
            must_be_fresh: false,
            nonce: rand::thread_rng().gen(),
            lifetime_ms: protocol::DEFAULT_INTEREST_LIFETIME_MS,
        }
    }

    pub fn with_lifetime(mut self, lifetime_ms: u64) -> Self {
        self.lifetime_ms = lifetime_ms;
        self
    }

    pub fn with_must_be_fresh(mut self, fresh: bool) -> Self {
        self.must_be_fresh = fresh;
        self
    }

    pub fn with_can_be_prefix(mut self, can_be_prefix: bool) -> Self {
        self.can_be_prefix = can_be_prefix;
        self
    }

    /// Same Interest under a fresh nonce, for retransmission.
    pub fn refreshed(&self) -> Self {
        let mut copy = self.clone();
        copy.nonce = rand::thread_rng().gen();
        copy
    }

    pub fn encode(&self) -> Bytes {
        let mut inner = BytesMut::new();
        inner.extend_from_slice(&self.name.encode());
        if self.can_be_prefix {
            tlv::write_tlv(&mut inner, TLV_CAN_BE_PREFIX, &[]);
        }
        if self.must_be_fresh {
            tlv::write_tlv(&mut inner, TLV_MUST_BE_FRESH, &[]);
        }
        tlv::write_tlv(&mut inner, TLV_NONCE, &self.nonce.to_be_bytes());
        tlv::write_tlv(
            &mut inner,
            TLV_INTEREST_LIFETIME,
            &tlv::encode_nonneg_integer(self.lifetime_ms),
        );
        let mut buf = BytesMut::new();
        tlv::write_tlv(&mut buf, TLV_INTEREST, &inner);
        buf.freeze()
    }

    pub fn decode(mut wire: Bytes) -> NdnRtcResult<Self> {
        let (typ, mut value) = tlv::read_tlv(&mut wire)?;
        if typ != TLV_INTEREST {
            return Err(NdnRtcError::MalformedPacket(format!(
                "expected Interest, got tlv {}",
                typ
            )));
        }
        let name = Name::decode(&mut value)?;
        let mut interest = Interest {
            name,
            can_be_prefix: false,
            must_be_fresh: false,
            nonce: 0,
            lifetime_ms: protocol::DEFAULT_INTEREST_LIFETIME_MS,
        };
        while !value.is_empty() {
            let (t, v) = tlv::read_tlv(&mut value)?;
            match t {
                TLV_CAN_BE_PREFIX => interest.can_be_prefix = true,
                TLV_MUST_BE_FRESH => interest.must_be_fresh = true,
                TLV_NONCE if v.len() == 4 => {
                    interest.nonce = u32::from_be_bytes([v[0], v[1], v[2], v[3]])
                }
                TLV_INTEREST_LIFETIME => {
                    interest.lifetime_ms = tlv::decode_nonneg_integer(&v)?;
                }
                _ => {} // unknown non-critical elements are skipped
            }
        }
        Ok(interest)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Data
// ─────────────────────────────────────────────────────────────────────────────

/// Data packet content type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ContentType {
    #[default]
    Blob,
    Link,
    Key,
    /// Application-level nack: the producer answered but has no data.
    Nack,
    Other(u64),
}

impl ContentType {
    fn to_number(self) -> u64 {
        match self {
            ContentType::Blob => 0,
            ContentType::Link => 1,
            ContentType::Key => 2,
            ContentType::Nack => 3,
            ContentType::Other(n) => n,
        }
    }

    fn from_number(n: u64) -> Self {
        match n {
            0 => ContentType::Blob,
            1 => ContentType::Link,
            2 => ContentType::Key,
            3 => ContentType::Nack,
            other => ContentType::Other(other),
        }
    }
}

/// Signature type carried in a Data packet's SignatureInfo.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SignatureType {
    /// Integrity-only SHA-256 digest signature (segments ride on the signed
    /// manifest instead of individual signatures).
    #[default]
    DigestSha256,
    WithKey(u64),
}

impl SignatureType {
    fn to_number(self) -> u64 {
        match self {
            SignatureType::DigestSha256 => 0,
            SignatureType::WithKey(n) => n,
        }
    }

    fn from_number(n: u64) -> Self {
        match n {
            0 => SignatureType::DigestSha256,
            other => SignatureType::WithKey(other),
        }
    }
}

/// Data packet MetaInfo.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct MetaInfo {
    pub content_type: ContentType,
    pub freshness_ms: u64,
    pub final_block_id: Option<Component>,
}

/// A Data packet.
#[derive(Debug, Clone, PartialEq)]
pub struct Data {
    pub name: Name,
    pub meta_info: MetaInfo,
    pub content: Bytes,
    pub signature_type: SignatureType,
    pub key_locator: Option<Name>,
    pub signature_value: Bytes,
}

impl Data {
    pub fn new(name: Name) -> Self {
        Data {
            name,
            meta_info: MetaInfo::default(),
            content: Bytes::new(),
            signature_type: SignatureType::DigestSha256,
            key_locator: None,
            signature_value: Bytes::new(),
        }
    }

    pub fn set_content(&mut self, content: impl Into<Bytes>) {
        self.content = content.into();
    }

    pub fn encode(&self) -> Bytes {
        let mut inner = BytesMut::new();
        inner.extend_from_slice(&self.name.encode());

        let mut meta = BytesMut::new();
        if self.meta_info.content_type != ContentType::Blob {
            tlv::write_tlv(
                &mut meta,
                TLV_CONTENT_TYPE,
                &tlv::encode_nonneg_integer(self.meta_info.content_type.to_number()),
            );
        }
        if self.meta_info.freshness_ms > 0 {
            tlv::write_tlv(
                &mut meta,
                TLV_FRESHNESS_PERIOD,
                &tlv::encode_nonneg_integer(self.meta_info.freshness_ms),
            );
        }
        if let Some(fbi) = &self.meta_info.final_block_id {
            let fbi_name = Name::new().append(fbi.clone()).encode();
            // FinalBlockId wraps the bare component; strip the Name header
            let mut fbi_bytes = fbi_name;
            let _ = tlv::read_var_number(&mut fbi_bytes); // name type
            let _ = tlv::read_var_number(&mut fbi_bytes); // name length
            tlv::write_tlv(&mut meta, TLV_FINAL_BLOCK_ID, &fbi_bytes);
        }
        tlv::write_tlv(&mut inner, TLV_META_INFO, &meta);

        tlv::write_tlv(&mut inner, TLV_CONTENT, &self.content);

        let mut siginfo = BytesMut::new();
        tlv::write_tlv(
            &mut siginfo,
            TLV_SIGNATURE_TYPE,
            &tlv::encode_nonneg_integer(self.signature_type.to_number()),
        );
        if let Some(locator) = &self.key_locator {
            tlv::write_tlv(&mut siginfo, TLV_KEY_LOCATOR, &locator.encode());
        }
        tlv::write_tlv(&mut inner, TLV_SIGNATURE_INFO, &siginfo);
        tlv::write_tlv(&mut inner, TLV_SIGNATURE_VALUE, &self.signature_value);

        let mut buf = BytesMut::new();
        tlv::write_tlv(&mut buf, TLV_DATA, &inner);
        buf.freeze()
    }

    pub fn decode(mut wire: Bytes) -> NdnRtcResult<Self> {
        let (typ, value) = tlv::read_tlv(&mut wire)?;
        if typ != TLV_DATA {
            return Err(NdnRtcError::MalformedPacket(format!(
                "expected Data, got tlv {}",
                typ
            )));
        }
        Self::decode_value(value)
    }

    fn decode_value(mut value: Bytes) -> NdnRtcResult<Self> {
        let name = Name::decode(&mut value)?;
        let mut data = Data::new(name);
        while !value.is_empty() {
            let (t, mut v) = tlv::read_tlv(&mut value)?;
            match t {
                TLV_META_INFO => {
                    while !v.is_empty() {
                        let (mt, mv) = tlv::read_tlv(&mut v)?;
                        match mt {
                            TLV_CONTENT_TYPE => {
                                data.meta_info.content_type =
                                    ContentType::from_number(tlv::decode_nonneg_integer(&mv)?);
                            }
                            TLV_FRESHNESS_PERIOD => {
                                data.meta_info.freshness_ms = tlv::decode_nonneg_integer(&mv)?;
                            }
                            TLV_FINAL_BLOCK_ID => {
                                let component_name = Name::decode_value(mv)?;
                                data.meta_info.final_block_id =
                                    component_name.at(0).cloned();
                            }
                            _ => {}
                        }
                    }
                }
                TLV_CONTENT => data.content = v,
                TLV_SIGNATURE_INFO => {
                    while !v.is_empty() {
                        let (st, sv) = tlv::read_tlv(&mut v)?;
                        match st {
                            TLV_SIGNATURE_TYPE => {
                                data.signature_type =
                                    SignatureType::from_number(tlv::decode_nonneg_integer(&sv)?);
                            }
                            TLV_KEY_LOCATOR => {
                                let mut kl = sv;
                                data.key_locator = Some(Name::decode(&mut kl)?);
                            }
                            _ => {}
                        }
                    }
                }
                TLV_SIGNATURE_VALUE => data.signature_value = v,
                _ => {}
            }
        }
        Ok(data)
    }

    /// SHA-256 of the full wire encoding. Manifests list these digests.
    pub fn implicit_digest(&self) -> [u8; 32] {
        let mut hasher = Sha256::new();
        hasher.update(self.encode());
        hasher.finalize().into()
    }

    /// Name extended with the implicit-digest component.
    pub fn full_name(&self) -> Name {
        self.name
            .clone()
            .append(Component::implicit_digest(self.implicit_digest()))
    }

    /// Last segment number declared by the producer, if any.
    pub fn final_segment(&self) -> Option<u64> {
        self.meta_info
            .final_block_id
            .as_ref()
            .and_then(|c| c.to_segment().ok())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Face
// ─────────────────────────────────────────────────────────────────────────────

/// Reason attached to a network-level nack.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NackReason {
    Congestion,
    Duplicate,
    NoRoute,
    Unspecified,
}

impl NackReason {
    fn from_number(n: u64) -> Self {
        match n {
            50 => NackReason::Congestion,
            100 => NackReason::Duplicate,
            150 => NackReason::NoRoute,
            _ => NackReason::Unspecified,
        }
    }
}

/// Reply events delivered by a face adapter.
#[derive(Debug, Clone)]
pub enum FaceEvent {
    Data { interest: Interest, data: Data },
    Timeout { interest: Interest },
    NetworkNack { interest: Interest, reason: NackReason },
}

/// Outbound half of the transport. Expression is non-blocking; replies and
/// timeouts arrive as [`FaceEvent`]s on the channel handed to the adapter.
pub trait Face: Send {
    fn express_interest(&mut self, interest: &Interest) -> NdnRtcResult<()>;
}

// ─────────────────────────────────────────────────────────────────────────────
// TCP face adapter
// ─────────────────────────────────────────────────────────────────────────────

/// Face adapter over a TCP connection to a forwarder (default port 6363).
pub struct TcpFace {
    cmd_tx: mpsc::UnboundedSender<Interest>,
}

impl TcpFace {
    /// Connects and spawns the I/O task. Replies are delivered on
    /// `event_tx`; the task exits when `cancel` fires or the peer closes.
    pub async fn connect(
        addr: &str,
        event_tx: mpsc::UnboundedSender<FaceEvent>,
        cancel: CancellationToken,
    ) -> NdnRtcResult<Self> {
        let stream = TcpStream::connect(addr).await?;
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        tokio::spawn(run_face_io(stream, cmd_rx, event_tx, cancel));
        Ok(TcpFace { cmd_tx })
    }
}

impl Face for TcpFace {
    fn express_interest(&mut self, interest: &Interest) -> NdnRtcResult<()> {
        self.cmd_tx.send(interest.clone()).map_err(|_| {
            NdnRtcError::InvalidState("face i/o task has terminated".to_string())
        })
    }
}

struct PendingInterest {
    interest: Interest,
    deadline: Instant,
}

async fn run_face_io(
    mut stream: TcpStream,
    mut cmd_rx: mpsc::UnboundedReceiver<Interest>,
    event_tx: mpsc::UnboundedSender<FaceEvent>,
    cancel: CancellationToken,
) {
    let mut pending: VecDeque<PendingInterest> = VecDeque::new();
    let mut read_buf = BytesMut::with_capacity(64 * 1024);

    loop {
        let next_deadline = pending
            .iter()
            .map(|p| p.deadline)
            .min()
            .unwrap_or_else(|| Instant::now() + Duration::from_secs(3600));

        tokio::select! {
            _ = cancel.cancelled() => {
                log::debug!("[TcpFace] cancelled, {} interests pending", pending.len());
                break;
            }

            cmd = cmd_rx.recv() => {
                let Some(interest) = cmd else { break };
                let wire = interest.encode();
                if let Err(e) = stream.write_all(&wire).await {
                    log::warn!("[TcpFace] write failed: {}", e);
                    break;
                }
                let deadline = Instant::now() + Duration::from_millis(interest.lifetime_ms);
                pending.push_back(PendingInterest { interest, deadline });
            }

            read = stream.read_buf(&mut read_buf) => {
                match read {
                    Ok(0) => {
                        log::warn!("[TcpFace] connection closed by forwarder");
                        break;
                    }
                    Ok(_) => drain_packets(&mut read_buf, &mut pending, &event_tx),
                    Err(e) => {
                        log::warn!("[TcpFace] read failed: {}", e);
                        break;
                    }
                }
            }

            _ = tokio::time::sleep_until(next_deadline), if !pending.is_empty() => {
                let now = Instant::now();
                let mut still_pending = VecDeque::new();
                for p in pending.drain(..) {
                    if p.deadline <= now {
                        let _ = event_tx.send(FaceEvent::Timeout { interest: p.interest });
                    } else {
                        still_pending.push_back(p);
                    }
                }
                pending = still_pending;
            }
        }
    }
}

/// Consumes complete TLV packets from the read buffer and dispatches them
/// against the pending-interest list.
fn drain_packets(
    read_buf: &mut BytesMut,
    pending: &mut VecDeque<PendingInterest>,
    event_tx: &mpsc::UnboundedSender<FaceEvent>,
) {
    loop {
        let Some(packet_len) = complete_packet_len(read_buf) else {
            return;
        };
        let packet = read_buf.split_to(packet_len).freeze();
        match dispatch_packet(packet, pending) {
            Ok(events) => {
                for ev in events {
                    let _ = event_tx.send(ev);
                }
            }
            Err(e) => log::warn!("[TcpFace] dropping malformed packet: {}", e),
        }
    }
}

/// Length of the first complete TLV packet in the buffer, if any.
fn complete_packet_len(buf: &BytesMut) -> Option<usize> {
    let mut probe = Bytes::copy_from_slice(&buf[..buf.len().min(18)]);
    let before = probe.remaining();
    let _typ = tlv::read_var_number(&mut probe).ok()?;
    let len = tlv::read_var_number(&mut probe).ok()? as usize;
    let header = before - probe.remaining();
    let total = header + len;
    (buf.len() >= total).then_some(total)
}

fn dispatch_packet(
    packet: Bytes,
    pending: &mut VecDeque<PendingInterest>,
) -> NdnRtcResult<Vec<FaceEvent>> {
    let mut probe = packet.clone();
    let (typ, value) = tlv::read_tlv(&mut probe)?;

    match typ {
        TLV_DATA => {
            let data = Data::decode(packet)?;
            Ok(satisfy_pending(pending, &data))
        }
        TLV_LP_PACKET => {
            let mut nack_reason = None;
            let mut fragment = None;
            let mut lp = value;
            while !lp.is_empty() {
                let (t, mut v) = tlv::read_tlv(&mut lp)?;
                match t {
                    TLV_LP_NACK => {
                        let mut reason = NackReason::Unspecified;
                        while !v.is_empty() {
                            let (nt, nv) = tlv::read_tlv(&mut v)?;
                            if nt == TLV_LP_NACK_REASON {
                                reason =
                                    NackReason::from_number(tlv::decode_nonneg_integer(&nv)?);
                            }
                        }
                        nack_reason = Some(reason);
                    }
                    TLV_LP_FRAGMENT => fragment = Some(v),
                    _ => {}
                }
            }

            let Some(fragment) = fragment else {
                return Ok(vec![]);
            };
            let mut inner_probe = fragment.clone();
            let (inner_type, _) = tlv::read_tlv(&mut inner_probe)?;
            match inner_type {
                TLV_DATA => {
                    let data = Data::decode(fragment)?;
                    Ok(satisfy_pending(pending, &data))
                }
                TLV_INTEREST if nack_reason.is_some() => {
                    let nacked = Interest::decode(fragment)?;
                    let reason = nack_reason.unwrap();
                    let mut events = vec![];
                    pending.retain(|p| {
                        if p.interest.name == nacked.name && p.interest.nonce == nacked.nonce {
                            events.push(FaceEvent::NetworkNack {
                                interest: p.interest.clone(),
                                reason,
                            });
                            false
                        } else {
                            true
                        }
                    });
                    Ok(events)
                }
                _ => Ok(vec![]),
            }
        }
        other => Err(NdnRtcError::MalformedPacket(format!(
            "unexpected packet type {}",
            other
        ))),
    }
}

/// One Data satisfies every pending Interest whose name is a prefix of it.
fn satisfy_pending(pending: &mut VecDeque<PendingInterest>, data: &Data) -> Vec<FaceEvent> {
    let mut events = vec![];
    pending.retain(|p| {
        if p.interest.name.is_prefix_of(&data.name) {
            events.push(FaceEvent::Data {
                interest: p.interest.clone(),
                data: data.clone(),
            });
            false
        } else {
            true
        }
    });
    events
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_name() -> Name {
        Name::from("/producer/ndnrtc")
            .append_version(4)
            .append_str("video")
            .append_str("camera")
            .append_sequence_number(10)
            .append_segment(0)
    }

    mod interest {
        use super::*;

        #[test]
        fn encode_decode_round_trips() {
            let interest = Interest::new(test_name())
                .with_lifetime(1500)
                .with_must_be_fresh(true)
                .with_can_be_prefix(true);
            let decoded = Interest::decode(interest.encode()).unwrap();
            assert_eq!(decoded, interest);
        }

        #[test]
        fn refreshed_changes_only_the_nonce() {
            let a = Interest::new(test_name()).with_lifetime(777);
            let b = a.refreshed();
            assert_eq!(a.name, b.name);
            assert_eq!(a.lifetime_ms, b.lifetime_ms);
            assert_ne!(a.nonce, b.nonce, "retransmission needs a fresh nonce");
        }
    }

    mod data {
        use super::*;

        fn test_data() -> Data {
            let mut d = Data::new(test_name());
            d.meta_info.freshness_ms = 33;
            d.meta_info.final_block_id = Some(Component::from_segment(4));
            d.set_content(vec![1u8, 2, 3, 4, 5]);
            d
        }

        #[test]
        fn encode_decode_round_trips() {
            let data = test_data();
            let decoded = Data::decode(data.encode()).unwrap();
            assert_eq!(decoded, data);
            assert_eq!(decoded.final_segment(), Some(4));
        }

        #[test]
        fn app_nack_content_type_round_trips() {
            let mut d = test_data();
            d.meta_info.content_type = ContentType::Nack;
            let decoded = Data::decode(d.encode()).unwrap();
            assert_eq!(decoded.meta_info.content_type, ContentType::Nack);
        }

        #[test]
        fn implicit_digest_changes_with_content() {
            let a = test_data();
            let mut b = test_data();
            b.set_content(vec![9u8; 5]);
            assert_ne!(a.implicit_digest(), b.implicit_digest());
            assert_eq!(a.implicit_digest(), test_data().implicit_digest());
        }

        #[test]
        fn full_name_ends_with_digest_component() {
            let d = test_data();
            let full = d.full_name();
            assert_eq!(full.len(), d.name.len() + 1);
            assert!(full.at(-1).unwrap().is_implicit_digest());
            assert_eq!(full.at(-1).unwrap().value(), d.implicit_digest());
        }
    }

    mod matching {
        use super::*;

        #[test]
        fn data_satisfies_prefix_interests() {
            let rightmost = Interest::new(test_name().prefix(-2)).with_must_be_fresh(true);
            let exact = Interest::new(test_name());
            let unrelated = Interest::new(Name::from("/other"));
            let mut pending: VecDeque<PendingInterest> = [&rightmost, &exact, &unrelated]
                .iter()
                .map(|i| PendingInterest {
                    interest: (*i).clone(),
                    deadline: Instant::now() + Duration::from_secs(1),
                })
                .collect();

            let mut data = Data::new(test_name());
            data.set_content(vec![0u8; 3]);
            let events = satisfy_pending(&mut pending, &data);

            assert_eq!(events.len(), 2, "rightmost and exact should both match");
            assert_eq!(pending.len(), 1, "unrelated interest stays pending");
        }

        #[test]
        fn packet_framing_handles_partial_reads() {
            let mut data = Data::new(test_name());
            data.set_content(vec![7u8; 100]);
            let wire = data.encode();

            let mut buf = BytesMut::new();
            buf.extend_from_slice(&wire[..10]);
            assert_eq!(complete_packet_len(&buf), None, "partial packet");

            buf.extend_from_slice(&wire[10..]);
            assert_eq!(complete_packet_len(&buf), Some(wire.len()));
        }
    }
}
