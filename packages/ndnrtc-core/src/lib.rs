//! NDN-RTC core - low-latency video/audio streaming over named data.
//!
//! This crate implements the consumer fetching engine for NDN-RTC v4
//! streams, together with the producer-side publisher whose wire output the
//! engine consumes. Consumers express Interests for individually named
//! packets carrying slices of encoded frames; the engine discovers the
//! producer's rate, pipelines requests ahead of playback, detects the live
//! edge, survives loss through FEC and targeted retransmissions, and feeds
//! a decoder at producer-declared intervals.
//!
//! # Architecture
//!
//! The crate is organized around the receive path:
//!
//! - [`name`] / [`namespace`]: the hierarchical name scheme
//! - [`transport`]: Interest/Data model and the [`Face`](transport::Face)
//!   boundary to a forwarder
//! - [`packets`] / [`fec`]: frame slicing, segment headers, manifests,
//!   metadata payloads, Reed-Solomon parity
//! - [`request`]: request lifecycle and the priority Interest queue
//! - [`buffer`] / [`playback_queue`]: per-sample assembly and playback
//!   ordering
//! - [`drd_estimator`], [`interest_control`], [`latency_control`],
//!   [`rtx_controller`]: the DRD-driven control plane
//! - [`pipeliner`] / [`pipeline_control`]: Interest batching and the
//!   startup/steady-state machine
//! - [`playout`] / [`playout_control`] / [`decode_queue`]: timed release of
//!   samples toward the decoder
//! - [`consumer`]: wiring plus the face-task event loop
//! - [`producer`]: the stream publisher
//!
//! # Scheduling
//!
//! Two cooperating tasks: the *face task* owns all control state and runs
//! the event loop; the *playout task* owns jitter timing and the decode
//! queue. The frame buffer and the playback queue are the only structures
//! shared between them, each behind its own mutex. Validation runs as
//! spawned tasks reporting back through a channel.
//!
//! # Capabilities
//!
//! The engine stays codec- and trust-agnostic through three traits:
//! [`FrameDecoder`](decode_queue::FrameDecoder) (decoding),
//! [`Verifier`](validator::Verifier) (trust policy), and
//! [`Signer`](producer::Signer) (producer signing).

pub mod buffer;
pub mod buffer_control;
pub mod clock;
pub mod config;
pub mod consumer;
pub mod decode_queue;
pub mod drd_estimator;
pub mod error;
pub mod estimators;
pub mod fec;
pub mod interest_control;
pub mod latency_control;
pub mod name;
pub mod namespace;
pub mod packets;
pub mod pipeline_control;
pub mod pipeliner;
pub mod playback_queue;
pub mod playout;
pub mod playout_control;
pub mod producer;
pub mod protocol;
pub mod request;
pub mod rtx_controller;
pub mod sample_estimator;
pub mod stats;
mod tlv;
pub mod transport;
pub mod validator;

// Re-export commonly used types at the crate root
pub use buffer::{Buffer, BufferSlot, SlotPool, SlotState, VerificationStatus};
pub use config::{ConsumerConfig, PublisherConfig};
pub use consumer::{Consumer, ConsumerHandle};
pub use decode_queue::{DecodeQueue, DecodedImage, FrameDecoder, PassthroughDecoder};
pub use error::{NdnRtcError, NdnRtcResult};
pub use name::{Component, Name};
pub use namespace::{NameComponents, NameFilter, NamespaceInfo, SampleClass, SegmentClass, StreamType};
pub use packets::{FrameType, LiveMeta, StreamMeta, VideoFramePacket};
pub use playout::{AudioRenderer, PlayoutSink};
pub use producer::{DigestSigner, EncodedFrame, PitEntry, Signer, VideoStream};
pub use stats::{Indicator, StatisticsStorage};
pub use transport::{Data, Face, FaceEvent, Interest, NackReason, TcpFace};
pub use validator::{AcceptAllVerifier, Verifier};
