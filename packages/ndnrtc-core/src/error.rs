//! Centralized error types for the NDN-RTC core library.

use thiserror::Error;

use crate::name::Name;

/// Library-wide error type.
///
/// Per-request failures (timeouts, nacks) are not errors: they are
/// [`DataRequest`](crate::request::DataRequest) status transitions consumed
/// by subscribers. The variants here cover the conditions that components
/// surface to their callers.
#[derive(Debug, Error)]
pub enum NdnRtcError {
    /// A name cannot be parsed into [`NamespaceInfo`](crate::namespace::NamespaceInfo)
    /// (wrong API version, missing required component).
    #[error("bad name: {0}")]
    BadName(String),

    /// Interests handed to `Buffer::requested` do not share a sample prefix,
    /// or carry a rightmost (no segment) component.
    #[error("bad request set: {0}")]
    BadRequestSet(String),

    /// `Buffer::received` was called for a segment whose sample prefix is
    /// not active.
    #[error("unknown segment: {0}")]
    UnknownSegment(Name),

    /// A segment's implicit digest is not listed in the signed manifest, or
    /// the manifest itself failed trust-policy verification.
    #[error("verification failure for {0}")]
    VerificationFailure(Name),

    /// Required stream metadata could not be fetched (timeout or app-nack).
    /// Fatal for the consumer tool.
    #[error("stream meta unavailable: {0}")]
    MetaUnavailable(String),

    /// A wire packet failed to decode.
    #[error("malformed packet: {0}")]
    MalformedPacket(String),

    /// Component used outside of its lifecycle (started twice, etc.).
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// I/O error from the face adapter.
    #[error("face i/o: {0}")]
    FaceIo(#[from] std::io::Error),
}

impl NdnRtcError {
    /// Machine-readable error code.
    pub fn code(&self) -> &'static str {
        match self {
            Self::BadName(_) => "bad_name",
            Self::BadRequestSet(_) => "bad_request_set",
            Self::UnknownSegment(_) => "unknown_segment",
            Self::VerificationFailure(_) => "verification_failure",
            Self::MetaUnavailable(_) => "meta_unavailable",
            Self::MalformedPacket(_) => "malformed_packet",
            Self::InvalidState(_) => "invalid_state",
            Self::FaceIo(_) => "face_io",
        }
    }
}

/// Convenient Result alias for library operations.
pub type NdnRtcResult<T> = Result<T, NdnRtcError>;
