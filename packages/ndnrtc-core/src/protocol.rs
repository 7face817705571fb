//! Protocol constants shared by the consumer engine and the publisher.
//!
//! Values mirror what v4 producers put on the wire; changing them breaks
//! interop with deployed streams.

/// Namespace API version carried in every name (`v=4` component).
pub const NAME_API_VERSION: u64 = 4;

/// Content type string carried in frame meta packets.
pub const FRAME_CONTENT_TYPE: &str = "ndnrtcv4";

/// Default wire length of one segment, bytes. Overridable through
/// `NDNRTC_SEGMENT_SIZE`.
pub const DEFAULT_SEGMENT_SIZE: usize = 8000;

/// Default Interest lifetime, ms.
pub const DEFAULT_INTEREST_LIFETIME_MS: u64 = 2000;

/// Parity-to-data ratio for FEC publishing.
pub const PARITY_RATIO: f64 = 1.0;

/// Smallest pipeline the interest control will ever allow.
pub const MIN_PIPELINE_SIZE: usize = 3;

/// Initial DRD estimation before any reply has been observed, ms.
pub const INITIAL_DRD_ESTIMATE_MS: u32 = 150;

/// Window for the DRD sliding averages, ms.
pub const DRD_WINDOW_MS: i64 = 200;

/// No segment arrival for this long is a starvation event.
pub const STARVATION_WINDOW_MS: u64 = 500;

/// Capacity of the slot pool backing the frame buffer.
pub const SLOT_POOL_CAPACITY: usize = 500;

/// Number of data segments requested per sample before any estimate exists.
pub const DEFAULT_DATA_OUTSTANDING: usize = 3;

/// Number of parity segments requested per sample before any estimate exists.
pub const DEFAULT_PARITY_OUTSTANDING: usize = 1;

/// Refresh period for the `_live` metadata, ms.
pub const LIVE_META_REFRESH_MS: u64 = 5000;

/// GOP length assumed for key-frame playback deadlines when the stream meta
/// has not provided one.
pub const DEFAULT_GOP_SIZE: u32 = 30;

/// Interests re-expressed for a deadline breach are queued this far ahead
/// of regular batches, ms.
pub const RTX_DEADLINE_MS: i64 = 100;
