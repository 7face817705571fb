//! Engine configuration.
//!
//! Defaults carry the protocol constants from [`crate::protocol`]; binaries
//! layer CLI/env overrides on top.

use serde::{Deserialize, Serialize};

use crate::protocol;

/// Consumer-side configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsumerConfig {
    /// Fixed pipeline size; 0 derives the pipeline from DRD and rate.
    pub pipeline_size: usize,
    /// Sequence-number stride between fetched samples.
    pub pipeline_step: i32,
    /// Override for the producer-declared sample rate; 0 uses `_live`.
    pub playback_rate: f64,
    /// Request and decode parity segments.
    pub use_fec: bool,
    /// Interest lifetime, ms.
    pub interest_lifetime_ms: u64,
    /// Segment wire length the producer publishes with.
    pub segment_size: usize,
    /// DRD estimation used before any reply has been observed, ms.
    pub initial_drd_ms: u32,
    /// No-arrival window treated as starvation, ms.
    pub starvation_window_ms: u64,
    /// Latency-control playout threshold coefficients
    /// (`threshold = alpha·DRD + beta·deviation`).
    pub threshold_alpha: f64,
    pub threshold_beta: f64,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        ConsumerConfig {
            pipeline_size: 0,
            pipeline_step: 1,
            playback_rate: 0.,
            use_fec: false,
            interest_lifetime_ms: protocol::DEFAULT_INTEREST_LIFETIME_MS,
            segment_size: protocol::DEFAULT_SEGMENT_SIZE,
            initial_drd_ms: protocol::INITIAL_DRD_ESTIMATE_MS,
            starvation_window_ms: protocol::STARVATION_WINDOW_MS,
            // the historical implementation shipped alpha = 4; its own tests
            // expect 2. Both remain reachable here.
            threshold_alpha: 2.,
            threshold_beta: 4.,
        }
    }
}

impl ConsumerConfig {
    /// True when the pipeline size should follow DRD instead of the fixed
    /// `pipeline_size`.
    pub fn pipeline_adjustable(&self) -> bool {
        self.pipeline_size == 0
    }
}

/// Publisher-side configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PublisherConfig {
    /// Segment wire length, bytes.
    pub segment_size: usize,
    /// Publish Reed-Solomon parity alongside data segments.
    pub use_fec: bool,
    /// Encoder frame rate, fps. Drives freshness periods.
    pub framerate: u32,
    /// Group-of-pictures length, frames.
    pub gop_size: u32,
    /// Encoded frame dimensions, pixels.
    pub width: u32,
    pub height: u32,
    /// Start bitrate, kbps.
    pub bitrate: u32,
    /// Human-readable stream description for the stream meta.
    pub description: String,
}

impl Default for PublisherConfig {
    fn default() -> Self {
        PublisherConfig {
            segment_size: protocol::DEFAULT_SEGMENT_SIZE,
            use_fec: true,
            framerate: 30,
            gop_size: protocol::DEFAULT_GOP_SIZE,
            width: 1280,
            height: 720,
            bitrate: 3000,
            description: "Streamed by ndnrtc".to_string(),
        }
    }
}

/// Freshness periods derived from the encoder settings, ms.
#[derive(Debug, Clone, Copy)]
pub struct Freshness {
    pub sample: u32,
    pub key_sample: u32,
    pub gop: u32,
    pub latest: u32,
    pub live: u32,
    pub meta: u32,
}

impl Freshness {
    pub fn from_publisher(config: &PublisherConfig) -> Self {
        let sample = 1000 / config.framerate.max(1);
        let key_sample = config.gop_size * sample;
        Freshness {
            sample,
            key_sample,
            gop: key_sample,
            latest: sample,
            live: key_sample,
            meta: 60_000,
        }
    }
}
