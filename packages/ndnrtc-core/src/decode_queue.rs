//! Short decoder-facing ring of decoded images.
//!
//! Frames are decoded on push and held keyed by their sample sequence
//! number, so a reader can walk them forward or backward (reverse playback
//! pushes a key frame first, then the GOP's delta frames after it). The
//! cursor seeks by relative offsets; eviction drops the entry farthest from
//! the cursor, which keeps at least one GOP resident in either playback
//! direction. Capacity is typically three GOPs.

use std::collections::BTreeMap;

use bytes::Bytes;

use crate::packets::FrameType;

/// A decoded image. The pixel layout is the decoder's business; the engine
/// treats it as opaque bytes plus dimensions.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DecodedImage {
    pub width: u32,
    pub height: u32,
    pub data: Bytes,
}

impl DecodedImage {
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// Video decoding capability. Codecs are out of the engine's scope.
pub trait FrameDecoder: Send {
    /// Decodes one encoded frame payload; `None` on decode failure.
    fn decode(&mut self, payload: &[u8], frame_type: FrameType) -> Option<DecodedImage>;
}

/// Hands the payload through unchanged. Useful for raw dumps and tests.
pub struct PassthroughDecoder;

impl FrameDecoder for PassthroughDecoder {
    fn decode(&mut self, payload: &[u8], _frame_type: FrameType) -> Option<DecodedImage> {
        Some(DecodedImage {
            width: 0,
            height: 0,
            data: Bytes::copy_from_slice(payload),
        })
    }
}

/// Bounded ring of decoded frames.
pub struct DecodeQueue {
    capacity: usize,
    decoder: Box<dyn FrameDecoder>,
    entries: BTreeMap<u64, DecodedImage>,
    cursor: Option<u64>,
    empty: DecodedImage,
}

impl DecodeQueue {
    pub fn new(capacity: usize, decoder: Box<dyn FrameDecoder>) -> Self {
        DecodeQueue {
            capacity: capacity.max(1),
            decoder,
            entries: BTreeMap::new(),
            cursor: None,
            empty: DecodedImage::default(),
        }
    }

    /// Decodes and inserts a frame in sequence order. At capacity, the
    /// entry farthest from the cursor is evicted.
    pub fn push(&mut self, seq_no: u64, frame_type: FrameType, payload: &[u8]) -> bool {
        let Some(image) = self.decoder.decode(payload, frame_type) else {
            log::warn!("[DecodeQueue] frame {} failed to decode", seq_no);
            return false;
        };
        self.entries.insert(seq_no, image);
        if self.cursor.is_none() {
            self.cursor = Some(seq_no);
        }

        if self.entries.len() > self.capacity {
            let cursor = self.cursor.unwrap_or(seq_no);
            let first = *self.entries.keys().next().unwrap();
            let last = *self.entries.keys().next_back().unwrap();
            let evict = if cursor.abs_diff(first) >= cursor.abs_diff(last) {
                first
            } else {
                last
            };
            self.entries.remove(&evict);
            if self.cursor == Some(evict) {
                self.cursor = self.entries.keys().next().copied();
            }
        }
        true
    }

    /// Moves the cursor by `delta` positions; returns the achieved delta
    /// (0 when already at an edge).
    pub fn seek(&mut self, delta: i32) -> i32 {
        let keys: Vec<u64> = self.entries.keys().copied().collect();
        if keys.is_empty() {
            return 0;
        }
        let current = match self.cursor.and_then(|c| keys.binary_search(&c).ok()) {
            Some(i) => i,
            None => {
                self.cursor = Some(keys[0]);
                0
            }
        };
        let target = (current as i64 + delta as i64).clamp(0, keys.len() as i64 - 1) as usize;
        self.cursor = Some(keys[target]);
        (target as i64 - current as i64) as i32
    }

    /// Image at `cursor + skip`, or an empty image when absent.
    pub fn get(&self, skip: i32) -> &DecodedImage {
        let keys: Vec<u64> = self.entries.keys().copied().collect();
        let Some(current) = self.cursor.and_then(|c| keys.binary_search(&c).ok()) else {
            return &self.empty;
        };
        let idx = current as i64 + skip as i64;
        if idx < 0 || idx >= keys.len() as i64 {
            return &self.empty;
        }
        self.entries.get(&keys[idx as usize]).unwrap_or(&self.empty)
    }

    /// Image under the cursor.
    pub fn current(&self) -> &DecodedImage {
        self.get(0)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.cursor = None;
    }
}
