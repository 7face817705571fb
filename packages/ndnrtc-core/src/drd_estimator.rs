//! Data Retrieval Delay estimation.
//!
//! Two independent time-windowed averages: one fed by *original* replies
//! (producer echoed the Interest nonce) and one by *cached* replies.
//! Separating them keeps a burst of content-store hits during catch-up from
//! collapsing the RTT estimate and fooling the pipeline controller into
//! over-widening.

use crate::estimators::{Average, Window};

/// Which window an update landed in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrdKind {
    Original,
    Cached,
}

/// Emitted when a window's value moved; observers see the post-update value
/// and deviation.
#[derive(Debug, Clone, Copy)]
pub struct DrdUpdate {
    pub kind: DrdKind,
    pub value_ms: f64,
    pub deviation_ms: f64,
}

/// DRD estimator over original and cached reply delays.
pub struct DrdEstimator {
    initial_estimate_ms: f64,
    window_ms: i64,
    original: Average,
    cached: Average,
    generation_delay: Average,
}

impl DrdEstimator {
    pub fn new(initial_estimate_ms: u32, window_ms: i64) -> Self {
        DrdEstimator {
            initial_estimate_ms: initial_estimate_ms as f64,
            window_ms,
            original: Average::new(Window::time(window_ms)),
            cached: Average::new(Window::time(window_ms)),
            generation_delay: Average::new(Window::time(window_ms)),
        }
    }

    /// Feeds one reply delay. Returns an update when the corresponding
    /// average moved.
    pub fn new_value(&mut self, drd_ms: f64, is_original: bool, d_gen_ms: f64) -> Option<DrdUpdate> {
        if d_gen_ms > 0. {
            self.generation_delay.new_value(d_gen_ms);
        }

        let (avg, kind) = if is_original {
            (&mut self.original, DrdKind::Original)
        } else {
            (&mut self.cached, DrdKind::Cached)
        };
        let old = avg.value();
        avg.new_value(drd_ms);
        let new = avg.value();

        (old != new).then(|| DrdUpdate {
            kind,
            value_ms: new,
            deviation_ms: avg.deviation(),
        })
    }

    /// Original-reply average, falling back to the configured initial
    /// estimation before the first sample.
    pub fn original_estimation_ms(&self) -> f64 {
        if self.original.count() > 0 {
            self.original.value()
        } else {
            self.initial_estimate_ms
        }
    }

    /// Cached-reply average, with the same fallback.
    pub fn cached_estimation_ms(&self) -> f64 {
        if self.cached.count() > 0 {
            self.cached.value()
        } else {
            self.initial_estimate_ms
        }
    }

    pub fn original_average(&self) -> &Average {
        &self.original
    }

    pub fn cached_average(&self) -> &Average {
        &self.cached
    }

    pub fn generation_delay_average(&self) -> &Average {
        &self.generation_delay
    }

    /// Clears both DRD windows. The initial estimation and the
    /// generation-delay window are preserved.
    pub fn reset(&mut self) {
        self.original = Average::new(Window::time(self.window_ms));
        self.cached = Average::new(Window::time(self.window_ms));
    }
}
