//! Pipeline (lambda) control: how many samples may be outstanding.
//!
//! The controller keeps `pipeline_size ≤ pipeline_limit` at all times and
//! `lower_limit ≤ pipeline_limit ≤ upper_limit` after every DRD update. A
//! pluggable [`PipelineStrategy`] derives the bounds from DRD and sample
//! rate and decides how bursting and withholding move the limit.

use crate::drd_estimator::DrdEstimator;
use crate::protocol::MIN_PIPELINE_SIZE;
use crate::stats::{Indicator, StatisticsStorage};

/// Strategy for pipeline limit adjustment.
pub trait PipelineStrategy: Send {
    /// `(lower, upper)` limits for the current DRD and target sample rate.
    fn limits(&self, rate: f64, drd: &DrdEstimator) -> (usize, usize);
    /// New limit after a burst request.
    fn burst(&self, current: usize, lower: usize, upper: usize) -> usize;
    /// New limit after a withhold request.
    fn withhold(&self, current: usize, lower: usize, upper: usize) -> usize;
}

/// Default strategy:
/// - target limit `⌈2 · DRD · rate⌉` samples, lower-bounded by
///   [`MIN_PIPELINE_SIZE`], upper bound twice the target,
/// - burst raises the limit by half of its current value (clipped),
/// - withhold binary-searches downward between the lower limit and the
///   current limit.
pub struct StrategyDefault;

impl PipelineStrategy for StrategyDefault {
    fn limits(&self, rate: f64, drd: &DrdEstimator) -> (usize, usize) {
        let drd_sec = drd.original_estimation_ms() / 1000.;
        let target = (2. * drd_sec * rate).ceil() as usize;
        let lower = target.max(MIN_PIPELINE_SIZE);
        (lower, 2 * lower)
    }

    fn burst(&self, current: usize, _lower: usize, upper: usize) -> usize {
        (current + current / 2).min(upper).max(current)
    }

    fn withhold(&self, current: usize, lower: usize, _upper: usize) -> usize {
        if current <= lower {
            current
        } else {
            lower + (current - lower) / 2
        }
    }
}

/// Interest expression control.
pub struct InterestControl {
    initialized: bool,
    /// A fixed (user-pinned) limit ignores DRD updates.
    adjustable: bool,
    lower_limit: usize,
    limit: usize,
    upper_limit: usize,
    pipeline: usize,
    target_rate: f64,
    strategy: Box<dyn PipelineStrategy>,
    stats: StatisticsStorage,
}

impl InterestControl {
    pub fn new(strategy: Box<dyn PipelineStrategy>, stats: StatisticsStorage) -> Self {
        InterestControl {
            initialized: false,
            adjustable: true,
            lower_limit: MIN_PIPELINE_SIZE,
            limit: MIN_PIPELINE_SIZE,
            upper_limit: MIN_PIPELINE_SIZE * 2,
            pipeline: 0,
            target_rate: 0.,
            strategy,
            stats,
        }
    }

    /// Sets the sample rate and the initial pipeline limit. A non-zero
    /// `fixed_limit` pins the limit; zero derives it from DRD.
    pub fn initialize(&mut self, rate: f64, fixed_limit: usize, drd: &DrdEstimator) {
        self.target_rate = rate;
        self.adjustable = fixed_limit == 0;
        if self.adjustable {
            self.set_limits(drd);
        } else {
            self.lower_limit = fixed_limit.max(MIN_PIPELINE_SIZE);
            self.limit = self.lower_limit;
            self.upper_limit = self.limit * 2;
        }
        self.initialized = true;
        self.publish_stats();
        log::debug!("[InterestControl] initialized {}", self.snapshot());
    }

    pub fn reset(&mut self) {
        self.initialized = false;
        self.adjustable = true;
        self.pipeline = 0;
        self.lower_limit = MIN_PIPELINE_SIZE;
        self.limit = MIN_PIPELINE_SIZE;
        self.upper_limit = MIN_PIPELINE_SIZE * 2;
        self.target_rate = 0.;
        self.publish_stats();
    }

    pub fn pipeline_limit(&self) -> usize {
        self.limit
    }

    pub fn pipeline_size(&self) -> usize {
        self.pipeline
    }

    pub fn lower_limit(&self) -> usize {
        self.lower_limit
    }

    pub fn upper_limit(&self) -> usize {
        self.upper_limit
    }

    /// How many more samples may be requested.
    pub fn room(&self) -> isize {
        self.limit as isize - self.pipeline as isize
    }

    /// Counts a newly outstanding sample. `false` when there is no room.
    pub fn increment(&mut self) -> bool {
        if self.room() <= 0 {
            return false;
        }
        self.pipeline += 1;
        self.publish_stats();
        true
    }

    /// Counts a completed sample. `false` when nothing is outstanding.
    pub fn decrement(&mut self) -> bool {
        if self.pipeline == 0 {
            return false;
        }
        self.pipeline -= 1;
        self.publish_stats();
        true
    }

    /// Raises the limit per the strategy. `false` if it cannot move.
    pub fn burst(&mut self) -> bool {
        let new_limit = self
            .strategy
            .burst(self.limit, self.lower_limit, self.upper_limit);
        if new_limit == self.limit {
            return false;
        }
        self.change_limit(new_limit);
        log::debug!("[InterestControl] burst {}", self.snapshot());
        true
    }

    /// Lowers the limit per the strategy. `false` if already at the lower
    /// bound.
    pub fn withhold(&mut self) -> bool {
        let new_limit = self
            .strategy
            .withhold(self.limit, self.lower_limit, self.upper_limit);
        if new_limit == self.limit {
            return false;
        }
        self.change_limit(new_limit);
        log::debug!("[InterestControl] withhold {}", self.snapshot());
        true
    }

    /// Clamps the lower limit (the best pipeline found while adjusting).
    pub fn mark_lower_limit(&mut self, lower: usize) {
        self.lower_limit = lower.max(MIN_PIPELINE_SIZE);
        if self.upper_limit < self.lower_limit {
            self.upper_limit = self.lower_limit * 2;
        }
        if self.limit < self.lower_limit {
            self.change_limit(self.lower_limit);
        }
    }

    /// Recomputes the bounds from a fresh DRD value and clips the limit.
    pub fn on_drd_update(&mut self, drd: &DrdEstimator) {
        if !self.initialized || !self.adjustable {
            return;
        }
        self.set_limits(drd);
    }

    pub fn target_rate_update(&mut self, rate: f64, drd: &DrdEstimator) {
        self.target_rate = rate;
        if self.initialized && self.adjustable {
            self.set_limits(drd);
        }
    }

    /// A previously outstanding sample arrived.
    pub fn sample_arrived(&mut self) {
        self.decrement();
    }

    /// Symbolic pipeline state, e.g. `3-18[⬆︎⬆︎⬆︎◻︎◻︎◻︎◆] 3/6 (3)`:
    /// arrows are outstanding samples, boxes the remaining room, the
    /// diamond the current limit.
    pub fn snapshot(&self) -> String {
        let mut bar = String::new();
        for _ in 0..self.pipeline.min(64) {
            bar.push('⬆');
        }
        for _ in 0..(self.room().max(0) as usize).min(64) {
            bar.push('◻');
        }
        bar.push('◆');
        format!(
            "{}-{}[{}] {}/{} ({})",
            self.lower_limit,
            self.upper_limit,
            bar,
            self.pipeline,
            self.limit,
            self.room()
        )
    }

    fn set_limits(&mut self, drd: &DrdEstimator) {
        if self.target_rate <= 0. {
            return;
        }
        let (lower, upper) = self.strategy.limits(self.target_rate, drd);
        self.lower_limit = lower;
        self.upper_limit = upper;
        let clipped = self.limit.clamp(lower, upper);
        if clipped != self.limit {
            self.change_limit(clipped);
        } else {
            self.publish_stats();
        }
    }

    fn change_limit(&mut self, new_limit: usize) {
        self.limit = new_limit.clamp(self.lower_limit, self.upper_limit);
        self.publish_stats();
    }

    fn publish_stats(&self) {
        self.stats.set(Indicator::PipelineLimit, self.limit as f64);
        self.stats.set(Indicator::PipelineSize, self.pipeline as f64);
    }
}
