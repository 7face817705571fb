//! Latency control: detecting the live edge.
//!
//! Watches the inter-arrival times of *original* segments. While the
//! consumer drains caches it runs ahead of the production rate; once
//! arrivals stabilize at the rate-implied period it has reached the live
//! edge. The controller turns these observations into pipeline commands
//! ([`PipelineAdjust`]) consumed by the pipeline-control state machine, and
//! derives the playout threshold handed to playout control.

use crate::clock;
use crate::drd_estimator::{DrdEstimator, DrdUpdate};
use crate::estimators::{Average, Filter, Window};
use crate::protocol::MIN_PIPELINE_SIZE;
use crate::stats::{Indicator, StatisticsStorage};

/// Command for the pipeline-control state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineAdjust {
    IncreasePipeline,
    DecreasePipeline,
    KeepPipeline,
}

/// Declares an arrival run stable when consecutive inter-arrival times lie
/// within `±k · deviation` of the rate-implied period for `required`
/// consecutive samples.
pub struct StabilityEstimator {
    inter_arrival: Average,
    k: f64,
    required: u32,
    run: u32,
    stable: bool,
}

impl StabilityEstimator {
    pub fn new(k: f64, required: u32) -> Self {
        StabilityEstimator {
            inter_arrival: Average::new(Window::samples(10)),
            k,
            required,
            run: 0,
            stable: false,
        }
    }

    /// Feeds one inter-arrival delta against the target period.
    pub fn new_delta(&mut self, delta_ms: f64, target_period_ms: f64) {
        self.inter_arrival.new_value(delta_ms);
        // deviation floor keeps a perfectly regular run from requiring
        // exact equality
        let tolerance = (self.k * self.inter_arrival.deviation()).max(0.1 * target_period_ms);
        if (delta_ms - target_period_ms).abs() <= tolerance {
            self.run += 1;
        } else {
            self.run = 0;
        }
        self.stable = self.run >= self.required;
    }

    pub fn is_stable(&self) -> bool {
        self.stable
    }

    /// Mean observed inter-arrival, ms.
    pub fn mean_inter_arrival_ms(&self) -> f64 {
        self.inter_arrival.value()
    }

    pub fn reset(&mut self) {
        self.inter_arrival = Average::new(Window::samples(10));
        self.run = 0;
        self.stable = false;
    }
}

/// Flags a sudden DRD bump relative to the smoothed history.
pub struct DrdChangeEstimator {
    filter: Filter,
    sigmas: f64,
    min_change_ms: f64,
}

impl DrdChangeEstimator {
    pub fn new(sigmas: f64, min_change_ms: f64) -> Self {
        DrdChangeEstimator {
            filter: Filter::with_variation(1. / 8., 1. / 4.),
            sigmas,
            min_change_ms,
        }
    }

    /// Feeds a DRD sample; true when it jumped outside the expected band.
    pub fn new_drd(&mut self, drd_ms: f64) -> bool {
        let expected = self.filter.value();
        let band = (self.sigmas * self.filter.variation()).max(self.min_change_ms);
        let changed = expected > 0. && (drd_ms - expected).abs() > band;
        self.filter.new_value(drd_ms);
        changed
    }

    pub fn reset(&mut self) {
        self.filter = Filter::with_variation(1. / 8., 1. / 4.);
    }
}

/// Playout-threshold coefficients: `threshold = alpha·DRD + beta·dev`.
#[derive(Debug, Clone, Copy)]
pub struct ThresholdCoeffs {
    pub alpha: f64,
    pub beta: f64,
}

/// Latest-data-arrival detector.
pub struct LatencyControl {
    stability: StabilityEstimator,
    drd_change: DrdChangeEstimator,
    coeffs: ThresholdCoeffs,
    target_rate: f64,
    last_arrival_ms: i64,
    waiting_for_change: bool,
    waiting_for_stability: bool,
    current_command: PipelineAdjust,
    stats: StatisticsStorage,
}

impl LatencyControl {
    pub fn new(coeffs: ThresholdCoeffs, stats: StatisticsStorage) -> Self {
        LatencyControl {
            stability: StabilityEstimator::new(3., 4),
            drd_change: DrdChangeEstimator::new(4., 10.),
            coeffs,
            target_rate: 0.,
            last_arrival_ms: 0,
            waiting_for_change: false,
            // treat startup like a fresh DRD change: the consumer begins
            // behind the live edge and runs ahead while it catches up
            waiting_for_stability: true,
            current_command: PipelineAdjust::KeepPipeline,
            stats,
        }
    }

    pub fn target_rate_update(&mut self, rate: f64) {
        if rate > 0. {
            self.target_rate = rate;
        }
    }

    pub fn current_command(&self) -> PipelineAdjust {
        self.current_command
    }

    /// Reacts to a DRD move: a sudden bump re-arms the catch-up detector.
    /// Returns the refreshed playout threshold to be handed to playout
    /// control.
    pub fn on_drd_update(&mut self, update: &DrdUpdate, drd: &DrdEstimator) -> f64 {
        if self.drd_change.new_drd(update.value_ms) {
            log::debug!(
                "[LatencyControl] drd change detected at {:.1}ms, watching for stability",
                update.value_ms
            );
            self.waiting_for_stability = true;
            self.waiting_for_change = false;
        }
        self.playout_threshold_ms(drd)
    }

    /// Feeds an original-segment arrival and recomputes the command.
    pub fn sample_arrived(&mut self) -> PipelineAdjust {
        self.sample_arrived_at(clock::millis())
    }

    pub fn sample_arrived_at(&mut self, now_ms: i64) -> PipelineAdjust {
        if self.target_rate <= 0. {
            return PipelineAdjust::KeepPipeline;
        }
        let period = 1000. / self.target_rate;

        if self.last_arrival_ms > 0 {
            let delta = (now_ms - self.last_arrival_ms) as f64;
            self.stability.new_delta(delta, period);
        }
        self.last_arrival_ms = now_ms;

        let mean = self.stability.mean_inter_arrival_ms();
        let mut command = PipelineAdjust::KeepPipeline;

        if self.waiting_for_stability {
            if mean > 0. && mean < 0.9 * period {
                // running ahead of the producer: still draining caches,
                // keep tightening
                command = PipelineAdjust::DecreasePipeline;
            } else if self.stability.is_stable() {
                // settled at the production rate: the catch-up is over,
                // tell the machine to start minimizing the pipeline
                self.waiting_for_stability = false;
                self.waiting_for_change = true;
                command = PipelineAdjust::DecreasePipeline;
            }
        } else if self.waiting_for_change && self.stability.is_stable() {
            if (mean - period).abs() <= 0.1 * period {
                // arrivals settled at the production rate: live edge reached
                command = PipelineAdjust::IncreasePipeline;
                self.waiting_for_change = false;
            }
        }

        self.current_command = command;
        self.stats.set(
            Indicator::LatencyControlStable,
            f64::from(u8::from(self.stability.is_stable())),
        );
        self.stats
            .set(Indicator::LatencyControlCommand, command as u8 as f64);
        command
    }

    /// Playout threshold from the current DRD:
    /// `alpha·DRD + beta·deviation`, floored at
    /// `MIN_PIPELINE_SIZE · sample period`.
    pub fn playout_threshold_ms(&self, drd: &DrdEstimator) -> f64 {
        let raw = self.coeffs.alpha * drd.original_estimation_ms()
            + self.coeffs.beta * drd.original_average().deviation();
        if self.target_rate > 0. {
            raw.max(MIN_PIPELINE_SIZE as f64 * 1000. / self.target_rate)
        } else {
            raw
        }
    }

    pub fn reset(&mut self) {
        self.stability.reset();
        self.drd_change.reset();
        self.last_arrival_ms = 0;
        self.waiting_for_change = false;
        self.waiting_for_stability = true;
        self.current_command = PipelineAdjust::KeepPipeline;
    }
}
