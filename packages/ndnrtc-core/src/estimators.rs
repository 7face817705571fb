//! Sliding-window estimators used across the engine.
//!
//! Three estimator families are provided:
//! - [`Average`]: sliding average with variance, windowed by sample count or
//!   by time,
//! - [`FreqMeter`]: events-per-second meter over a window,
//! - [`Filter`]: exponential smoothing, optionally tracking variation.
//!
//! Time-driven estimators take an explicit `now_ms` in their `*_at` variants
//! so tests stay deterministic; the plain variants stamp the monotonic clock.

use std::collections::VecDeque;

use crate::clock;

/// Estimator window: triggers a "limit reached" signal either every N
/// samples or once per elapsed interval.
#[derive(Debug, Clone)]
pub enum Window {
    Samples { n_samples: usize, remaining: usize },
    Time { interval_ms: i64, last_reach_ms: i64 },
}

impl Window {
    /// Window over a fixed number of samples.
    pub fn samples(n_samples: usize) -> Self {
        assert!(n_samples > 0, "sample window must hold at least one sample");
        Window::Samples {
            n_samples,
            remaining: n_samples,
        }
    }

    /// Window over a fixed time interval.
    pub fn time(interval_ms: i64) -> Self {
        assert!(interval_ms > 0, "time window must be non-zero");
        Window::Time {
            interval_ms,
            last_reach_ms: 0,
        }
    }

    fn is_limit_reached(&mut self, now_ms: i64) -> bool {
        match self {
            Window::Samples {
                n_samples,
                remaining,
            } => {
                *remaining -= 1;
                if *remaining == 0 {
                    *remaining = *n_samples;
                }
                *remaining == *n_samples
            }
            Window::Time {
                interval_ms,
                last_reach_ms,
            } => {
                if *last_reach_ms == 0 {
                    *last_reach_ms = now_ms;
                }
                if now_ms - *last_reach_ms > *interval_ms {
                    *last_reach_ms += *interval_ms;
                    true
                } else {
                    false
                }
            }
        }
    }

    /// Drops timestamps that fell out of the window. Only meaningful for
    /// timestamp deques (see [`FreqMeter`]).
    fn cut(&self, timestamps_ms: &mut VecDeque<f64>, now_ms: i64) {
        match self {
            Window::Samples { n_samples, .. } => {
                while timestamps_ms.len() >= *n_samples {
                    timestamps_ms.pop_front();
                }
            }
            Window::Time { interval_ms, .. } => {
                let horizon = (now_ms - *interval_ms) as f64;
                while timestamps_ms.front().is_some_and(|&t| t < horizon) {
                    timestamps_ms.pop_front();
                }
            }
        }
    }
}

/// Sliding average. The sample list keeps a fixed length once the window
/// first signals limit-reached; variance is recomputed on every window
/// signal.
#[derive(Debug, Clone)]
pub struct Average {
    window: Window,
    samples: VecDeque<f64>,
    accumulated_sum: f64,
    value: f64,
    variance: f64,
    n_values: u64,
    limit_reached: bool,
}

impl Average {
    pub fn new(window: Window) -> Self {
        Average {
            window,
            samples: VecDeque::new(),
            accumulated_sum: 0.,
            value: 0.,
            variance: 0.,
            n_values: 0,
            limit_reached: false,
        }
    }

    pub fn new_value(&mut self, value: f64) {
        self.new_value_at(value, clock::millis());
    }

    pub fn new_value_at(&mut self, value: f64, now_ms: i64) {
        let window_limit = self.window.is_limit_reached(now_ms);
        self.n_values += 1;
        self.samples.push_back(value);

        if self.limit_reached {
            self.accumulated_sum += value - self.samples.pop_front().unwrap_or(0.);
        } else {
            self.limit_reached = window_limit;
            self.accumulated_sum += value;
        }

        self.value = self.accumulated_sum / self.samples.len() as f64;

        // re-calculate deviation every window
        if window_limit {
            let mean = self.value;
            self.variance = self
                .samples
                .iter()
                .map(|v| (v - mean) * (v - mean))
                .sum::<f64>()
                / self.samples.len() as f64;
        }
    }

    pub fn value(&self) -> f64 {
        self.value
    }

    pub fn variance(&self) -> f64 {
        self.variance
    }

    pub fn deviation(&self) -> f64 {
        self.variance.sqrt()
    }

    /// Total number of samples ever fed, not the current window population.
    pub fn count(&self) -> u64 {
        self.n_values
    }

    pub fn latest(&self) -> f64 {
        self.samples.back().copied().unwrap_or(0.)
    }
}

/// Frequency meter: `1000 · N / (t_last − t_first)` over the samples that
/// fit the window. Needs at least two samples before it reports a value.
#[derive(Debug, Clone)]
pub struct FreqMeter {
    window: Window,
    timestamps_ms: VecDeque<f64>,
    value: f64,
    n_values: u64,
    run: bool,
}

impl FreqMeter {
    pub fn new(window: Window) -> Self {
        FreqMeter {
            window,
            timestamps_ms: VecDeque::new(),
            value: 0.,
            n_values: 0,
            run: false,
        }
    }

    pub fn tick(&mut self) {
        self.tick_at(clock::millis());
    }

    pub fn tick_at(&mut self, now_ms: i64) {
        self.n_values += 1;
        self.timestamps_ms.push_back(now_ms as f64);

        if self.window.is_limit_reached(now_ms) {
            self.run = true;
        }
        if self.run {
            self.window.cut(&mut self.timestamps_ms, now_ms);
        }
        if self.timestamps_ms.len() > 1 {
            let first = *self.timestamps_ms.front().unwrap();
            let last = *self.timestamps_ms.back().unwrap();
            if last > first {
                self.value = 1000. * self.timestamps_ms.len() as f64 / (last - first);
            }
        }
    }

    pub fn value(&self) -> f64 {
        self.value
    }

    pub fn count(&self) -> u64 {
        self.n_values
    }
}

/// Exponential filter `v ← v + α(x − v)`, with optional variation tracking
/// through a second coefficient.
#[derive(Debug, Clone)]
pub struct Filter {
    smoothing: f64,
    variation_smoothing: f64,
    value: f64,
    variation: f64,
}

impl Filter {
    pub fn new(smoothing: f64) -> Self {
        Filter::with_variation(smoothing, 0.)
    }

    pub fn with_variation(smoothing: f64, variation_smoothing: f64) -> Self {
        Filter {
            smoothing,
            variation_smoothing,
            value: 0.,
            variation: 0.,
        }
    }

    pub fn new_value(&mut self, value: f64) {
        if self.value == 0. {
            self.value = value;
        } else {
            if self.variation_smoothing != 0. {
                let instant = (value - self.value).abs();
                self.variation += (instant - self.variation) * self.variation_smoothing;
            }
            self.value += (value - self.value) * self.smoothing;
        }
    }

    pub fn value(&self) -> f64 {
        self.value
    }

    pub fn variation(&self) -> f64 {
        self.variation
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    mod average {
        use super::*;

        #[test]
        fn sample_window_slides_after_limit() {
            let mut avg = Average::new(Window::samples(3));
            avg.new_value_at(1., 0);
            avg.new_value_at(2., 10);
            avg.new_value_at(3., 20);
            assert_eq!(avg.value(), 2., "mean of first full window");

            // window slides: {2,3,4}
            avg.new_value_at(4., 30);
            assert_eq!(avg.value(), 3., "window should slide by one sample");
            assert_eq!(avg.count(), 4);
        }

        #[test]
        fn variance_recomputed_at_window_limit() {
            let mut avg = Average::new(Window::samples(3));
            avg.new_value_at(2., 0);
            avg.new_value_at(4., 10);
            assert_eq!(avg.variance(), 0., "no window limit hit yet");

            avg.new_value_at(6., 20);
            // mean 4, deviations {-2, 0, 2} -> variance 8/3
            assert!((avg.variance() - 8. / 3.).abs() < 1e-9);
            assert!((avg.deviation() - (8f64 / 3.).sqrt()).abs() < 1e-9);
        }

        #[test]
        fn time_window_grows_until_interval_elapses() {
            let mut avg = Average::new(Window::time(100));
            avg.new_value_at(10., 0);
            avg.new_value_at(20., 50);
            avg.new_value_at(30., 90);
            // interval not yet exceeded: all samples kept
            assert_eq!(avg.value(), 20.);

            // crossing the interval freezes the population size
            avg.new_value_at(40., 150);
            let frozen = avg.value();
            avg.new_value_at(50., 160);
            assert!(avg.value() > frozen, "sliding continues after the limit");
        }
    }

    mod freq_meter {
        use super::*;

        #[test]
        fn reports_rate_from_timestamp_span() {
            let mut meter = FreqMeter::new(Window::time(1000));
            // 30 fps: a tick every 33ms (need to pass the window first)
            let mut now = 0;
            for _ in 0..60 {
                meter.tick_at(now);
                now += 33;
            }
            let rate = meter.value();
            assert!(
                (rate - 30.).abs() < 2.,
                "expected ~30 events/s, got {}",
                rate
            );
        }

        #[test]
        fn silent_before_two_samples() {
            let mut meter = FreqMeter::new(Window::time(1000));
            meter.tick_at(0);
            assert_eq!(meter.value(), 0.);
        }
    }

    mod filter {
        use super::*;

        #[test]
        fn first_value_is_adopted() {
            let mut f = Filter::new(0.125);
            f.new_value(80.);
            assert_eq!(f.value(), 80.);
        }

        #[test]
        fn converges_toward_input() {
            let mut f = Filter::new(0.5);
            f.new_value(100.);
            f.new_value(0.);
            assert_eq!(f.value(), 50.);
            f.new_value(0.);
            assert_eq!(f.value(), 25.);
        }

        #[test]
        fn variation_tracks_jitter() {
            let mut f = Filter::with_variation(15. / 16., 15. / 16.);
            f.new_value(1000.);
            f.new_value(1000.);
            assert_eq!(f.variation(), 0.);
            f.new_value(2000.);
            assert!(f.variation() > 0., "variation should react to a jump");
        }
    }
}
