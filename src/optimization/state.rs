use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

/// Number of rate samples averaged by [`SolverState`].
pub const RATE_WINDOW: usize = 20;

/// Fixed-capacity ring of rate samples.
///
/// Slots start at zero and `mean` always divides by the capacity, so the
/// average is biased low until the buffer has been filled once.
#[derive(Clone, Debug)]
pub struct RateTracker {
    buf: Vec<f64>,
    pos: usize,
}

impl Default for RateTracker {
    fn default() -> Self {
        Self::new(RATE_WINDOW)
    }
}

impl RateTracker {
    pub fn new(capacity: usize) -> Self {
        Self {
            buf: vec![0.0; capacity.max(1)],
            pos: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.buf.len()
    }

    /// Overwrite the oldest slot.
    pub fn put(&mut self, value: f64) {
        self.buf[self.pos] = value;
        self.pos = (self.pos + 1) % self.buf.len();
    }

    pub fn mean(&self) -> f64 {
        self.buf.iter().sum::<f64>() / self.buf.len() as f64
    }
}

/// Telemetry of one running solver.
#[derive(Clone, Debug)]
pub struct SolverState {
    pub problem_name: String,
    pub parameter_names: Vec<String>,
    pub parameter_values: Vec<f64>,
    pub extra_text: String,
    pub niter: u64,

    iiter: u64,
    iter_per_second: f64,
    iter_buffer: RateTracker,
    starttime: Instant,
    last_update: Instant,
    /// `iiter` as of `last_update`.
    last_update_iiter: u64,
}

impl SolverState {
    pub fn new(problem_name: impl Into<String>, parameter_names: Vec<String>, niter: u64) -> Self {
        let now = Instant::now();
        Self {
            problem_name: problem_name.into(),
            parameter_values: vec![0.0; parameter_names.len()],
            parameter_names,
            extra_text: String::new(),
            niter,
            iiter: 0,
            iter_per_second: 0.0,
            iter_buffer: RateTracker::default(),
            starttime: now,
            last_update: now,
            last_update_iiter: 0,
        }
    }

    pub fn iiter(&self) -> u64 {
        self.iiter
    }

    pub fn iter_per_second(&self) -> f64 {
        self.iter_per_second
    }

    pub fn starttime(&self) -> Instant {
        self.starttime
    }

    /// Advance the iteration counter. Callers keep `value` non-decreasing.
    pub fn set_iiter(&mut self, value: u64) {
        self.set_iiter_at(value, Instant::now());
    }

    /// Like [`set_iiter`](Self::set_iiter) with an explicit clock reading.
    ///
    /// A zero time delta leaves the rate untouched instead of pushing an
    /// infinite or NaN sample; those iterations count towards the next one.
    pub fn set_iiter_at(&mut self, value: u64, now: Instant) {
        let dt = now.saturating_duration_since(self.last_update).as_secs_f64();
        if dt > 0.0 {
            let rate = (value as f64 - self.last_update_iiter as f64) / dt;
            self.iter_buffer.put(rate);
            self.iter_per_second = self.iter_buffer.mean();
            self.last_update = now;
            self.last_update_iiter = value;
        }
        self.iiter = value;
    }

    /// Jump to a checkpointed iteration without recording a rate sample.
    pub fn resume_at(&mut self, iiter: u64) {
        self.iiter = iiter;
        self.last_update = Instant::now();
        self.last_update_iiter = iiter;
    }

    pub fn runtime(&self) -> Duration {
        self.starttime.elapsed()
    }

    /// Zero when no rate is known yet.
    pub fn runtime_remaining(&self) -> Duration {
        if self.iter_per_second <= 0.0 || !self.iter_per_second.is_finite() {
            return Duration::ZERO;
        }
        let left = self.niter.saturating_sub(self.iiter) as f64;
        Duration::from_secs_f64(left / self.iter_per_second)
    }

    pub fn snapshot(&self) -> SolverStateSnapshot {
        SolverStateSnapshot {
            problem_name: self.problem_name.clone(),
            parameter_names: self.parameter_names.clone(),
            parameter_values: self.parameter_values.clone(),
            extra_text: self.extra_text.clone(),
            niter: self.niter,
            iiter: self.iiter,
            iter_per_second: self.iter_per_second,
            runtime_seconds: self.runtime().as_secs_f64(),
        }
    }
}

/// Serializable checkpoint of a [`SolverState`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SolverStateSnapshot {
    pub problem_name: String,
    pub parameter_names: Vec<String>,
    pub parameter_values: Vec<f64>,
    pub extra_text: String,
    pub niter: u64,
    pub iiter: u64,
    pub iter_per_second: f64,
    pub runtime_seconds: f64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn cold_tracker_divides_by_capacity() {
        let mut t = RateTracker::new(20);
        t.put(10.0);
        t.put(30.0);
        assert_relative_eq!(t.mean(), 40.0 / 20.0);
    }

    #[test]
    fn warm_tracker_evicts_oldest() {
        let mut t = RateTracker::new(20);
        for v in 1..=20 {
            t.put(v as f64);
        }
        assert_relative_eq!(t.mean(), 10.5);

        t.put(41.0);
        // 1 evicted: (2 + ... + 20 + 41) / 20
        let expected = ((2..=20).sum::<i32>() as f64 + 41.0) / 20.0;
        assert_relative_eq!(t.mean(), expected);
    }

    #[test]
    fn remaining_time_follows_rate() {
        let mut s = SolverState::new("p", vec!["a".into()], 100);
        let t0 = s.last_update;
        s.set_iiter_at(50, t0 + Duration::from_secs(5));

        // one 10 it/s sample in a 20-slot window
        assert_relative_eq!(s.iter_per_second(), 0.5);
        let remaining = s.runtime_remaining().as_secs_f64();
        assert_relative_eq!(remaining, 50.0 / s.iter_per_second(), epsilon = 1e-9);
    }

    #[test]
    fn zero_dt_does_not_poison_rate() {
        let mut s = SolverState::new("p", Vec::new(), 100);
        let t0 = s.last_update;
        s.set_iiter_at(10, t0);
        assert!(s.iter_per_second().is_finite());
        assert_eq!(s.iter_per_second(), 0.0);
        assert_eq!(s.iiter(), 10);
        assert_eq!(s.runtime_remaining(), Duration::ZERO);

        s.set_iiter_at(20, t0 + Duration::from_secs(1));
        assert!(s.iter_per_second().is_finite());
        assert!(s.iter_per_second() > 0.0);
    }

    #[test]
    fn iterations_in_a_zero_dt_update_count_towards_the_next_sample() {
        let mut s = SolverState::new("p", Vec::new(), 100);
        let t0 = s.last_update;
        s.set_iiter_at(10, t0);
        s.set_iiter_at(20, t0 + Duration::from_secs(1));
        // one 20 it/s sample, not 10 it/s
        assert_relative_eq!(s.iter_per_second(), 20.0 / 20.0);
    }

    #[test]
    fn resume_restarts_the_rate_baseline() {
        let mut s = SolverState::new("p", Vec::new(), 100);
        s.resume_at(40);
        let t0 = s.last_update;
        s.set_iiter_at(45, t0 + Duration::from_secs(1));
        assert_relative_eq!(s.iter_per_second(), 5.0 / 20.0);
    }
}
