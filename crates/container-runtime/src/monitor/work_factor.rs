//! Work-factor cell shared between the disk quota throttler and a run loop.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

pub const MIN_WORK_FACTOR: f64 = 0.001;
pub const MAX_WORK_FACTOR: f64 = 1.0;

/// Clamp into `[MIN_WORK_FACTOR, MAX_WORK_FACTOR]`; NaN means no throttling.
#[must_use]
pub fn clamp_work_factor(factor: f64) -> f64 {
    if factor.is_nan() {
        MAX_WORK_FACTOR
    } else {
        factor.clamp(MIN_WORK_FACTOR, MAX_WORK_FACTOR)
    }
}

/// Pause owed after `work_time` of work at `factor`: `work * (1/f - 1)`,
/// capped at `max_delay`.
#[must_use]
pub fn throttle_delay(work_time: Duration, factor: f64, max_delay: Duration) -> Duration {
    let factor = clamp_work_factor(factor);
    if factor >= MAX_WORK_FACTOR {
        return Duration::ZERO;
    }
    let delay = work_time.as_secs_f64() * (1.0 / factor - 1.0);
    if delay >= max_delay.as_secs_f64() {
        max_delay
    } else {
        Duration::from_secs_f64(delay)
    }
}

/// Single-writer `f64` cell. Reads may lag a concurrent write.
#[derive(Debug, Clone)]
pub struct WorkFactor {
    bits: Arc<AtomicU64>,
}

impl Default for WorkFactor {
    fn default() -> Self {
        Self::new()
    }
}

impl WorkFactor {
    pub fn new() -> Self {
        Self {
            bits: Arc::new(AtomicU64::new(MAX_WORK_FACTOR.to_bits())),
        }
    }

    pub fn get(&self) -> f64 {
        f64::from_bits(self.bits.load(Ordering::Relaxed))
    }

    /// Store the clamped factor and return it.
    pub fn set(&self, factor: f64) -> f64 {
        let factor = clamp_work_factor(factor);
        self.bits.store(factor.to_bits(), Ordering::Relaxed);
        factor
    }

    pub fn delay_for(&self, work_time: Duration, max_delay: Duration) -> Duration {
        throttle_delay(work_time, self.get(), max_delay)
    }

    /// Sleep for the pause owed after `work_time` of work.
    pub async fn throttle(&self, work_time: Duration, max_delay: Duration) {
        let delay = self.delay_for(work_time, max_delay);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cell_clamps() {
        let wf = WorkFactor::new();
        assert_eq!(wf.get(), 1.0);
        assert_eq!(wf.set(0.5), 0.5);
        assert_eq!(wf.set(0.0), MIN_WORK_FACTOR);
        assert_eq!(wf.set(7.0), MAX_WORK_FACTOR);
        assert_eq!(wf.set(f64::NAN), MAX_WORK_FACTOR);

        let shared = wf.clone();
        wf.set(0.25);
        assert_eq!(shared.get(), 0.25);
    }

    #[test]
    fn test_throttle_delay_formula() {
        let max = Duration::from_secs(1);
        let work = Duration::from_millis(10);

        assert_eq!(throttle_delay(work, 1.0, max), Duration::ZERO);
        // f = 0.5 doubles the time spent per unit of work
        let d = throttle_delay(work, 0.5, max);
        assert!((d.as_secs_f64() - 0.01).abs() < 1e-9);
        // f = 0.25 → 3x work time
        let d = throttle_delay(work, 0.25, max);
        assert!((d.as_secs_f64() - 0.03).abs() < 1e-9);
        // capped
        assert_eq!(throttle_delay(work, MIN_WORK_FACTOR, max), max);
    }
}
