//! # Disk Quota Policies
//!
//! A policy maps the fraction of the disk quota still available (`headroom`,
//! `1 - used / quota`, negative when over quota) to a work factor.
//!
//! | Factory         | Behaviour                                           |
//! |-----------------|-----------------------------------------------------|
//! | `no-throttling` | always 1.0                                          |
//! | `linear`        | `clamp(headroom / threshold, MIN, 1.0)`             |
//! | `watermark`     | hysteresis entries `(low, high, work factor)`       |

use crate::config::Config;
use crate::error::ConfigError;
use crate::monitor::work_factor::{clamp_work_factor, MAX_WORK_FACTOR, MIN_WORK_FACTOR};

pub const NO_THROTTLING_POLICY: &str = "no-throttling";
pub const LINEAR_POLICY: &str = "linear";
pub const WATERMARK_POLICY: &str = "watermark";

const LINEAR_THRESHOLD_KEY: &str = "container.disk.quota.policy.linear.threshold";
const WATERMARK_COUNT_KEY: &str = "container.disk.quota.policy.count";

pub trait DiskQuotaPolicy: Send {
    /// Work factor for the given headroom.
    fn apply(&mut self, headroom: f64) -> f64;
}

pub trait DiskQuotaPolicyFactory: Send + Sync {
    fn create(&self, config: &Config) -> Result<Box<dyn DiskQuotaPolicy>, ConfigError>;
}

// =============================================================================
// NO THROTTLING
// =============================================================================

#[derive(Debug, Default, Clone, Copy)]
pub struct NoThrottlingPolicy;

impl DiskQuotaPolicy for NoThrottlingPolicy {
    fn apply(&mut self, _headroom: f64) -> f64 {
        MAX_WORK_FACTOR
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoThrottlingPolicyFactory;

impl DiskQuotaPolicyFactory for NoThrottlingPolicyFactory {
    fn create(&self, _config: &Config) -> Result<Box<dyn DiskQuotaPolicy>, ConfigError> {
        Ok(Box::new(NoThrottlingPolicy))
    }
}

// =============================================================================
// LINEAR
// =============================================================================

/// Full speed above `threshold` headroom, slowing linearly to the minimum at 0.
#[derive(Debug, Clone, Copy)]
pub struct LinearPolicy {
    threshold: f64,
}

impl LinearPolicy {
    pub fn new(threshold: f64) -> Result<Self, ConfigError> {
        if !(threshold > 0.0 && threshold <= 1.0) {
            return Err(ConfigError::InvalidPolicy(format!(
                "linear threshold must be in (0, 1], got {threshold}"
            )));
        }
        Ok(Self { threshold })
    }
}

impl DiskQuotaPolicy for LinearPolicy {
    fn apply(&mut self, headroom: f64) -> f64 {
        clamp_work_factor(headroom / self.threshold)
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct LinearPolicyFactory;

impl DiskQuotaPolicyFactory for LinearPolicyFactory {
    fn create(&self, config: &Config) -> Result<Box<dyn DiskQuotaPolicy>, ConfigError> {
        let threshold = config.get_f64(LINEAR_THRESHOLD_KEY, 0.5)?;
        Ok(Box::new(LinearPolicy::new(threshold)?))
    }
}

// =============================================================================
// WATERMARK
// =============================================================================

/// One throttling level.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WatermarkEntry {
    /// Entered when headroom drops to or below this.
    pub low_water_mark: f64,
    /// Left when headroom recovers to or above this.
    pub high_water_mark: f64,
    pub work_factor: f64,
}

impl WatermarkEntry {
    pub fn new(low_water_mark: f64, high_water_mark: f64, work_factor: f64) -> Self {
        Self {
            low_water_mark,
            high_water_mark,
            work_factor,
        }
    }
}

/// Stepwise throttling with hysteresis between levels.
#[derive(Debug, Clone)]
pub struct WatermarkPolicy {
    /// Sorted by descending high water mark: index 0 is the mildest level.
    entries: Vec<WatermarkEntry>,
    /// Deepest level currently engaged; `None` when not throttling.
    current: Option<usize>,
}

impl WatermarkPolicy {
    pub fn new(mut entries: Vec<WatermarkEntry>) -> Result<Self, ConfigError> {
        for (i, e) in entries.iter().enumerate() {
            if !(e.low_water_mark < e.high_water_mark) {
                return Err(ConfigError::InvalidPolicy(format!(
                    "entry {i}: low water mark {} must be below high water mark {}",
                    e.low_water_mark, e.high_water_mark
                )));
            }
            if !(MIN_WORK_FACTOR..=MAX_WORK_FACTOR).contains(&e.work_factor) {
                return Err(ConfigError::InvalidPolicy(format!(
                    "entry {i}: work factor {} outside [{MIN_WORK_FACTOR}, {MAX_WORK_FACTOR}]",
                    e.work_factor
                )));
            }
        }
        entries.sort_by(|a, b| b.high_water_mark.total_cmp(&a.high_water_mark));
        Ok(Self {
            entries,
            current: None,
        })
    }

    pub fn entries(&self) -> &[WatermarkEntry] {
        &self.entries
    }
}

impl DiskQuotaPolicy for WatermarkPolicy {
    fn apply(&mut self, headroom: f64) -> f64 {
        let mut level = self.current;

        // back out of every level whose high mark has been reached
        while let Some(i) = level {
            if headroom >= self.entries[i].high_water_mark {
                level = i.checked_sub(1);
            } else {
                break;
            }
        }

        // go deeper through every level whose low mark has been crossed
        loop {
            let next = level.map_or(0, |i| i + 1);
            match self.entries.get(next) {
                Some(entry) if headroom <= entry.low_water_mark => level = Some(next),
                _ => break,
            }
        }

        self.current = level;
        level.map_or(MAX_WORK_FACTOR, |i| self.entries[i].work_factor)
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct WatermarkPolicyFactory;

impl DiskQuotaPolicyFactory for WatermarkPolicyFactory {
    fn create(&self, config: &Config) -> Result<Box<dyn DiskQuotaPolicy>, ConfigError> {
        let count = config.get_usize(WATERMARK_COUNT_KEY, 0)?;
        let mut entries = Vec::with_capacity(count);
        for i in 0..count {
            let field = |name: &str| -> Result<f64, ConfigError> {
                let key = format!("container.disk.quota.policy.{i}.{name}");
                config.require(&key)?;
                config.get_f64(&key, 0.0)
            };
            entries.push(WatermarkEntry::new(
                field("low.water.mark")?,
                field("high.water.mark")?,
                field("work.factor")?,
            ));
        }
        Ok(Box::new(WatermarkPolicy::new(entries)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_throttling() {
        let mut policy = NoThrottlingPolicy;
        assert_eq!(policy.apply(-3.0), 1.0);
        assert_eq!(policy.apply(0.9), 1.0);
    }

    #[test]
    fn test_linear_policy() {
        let mut policy = LinearPolicy::new(0.5).unwrap();
        assert_eq!(policy.apply(0.9), 1.0);
        assert_eq!(policy.apply(0.5), 1.0);
        assert!((policy.apply(0.25) - 0.5).abs() < 1e-12);

        let near_full = policy.apply(0.05);
        assert!(near_full < 1.0);
        assert!(near_full >= MIN_WORK_FACTOR);
        assert_eq!(policy.apply(-0.2), MIN_WORK_FACTOR);

        assert!(LinearPolicy::new(0.0).is_err());
        assert!(LinearPolicy::new(1.5).is_err());
    }

    #[test]
    fn test_linear_factory_reads_threshold() {
        let config = Config::new().with(LINEAR_THRESHOLD_KEY, "0.2");
        let mut policy = LinearPolicyFactory.create(&config).unwrap();
        assert!((policy.apply(0.1) - 0.5).abs() < 1e-12);
    }

    fn two_level() -> WatermarkPolicy {
        WatermarkPolicy::new(vec![
            WatermarkEntry::new(0.05, 0.1, 0.1),
            WatermarkEntry::new(0.2, 0.3, 0.5),
        ])
        .unwrap()
    }

    #[test]
    fn test_watermark_entries_sorted() {
        let policy = two_level();
        assert_eq!(policy.entries()[0].high_water_mark, 0.3);
        assert_eq!(policy.entries()[1].high_water_mark, 0.1);
    }

    #[test]
    fn test_watermark_hysteresis() {
        let mut policy = two_level();

        assert_eq!(policy.apply(0.5), 1.0);
        assert_eq!(policy.apply(0.25), 1.0); // above first low mark
        assert_eq!(policy.apply(0.2), 0.5); // entered level 0
        assert_eq!(policy.apply(0.25), 0.5); // still below its high mark
        assert_eq!(policy.apply(0.04), 0.1); // deepest level
        assert_eq!(policy.apply(0.08), 0.1); // below level 1 high mark
        assert_eq!(policy.apply(0.15), 0.5); // left level 1 only
        assert_eq!(policy.apply(0.3), 1.0); // left everything
    }

    #[test]
    fn test_watermark_jumps_multiple_levels() {
        let mut policy = two_level();
        assert_eq!(policy.apply(0.0), 0.1);
        assert_eq!(policy.apply(0.9), 1.0);
    }

    #[test]
    fn test_watermark_validation() {
        assert!(WatermarkPolicy::new(vec![WatermarkEntry::new(0.3, 0.2, 0.5)]).is_err());
        assert!(WatermarkPolicy::new(vec![WatermarkEntry::new(0.1, 0.2, 0.0)]).is_err());
    }

    #[test]
    fn test_watermark_factory() {
        let config = Config::new()
            .with(WATERMARK_COUNT_KEY, "1")
            .with("container.disk.quota.policy.0.low.water.mark", "0.1")
            .with("container.disk.quota.policy.0.high.water.mark", "0.4")
            .with("container.disk.quota.policy.0.work.factor", "0.25");
        let mut policy = WatermarkPolicyFactory.create(&config).unwrap();
        assert_eq!(policy.apply(0.05), 0.25);

        let missing = Config::new().with(WATERMARK_COUNT_KEY, "1");
        assert!(matches!(
            WatermarkPolicyFactory.create(&missing),
            Err(ConfigError::MissingKey { .. })
        ));
    }
}
