//! # Resource Monitors
//!
//! - `disk`: polls the size of every store directory and throttles the run
//!   loop through a `DiskQuotaPolicy` as the quota fills up.
//! - `host`: samples process memory for the metrics registry.
//! - `work_factor`: the throttle value and the delay it implies.

mod disk;
mod host;
mod policy;
mod work_factor;

pub use disk::{
    scan_total_bytes, total_bytes, DiskQuotaThrottler, DiskSpaceListener,
    PollingScanDiskSpaceMonitor,
};
pub use host::{HostStatistics, HostStatisticsListener, HostStatisticsMonitor, ProcessSampler};
pub use policy::{
    DiskQuotaPolicy, DiskQuotaPolicyFactory, LinearPolicy, LinearPolicyFactory,
    NoThrottlingPolicy, NoThrottlingPolicyFactory, WatermarkEntry, WatermarkPolicy,
    WatermarkPolicyFactory, LINEAR_POLICY, NO_THROTTLING_POLICY, WATERMARK_POLICY,
};
pub use work_factor::{
    clamp_work_factor, throttle_delay, WorkFactor, MAX_WORK_FACTOR, MIN_WORK_FACTOR,
};
