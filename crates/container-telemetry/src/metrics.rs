//! Prometheus metrics for one stream task container.
//!
//! All metrics follow the naming convention `container_<metric>_<unit>` and
//! carry a constant `container_id` label. Every container owns its own
//! `Registry`; metrics reporters are handed that registry at startup.
//!
//! ## Metric Types
//!
//! - **Gauge**: disk usage, disk quota, executor work factor, resident memory
//! - **Counter**: per-task processed envelopes, commits, sent messages
//! - **Histogram**: per-task processing time (only when timers are enabled)

use std::collections::HashMap;

use prometheus::{
    exponential_buckets, Encoder, Gauge, Histogram, HistogramOpts, HistogramVec, IntCounter,
    IntCounterVec, IntGauge, Opts, Registry, TextEncoder,
};

use crate::TelemetryError;

/// Container-level metrics and the registry that holds them.
#[derive(Clone)]
pub struct ContainerMetrics {
    registry: Registry,

    /// Bytes used under every watched store directory.
    pub disk_usage_bytes: IntGauge,
    /// Configured disk quota (`-1` when unbounded).
    pub disk_quota_bytes: IntGauge,
    /// Latest work factor applied to the run loop.
    pub executor_work_factor: Gauge,
    /// Resident memory of this process in megabytes.
    pub physical_memory_mb: Gauge,
    /// Number of runnable task instances.
    pub active_tasks: IntGauge,
    /// Number of standby tasks (storage only).
    pub standby_tasks: IntGauge,

    processed: IntCounterVec,
    commits: IntCounterVec,
    sent: IntCounterVec,
    process_duration: Option<HistogramVec>,
}

impl ContainerMetrics {
    /// Create and register all container metrics.
    ///
    /// `timers_enabled` controls whether per-task processing histograms exist
    /// (`metrics.timer.enabled`).
    pub fn new(container_id: &str, timers_enabled: bool) -> Result<Self, TelemetryError> {
        let labels = HashMap::from([("container_id".to_string(), container_id.to_string())]);
        let registry = Registry::new_custom(Some("container".to_string()), Some(labels))
            .map_err(|e| TelemetryError::MetricsInit(e.to_string()))?;

        let disk_usage_bytes = IntGauge::new(
            "disk_usage_bytes",
            "Total bytes used under the watched store directories",
        )
        .map_err(init_err)?;
        let disk_quota_bytes =
            IntGauge::new("disk_quota_bytes", "Configured disk quota in bytes").map_err(init_err)?;
        let executor_work_factor = Gauge::new(
            "executor_work_factor",
            "Fraction of normal throughput the run loop is permitted",
        )
        .map_err(init_err)?;
        let physical_memory_mb = Gauge::new(
            "physical_memory_mb",
            "Resident memory of the container process in megabytes",
        )
        .map_err(init_err)?;
        let active_tasks =
            IntGauge::new("active_tasks", "Number of runnable task instances").map_err(init_err)?;
        let standby_tasks =
            IntGauge::new("standby_tasks", "Number of standby tasks").map_err(init_err)?;

        let processed = IntCounterVec::new(
            Opts::new("task_envelopes_processed_total", "Envelopes processed per task"),
            &["task"],
        )
        .map_err(init_err)?;
        let commits = IntCounterVec::new(
            Opts::new("task_commits_total", "Commits per task"),
            &["task"],
        )
        .map_err(init_err)?;
        let sent = IntCounterVec::new(
            Opts::new("task_messages_sent_total", "Messages sent through each task's collector"),
            &["task"],
        )
        .map_err(init_err)?;

        let process_duration = if timers_enabled {
            Some(
                HistogramVec::new(
                    HistogramOpts::new(
                        "task_process_duration_seconds",
                        "Time spent processing one envelope",
                    )
                    .buckets(exponential_buckets(0.00001, 2.0, 16).map_err(init_err)?),
                    &["task"],
                )
                .map_err(init_err)?,
            )
        } else {
            None
        };

        let collectors: Vec<Box<dyn prometheus::core::Collector>> = vec![
            Box::new(disk_usage_bytes.clone()),
            Box::new(disk_quota_bytes.clone()),
            Box::new(executor_work_factor.clone()),
            Box::new(physical_memory_mb.clone()),
            Box::new(active_tasks.clone()),
            Box::new(standby_tasks.clone()),
            Box::new(processed.clone()),
            Box::new(commits.clone()),
            Box::new(sent.clone()),
        ];
        for collector in collectors {
            registry.register(collector).map_err(init_err)?;
        }
        if let Some(histogram) = &process_duration {
            registry
                .register(Box::new(histogram.clone()))
                .map_err(init_err)?;
        }

        executor_work_factor.set(1.0);

        Ok(Self {
            registry,
            disk_usage_bytes,
            disk_quota_bytes,
            executor_work_factor,
            physical_memory_mb,
            active_tasks,
            standby_tasks,
            processed,
            commits,
            sent,
            process_duration,
        })
    }

    /// The registry holding every metric of this container.
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Metrics bound to one task's label.
    pub fn task(&self, task_name: &str) -> TaskMetrics {
        TaskMetrics {
            processed: self.processed.with_label_values(&[task_name]),
            commits: self.commits.with_label_values(&[task_name]),
            sent: self.sent.with_label_values(&[task_name]),
            process_duration: self
                .process_duration
                .as_ref()
                .map(|h| h.with_label_values(&[task_name])),
        }
    }

    /// Encode all metrics as Prometheus text format.
    pub fn encode(&self) -> Result<String, TelemetryError> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder
            .encode(&metric_families, &mut buffer)
            .map_err(init_err)?;
        String::from_utf8(buffer).map_err(|e| TelemetryError::MetricsInit(e.to_string()))
    }
}

fn init_err(e: prometheus::Error) -> TelemetryError {
    TelemetryError::MetricsInit(e.to_string())
}

/// Metrics scoped to one task instance.
#[derive(Clone)]
pub struct TaskMetrics {
    pub processed: IntCounter,
    pub commits: IntCounter,
    pub sent: IntCounter,
    process_duration: Option<Histogram>,
}

impl TaskMetrics {
    /// Start timing one `process` call. `None` when timers are disabled.
    pub fn start_process_timer(&self) -> Option<HistogramTimer> {
        self.process_duration.as_ref().map(HistogramTimer::new)
    }
}

/// Timer guard for automatic histogram observation.
pub struct HistogramTimer {
    histogram: Histogram,
    start: std::time::Instant,
}

impl HistogramTimer {
    /// Start a new timer for the given histogram.
    pub fn new(histogram: &Histogram) -> Self {
        Self {
            histogram: histogram.clone(),
            start: std::time::Instant::now(),
        }
    }
}

impl Drop for HistogramTimer {
    fn drop(&mut self) {
        self.histogram.observe(self.start.elapsed().as_secs_f64());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registries_are_per_container() {
        let a = ContainerMetrics::new("0", false).unwrap();
        let b = ContainerMetrics::new("1", false).unwrap();

        a.disk_usage_bytes.set(100);
        assert_eq!(b.disk_usage_bytes.get(), 0);
    }

    #[test]
    fn test_task_counters_labelled() {
        let metrics = ContainerMetrics::new("0", false).unwrap();
        metrics.task("Partition 0").processed.inc();
        metrics.task("Partition 0").processed.inc();
        metrics.task("Partition 1").processed.inc();

        assert_eq!(metrics.task("Partition 0").processed.get(), 2);
        assert_eq!(metrics.task("Partition 1").processed.get(), 1);
    }

    #[test]
    fn test_timers_follow_flag() {
        let without = ContainerMetrics::new("0", false).unwrap();
        assert!(without.task("t").start_process_timer().is_none());

        let with = ContainerMetrics::new("0", true).unwrap();
        drop(with.task("t").start_process_timer());
        let text = with.encode().unwrap();
        assert!(text.contains("container_task_process_duration_seconds"));
    }

    #[test]
    fn test_work_factor_starts_at_one() {
        let metrics = ContainerMetrics::new("0", false).unwrap();
        assert_eq!(metrics.executor_work_factor.get(), 1.0);
    }
}
