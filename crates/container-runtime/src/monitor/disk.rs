//! # Disk Quota Monitor
//!
//! ```text
//!  every poll interval
//!  ┌──────────────────────────────┐     used bytes    ┌────────────────────┐
//!  │ PollingScanDiskSpaceMonitor  │ ────────────────► │ DiskQuotaThrottler │
//!  │ (walks the watched paths)    │                   │ headroom → policy  │
//!  └──────────────────────────────┘                   └─────────┬──────────┘
//!                                                               │ work factor
//!                                                               ▼
//!                                                      RunLoop::set_work_factor
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use container_telemetry::ContainerMetrics;
use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::monitor::policy::DiskQuotaPolicy;
use crate::monitor::work_factor::{clamp_work_factor, WorkFactor};
use crate::ports::RunLoop;

/// Receives the bytes used under the watched paths after every scan.
pub trait DiskSpaceListener: Send + Sync {
    fn on_update(&self, used_bytes: u64);
}

/// Sum of the sizes of every regular file under `paths`.
///
/// Symlinks are not followed; unreadable entries count as zero.
pub fn scan_total_bytes(paths: &[PathBuf]) -> u64 {
    paths.iter().map(|p| path_bytes(p)).sum()
}

fn path_bytes(path: &Path) -> u64 {
    let Ok(meta) = std::fs::symlink_metadata(path) else {
        return 0;
    };
    if meta.is_file() {
        return meta.len();
    }
    if !meta.is_dir() {
        return 0;
    }
    match std::fs::read_dir(path) {
        Ok(entries) => entries
            .filter_map(Result::ok)
            .map(|entry| path_bytes(&entry.path()))
            .sum(),
        Err(e) => {
            debug!(path = %path.display(), error = %e, "Skipping unreadable directory");
            0
        }
    }
}

/// Run the scan on the blocking pool. `None` when the scan task died.
pub async fn total_bytes(paths: Vec<PathBuf>) -> Option<u64> {
    run_scan(move || scan_total_bytes(&paths)).await
}

async fn run_scan(scan: impl FnOnce() -> u64 + Send + 'static) -> Option<u64> {
    match tokio::task::spawn_blocking(scan).await {
        Ok(used) => Some(used),
        Err(e) => {
            warn!(error = %e, "Disk scan task failed, skipping update");
            None
        }
    }
}

/// Periodically scans a fixed set of directories.
pub struct PollingScanDiskSpaceMonitor {
    paths: Vec<PathBuf>,
    interval: Duration,
    listeners: Mutex<Vec<Arc<dyn DiskSpaceListener>>>,
    running: Mutex<Option<(watch::Sender<bool>, JoinHandle<()>)>>,
}

impl PollingScanDiskSpaceMonitor {
    pub fn new(paths: Vec<PathBuf>, interval: Duration) -> Self {
        Self {
            paths,
            interval,
            listeners: Mutex::new(Vec::new()),
            running: Mutex::new(None),
        }
    }

    pub fn paths(&self) -> &[PathBuf] {
        &self.paths
    }

    /// Listeners registered after `start` are not notified.
    pub fn register_listener(&self, listener: Arc<dyn DiskSpaceListener>) {
        self.listeners.lock().push(listener);
    }

    /// Spawn the polling task. The first scan runs immediately.
    pub fn start(&self) {
        let mut running = self.running.lock();
        if running.is_some() {
            return;
        }

        let (stop_tx, mut stop_rx) = watch::channel(false);
        let paths = self.paths.clone();
        let listeners = self.listeners.lock().clone();
        let interval = self.interval;

        info!(
            paths = paths.len(),
            interval_ms = self.interval.as_millis() as u64,
            "Starting disk space monitor"
        );

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Some(used) = total_bytes(paths.clone()).await {
                            for listener in &listeners {
                                listener.on_update(used);
                            }
                        }
                    }
                    _ = stop_rx.changed() => break,
                }
            }
            debug!("Disk space monitor stopped");
        });
        *running = Some((stop_tx, handle));
    }

    pub async fn stop(&self) {
        let running = self.running.lock().take();
        if let Some((stop_tx, handle)) = running {
            let _ = stop_tx.send(true);
            if let Err(e) = handle.await {
                warn!(error = %e, "Disk space monitor task ended abnormally");
            }
        }
    }
}

/// Turns disk usage into a run-loop work factor.
pub struct DiskQuotaThrottler {
    quota_bytes: u64,
    policy: Mutex<Box<dyn DiskQuotaPolicy>>,
    run_loop: Arc<dyn RunLoop>,
    metrics: ContainerMetrics,
    applied: WorkFactor,
}

impl DiskQuotaThrottler {
    pub fn new(
        quota_bytes: u64,
        policy: Box<dyn DiskQuotaPolicy>,
        run_loop: Arc<dyn RunLoop>,
        metrics: ContainerMetrics,
    ) -> Self {
        metrics
            .disk_quota_bytes
            .set(i64::try_from(quota_bytes).unwrap_or(-1));
        Self {
            quota_bytes,
            policy: Mutex::new(policy),
            run_loop,
            metrics,
            applied: WorkFactor::new(),
        }
    }

    /// Factor most recently handed to the run loop.
    pub fn applied(&self) -> f64 {
        self.applied.get()
    }

    /// `1 - used / quota`; negative once the quota is exceeded.
    pub fn headroom(&self, used_bytes: u64) -> f64 {
        1.0 - used_bytes as f64 / self.quota_bytes as f64
    }
}

impl DiskSpaceListener for DiskQuotaThrottler {
    fn on_update(&self, used_bytes: u64) {
        self.metrics
            .disk_usage_bytes
            .set(i64::try_from(used_bytes).unwrap_or(i64::MAX));

        let headroom = self.headroom(used_bytes);
        let factor = clamp_work_factor(self.policy.lock().apply(headroom));

        let last = self.applied.get();
        if factor != last {
            info!(
                used_bytes,
                quota_bytes = self.quota_bytes,
                headroom,
                old = last,
                new = factor,
                "Adjusting run loop work factor"
            );
            self.run_loop.set_work_factor(factor);
            self.metrics.executor_work_factor.set(factor);
            self.applied.set(factor);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::monitor::policy::LinearPolicy;
    use async_trait::async_trait;
    use std::io::Write;

    #[derive(Default)]
    struct RecordingRunLoop {
        factors: Mutex<Vec<f64>>,
    }

    #[async_trait]
    impl RunLoop for RecordingRunLoop {
        async fn run(&self) -> anyhow::Result<()> {
            Ok(())
        }

        fn shutdown(&self) {}

        fn set_work_factor(&self, factor: f64) {
            self.factors.lock().push(factor);
        }
    }

    fn write_file(dir: &Path, name: &str, len: usize) {
        let mut f = std::fs::File::create(dir.join(name)).unwrap();
        f.write_all(&vec![0u8; len]).unwrap();
    }

    #[test]
    fn test_scan_is_recursive() {
        let dir = tempfile::tempdir().unwrap();
        write_file(dir.path(), "a", 100);
        std::fs::create_dir(dir.path().join("nested")).unwrap();
        write_file(&dir.path().join("nested"), "b", 250);

        let missing = dir.path().join("does-not-exist");
        assert_eq!(scan_total_bytes(&[dir.path().to_path_buf(), missing]), 350);
    }

    #[tokio::test]
    async fn test_failed_scan_reports_nothing() {
        assert_eq!(run_scan(|| 42).await, Some(42));
        assert_eq!(run_scan(|| panic!("scan task died")).await, None);
    }

    #[test]
    fn test_throttler_only_signals_changes() {
        let run_loop = Arc::new(RecordingRunLoop::default());
        let metrics = ContainerMetrics::new("0", false).unwrap();
        let throttler = DiskQuotaThrottler::new(
            1000,
            Box::new(LinearPolicy::new(0.5).unwrap()),
            run_loop.clone(),
            metrics.clone(),
        );

        throttler.on_update(100); // headroom 0.9
        assert!(run_loop.factors.lock().is_empty());
        assert_eq!(throttler.applied(), 1.0);

        throttler.on_update(950); // headroom 0.05
        throttler.on_update(950);
        let factors = run_loop.factors.lock().clone();
        assert_eq!(factors.len(), 1);
        assert!(factors[0] < 1.0);
        assert_eq!(metrics.disk_usage_bytes.get(), 950);
        assert_eq!(metrics.disk_quota_bytes.get(), 1000);
        assert!(metrics.executor_work_factor.get() < 1.0);
        assert_eq!(throttler.applied(), factors[0]);
    }

    struct Capture(Mutex<Vec<u64>>);

    impl DiskSpaceListener for Capture {
        fn on_update(&self, used_bytes: u64) {
            self.0.lock().push(used_bytes);
        }
    }

    #[tokio::test]
    async fn test_monitor_polls_until_stopped() {
        let dir = tempfile::tempdir().unwrap();
        write_file(dir.path(), "data", 64);

        let monitor =
            PollingScanDiskSpaceMonitor::new(vec![dir.path().to_path_buf()], Duration::from_millis(10));
        let capture = Arc::new(Capture(Mutex::new(Vec::new())));
        monitor.register_listener(capture.clone());
        monitor.start();

        tokio::time::sleep(Duration::from_millis(60)).await;
        monitor.stop().await;

        let seen = capture.0.lock().clone();
        assert!(!seen.is_empty());
        assert!(seen.iter().all(|b| *b == 64));

        let count = seen.len();
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(capture.0.lock().len(), count);
    }
}
