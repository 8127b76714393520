//! Periodic sampling of this process's resident memory.

use std::sync::Arc;
use std::time::Duration;

use container_telemetry::ContainerMetrics;
use parking_lot::Mutex;
use sysinfo::{Pid, ProcessRefreshKind, ProcessesToUpdate, System};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

const BYTES_PER_MB: f64 = 1024.0 * 1024.0;

/// One memory sample.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HostStatistics {
    /// Resident memory of this process in megabytes.
    pub physical_memory_mb: f64,
}

pub trait HostStatisticsListener: Send + Sync {
    fn on_update(&self, stats: HostStatistics);
}

/// Reads this process's statistics through `sysinfo`.
pub struct ProcessSampler {
    pid: Pid,
    system: System,
}

impl Default for ProcessSampler {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessSampler {
    pub fn new() -> Self {
        Self {
            pid: Pid::from_u32(std::process::id()),
            system: System::new(),
        }
    }

    /// `None` if the process could not be found in the process table.
    pub fn sample(&mut self) -> Option<HostStatistics> {
        self.system.refresh_processes_specifics(
            ProcessesToUpdate::Some(&[self.pid]),
            true,
            ProcessRefreshKind::new().with_memory(),
        );
        self.system.process(self.pid).map(|process| HostStatistics {
            physical_memory_mb: process.memory() as f64 / BYTES_PER_MB,
        })
    }
}

/// Publishes `physical_memory_mb` every poll interval.
pub struct HostStatisticsMonitor {
    interval: Duration,
    metrics: ContainerMetrics,
    listeners: Mutex<Vec<Arc<dyn HostStatisticsListener>>>,
    running: Mutex<Option<(watch::Sender<bool>, JoinHandle<()>)>>,
}

impl HostStatisticsMonitor {
    pub fn new(interval: Duration, metrics: ContainerMetrics) -> Self {
        Self {
            interval,
            metrics,
            listeners: Mutex::new(Vec::new()),
            running: Mutex::new(None),
        }
    }

    pub fn register_listener(&self, listener: Arc<dyn HostStatisticsListener>) {
        self.listeners.lock().push(listener);
    }

    pub fn start(&self) {
        let mut running = self.running.lock();
        if running.is_some() {
            return;
        }

        let (stop_tx, mut stop_rx) = watch::channel(false);
        let interval = self.interval;
        let gauge = self.metrics.physical_memory_mb.clone();
        let listeners = self.listeners.lock().clone();

        info!(
            interval_ms = interval.as_millis() as u64,
            "Starting host statistics monitor"
        );

        let handle = tokio::spawn(async move {
            let mut sampler = ProcessSampler::new();
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        match sampler.sample() {
                            Some(stats) => {
                                gauge.set(stats.physical_memory_mb);
                                for listener in &listeners {
                                    listener.on_update(stats);
                                }
                            }
                            None => debug!("Process not found in host statistics sample"),
                        }
                    }
                    _ = stop_rx.changed() => break,
                }
            }
        });
        *running = Some((stop_tx, handle));
    }

    pub async fn stop(&self) {
        let running = self.running.lock().take();
        if let Some((stop_tx, handle)) = running {
            let _ = stop_tx.send(true);
            if let Err(e) = handle.await {
                warn!(error = %e, "Host statistics monitor task ended abnormally");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sampler_sees_own_process() {
        let stats = ProcessSampler::new().sample().unwrap();
        assert!(stats.physical_memory_mb > 0.0);
    }

    struct Count(Mutex<usize>);

    impl HostStatisticsListener for Count {
        fn on_update(&self, _stats: HostStatistics) {
            *self.0.lock() += 1;
        }
    }

    #[tokio::test]
    async fn test_monitor_publishes_gauge() {
        let metrics = ContainerMetrics::new("0", false).unwrap();
        let monitor = HostStatisticsMonitor::new(Duration::from_millis(10), metrics.clone());
        let count = Arc::new(Count(Mutex::new(0)));
        monitor.register_listener(count.clone());

        monitor.start();
        tokio::time::sleep(Duration::from_millis(50)).await;
        monitor.stop().await;

        assert!(*count.0.lock() >= 1);
        assert!(metrics.physical_memory_mb.get() > 0.0);
    }
}
