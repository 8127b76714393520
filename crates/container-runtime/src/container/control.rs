//! State shared between the running container, its shutdown hook and any
//! task holding a `ShutdownHandle`.

use std::fmt::Write as _;
use std::sync::Arc;

use container_telemetry::{ContainerMetrics, TaskMetrics};
use parking_lot::RwLock;
use stream_types::TaskName;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::container::stage::Stage;
use crate::container::status::ContainerStatus;
use crate::ports::RunLoop;

pub(crate) struct ContainerControl {
    container_id: String,
    status: watch::Sender<ContainerStatus>,
    shutdown_requested: watch::Sender<bool>,
    run_loop_done: watch::Sender<bool>,
    grace_expired: watch::Sender<bool>,
    run_loop: RwLock<Option<Arc<dyn RunLoop>>>,
    started: RwLock<Vec<Stage>>,
    tasks: RwLock<Vec<(TaskName, TaskMetrics)>>,
    metrics: ContainerMetrics,
}

impl ContainerControl {
    pub(crate) fn new(container_id: String, metrics: ContainerMetrics) -> Self {
        Self {
            container_id,
            status: watch::Sender::new(ContainerStatus::NotStarted),
            shutdown_requested: watch::Sender::new(false),
            run_loop_done: watch::Sender::new(false),
            grace_expired: watch::Sender::new(false),
            run_loop: RwLock::new(None),
            started: RwLock::new(Vec::new()),
            tasks: RwLock::new(Vec::new()),
            metrics,
        }
    }

    // ===== STATUS =====

    pub(crate) fn status(&self) -> ContainerStatus {
        *self.status.borrow()
    }

    pub(crate) fn subscribe_status(&self) -> watch::Receiver<ContainerStatus> {
        self.status.subscribe()
    }

    /// Move to `next` if allowed; returns the status actually held afterwards.
    pub(crate) fn transition(&self, next: ContainerStatus) -> Result<(), ContainerStatus> {
        let mut rejected = None;
        self.status.send_if_modified(|current| {
            if current.can_transition_to(next) {
                debug!(from = %current, to = %next, "Container status change");
                *current = next;
                true
            } else {
                rejected = Some(*current);
                false
            }
        });
        rejected.map_or(Ok(()), Err)
    }

    // ===== SHUTDOWN =====

    pub(crate) fn request_shutdown(&self) {
        let status = self.status();
        if status.is_terminal() {
            debug!(%status, "Ignoring shutdown request");
            return;
        }
        if self.shutdown_requested.send_replace(true) {
            debug!("Shutdown already requested");
        } else {
            info!(container = %self.container_id, %status, "Shutdown requested");
        }
        let run_loop = self.run_loop.read().clone();
        if let Some(run_loop) = run_loop {
            run_loop.shutdown();
        }
    }

    pub(crate) fn shutdown_requested(&self) -> bool {
        *self.shutdown_requested.borrow()
    }

    pub(crate) async fn wait_for_shutdown(&self) {
        let mut rx = self.shutdown_requested.subscribe();
        if rx.wait_for(|requested| *requested).await.is_err() {
            warn!("Shutdown channel closed while idle");
        }
    }

    /// Register the run loop; stops it at once if shutdown already came in.
    pub(crate) fn attach_run_loop(&self, run_loop: Arc<dyn RunLoop>) {
        *self.run_loop.write() = Some(run_loop.clone());
        if self.shutdown_requested() {
            run_loop.shutdown();
        }
    }

    pub(crate) fn mark_run_loop_done(&self) {
        self.run_loop_done.send_replace(true);
    }

    pub(crate) fn subscribe_run_loop_done(&self) -> watch::Receiver<bool> {
        self.run_loop_done.subscribe()
    }

    /// The run loop outlived the shutdown grace period; `run` abandons it.
    pub(crate) fn expire_grace(&self) {
        self.grace_expired.send_replace(true);
    }

    pub(crate) async fn wait_for_grace_expiry(&self) {
        let mut rx = self.grace_expired.subscribe();
        if rx.wait_for(|expired| *expired).await.is_err() {
            std::future::pending::<()>().await;
        }
    }

    // ===== DIAGNOSTICS =====

    pub(crate) fn record_stage(&self, stage: Stage) {
        self.started.write().push(stage);
    }

    pub(crate) fn started_stages(&self) -> Vec<Stage> {
        self.started.read().clone()
    }

    pub(crate) fn track_tasks(&self, tasks: Vec<(TaskName, TaskMetrics)>) {
        *self.tasks.write() = tasks;
    }

    /// Snapshot of the container's progress, logged when shutdown stalls.
    pub(crate) fn diagnostic_dump(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "container {} status={}", self.container_id, self.status());
        let stages: Vec<&str> = self.started.read().iter().map(|s| s.name()).collect();
        let _ = writeln!(out, "started stages: [{}]", stages.join(", "));
        let _ = writeln!(
            out,
            "work factor: {:.3}, disk usage: {} bytes",
            self.metrics.executor_work_factor.get(),
            self.metrics.disk_usage_bytes.get()
        );
        for (task, metrics) in self.tasks.read().iter() {
            let _ = writeln!(
                out,
                "task {task}: processed={} commits={} sent={}",
                metrics.processed.get(),
                metrics.commits.get(),
                metrics.sent.get()
            );
        }
        out
    }
}

/// Requests shutdown of a container from any task.
#[derive(Clone)]
pub struct ShutdownHandle {
    pub(crate) control: Arc<ContainerControl>,
}

impl ShutdownHandle {
    /// No-op once the container is stopped or failed.
    pub fn shutdown(&self) {
        self.control.request_shutdown();
    }

    pub fn status(&self) -> ContainerStatus {
        self.control.status()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn control() -> ContainerControl {
        ContainerControl::new("0".into(), ContainerMetrics::new("0", false).unwrap())
    }

    #[test]
    fn test_transition_rejects_backwards_moves() {
        let control = control();
        assert!(control.transition(ContainerStatus::Starting).is_ok());
        assert!(control.transition(ContainerStatus::Failed).is_ok());
        assert_eq!(
            control.transition(ContainerStatus::Stopped),
            Err(ContainerStatus::Failed)
        );
        assert_eq!(control.status(), ContainerStatus::Failed);
    }

    #[test]
    fn test_shutdown_ignored_when_terminal() {
        let control = control();
        control.transition(ContainerStatus::Starting).unwrap();
        control.transition(ContainerStatus::Failed).unwrap();
        control.request_shutdown();
        assert!(!control.shutdown_requested());
    }

    #[tokio::test]
    async fn test_grace_expiry_wakes_waiter() {
        let control = Arc::new(control());
        let waiter = {
            let control = control.clone();
            tokio::spawn(async move { control.wait_for_grace_expiry().await })
        };
        tokio::task::yield_now().await;
        assert!(!waiter.is_finished());

        control.expire_grace();
        tokio::time::timeout(std::time::Duration::from_secs(1), waiter)
            .await
            .expect("waiter woken")
            .unwrap();
    }

    #[test]
    fn test_dump_lists_started_stages() {
        let control = control();
        control.record_stage(Stage::Metrics);
        control.record_stage(Stage::Diagnostics);
        let dump = control.diagnostic_dump();
        assert!(dump.contains("started stages: [metrics, diagnostics]"));
        assert!(dump.contains("status=not-started"));
    }
}
