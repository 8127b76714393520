//! # Container Lifecycle Controller
//!
//! Owns one container's resources from acquisition to release.
//!
//! ## Lifecycle
//!
//! ```text
//! build() ── config validation, topology, serde table, factory resolution
//!    │
//! run() ──── NotStarted → Starting
//!    │        acquire resources (systems, storage, tasks, run loop)
//!    │        start stages 1..14 in order
//!    │       → Started
//!    │        await run loop (or idle until shutdown with no active tasks)
//!    │       → Stopped | Failed
//!    │        stop started stages in reverse, best effort
//!    └─────── listener: after_stop | after_failure
//! ```
//!
//! `shutdown()` may be called from any task at any time; the shutdown hook
//! calls it on a termination signal. A run loop still running when the
//! hook's grace period ends is abandoned and the container stops anyway.

mod builder;
mod control;
mod hook;
mod lifecycle;
mod resources;
mod stage;
mod status;

pub use builder::ContainerBuilder;
pub use control::ShutdownHandle;
pub use hook::{termination_signal, ShutdownSignal};
pub use stage::Stage;
pub use status::ContainerStatus;

use std::collections::BTreeMap;
use std::sync::Arc;

use container_telemetry::ContainerMetrics;
use parking_lot::Mutex;
use stream_types::ContainerModel;
use tokio::sync::watch;
use tracing::{error, info, instrument, warn};

use crate::config::{ContainerConfig, StoreDefinition};
use crate::error::ContainerError;
use crate::monitor::DiskQuotaPolicy;
use crate::ports::{
    AdminEndpoint, DiagnosticsManager, MetricsReporterFactory, SecurityManagerFactory,
    StorageEngineFactory, SystemFactory,
};
use crate::registry::CapabilityRegistry;
use crate::serdes::SerdeTable;
use crate::topology::ContainerTopology;

use builder::Collaborators;
use control::ContainerControl;
use lifecycle::Runtime;

/// The execution container for one set of tasks.
pub struct Container {
    id: String,
    model: ContainerModel,
    settings: ContainerConfig,
    registry: CapabilityRegistry,
    topology: ContainerTopology,
    serdes: Arc<SerdeTable>,
    systems: BTreeMap<String, Arc<dyn SystemFactory>>,
    stores: Vec<StoreDefinition>,
    engines: BTreeMap<String, Arc<dyn StorageEngineFactory>>,
    reporters: Vec<(String, Arc<dyn MetricsReporterFactory>)>,
    security: Option<Arc<dyn SecurityManagerFactory>>,
    disk_policy: Mutex<Option<Box<dyn DiskQuotaPolicy>>>,
    collaborators: Collaborators,
    shutdown_signal: Mutex<Option<ShutdownSignal>>,
    metrics: ContainerMetrics,
    control: Arc<ContainerControl>,
}

impl Container {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn status(&self) -> ContainerStatus {
        self.control.status()
    }

    /// Receiver notified on every status change.
    pub fn subscribe_status(&self) -> watch::Receiver<ContainerStatus> {
        self.control.subscribe_status()
    }

    pub fn settings(&self) -> &ContainerConfig {
        &self.settings
    }

    pub fn topology(&self) -> &ContainerTopology {
        &self.topology
    }

    pub fn serde_table(&self) -> &SerdeTable {
        &self.serdes
    }

    pub fn registry(&self) -> &CapabilityRegistry {
        &self.registry
    }

    pub fn metrics(&self) -> &ContainerMetrics {
        &self.metrics
    }

    /// Stages attempted so far, in start order.
    pub fn started_stages(&self) -> Vec<Stage> {
        self.control.started_stages()
    }

    pub fn diagnostic_dump(&self) -> String {
        self.control.diagnostic_dump()
    }

    /// Ask the container to stop. No-op once stopped or failed; safe to call
    /// repeatedly and from any task.
    pub fn shutdown(&self) {
        self.control.request_shutdown();
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle {
            control: self.control.clone(),
        }
    }

    fn diagnostics(&self) -> Option<&Arc<dyn DiagnosticsManager>> {
        self.collaborators
            .diagnostics
            .as_ref()
            .filter(|_| self.settings.diagnostics_enabled)
    }

    fn admin_endpoint(&self) -> Option<&Arc<dyn AdminEndpoint>> {
        self.collaborators
            .admin_endpoint
            .as_ref()
            .filter(|_| self.settings.admin_enabled)
    }

    /// Start the container, run it to completion and release everything it
    /// started.
    ///
    /// Returns the first error observed. A failure during shutdown is only
    /// returned when nothing failed before it, and leaves the status at
    /// `Stopped`.
    #[instrument(name = "container_run", skip(self), fields(container = %self.id))]
    pub async fn run(&self) -> Result<(), ContainerError> {
        if let Err(actual) = self.control.transition(ContainerStatus::Starting) {
            return Err(ContainerError::InvalidState { actual });
        }
        info!("Starting container");
        if let Some(listener) = &self.collaborators.listener {
            listener.before_start();
        }

        let mut runtime = None;
        let outcome = self.start_and_run(&mut runtime).await;
        self.control.mark_run_loop_done();

        let mut first_error = outcome.err();
        match &first_error {
            Some(e) => {
                error!(error = %e, "Container failed");
                let _ = self.control.transition(ContainerStatus::Failed);
            }
            None => {
                let _ = self.control.transition(ContainerStatus::Stopped);
            }
        }

        if let Some(rt) = runtime {
            if let Some(e) = self.stop_stages(rt).await {
                error!(error = %e, "Container shutdown incomplete");
                first_error.get_or_insert(e);
            }
        }

        let status = self.status();
        info!(%status, "Container shut down");
        if let Some(listener) = &self.collaborators.listener {
            match (status, &first_error) {
                (ContainerStatus::Failed, Some(e)) => listener.after_failure(e),
                _ => listener.after_stop(),
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    async fn start_and_run(&self, slot: &mut Option<Runtime>) -> Result<(), ContainerError> {
        let resources = self.acquire()?;
        let rt = slot.insert(Runtime::new(resources));
        self.start_stages(rt).await?;

        self.control
            .transition(ContainerStatus::Started)
            .map_err(|actual| ContainerError::InvalidState { actual })?;
        info!(tasks = rt.res.tasks.len(), "Container started");
        if let Some(listener) = &self.collaborators.listener {
            listener.after_start();
        }

        if self.control.shutdown_requested() {
            info!("Shutdown requested during startup, skipping run loop");
            return Ok(());
        }
        if rt.res.tasks.is_empty() {
            info!("No active tasks, idling until shutdown");
            self.control.wait_for_shutdown().await;
            return Ok(());
        }

        let run_loop = rt.res.run_loop.clone();
        tokio::select! {
            result = run_loop.run() => result.map_err(|e| ContainerError::runtime("run loop", e)),
            () = self.control.wait_for_grace_expiry() => {
                warn!("Abandoning run loop after the shutdown grace period");
                Ok(())
            }
        }
    }
}
