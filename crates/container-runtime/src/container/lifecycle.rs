//! Start and stop of each startup stage.

use std::collections::BTreeSet;
use std::sync::Arc;

use anyhow::{anyhow, Context};
use container_telemetry::log_stage;
use stream_types::SystemStream;
use tracing::{debug, info, warn};

use crate::container::hook::{termination_signal, ShutdownHook};
use crate::container::resources::Resources;
use crate::container::stage::Stage;
use crate::container::Container;
use crate::error::ContainerError;
use crate::monitor::{DiskQuotaThrottler, HostStatisticsMonitor, PollingScanDiskSpaceMonitor};
use crate::ports::OffsetCoordinator;

/// Handles created while starting, released while stopping.
pub(crate) struct Runtime {
    pub res: Resources,
    pub started: Vec<Stage>,
    offsets: Option<Arc<dyn OffsetCoordinator>>,
    disk_monitor: Option<PollingScanDiskSpaceMonitor>,
    host_monitor: Option<HostStatisticsMonitor>,
    hook: Option<ShutdownHook>,
}

impl Runtime {
    pub(crate) fn new(res: Resources) -> Self {
        Self {
            res,
            started: Vec::new(),
            offsets: None,
            disk_monitor: None,
            host_monitor: None,
            hook: None,
        }
    }
}

impl Container {
    /// Run every startup stage in order. A stage counts as started as soon
    /// as it is attempted, so a half-started stage is still stopped.
    pub(crate) async fn start_stages(&self, rt: &mut Runtime) -> Result<(), ContainerError> {
        for stage in Stage::STARTUP_ORDER {
            rt.started.push(stage);
            self.control.record_stage(stage);
            log_stage!(info, stage.name(), "Starting stage");
            self.start_stage(rt, stage)
                .await
                .map_err(|e| ContainerError::runtime(stage.name(), e))?;
        }
        Ok(())
    }

    /// Stop the started stages in reverse. Every stage is attempted; the
    /// first failure is returned.
    pub(crate) async fn stop_stages(&self, mut rt: Runtime) -> Option<ContainerError> {
        let mut first_error = None;
        let started = std::mem::take(&mut rt.started);
        for stage in started.into_iter().rev() {
            log_stage!(info, stage.name(), "Stopping stage");
            if let Err(e) = self.stop_stage(&mut rt, stage).await {
                log_stage!(warn, stage.name(), "Failed to stop stage", error = %e);
                first_error.get_or_insert(ContainerError::shutdown(stage.name(), e));
            }
        }
        first_error
    }

    async fn start_stage(&self, rt: &mut Runtime, stage: Stage) -> anyhow::Result<()> {
        let collaborators = &self.collaborators;
        match stage {
            Stage::Metrics => {
                let source = format!("container-{}", self.id);
                for (name, reporter) in &rt.res.reporters {
                    reporter.register(&source, self.metrics.registry().clone());
                    match reporter.start().await {
                        Ok(()) => debug!(reporter = %name, "Started metrics reporter"),
                        Err(e) => warn!(reporter = %name, error = %e, "Failed to start metrics reporter"),
                    }
                }
            }
            Stage::Diagnostics => {
                if let Some(diagnostics) = self.diagnostics() {
                    diagnostics.start().await?;
                }
            }
            Stage::AdminInterfaces => {
                for (system, admin) in rt.res.metadata.admins() {
                    admin
                        .start()
                        .await
                        .with_context(|| format!("starting admin for '{system}'"))?;
                }
                if let Some(endpoint) = self.admin_endpoint() {
                    endpoint.start(self.metrics.registry()).await?;
                }
            }
            Stage::OffsetCoordinator => {
                let streams: BTreeSet<SystemStream> = self
                    .topology
                    .input_streams
                    .iter()
                    .chain(self.topology.changelog_streams.values())
                    .cloned()
                    .collect();
                let metadata = rt.res.metadata.fetch(&streams).await?;
                info!(streams = metadata.len(), "Prefetched stream metadata");

                let Some(factory) = &collaborators.offsets_factory else {
                    debug!("No offset coordinator configured");
                    return Ok(());
                };
                let coordinator = factory.create(metadata, rt.res.consumers.checkpoint_listeners())?;
                rt.offsets = Some(coordinator.clone());
                for task in rt.res.tasks.values() {
                    coordinator.register(task.name(), task.regular_inputs());
                }
                coordinator.start().await?;
                for task in rt.res.tasks.values() {
                    task.attach_offsets(coordinator.clone());
                }
            }
            Stage::Locality => {
                if let Some(locality) = &collaborators.locality {
                    match hostname::get() {
                        Ok(host) => {
                            let host = host.to_string_lossy().into_owned();
                            if let Err(e) = locality.write_container_locality(&self.id, &host).await {
                                warn!(host = %host, error = %e, "Failed to write container locality");
                            }
                        }
                        Err(e) => warn!(error = %e, "Unable to resolve hostname for locality"),
                    }
                }
            }
            Stage::Storage => {
                if let Some(storage) = &rt.res.storage {
                    storage.start().await?;
                }
            }
            Stage::Tables => {
                for task in rt.res.tasks.values() {
                    task.init_tables().await?;
                }
            }
            Stage::DiskMonitor => {
                let Some(interval) = self.settings.disk_poll_interval else {
                    info!("Disk quota monitor disabled");
                    return Ok(());
                };
                let policy = self
                    .disk_policy
                    .lock()
                    .take()
                    .ok_or_else(|| anyhow!("disk quota policy already in use"))?;
                let paths = rt
                    .res
                    .storage
                    .as_ref()
                    .map(|s| s.watched_paths())
                    .unwrap_or_default();
                let throttler = DiskQuotaThrottler::new(
                    self.settings.disk_quota_bytes,
                    policy,
                    rt.res.run_loop.clone(),
                    self.metrics.clone(),
                );
                let monitor = PollingScanDiskSpaceMonitor::new(paths, interval);
                monitor.register_listener(Arc::new(throttler));
                monitor.start();
                rt.disk_monitor = Some(monitor);
            }
            Stage::HostStatistics => {
                if let Some(interval) = self.settings.host_stats_interval {
                    let monitor = HostStatisticsMonitor::new(interval, self.metrics.clone());
                    monitor.start();
                    rt.host_monitor = Some(monitor);
                }
            }
            Stage::Producers => {
                for task in rt.res.tasks.keys() {
                    rt.res.producers.register(task.as_str())?;
                }
                rt.res.producers.start().await?;
            }
            Stage::Tasks => {
                rt.res.timers.start();
                if let Some(context) = &rt.res.container_context {
                    context.start().await.context("starting application container context")?;
                }
                for task in rt.res.tasks.values() {
                    task.init_task().await?;
                }
            }
            Stage::Consumers => {
                for task in rt.res.tasks.values() {
                    for ssp in task.regular_inputs() {
                        let offset = rt
                            .offsets
                            .as_ref()
                            .and_then(|o| o.starting_offset(task.name(), ssp));
                        rt.res.consumers.register(ssp, offset)?;
                    }
                }
                rt.res.consumers.start().await?;
            }
            Stage::SecurityManager => {
                if let Some(security) = &rt.res.security {
                    security.start().await?;
                }
            }
            Stage::ShutdownHook => {
                let signal = self
                    .shutdown_signal
                    .lock()
                    .take()
                    .unwrap_or_else(termination_signal);
                rt.hook = Some(ShutdownHook::install(
                    self.control.clone(),
                    signal,
                    self.settings.shutdown_grace,
                ));
            }
        }
        Ok(())
    }

    async fn stop_stage(&self, rt: &mut Runtime, stage: Stage) -> anyhow::Result<()> {
        match stage {
            Stage::Metrics => {
                let mut first_error = None;
                for (name, reporter) in &rt.res.reporters {
                    if let Err(e) = reporter.stop().await {
                        first_error.get_or_insert(e.context(format!("stopping reporter '{name}'")));
                    }
                }
                first_error.map_or(Ok(()), Err)
            }
            Stage::Diagnostics => match self.diagnostics() {
                Some(diagnostics) => diagnostics.stop().await,
                None => Ok(()),
            },
            Stage::AdminInterfaces => {
                let endpoint = match self.admin_endpoint() {
                    Some(endpoint) => endpoint.stop().await,
                    None => Ok(()),
                };
                let mut first_error = endpoint.err();
                for (system, admin) in rt.res.metadata.admins() {
                    if let Err(e) = admin.stop().await {
                        first_error.get_or_insert(e.context(format!("stopping admin for '{system}'")));
                    }
                }
                first_error.map_or(Ok(()), Err)
            }
            Stage::OffsetCoordinator => match rt.offsets.take() {
                Some(coordinator) => coordinator.stop().await,
                None => Ok(()),
            },
            Stage::Locality => match &self.collaborators.locality {
                Some(locality) => locality.close().await,
                None => Ok(()),
            },
            Stage::Storage => match &rt.res.storage {
                Some(storage) => storage.stop().await,
                None => Ok(()),
            },
            Stage::Tables => {
                let mut first_error = None;
                for task in rt.res.tasks.values() {
                    if let Err(e) = task.close_tables().await {
                        first_error.get_or_insert(e);
                    }
                }
                first_error.map_or(Ok(()), Err)
            }
            Stage::DiskMonitor => {
                if let Some(monitor) = rt.disk_monitor.take() {
                    monitor.stop().await;
                }
                Ok(())
            }
            Stage::HostStatistics => {
                if let Some(monitor) = rt.host_monitor.take() {
                    monitor.stop().await;
                }
                Ok(())
            }
            Stage::Producers => rt.res.producers.stop().await,
            Stage::Tasks => {
                let mut first_error = None;
                for task in rt.res.tasks.values() {
                    if let Err(e) = task.close_task().await {
                        warn!(task = %task.name(), error = %e, "Failed to close task");
                        first_error.get_or_insert(e);
                    }
                }
                if let Some(context) = &rt.res.container_context {
                    if let Err(e) = context.stop().await {
                        first_error.get_or_insert(e.context("stopping application container context"));
                    }
                }
                rt.res.timers.stop().await;
                first_error.map_or(Ok(()), Err)
            }
            Stage::Consumers => rt.res.consumers.stop().await,
            Stage::SecurityManager => match &rt.res.security {
                Some(security) => security.stop().await,
                None => Ok(()),
            },
            Stage::ShutdownHook => {
                if let Some(hook) = rt.hook.take() {
                    if hook.has_fired() {
                        debug!("Shutdown hook already fired, leaving it to finish");
                    }
                    hook.remove();
                }
                Ok(())
            }
        }
    }
}
