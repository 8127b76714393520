//! Assembles a `Container` from configuration, the job model and the
//! application's collaborators. Every configuration problem surfaces here,
//! before anything is started.

use std::collections::BTreeMap;
use std::sync::Arc;

use container_telemetry::ContainerMetrics;
use parking_lot::Mutex;
use stream_types::JobModel;
use tracing::{info, instrument};

use crate::config::{Config, ContainerConfig};
use crate::container::control::ContainerControl;
use crate::container::hook::ShutdownSignal;
use crate::container::Container;
use crate::error::{ConfigError, ContainerError};
use crate::ports::{
    AdminEndpoint, ApplicationContainerContextFactory, ApplicationTaskContextFactory, Clock,
    ContainerListener, DiagnosticsManager, LocalityManager, OffsetCoordinatorFactory,
    RunLoopFactory, StorageSupervisorFactory, StreamTaskFactory, SystemClock,
};
use crate::registry::{CapabilityRegistry, FactoryCatalog};
use crate::serdes::SerdeTable;
use crate::topology::StreamTopologyResolver;

/// Collaborators supplied by the application rather than resolved by name.
pub(crate) struct Collaborators {
    pub task_factory: Arc<dyn StreamTaskFactory>,
    pub run_loop_factory: Arc<dyn RunLoopFactory>,
    pub offsets_factory: Option<Arc<dyn OffsetCoordinatorFactory>>,
    pub storage_factory: Option<Arc<dyn StorageSupervisorFactory>>,
    pub listener: Option<Arc<dyn ContainerListener>>,
    pub locality: Option<Arc<dyn LocalityManager>>,
    pub diagnostics: Option<Arc<dyn DiagnosticsManager>>,
    pub admin_endpoint: Option<Arc<dyn AdminEndpoint>>,
    pub container_context_factory: Option<Arc<dyn ApplicationContainerContextFactory>>,
    pub task_context_factory: Option<Arc<dyn ApplicationTaskContextFactory>>,
    pub clock: Arc<dyn Clock>,
}

#[derive(Default)]
pub struct ContainerBuilder {
    container_id: Option<String>,
    job_model: Option<JobModel>,
    config: Config,
    catalog: Option<FactoryCatalog>,
    task_factory: Option<Arc<dyn StreamTaskFactory>>,
    run_loop_factory: Option<Arc<dyn RunLoopFactory>>,
    offsets_factory: Option<Arc<dyn OffsetCoordinatorFactory>>,
    storage_factory: Option<Arc<dyn StorageSupervisorFactory>>,
    listener: Option<Arc<dyn ContainerListener>>,
    locality: Option<Arc<dyn LocalityManager>>,
    diagnostics: Option<Arc<dyn DiagnosticsManager>>,
    admin_endpoint: Option<Arc<dyn AdminEndpoint>>,
    container_context_factory: Option<Arc<dyn ApplicationContainerContextFactory>>,
    task_context_factory: Option<Arc<dyn ApplicationTaskContextFactory>>,
    shutdown_signal: Option<ShutdownSignal>,
    clock: Option<Arc<dyn Clock>>,
}

impl ContainerBuilder {
    pub fn new(container_id: impl Into<String>, job_model: JobModel, config: Config) -> Self {
        Self {
            container_id: Some(container_id.into()),
            job_model: Some(job_model),
            config,
            ..Default::default()
        }
    }

    /// Factory catalog; defaults to the built-in serdes and policies.
    pub fn catalog(mut self, catalog: FactoryCatalog) -> Self {
        self.catalog = Some(catalog);
        self
    }

    pub fn task_factory(mut self, factory: Arc<dyn StreamTaskFactory>) -> Self {
        self.task_factory = Some(factory);
        self
    }

    pub fn run_loop_factory(mut self, factory: Arc<dyn RunLoopFactory>) -> Self {
        self.run_loop_factory = Some(factory);
        self
    }

    pub fn offset_coordinator_factory(mut self, factory: Arc<dyn OffsetCoordinatorFactory>) -> Self {
        self.offsets_factory = Some(factory);
        self
    }

    pub fn storage_supervisor_factory(mut self, factory: Arc<dyn StorageSupervisorFactory>) -> Self {
        self.storage_factory = Some(factory);
        self
    }

    pub fn listener(mut self, listener: Arc<dyn ContainerListener>) -> Self {
        self.listener = Some(listener);
        self
    }

    pub fn locality_manager(mut self, locality: Arc<dyn LocalityManager>) -> Self {
        self.locality = Some(locality);
        self
    }

    pub fn diagnostics_manager(mut self, diagnostics: Arc<dyn DiagnosticsManager>) -> Self {
        self.diagnostics = Some(diagnostics);
        self
    }

    pub fn admin_endpoint(mut self, endpoint: Arc<dyn AdminEndpoint>) -> Self {
        self.admin_endpoint = Some(endpoint);
        self
    }

    pub fn container_context_factory(
        mut self,
        factory: Arc<dyn ApplicationContainerContextFactory>,
    ) -> Self {
        self.container_context_factory = Some(factory);
        self
    }

    pub fn task_context_factory(mut self, factory: Arc<dyn ApplicationTaskContextFactory>) -> Self {
        self.task_context_factory = Some(factory);
        self
    }

    /// Future that fires the shutdown hook; defaults to the process
    /// termination signals.
    pub fn shutdown_signal(
        mut self,
        signal: impl std::future::Future<Output = ()> + Send + 'static,
    ) -> Self {
        self.shutdown_signal = Some(Box::pin(signal));
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    #[instrument(name = "container_build", skip(self))]
    pub fn build(self) -> Result<Container, ContainerError> {
        let id = self
            .container_id
            .ok_or(ConfigError::MissingCollaborator("container id"))?;
        let job = self
            .job_model
            .ok_or(ConfigError::MissingCollaborator("job model"))?;
        let model = job
            .container(&id)
            .cloned()
            .ok_or_else(|| ConfigError::UnknownContainer {
                container: id.clone(),
            })?;

        let settings = ContainerConfig::from_config(&self.config)?;
        let registry = CapabilityRegistry::new(
            self.config,
            self.catalog.unwrap_or_else(FactoryCatalog::with_builtins),
        );
        let config = registry.config();

        let stores = config.store_definitions()?;
        let topology =
            StreamTopologyResolver::new(config).resolve_with_stores(&model, &job, &stores)?;
        let serdes = SerdeTable::build(&registry, &topology.input_streams)?;

        let systems = config
            .system_names()
            .into_iter()
            .map(|s| registry.system(&s).map(|f| (s, f)))
            .collect::<Result<BTreeMap<_, _>, _>>()?;
        let engines = stores
            .iter()
            .map(|s| registry.storage_engine(&s.name).map(|f| (s.name.clone(), f)))
            .collect::<Result<BTreeMap<_, _>, _>>()?;
        let reporters = config
            .metrics_reporters()?
            .into_iter()
            .map(|(name, _)| registry.metrics_reporter(&name).map(|f| (name, f)))
            .collect::<Result<Vec<_>, _>>()?;
        let security = registry.security_manager(settings.security_manager_factory.as_deref())?;
        let disk_policy = registry
            .disk_quota_policy(&settings.disk_quota_policy)?
            .create(config)?;

        if !stores.is_empty() && self.storage_factory.is_none() {
            return Err(ConfigError::MissingCollaborator("storage supervisor factory").into());
        }
        let collaborators = Collaborators {
            task_factory: self
                .task_factory
                .ok_or(ConfigError::MissingCollaborator("stream task factory"))?,
            run_loop_factory: self
                .run_loop_factory
                .ok_or(ConfigError::MissingCollaborator("run loop factory"))?,
            offsets_factory: self.offsets_factory,
            storage_factory: self.storage_factory,
            listener: self.listener,
            locality: self.locality,
            diagnostics: self.diagnostics,
            admin_endpoint: self.admin_endpoint,
            container_context_factory: self.container_context_factory,
            task_context_factory: self.task_context_factory,
            clock: self.clock.unwrap_or_else(|| Arc::new(SystemClock)),
        };

        let metrics = ContainerMetrics::new(&id, settings.timers_enabled)?;
        info!(
            container = %id,
            job = %settings.job_name,
            tasks = topology.tasks.len(),
            systems = systems.len(),
            stores = stores.len(),
            "Container assembled"
        );

        Ok(Container {
            control: Arc::new(ContainerControl::new(id.clone(), metrics.clone())),
            id,
            model,
            settings,
            registry,
            topology,
            serdes: Arc::new(serdes),
            systems,
            stores,
            engines,
            reporters,
            security,
            disk_policy: Mutex::new(Some(disk_policy)),
            collaborators,
            shutdown_signal: Mutex::new(self.shutdown_signal),
            metrics,
        })
    }
}
