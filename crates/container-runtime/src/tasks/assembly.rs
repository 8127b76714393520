//! Builds one `TaskInstance` per active task.

use std::collections::BTreeMap;
use std::sync::Arc;

use container_telemetry::ContainerMetrics;
use stream_types::TaskName;
use tracing::{info, instrument};

use crate::error::{ConfigError, ContainerError};
use crate::multiplex::ProducerMultiplexer;
use crate::ports::{
    ApplicationContainerContext, ApplicationTaskContextFactory, StorageSupervisor,
    StreamTaskFactory, TableProvider,
};
use crate::registry::CapabilityRegistry;
use crate::tasks::instance::{TaskCollector, TaskInstance, TaskParts, TaskTables};
use crate::tasks::timer::TimerExecutor;
use crate::topology::ContainerTopology;

/// Everything task assembly draws from.
pub struct TaskAssembly<'a> {
    pub registry: &'a CapabilityRegistry,
    pub topology: &'a ContainerTopology,
    pub task_factory: &'a dyn StreamTaskFactory,
    pub task_context_factory: Option<&'a dyn ApplicationTaskContextFactory>,
    pub container_context: Option<Arc<dyn ApplicationContainerContext>>,
    pub producers: Arc<ProducerMultiplexer>,
    pub storage: Option<&'a dyn StorageSupervisor>,
    pub timers: &'a TimerExecutor,
    pub metrics: &'a ContainerMetrics,
}

impl TaskAssembly<'_> {
    /// Standby tasks are skipped: they only exist in storage.
    #[instrument(name = "assemble_tasks", skip(self), fields(container = %self.topology.container_id))]
    pub fn assemble(&self) -> Result<BTreeMap<TaskName, Arc<TaskInstance>>, ContainerError> {
        let config = self.registry.config();
        let table_ids: Vec<String> = config
            .table_providers()
            .into_iter()
            .map(|(id, _)| id)
            .collect();

        let mut instances = BTreeMap::new();
        for streams in self.topology.active_tasks() {
            let model = &streams.task;
            if instances.contains_key(&model.name) {
                return Err(ConfigError::DuplicateTask {
                    task: model.name.to_string(),
                }
                .into());
            }

            let metrics = self.metrics.task(model.name.as_str());
            let collector =
                TaskCollector::new(model.name.clone(), self.producers.clone(), metrics.clone());

            let mut providers: BTreeMap<String, Arc<dyn TableProvider>> = BTreeMap::new();
            for id in &table_ids {
                let factory = self.registry.table_provider(id)?;
                let provider = factory.create(id, config).map_err(|source| {
                    ContainerError::ResourceAcquisition {
                        kind: "table provider",
                        name: id.clone(),
                        source,
                    }
                })?;
                providers.insert(id.clone(), provider);
            }

            let task = self.task_factory.create(model).map_err(|source| {
                ContainerError::ResourceAcquisition {
                    kind: "stream task",
                    name: model.name.to_string(),
                    source,
                }
            })?;

            let app_context = self
                .task_context_factory
                .map(|factory| factory.create(model, self.container_context.clone()))
                .transpose()
                .map_err(|source| ContainerError::ResourceAcquisition {
                    kind: "application task context",
                    name: model.name.to_string(),
                    source,
                })?;

            let instance = TaskInstance::new(TaskParts {
                model: model.clone(),
                regular_inputs: streams.regular_inputs.clone(),
                side_inputs: streams.side_inputs.clone(),
                task,
                collector,
                storage: self.storage.and_then(|s| s.task_storage(&model.name)),
                tables: TaskTables::new(providers),
                timers: self.timers.handle(model.name.clone()),
                container_context: self.container_context.clone(),
                app_context,
                metrics,
            });
            instances.insert(model.name.clone(), Arc::new(instance));
        }

        let standby = self.topology.tasks.len() - instances.len();
        self.metrics.active_tasks.set(instances.len() as i64);
        self.metrics.standby_tasks.set(standby as i64);
        info!(active = instances.len(), standby, "Assembled task instances");
        Ok(instances)
    }
}
