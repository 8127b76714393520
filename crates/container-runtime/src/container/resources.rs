//! Resource acquisition: everything `run` needs before the first startup
//! stage. Nothing created here is started yet.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use stream_types::{Partition, TaskModel, TaskName};
use tracing::{info, instrument, warn};

use crate::container::Container;
use crate::error::ContainerError;
use crate::metadata::StreamMetadataCache;
use crate::multiplex::{ConsumerMultiplexer, ProducerMultiplexer};
use crate::ports::{
    ApplicationContainerContext, MetricsReporter, RunLoop, RunLoopContext, SecurityManager,
    StorageContext, StorageSupervisor, SystemAdmin, SystemConsumer, SystemProducer,
};
use crate::serdes::SerdeManager;
use crate::tasks::{TaskAssembly, TaskInstance, TimerExecutor};

pub(crate) struct Resources {
    pub consumers: Arc<ConsumerMultiplexer>,
    pub producers: Arc<ProducerMultiplexer>,
    pub metadata: Arc<StreamMetadataCache>,
    pub storage: Option<Arc<dyn StorageSupervisor>>,
    pub timers: TimerExecutor,
    pub container_context: Option<Arc<dyn ApplicationContainerContext>>,
    pub tasks: BTreeMap<TaskName, Arc<TaskInstance>>,
    pub run_loop: Arc<dyn RunLoop>,
    pub reporters: Vec<(String, Arc<dyn MetricsReporter>)>,
    pub security: Option<Arc<dyn SecurityManager>>,
}

fn acquisition(
    kind: &'static str,
    name: impl Into<String>,
) -> impl FnOnce(anyhow::Error) -> ContainerError {
    let name = name.into();
    move |source| ContainerError::ResourceAcquisition { kind, name, source }
}

impl Container {
    #[instrument(name = "acquire_resources", skip(self), fields(container = %self.id))]
    pub(crate) fn acquire(&self) -> Result<Resources, ContainerError> {
        let config = self.registry.config();
        let topology = &self.topology;

        let required_inputs = topology.systems_with_regular_inputs();
        let metadata_systems: BTreeSet<String> = topology
            .input_streams
            .iter()
            .chain(topology.changelog_streams.values())
            .chain(topology.side_input_streams.iter())
            .map(|ss| ss.system.clone())
            .collect();

        // ===== SYSTEMS =====
        let mut consumers: BTreeMap<String, Arc<dyn SystemConsumer>> = BTreeMap::new();
        let mut producers: BTreeMap<String, Arc<dyn SystemProducer>> = BTreeMap::new();
        let mut admins: BTreeMap<String, Arc<dyn SystemAdmin>> = BTreeMap::new();

        for (system, factory) in &self.systems {
            match factory.consumer(system, config, &self.metrics) {
                Ok(consumer) => {
                    consumers.insert(system.clone(), consumer);
                }
                Err(source) if required_inputs.contains(system) => {
                    return Err(acquisition("consumer", system.as_str())(source));
                }
                Err(e) => warn!(system = %system, error = %e, "Consumer unavailable, skipping"),
            }

            match factory.producer(system, config, &self.metrics) {
                Ok(producer) => {
                    producers.insert(system.clone(), producer);
                }
                Err(e) => warn!(system = %system, error = %e, "Producer unavailable, skipping"),
            }

            match factory.admin(system, config) {
                Ok(admin) => {
                    admins.insert(system.clone(), admin);
                }
                Err(source) if metadata_systems.contains(system) => {
                    return Err(acquisition("admin", system.as_str())(source));
                }
                Err(e) => warn!(system = %system, error = %e, "Admin unavailable, skipping"),
            }
        }
        info!(
            consumers = consumers.len(),
            producers = producers.len(),
            admins = admins.len(),
            "Acquired system resources"
        );

        let consumers = Arc::new(ConsumerMultiplexer::new(
            consumers,
            SerdeManager::new(self.serdes.clone()),
        ));
        let producers = Arc::new(ProducerMultiplexer::new(
            producers,
            SerdeManager::new(self.serdes.clone()),
        ));
        let metadata = Arc::new(StreamMetadataCache::new(admins));

        // ===== STORAGE =====
        let storage = match &self.collaborators.storage_factory {
            Some(factory) => {
                let context = StorageContext {
                    container_id: self.id.clone(),
                    stores: self.stores.clone(),
                    engines: self.engines.clone(),
                    changelogs: topology.changelog_streams.clone(),
                    side_inputs: topology.side_input_ssps_by_store(),
                    logged_store_base_dir: self.settings.logged_store_base_dir.clone(),
                    non_logged_store_base_dir: self.settings.non_logged_store_base_dir.clone(),
                    changelog_partitions: topology
                        .tasks
                        .iter()
                        .map(|(name, t)| (name.clone(), t.task.changelog_partition))
                        .collect::<BTreeMap<TaskName, Partition>>(),
                    task_models: topology
                        .tasks
                        .iter()
                        .map(|(name, t)| (name.clone(), t.task.clone()))
                        .collect::<BTreeMap<TaskName, TaskModel>>(),
                    max_changelog_partitions: topology.max_changelog_partitions,
                    metadata: metadata.clone(),
                    systems: self.systems.clone(),
                    config: config.clone(),
                    metrics: self.metrics.clone(),
                };
                Some(
                    factory
                        .create(context)
                        .map_err(acquisition("storage supervisor", self.id.as_str()))?,
                )
            }
            None => None,
        };

        // ===== TASKS =====
        let timers = TimerExecutor::new();
        let container_context = self
            .collaborators
            .container_context_factory
            .as_ref()
            .map(|f| f.create(&self.model, config))
            .transpose()
            .map_err(acquisition("application container context", self.id.as_str()))?;

        let tasks = TaskAssembly {
            registry: &self.registry,
            topology,
            task_factory: &*self.collaborators.task_factory,
            task_context_factory: self.collaborators.task_context_factory.as_deref(),
            container_context: container_context.clone(),
            producers: producers.clone(),
            storage: storage.as_deref(),
            timers: &timers,
            metrics: &self.metrics,
        }
        .assemble()?;
        self.control.track_tasks(
            tasks
                .iter()
                .map(|(name, t)| (name.clone(), t.context().metrics().clone()))
                .collect(),
        );

        // ===== RUN LOOP =====
        let thread_pool = match self.settings.thread_pool_size {
            0 => None,
            size => Some(Arc::new(
                rayon::ThreadPoolBuilder::new()
                    .num_threads(size)
                    .thread_name(|i| format!("container-worker-{i}"))
                    .build()
                    .map_err(|e| acquisition("thread pool", size.to_string())(e.into()))?,
            )),
        };
        let run_loop = self
            .collaborators
            .run_loop_factory
            .create(RunLoopContext {
                tasks: tasks.clone(),
                consumers: consumers.clone(),
                thread_pool,
                max_throttling_delay: self.settings.max_throttling_delay,
                clock: self.collaborators.clock.clone(),
            })
            .map_err(acquisition("run loop", self.id.as_str()))?;
        self.control.attach_run_loop(run_loop.clone());

        // ===== SERVICES =====
        let mut reporters = Vec::new();
        for (name, factory) in &self.reporters {
            match factory.create(name, &self.id, config) {
                Ok(reporter) => reporters.push((name.clone(), reporter)),
                Err(e) => warn!(reporter = %name, error = %e, "Metrics reporter unavailable, skipping"),
            }
        }
        let security = self
            .security
            .as_ref()
            .map(|f| f.create(config))
            .transpose()
            .map_err(acquisition("security manager", self.id.as_str()))?;

        Ok(Resources {
            consumers,
            producers,
            metadata,
            storage,
            timers,
            container_context,
            tasks,
            run_loop,
            reporters,
            security,
        })
    }
}
