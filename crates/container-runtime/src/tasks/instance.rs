use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use anyhow::Context;
use container_telemetry::TaskMetrics;
use parking_lot::RwLock;
use stream_types::{IncomingEnvelope, OutgoingEnvelope, SystemStreamPartition, TaskModel, TaskName};
use tracing::{debug, warn};

use crate::multiplex::ProducerMultiplexer;
use crate::ports::{
    ApplicationContainerContext, ApplicationTaskContext, OffsetCoordinator, StreamTask, Table,
    TableProvider, TaskStorage,
};
use crate::tasks::timer::TimerHandle;

// =============================================================================
// COLLECTOR
// =============================================================================

/// Output side of one task: sends through the shared producer multiplexer
/// with the task name as source.
#[derive(Clone)]
pub struct TaskCollector {
    task: TaskName,
    producers: Arc<ProducerMultiplexer>,
    metrics: TaskMetrics,
}

impl TaskCollector {
    pub fn new(task: TaskName, producers: Arc<ProducerMultiplexer>, metrics: TaskMetrics) -> Self {
        Self {
            task,
            producers,
            metrics,
        }
    }

    pub fn task(&self) -> &TaskName {
        &self.task
    }

    pub async fn send(&self, envelope: OutgoingEnvelope) -> anyhow::Result<()> {
        self.producers.send(self.task.as_str(), envelope).await?;
        self.metrics.sent.inc();
        Ok(())
    }

    pub async fn flush(&self) -> anyhow::Result<()> {
        self.producers.flush(self.task.as_str()).await
    }
}

// =============================================================================
// TABLES
// =============================================================================

/// Table providers of one task, by table id.
#[derive(Clone, Default)]
pub struct TaskTables {
    providers: BTreeMap<String, Arc<dyn TableProvider>>,
}

impl TaskTables {
    pub fn new(providers: BTreeMap<String, Arc<dyn TableProvider>>) -> Self {
        Self { providers }
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.providers.keys().map(String::as_str)
    }

    pub fn table(&self, id: &str) -> Option<Arc<dyn Table>> {
        self.providers.get(id).map(|p| p.table())
    }

    async fn init(&self, task: &TaskName) -> anyhow::Result<()> {
        for (id, provider) in &self.providers {
            provider
                .init(task)
                .await
                .with_context(|| format!("initializing table '{id}' for {task}"))?;
        }
        Ok(())
    }

    async fn close(&self) -> anyhow::Result<()> {
        let mut first_error = None;
        for (id, provider) in &self.providers {
            if let Err(e) = provider.close().await {
                warn!(table = %id, error = %e, "Failed to close table");
                first_error.get_or_insert(e.context(format!("closing table '{id}'")));
            }
        }
        first_error.map_or(Ok(()), Err)
    }
}

// =============================================================================
// CONTEXT
// =============================================================================

/// What a stream task can reach during `init`.
#[derive(Clone)]
pub struct TaskContext {
    model: TaskModel,
    storage: Option<Arc<dyn TaskStorage>>,
    tables: TaskTables,
    timers: TimerHandle,
    container_context: Option<Arc<dyn ApplicationContainerContext>>,
    app_context: Option<Arc<dyn ApplicationTaskContext>>,
    metrics: TaskMetrics,
}

impl TaskContext {
    pub fn task_name(&self) -> &TaskName {
        &self.model.name
    }

    pub fn model(&self) -> &TaskModel {
        &self.model
    }

    pub fn storage(&self) -> Option<&Arc<dyn TaskStorage>> {
        self.storage.as_ref()
    }

    pub fn table(&self, id: &str) -> Option<Arc<dyn Table>> {
        self.tables.table(id)
    }

    pub fn timers(&self) -> &TimerHandle {
        &self.timers
    }

    pub fn container_context(&self) -> Option<&Arc<dyn ApplicationContainerContext>> {
        self.container_context.as_ref()
    }

    pub fn app_context(&self) -> Option<&Arc<dyn ApplicationTaskContext>> {
        self.app_context.as_ref()
    }

    pub fn metrics(&self) -> &TaskMetrics {
        &self.metrics
    }
}

// =============================================================================
// INSTANCE
// =============================================================================

/// Parts of a task instance, gathered by the assembly.
pub struct TaskParts {
    pub model: TaskModel,
    pub regular_inputs: BTreeSet<SystemStreamPartition>,
    pub side_inputs: BTreeSet<SystemStreamPartition>,
    pub task: Arc<dyn StreamTask>,
    pub collector: TaskCollector,
    pub storage: Option<Arc<dyn TaskStorage>>,
    pub tables: TaskTables,
    pub timers: TimerHandle,
    pub container_context: Option<Arc<dyn ApplicationContainerContext>>,
    pub app_context: Option<Arc<dyn ApplicationTaskContext>>,
    pub metrics: TaskMetrics,
}

/// One runnable task hosted by this container.
pub struct TaskInstance {
    regular_inputs: BTreeSet<SystemStreamPartition>,
    side_inputs: BTreeSet<SystemStreamPartition>,
    task: Arc<dyn StreamTask>,
    collector: TaskCollector,
    context: TaskContext,
    offsets: RwLock<Option<Arc<dyn OffsetCoordinator>>>,
}

impl TaskInstance {
    pub fn new(parts: TaskParts) -> Self {
        let context = TaskContext {
            model: parts.model,
            storage: parts.storage,
            tables: parts.tables,
            timers: parts.timers,
            container_context: parts.container_context,
            app_context: parts.app_context,
            metrics: parts.metrics,
        };
        Self {
            regular_inputs: parts.regular_inputs,
            side_inputs: parts.side_inputs,
            task: parts.task,
            collector: parts.collector,
            context,
            offsets: RwLock::new(None),
        }
    }

    pub fn name(&self) -> &TaskName {
        self.context.task_name()
    }

    pub fn model(&self) -> &TaskModel {
        self.context.model()
    }

    /// Partitions the run loop feeds to this task.
    pub fn regular_inputs(&self) -> &BTreeSet<SystemStreamPartition> {
        &self.regular_inputs
    }

    /// Partitions consumed by this task's stores instead of the task.
    pub fn side_inputs(&self) -> &BTreeSet<SystemStreamPartition> {
        &self.side_inputs
    }

    pub fn collector(&self) -> &TaskCollector {
        &self.collector
    }

    pub fn context(&self) -> &TaskContext {
        &self.context
    }

    pub fn has_offsets(&self) -> bool {
        self.offsets.read().is_some()
    }

    pub(crate) fn attach_offsets(&self, offsets: Arc<dyn OffsetCoordinator>) {
        *self.offsets.write() = Some(offsets);
    }

    pub(crate) async fn init_tables(&self) -> anyhow::Result<()> {
        self.context.tables.init(self.name()).await
    }

    pub(crate) async fn close_tables(&self) -> anyhow::Result<()> {
        self.context.tables.close().await
    }

    pub(crate) async fn init_task(&self) -> anyhow::Result<()> {
        if let Some(app) = &self.context.app_context {
            app.start()
                .await
                .with_context(|| format!("starting application context of {}", self.name()))?;
        }
        debug!(task = %self.name(), "Initializing stream task");
        self.task
            .init(&self.context)
            .await
            .with_context(|| format!("initializing {}", self.name()))
    }

    /// Close the stream task, then its application context. Both are
    /// attempted; the first failure is returned.
    pub(crate) async fn close_task(&self) -> anyhow::Result<()> {
        let closed = self
            .task
            .close()
            .await
            .with_context(|| format!("closing {}", self.name()));
        let stopped = match &self.context.app_context {
            Some(app) => app
                .stop()
                .await
                .with_context(|| format!("stopping application context of {}", self.name())),
            None => Ok(()),
        };
        closed.and(stopped)
    }

    /// Hand one envelope to the task and record its offset as processed.
    pub async fn process(&self, envelope: IncomingEnvelope) -> anyhow::Result<()> {
        let ssp = envelope.ssp.clone();
        let offset = envelope.offset.clone();

        let timer = self.context.metrics.start_process_timer();
        self.task.process(envelope, &self.collector).await?;
        drop(timer);

        self.context.metrics.processed.inc();
        if let Some(offsets) = self.offsets.read().as_ref() {
            offsets.update(self.name(), &ssp, &offset);
        }
        Ok(())
    }

    pub async fn window(&self) -> anyhow::Result<()> {
        self.task.window(&self.collector).await
    }

    /// Flush produced messages and stores.
    pub async fn commit(&self) -> anyhow::Result<()> {
        self.collector.flush().await?;
        if let Some(storage) = &self.context.storage {
            storage
                .flush()
                .await
                .with_context(|| format!("flushing stores of {}", self.name()))?;
        }
        self.context.metrics.commits.inc();
        Ok(())
    }
}
