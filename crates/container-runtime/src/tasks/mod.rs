//! # Task Instances
//!
//! One `TaskInstance` per active task, linking the application's stream task
//! with its collector, stores, tables, timers and inputs.
//!
//! ```text
//! TaskInstance
//! ├── StreamTask         (application code)
//! ├── TaskCollector ───► ProducerMultiplexer (shared)
//! ├── TaskStorage        (from the storage supervisor, optional)
//! ├── TaskTables         (one provider per configured table)
//! ├── TimerHandle ─────► TimerExecutor (shared, serial)
//! └── regular_inputs     (registered with offsets and consumers)
//! ```

mod assembly;
mod instance;
mod timer;

pub use assembly::TaskAssembly;
pub use instance::{TaskCollector, TaskContext, TaskInstance, TaskParts, TaskTables};
pub use timer::{TimerExecutor, TimerHandle};

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::{BTreeMap, BTreeSet};
    use std::sync::Arc;

    use async_trait::async_trait;
    use container_telemetry::ContainerMetrics;
    use parking_lot::Mutex;
    use stream_types::{
        ContainerModel, IncomingEnvelope, JobModel, Payload, SystemStreamPartition, TaskModel,
        TaskName,
    };

    use crate::config::Config;
    use crate::multiplex::ProducerMultiplexer;
    use crate::ports::{
        OffsetCoordinator, StreamTask, StreamTaskFactory, Table, TableProvider,
        TableProviderFactory,
    };
    use crate::registry::{CapabilityRegistry, Factory, FactoryCatalog};
    use crate::serdes::{SerdeManager, SerdeTable};
    use crate::topology::StreamTopologyResolver;

    #[derive(Default)]
    struct CountingTask {
        processed: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl StreamTask for CountingTask {
        async fn process(
            &self,
            envelope: IncomingEnvelope,
            _collector: &TaskCollector,
        ) -> anyhow::Result<()> {
            self.processed.lock().push(envelope.offset);
            Ok(())
        }
    }

    struct CountingTaskFactory;

    impl StreamTaskFactory for CountingTaskFactory {
        fn create(&self, _task: &TaskModel) -> anyhow::Result<Arc<dyn StreamTask>> {
            Ok(Arc::new(CountingTask::default()))
        }
    }

    struct NullTable;

    #[async_trait]
    impl Table for NullTable {
        async fn get(&self, _key: &Payload) -> anyhow::Result<Option<Payload>> {
            Ok(None)
        }

        async fn put(&self, _key: Payload, _value: Payload) -> anyhow::Result<()> {
            Ok(())
        }

        async fn delete(&self, _key: &Payload) -> anyhow::Result<()> {
            Ok(())
        }
    }

    #[derive(Default)]
    struct RecordingProvider {
        inits: Mutex<Vec<TaskName>>,
    }

    #[async_trait]
    impl TableProvider for RecordingProvider {
        async fn init(&self, task: &TaskName) -> anyhow::Result<()> {
            self.inits.lock().push(task.clone());
            Ok(())
        }

        fn table(&self) -> Arc<dyn Table> {
            Arc::new(NullTable)
        }
    }

    struct RecordingProviderFactory;

    impl TableProviderFactory for RecordingProviderFactory {
        fn create(&self, _id: &str, _config: &Config) -> anyhow::Result<Arc<dyn TableProvider>> {
            Ok(Arc::new(RecordingProvider::default()))
        }
    }

    #[derive(Default)]
    struct RecordingOffsets {
        updates: Mutex<Vec<(TaskName, String)>>,
    }

    #[async_trait]
    impl OffsetCoordinator for RecordingOffsets {
        fn register(&self, _task: &TaskName, _ssps: &BTreeSet<SystemStreamPartition>) {}

        async fn start(&self) -> anyhow::Result<()> {
            Ok(())
        }

        async fn stop(&self) -> anyhow::Result<()> {
            Ok(())
        }

        fn starting_offset(&self, _task: &TaskName, _ssp: &SystemStreamPartition) -> Option<String> {
            None
        }

        fn update(&self, task: &TaskName, _ssp: &SystemStreamPartition, offset: &str) {
            self.updates.lock().push((task.clone(), offset.to_string()));
        }
    }

    fn assemble(config: Config) -> BTreeMap<TaskName, Arc<TaskInstance>> {
        let container = ContainerModel::new(
            "0",
            [
                TaskModel::new("Partition 0", [SystemStreamPartition::new("kafka", "in", 0)], 0),
                TaskModel::new("Partition 1", [SystemStreamPartition::new("kafka", "in", 1)], 1)
                    .standby(),
            ],
        )
        .unwrap();
        let job = JobModel::new([container.clone()]);
        let topology = StreamTopologyResolver::new(&config)
            .resolve(&container, &job)
            .unwrap();

        let catalog = FactoryCatalog::with_builtins()
            .with("remote", Factory::TableProvider(Arc::new(RecordingProviderFactory)));
        let registry = CapabilityRegistry::new(config, catalog);
        let producers = Arc::new(ProducerMultiplexer::new(
            BTreeMap::new(),
            SerdeManager::new(Arc::new(SerdeTable::default())),
        ));
        let metrics = ContainerMetrics::new("0", false).unwrap();
        let timers = TimerExecutor::new();

        TaskAssembly {
            registry: &registry,
            topology: &topology,
            task_factory: &CountingTaskFactory,
            task_context_factory: None,
            container_context: None,
            producers,
            storage: None,
            timers: &timers,
            metrics: &metrics,
        }
        .assemble()
        .unwrap()
    }

    fn base_config() -> Config {
        Config::new()
            .with("job.name", "wordcount")
            .with("systems.kafka.samza.factory", "kafka")
    }

    #[test]
    fn test_only_active_tasks_get_instances() {
        let tasks = assemble(base_config());
        let names: Vec<_> = tasks.keys().map(TaskName::as_str).collect();
        assert_eq!(names, vec!["Partition 0"]);

        let task = &tasks[&TaskName::new("Partition 0")];
        assert_eq!(task.regular_inputs().len(), 1);
        assert!(task.side_inputs().is_empty());
    }

    #[tokio::test]
    async fn test_tables_resolved_per_task() {
        let tasks = assemble(base_config().with("tables.profiles.provider.factory", "remote"));
        let task = &tasks[&TaskName::new("Partition 0")];

        task.init_tables().await.unwrap();
        assert!(task.context().table("profiles").is_some());
        assert!(task.context().table("missing").is_none());
    }

    #[tokio::test]
    async fn test_process_records_offset() {
        let tasks = assemble(base_config());
        let task = &tasks[&TaskName::new("Partition 0")];
        let offsets = Arc::new(RecordingOffsets::default());
        task.attach_offsets(offsets.clone());

        task.process(IncomingEnvelope {
            ssp: SystemStreamPartition::new("kafka", "in", 0),
            offset: "17".into(),
            key: None,
            message: Payload::Bytes(vec![1]),
        })
        .await
        .unwrap();

        assert_eq!(
            offsets.updates.lock().as_slice(),
            [(TaskName::new("Partition 0"), "17".to_string())]
        );
        assert_eq!(task.context().metrics().processed.get(), 1);

        task.commit().await.unwrap();
        assert_eq!(task.context().metrics().commits.get(), 1);
    }
}
