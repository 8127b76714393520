//! # Stream Topology Resolver
//!
//! Splits every task's assigned partitions into regular inputs and side
//! inputs, and derives the changelog partitions this container owns.
//!
//! ```text
//! assigned SSPs ──┬── ∈ side-input streams ──► side_inputs   (fed to stores)
//!                 └── otherwise ─────────────► regular_inputs (fed to the task)
//!
//! changelog_ssps = { changelog stream } × { task changelog partition }
//! ```
//!
//! Invariants per task: `regular ∩ side = ∅` and `regular ∪ side = assigned`.

use std::collections::{BTreeMap, BTreeSet};

use stream_types::{
    ContainerModel, JobModel, SystemStream, SystemStreamPartition, TaskModel, TaskName,
};
use tracing::{debug, instrument};

use crate::config::{Config, StoreDefinition};
use crate::error::ConfigError;

/// Partition sets of one task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskStreams {
    pub task: TaskModel,
    pub regular_inputs: BTreeSet<SystemStreamPartition>,
    pub side_inputs: BTreeSet<SystemStreamPartition>,
}

impl TaskStreams {
    pub fn assigned(&self) -> &BTreeSet<SystemStreamPartition> {
        &self.task.ssps
    }
}

/// Resolved stream layout of one container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerTopology {
    pub container_id: String,
    /// Every task hosted here, standby ones included.
    pub tasks: BTreeMap<TaskName, TaskStreams>,
    /// Union of every task's regular inputs.
    pub input_streams: BTreeSet<SystemStream>,
    pub side_input_streams: BTreeSet<SystemStream>,
    pub side_inputs_by_store: BTreeMap<String, BTreeSet<SystemStream>>,
    pub changelog_streams: BTreeMap<String, SystemStream>,
    /// Only used to prefetch metadata.
    pub changelog_ssps: BTreeSet<SystemStreamPartition>,
    pub intermediate_streams: BTreeSet<SystemStream>,
    pub max_changelog_partitions: u32,
}

impl ContainerTopology {
    pub fn active_tasks(&self) -> impl Iterator<Item = &TaskStreams> {
        self.tasks.values().filter(|t| t.task.is_active())
    }

    /// Systems with at least one regular input on an active task.
    pub fn systems_with_regular_inputs(&self) -> BTreeSet<String> {
        self.active_tasks()
            .flat_map(|t| t.regular_inputs.iter().map(|ssp| ssp.system().to_string()))
            .collect()
    }

    /// Every system the topology touches.
    pub fn referenced_systems(&self) -> BTreeSet<String> {
        self.tasks
            .values()
            .flat_map(|t| t.task.ssps.iter().map(|ssp| ssp.system().to_string()))
            .chain(self.changelog_streams.values().map(|s| s.system.clone()))
            .chain(self.side_input_streams.iter().map(|s| s.system.clone()))
            .collect()
    }

    /// Side-input partitions per store, across every hosted task.
    pub fn side_input_ssps_by_store(&self) -> BTreeMap<String, BTreeSet<SystemStreamPartition>> {
        self.side_inputs_by_store
            .iter()
            .map(|(store, streams)| {
                let ssps = self
                    .tasks
                    .values()
                    .flat_map(|t| t.side_inputs.iter())
                    .filter(|ssp| streams.contains(&ssp.system_stream))
                    .cloned()
                    .collect();
                (store.clone(), ssps)
            })
            .collect()
    }
}

pub struct StreamTopologyResolver<'a> {
    config: &'a Config,
}

impl<'a> StreamTopologyResolver<'a> {
    pub fn new(config: &'a Config) -> Self {
        Self { config }
    }

    #[instrument(skip_all, fields(container = %container.id))]
    pub fn resolve(
        &self,
        container: &ContainerModel,
        job: &JobModel,
    ) -> Result<ContainerTopology, ConfigError> {
        let stores = self.config.store_definitions()?;
        self.resolve_with_stores(container, job, &stores)
    }

    pub fn resolve_with_stores(
        &self,
        container: &ContainerModel,
        job: &JobModel,
        stores: &[StoreDefinition],
    ) -> Result<ContainerTopology, ConfigError> {
        let side_inputs_by_store: BTreeMap<String, BTreeSet<SystemStream>> = stores
            .iter()
            .filter(|s| !s.side_inputs.is_empty())
            .map(|s| (s.name.clone(), s.side_inputs.iter().cloned().collect()))
            .collect();
        let side_input_streams: BTreeSet<SystemStream> =
            side_inputs_by_store.values().flatten().cloned().collect();
        let changelog_streams: BTreeMap<String, SystemStream> = stores
            .iter()
            .filter_map(|s| s.changelog.clone().map(|c| (s.name.clone(), c)))
            .collect();

        let tasks: BTreeMap<TaskName, TaskStreams> = container
            .tasks
            .values()
            .map(|task| {
                let (side_inputs, regular_inputs) = task
                    .ssps
                    .iter()
                    .cloned()
                    .partition(|ssp| side_input_streams.contains(&ssp.system_stream));
                (
                    task.name.clone(),
                    TaskStreams {
                        task: task.clone(),
                        regular_inputs,
                        side_inputs,
                    },
                )
            })
            .collect();

        let input_streams = tasks
            .values()
            .filter(|t| t.task.is_active())
            .flat_map(|t| t.regular_inputs.iter().map(|ssp| ssp.system_stream.clone()))
            .collect();

        let changelog_ssps = tasks
            .values()
            .flat_map(|t| {
                changelog_streams
                    .values()
                    .map(move |cs| cs.partition(t.task.changelog_partition))
            })
            .collect();

        let topology = ContainerTopology {
            container_id: container.id.clone(),
            tasks,
            input_streams,
            side_input_streams,
            side_inputs_by_store,
            changelog_streams,
            changelog_ssps,
            intermediate_streams: self.config.intermediate_streams()?,
            max_changelog_partitions: job.max_changelog_partitions()?,
        };

        self.validate_systems(&topology)?;

        debug!(
            tasks = topology.tasks.len(),
            inputs = topology.input_streams.len(),
            side_inputs = topology.side_input_streams.len(),
            changelogs = topology.changelog_streams.len(),
            "Resolved container topology"
        );
        Ok(topology)
    }

    fn validate_systems(&self, topology: &ContainerTopology) -> Result<(), ConfigError> {
        let configured = self.config.system_names();
        match topology
            .referenced_systems()
            .into_iter()
            .find(|s| !configured.contains(s))
        {
            Some(system) => Err(ConfigError::UnknownSystem { system }),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> Config {
        Config::new()
            .with("systems.kafka.samza.factory", "kafka")
            .with("stores.profiles.factory", "mem")
            .with("stores.profiles.side.inputs", "kafka.profiles")
            .with("stores.counts.factory", "mem")
            .with("stores.counts.changelog", "kafka.counts-log")
    }

    fn container() -> ContainerModel {
        ContainerModel::new(
            "0",
            [
                TaskModel::new(
                    "Partition 0",
                    [
                        SystemStreamPartition::new("kafka", "clicks", 0),
                        SystemStreamPartition::new("kafka", "profiles", 0),
                    ],
                    0,
                ),
                TaskModel::new(
                    "Partition 1",
                    [SystemStreamPartition::new("kafka", "clicks", 1)],
                    1,
                ),
                TaskModel::new("Standby 2", [], 2).standby(),
            ],
        )
        .unwrap()
    }

    fn resolve() -> ContainerTopology {
        let job = JobModel::new([container()]);
        StreamTopologyResolver::new(&config())
            .resolve(&container(), &job)
            .unwrap()
    }

    #[test]
    fn test_side_inputs_split_from_regular_inputs() {
        let topology = resolve();
        for streams in topology.tasks.values() {
            assert!(streams.regular_inputs.is_disjoint(&streams.side_inputs));
            let union: BTreeSet<_> = streams
                .regular_inputs
                .union(&streams.side_inputs)
                .cloned()
                .collect();
            assert_eq!(&union, streams.assigned());
        }

        let p0 = &topology.tasks[&TaskName::new("Partition 0")];
        assert_eq!(
            p0.side_inputs,
            BTreeSet::from([SystemStreamPartition::new("kafka", "profiles", 0)])
        );
        assert_eq!(
            topology.input_streams,
            BTreeSet::from([SystemStream::new("kafka", "clicks")])
        );
    }

    #[test]
    fn test_changelog_ssps_cover_standby_tasks() {
        let topology = resolve();
        let partitions: Vec<u32> = topology
            .changelog_ssps
            .iter()
            .map(|ssp| ssp.partition.0)
            .collect();
        assert_eq!(partitions, vec![0, 1, 2]);
        assert_eq!(topology.max_changelog_partitions, 3);
    }

    #[test]
    fn test_side_input_ssps_by_store() {
        let by_store = resolve().side_input_ssps_by_store();
        assert_eq!(by_store["profiles"].len(), 1);
    }

    #[test]
    fn test_unknown_system_rejected() {
        let config = config().with("stores.counts.changelog", "hdfs.counts-log");
        let job = JobModel::new([container()]);
        let result = StreamTopologyResolver::new(&config).resolve(&container(), &job);
        assert!(matches!(
            result,
            Err(ConfigError::UnknownSystem { ref system }) if system == "hdfs"
        ));
    }

    #[test]
    fn test_regular_input_systems() {
        let systems = resolve().systems_with_regular_inputs();
        assert_eq!(systems, BTreeSet::from(["kafka".to_string()]));
    }
}
