//! # Topology Entities
//!
//! ## Clusters
//!
//! - **Addressing**: `SystemStream`, `Partition`, `SystemStreamPartition`
//! - **Assignment**: `TaskName`, `TaskMode`, `TaskModel`
//! - **Job layout**: `ContainerModel`, `JobModel`

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::errors::ModelError;

// =============================================================================
// ADDRESSING
// =============================================================================

/// A stream on a named messaging system.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SystemStream {
    /// Messaging system name as configured under `systems.<name>`.
    pub system: String,
    /// Physical stream name on that system.
    pub stream: String,
}

impl SystemStream {
    pub fn new(system: impl Into<String>, stream: impl Into<String>) -> Self {
        Self {
            system: system.into(),
            stream: stream.into(),
        }
    }

    /// Parse a `system.stream` reference.
    ///
    /// Only the first `.` separates the system; stream names may contain dots.
    pub fn parse(reference: &str) -> Result<Self, ModelError> {
        match reference.trim().split_once('.') {
            Some((system, stream)) if !system.is_empty() && !stream.is_empty() => {
                Ok(Self::new(system, stream))
            }
            _ => Err(ModelError::InvalidStreamRef(reference.to_string())),
        }
    }

    /// Address one partition of this stream.
    pub fn partition(&self, partition: Partition) -> SystemStreamPartition {
        SystemStreamPartition {
            system_stream: self.clone(),
            partition,
        }
    }
}

impl fmt::Display for SystemStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.system, self.stream)
    }
}

/// A partition id within a stream.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub struct Partition(pub u32);

impl fmt::Display for Partition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One partition of one stream on one messaging system.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SystemStreamPartition {
    pub system_stream: SystemStream,
    pub partition: Partition,
}

impl SystemStreamPartition {
    pub fn new(system: impl Into<String>, stream: impl Into<String>, partition: u32) -> Self {
        SystemStream::new(system, stream).partition(Partition(partition))
    }

    pub fn system(&self) -> &str {
        &self.system_stream.system
    }

    pub fn stream(&self) -> &str {
        &self.system_stream.stream
    }
}

impl fmt::Display for SystemStreamPartition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{}]", self.system_stream, self.partition)
    }
}

// =============================================================================
// ASSIGNMENT
// =============================================================================

/// Unique name of a logical task within a job.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TaskName(pub String);

impl TaskName {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TaskName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Whether a task is executed or only holds warm state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum TaskMode {
    /// Runnable task: gets a task instance and is registered with the run loop.
    #[default]
    Active,
    /// Warm replica of another container's task: storage only.
    Standby,
}

/// One task's assignment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskModel {
    pub name: TaskName,
    /// Every SSP assigned to the task, side inputs included.
    pub ssps: BTreeSet<SystemStreamPartition>,
    /// Partition of each store's changelog stream owned by this task.
    pub changelog_partition: Partition,
    #[serde(default)]
    pub mode: TaskMode,
}

impl TaskModel {
    pub fn new(
        name: impl Into<String>,
        ssps: impl IntoIterator<Item = SystemStreamPartition>,
        changelog_partition: u32,
    ) -> Self {
        Self {
            name: TaskName::new(name),
            ssps: ssps.into_iter().collect(),
            changelog_partition: Partition(changelog_partition),
            mode: TaskMode::Active,
        }
    }

    /// Mark the task as a standby replica.
    #[must_use]
    pub fn standby(mut self) -> Self {
        self.mode = TaskMode::Standby;
        self
    }

    pub fn is_active(&self) -> bool {
        self.mode == TaskMode::Active
    }
}

// =============================================================================
// JOB LAYOUT
// =============================================================================

/// The tasks hosted by one container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerModel {
    pub id: String,
    pub tasks: BTreeMap<TaskName, TaskModel>,
}

impl ContainerModel {
    /// Build a container model, rejecting duplicate task names.
    pub fn new(
        id: impl Into<String>,
        tasks: impl IntoIterator<Item = TaskModel>,
    ) -> Result<Self, ModelError> {
        let id = id.into();
        let mut by_name = BTreeMap::new();
        for task in tasks {
            if by_name.contains_key(&task.name) {
                return Err(ModelError::DuplicateTask {
                    container: id,
                    task: task.name.0,
                });
            }
            by_name.insert(task.name.clone(), task);
        }
        Ok(Self { id, tasks: by_name })
    }

    pub fn active_tasks(&self) -> impl Iterator<Item = &TaskModel> {
        self.tasks.values().filter(|t| t.is_active())
    }
}

/// All containers of a job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct JobModel {
    pub containers: BTreeMap<String, ContainerModel>,
}

impl JobModel {
    pub fn new(containers: impl IntoIterator<Item = ContainerModel>) -> Self {
        Self {
            containers: containers
                .into_iter()
                .map(|c| (c.id.clone(), c))
                .collect(),
        }
    }

    pub fn container(&self, id: &str) -> Option<&ContainerModel> {
        self.containers.get(id)
    }

    /// Number of changelog partitions every store's changelog must have.
    pub fn max_changelog_partitions(&self) -> Result<u32, ModelError> {
        self.containers
            .values()
            .flat_map(|c| c.tasks.values())
            .map(|t| {
                t.changelog_partition
                    .0
                    .checked_add(1)
                    .ok_or_else(|| ModelError::ChangelogPartitionOverflow {
                        task: t.name.to_string(),
                    })
            })
            .try_fold(0, |max, count| count.map(|c| max.max(c)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_stream_reference() {
        let ss = SystemStream::parse("kafka.page.views").unwrap();
        assert_eq!(ss.system, "kafka");
        assert_eq!(ss.stream, "page.views");

        assert!(SystemStream::parse("kafka").is_err());
        assert!(SystemStream::parse(".views").is_err());
    }

    #[test]
    fn test_duplicate_task_rejected() {
        let t = TaskModel::new("Partition 0", [], 0);
        let result = ContainerModel::new("0", [t.clone(), t]);
        assert!(matches!(result, Err(ModelError::DuplicateTask { .. })));
    }

    #[test]
    fn test_max_changelog_partitions_spans_containers() {
        let c0 = ContainerModel::new("0", [TaskModel::new("a", [], 0)]).unwrap();
        let c1 = ContainerModel::new(
            "1",
            [TaskModel::new("b", [], 3), TaskModel::new("b-standby", [], 5).standby()],
        )
        .unwrap();

        assert_eq!(JobModel::new([c0, c1]).max_changelog_partitions(), Ok(6));
        assert_eq!(JobModel::default().max_changelog_partitions(), Ok(0));
    }

    #[test]
    fn test_last_changelog_partition_overflows() {
        let c = ContainerModel::new("0", [TaskModel::new("a", [], u32::MAX)]).unwrap();
        assert_eq!(
            JobModel::new([c]).max_changelog_partitions(),
            Err(ModelError::ChangelogPartitionOverflow { task: "a".into() })
        );
    }

    #[test]
    fn test_active_tasks_skip_standby() {
        let c = ContainerModel::new(
            "0",
            [TaskModel::new("a", [], 0), TaskModel::new("b", [], 1).standby()],
        )
        .unwrap();
        let names: Vec<_> = c.active_tasks().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["a"]);
    }
}
