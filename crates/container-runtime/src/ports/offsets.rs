//! Offset and checkpoint coordination.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use async_trait::async_trait;
use stream_types::{SystemStream, SystemStreamPartition, TaskName};

use crate::ports::systems::{CheckpointListener, StreamMetadata};

pub trait OffsetCoordinatorFactory: Send + Sync {
    /// `listeners` is keyed by system name.
    fn create(
        &self,
        metadata: BTreeMap<SystemStream, StreamMetadata>,
        listeners: BTreeMap<String, Arc<dyn CheckpointListener>>,
    ) -> anyhow::Result<Arc<dyn OffsetCoordinator>>;
}

/// Tracks processed offsets and writes checkpoints for registered tasks.
#[async_trait]
pub trait OffsetCoordinator: Send + Sync {
    /// Register a task's regular inputs. Must precede `start`.
    fn register(&self, task: &TaskName, ssps: &BTreeSet<SystemStreamPartition>);

    /// Load the last checkpoints and resolve starting offsets.
    async fn start(&self) -> anyhow::Result<()>;

    async fn stop(&self) -> anyhow::Result<()>;

    /// Offset to resume `ssp` from. Valid after `start`.
    fn starting_offset(&self, task: &TaskName, ssp: &SystemStreamPartition) -> Option<String>;

    /// Record an offset as processed.
    fn update(&self, _task: &TaskName, _ssp: &SystemStreamPartition, _offset: &str) {}
}
