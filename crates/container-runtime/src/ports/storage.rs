//! Storage ports. The supervisor owns every store of every task hosted here,
//! standby tasks included.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use container_telemetry::ContainerMetrics;
use stream_types::{Partition, SystemStream, SystemStreamPartition, TaskModel, TaskName};

use crate::config::{Config, StoreDefinition};
use crate::metadata::StreamMetadataCache;
use crate::ports::systems::SystemFactory;

/// Opens one kind of store.
pub trait StorageEngineFactory: Send + Sync {
    fn create(
        &self,
        store: &str,
        dir: &Path,
        config: &Config,
    ) -> anyhow::Result<Arc<dyn StorageEngine>>;
}

/// An opened store.
pub trait StorageEngine: Send + Sync {
    fn flush(&self) -> anyhow::Result<()>;

    fn stop(&self) -> anyhow::Result<()>;
}

/// Everything the storage supervisor needs to restore and serve stores.
pub struct StorageContext {
    pub container_id: String,
    pub stores: Vec<StoreDefinition>,
    /// Engine factory per store name.
    pub engines: BTreeMap<String, Arc<dyn StorageEngineFactory>>,
    /// Changelog stream per store.
    pub changelogs: BTreeMap<String, SystemStream>,
    /// Side-input partitions per store, across every task hosted here.
    pub side_inputs: BTreeMap<String, BTreeSet<SystemStreamPartition>>,
    pub logged_store_base_dir: PathBuf,
    pub non_logged_store_base_dir: PathBuf,
    /// Changelog partition of every task hosted here, standby ones included.
    pub changelog_partitions: BTreeMap<TaskName, Partition>,
    pub task_models: BTreeMap<TaskName, TaskModel>,
    pub max_changelog_partitions: u32,
    /// Changelog and side-input metadata, fetched through the system admins.
    pub metadata: Arc<StreamMetadataCache>,
    /// Factories for the restore consumers of changelog and side-input systems.
    pub systems: BTreeMap<String, Arc<dyn SystemFactory>>,
    pub config: Config,
    pub metrics: ContainerMetrics,
}

pub trait StorageSupervisorFactory: Send + Sync {
    fn create(&self, context: StorageContext) -> anyhow::Result<Arc<dyn StorageSupervisor>>;
}

#[async_trait]
pub trait StorageSupervisor: Send + Sync {
    /// Restore every store; returns once all stores are ready to serve.
    async fn start(&self) -> anyhow::Result<()>;

    async fn stop(&self) -> anyhow::Result<()>;

    /// Directories whose total size counts against the disk quota.
    fn watched_paths(&self) -> Vec<PathBuf>;

    /// Stores of one task. `None` if the task owns no stores.
    fn task_storage(&self, task: &TaskName) -> Option<Arc<dyn TaskStorage>>;
}

/// One task's view of its stores.
#[async_trait]
pub trait TaskStorage: Send + Sync {
    fn store_names(&self) -> Vec<String>;

    async fn flush(&self) -> anyhow::Result<()>;
}
