//! Stream transport ports: one factory per configured system produces that
//! system's consumer, producer and admin.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use container_telemetry::ContainerMetrics;
use stream_types::{
    IncomingEnvelope, OutgoingEnvelope, Partition, SystemStream, SystemStreamPartition,
};

use crate::config::Config;

/// Builds the transport clients of one messaging system.
///
/// Each method is called at most once per system per container.
pub trait SystemFactory: Send + Sync {
    fn consumer(
        &self,
        system: &str,
        config: &Config,
        metrics: &ContainerMetrics,
    ) -> anyhow::Result<Arc<dyn SystemConsumer>>;

    fn producer(
        &self,
        system: &str,
        config: &Config,
        metrics: &ContainerMetrics,
    ) -> anyhow::Result<Arc<dyn SystemProducer>>;

    fn admin(&self, system: &str, config: &Config) -> anyhow::Result<Arc<dyn SystemAdmin>>;
}

/// Reads envelopes from registered partitions.
#[async_trait]
pub trait SystemConsumer: Send + Sync {
    /// Register a partition before `start`. `None` means the transport default.
    fn register(
        &self,
        ssp: &SystemStreamPartition,
        starting_offset: Option<String>,
    ) -> anyhow::Result<()>;

    async fn start(&self) -> anyhow::Result<()>;

    async fn stop(&self) -> anyhow::Result<()>;

    /// Fetch whatever is available for `ssps`, waiting at most `timeout`.
    async fn poll(
        &self,
        ssps: &BTreeSet<SystemStreamPartition>,
        timeout: Duration,
    ) -> anyhow::Result<Vec<IncomingEnvelope>>;

    /// Consumers that track their own committed offsets expose a listener.
    fn checkpoint_listener(&self) -> Option<Arc<dyn CheckpointListener>> {
        None
    }
}

/// Writes envelopes to output streams.
#[async_trait]
pub trait SystemProducer: Send + Sync {
    /// Register a message source (a task name) before `start`.
    fn register(&self, source: &str) -> anyhow::Result<()>;

    async fn start(&self) -> anyhow::Result<()>;

    async fn stop(&self) -> anyhow::Result<()>;

    async fn send(&self, source: &str, envelope: OutgoingEnvelope) -> anyhow::Result<()>;

    async fn flush(&self, source: &str) -> anyhow::Result<()>;
}

/// Stream metadata and administrative access for one system.
#[async_trait]
pub trait SystemAdmin: Send + Sync {
    async fn start(&self) -> anyhow::Result<()> {
        Ok(())
    }

    async fn stop(&self) -> anyhow::Result<()> {
        Ok(())
    }

    /// Partition offsets for each of the named streams.
    async fn stream_metadata(
        &self,
        streams: &BTreeSet<String>,
    ) -> anyhow::Result<BTreeMap<String, StreamMetadata>>;
}

/// Offsets of one partition.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PartitionMetadata {
    pub oldest: Option<String>,
    pub newest: Option<String>,
    /// Offset the next appended message will get.
    pub upcoming: Option<String>,
}

/// Partition offsets of one stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamMetadata {
    pub system_stream: SystemStream,
    pub partitions: BTreeMap<Partition, PartitionMetadata>,
}

impl StreamMetadata {
    pub fn new(system_stream: SystemStream) -> Self {
        Self {
            system_stream,
            partitions: BTreeMap::new(),
        }
    }

    pub fn partition_count(&self) -> usize {
        self.partitions.len()
    }
}

/// Notified with the offsets of every checkpoint the coordinator writes.
pub trait CheckpointListener: Send + Sync {
    fn on_checkpoint(&self, offsets: &BTreeMap<SystemStreamPartition, String>);
}
