//! Auxiliary services wired around the core: lifecycle observer, locality,
//! diagnostics, admin endpoint, security, metrics reporters and tables.

use std::sync::Arc;

use async_trait::async_trait;
use prometheus::Registry;
use stream_types::{Payload, TaskName};

use crate::config::Config;
use crate::error::ContainerError;

/// Observer of container lifecycle transitions. All callbacks are optional.
pub trait ContainerListener: Send + Sync {
    /// The container entered `Starting`.
    fn before_start(&self) {}

    /// Every startup stage completed and the container is `Started`.
    fn after_start(&self) {}

    /// The run loop completed and shutdown ran.
    fn after_stop(&self) {}

    /// The container failed; `error` is the first error observed.
    fn after_failure(&self, _error: &ContainerError) {}
}

/// Persists which host this container runs on.
#[async_trait]
pub trait LocalityManager: Send + Sync {
    async fn write_container_locality(&self, container_id: &str, host: &str)
        -> anyhow::Result<()>;

    async fn close(&self) -> anyhow::Result<()> {
        Ok(())
    }
}

#[async_trait]
pub trait DiagnosticsManager: Send + Sync {
    async fn start(&self) -> anyhow::Result<()>;

    async fn stop(&self) -> anyhow::Result<()>;
}

/// Management endpoint exposing the container's metrics registry.
#[async_trait]
pub trait AdminEndpoint: Send + Sync {
    async fn start(&self, registry: &Registry) -> anyhow::Result<()>;

    async fn stop(&self) -> anyhow::Result<()>;
}

#[async_trait]
pub trait SecurityManager: Send + Sync {
    async fn start(&self) -> anyhow::Result<()>;

    async fn stop(&self) -> anyhow::Result<()>;
}

pub trait SecurityManagerFactory: Send + Sync {
    fn create(&self, config: &Config) -> anyhow::Result<Arc<dyn SecurityManager>>;
}

/// Publishes a metrics registry to some external sink.
#[async_trait]
pub trait MetricsReporter: Send + Sync {
    /// Register a source before `start`.
    fn register(&self, source: &str, registry: Registry);

    async fn start(&self) -> anyhow::Result<()>;

    async fn stop(&self) -> anyhow::Result<()>;
}

pub trait MetricsReporterFactory: Send + Sync {
    fn create(
        &self,
        name: &str,
        container_id: &str,
        config: &Config,
    ) -> anyhow::Result<Arc<dyn MetricsReporter>>;
}

/// Creates one provider per table per task.
pub trait TableProviderFactory: Send + Sync {
    fn create(&self, table_id: &str, config: &Config) -> anyhow::Result<Arc<dyn TableProvider>>;
}

#[async_trait]
pub trait TableProvider: Send + Sync {
    async fn init(&self, task: &TaskName) -> anyhow::Result<()>;

    fn table(&self) -> Arc<dyn Table>;

    async fn close(&self) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Key-value access to a local or remote table.
#[async_trait]
pub trait Table: Send + Sync {
    async fn get(&self, key: &Payload) -> anyhow::Result<Option<Payload>>;

    async fn put(&self, key: Payload, value: Payload) -> anyhow::Result<()>;

    async fn delete(&self, key: &Payload) -> anyhow::Result<()>;
}
