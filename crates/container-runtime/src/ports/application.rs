//! Application-supplied code: the stream task itself and optional shared
//! contexts at container and task scope.

use std::sync::Arc;

use async_trait::async_trait;
use stream_types::{ContainerModel, IncomingEnvelope, TaskModel};

use crate::config::Config;
use crate::tasks::{TaskCollector, TaskContext};

#[async_trait]
pub trait StreamTask: Send + Sync {
    async fn init(&self, _context: &TaskContext) -> anyhow::Result<()> {
        Ok(())
    }

    async fn process(
        &self,
        envelope: IncomingEnvelope,
        collector: &TaskCollector,
    ) -> anyhow::Result<()>;

    /// Periodic callback for windowed tasks.
    async fn window(&self, _collector: &TaskCollector) -> anyhow::Result<()> {
        Ok(())
    }

    async fn close(&self) -> anyhow::Result<()> {
        Ok(())
    }
}

pub trait StreamTaskFactory: Send + Sync {
    fn create(&self, task: &TaskModel) -> anyhow::Result<Arc<dyn StreamTask>>;
}

/// State shared by every task of the container.
#[async_trait]
pub trait ApplicationContainerContext: Send + Sync {
    async fn start(&self) -> anyhow::Result<()>;

    async fn stop(&self) -> anyhow::Result<()>;
}

pub trait ApplicationContainerContextFactory: Send + Sync {
    fn create(
        &self,
        container: &ContainerModel,
        config: &Config,
    ) -> anyhow::Result<Arc<dyn ApplicationContainerContext>>;
}

/// State scoped to one task.
#[async_trait]
pub trait ApplicationTaskContext: Send + Sync {
    async fn start(&self) -> anyhow::Result<()>;

    async fn stop(&self) -> anyhow::Result<()>;
}

pub trait ApplicationTaskContextFactory: Send + Sync {
    fn create(
        &self,
        task: &TaskModel,
        container_context: Option<Arc<dyn ApplicationContainerContext>>,
    ) -> anyhow::Result<Arc<dyn ApplicationTaskContext>>;
}
