//! The run loop drives message processing across every active task. Its
//! scheduling algorithm is not the container's concern; the container only
//! creates it, awaits it, stops it and feeds it the work factor.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use stream_types::TaskName;

use crate::multiplex::ConsumerMultiplexer;
use crate::tasks::TaskInstance;

/// Monotonic time source handed to the run loop.
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

pub struct RunLoopContext {
    pub tasks: BTreeMap<TaskName, Arc<TaskInstance>>,
    pub consumers: Arc<ConsumerMultiplexer>,
    /// `None` runs every task on the caller's thread.
    pub thread_pool: Option<Arc<rayon::ThreadPool>>,
    /// Upper bound on the pause inserted after each unit of work.
    pub max_throttling_delay: Duration,
    pub clock: Arc<dyn Clock>,
}

pub trait RunLoopFactory: Send + Sync {
    fn create(&self, context: RunLoopContext) -> anyhow::Result<Arc<dyn RunLoop>>;
}

#[async_trait]
pub trait RunLoop: Send + Sync {
    /// Process until `shutdown` is called or an unrecoverable error occurs.
    async fn run(&self) -> anyhow::Result<()>;

    /// Ask `run` to return. Safe to call from any task, any number of times.
    fn shutdown(&self);

    /// New fraction of normal throughput, in `[0.001, 1.0]`.
    fn set_work_factor(&self, factor: f64);
}
