//! # Collaborator Ports
//!
//! Contracts the container needs from the pieces it assembles but does not
//! implement. Every collaborator is a black box: results are `anyhow::Result`
//! and the container only ever calls start/stop/register style operations.
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                        Container                             │
//! │                                                              │
//! │  systems ── SystemFactory → SystemConsumer / Producer / Admin│
//! │  storage ── StorageSupervisorFactory → StorageSupervisor     │
//! │  offsets ── OffsetCoordinatorFactory → OffsetCoordinator     │
//! │  run loop ─ RunLoopFactory → RunLoop                         │
//! │  services ─ listener, locality, diagnostics, admin endpoint, │
//! │             security manager, metrics reporters, tables      │
//! │  app ────── StreamTaskFactory, application contexts          │
//! └──────────────────────────────────────────────────────────────┘
//! ```

pub mod application;
pub mod offsets;
pub mod run_loop;
pub mod services;
pub mod storage;
pub mod systems;

pub use application::{
    ApplicationContainerContext, ApplicationContainerContextFactory, ApplicationTaskContext,
    ApplicationTaskContextFactory, StreamTask, StreamTaskFactory,
};
pub use offsets::{OffsetCoordinator, OffsetCoordinatorFactory};
pub use run_loop::{Clock, RunLoop, RunLoopContext, RunLoopFactory, SystemClock};
pub use services::{
    AdminEndpoint, ContainerListener, DiagnosticsManager, LocalityManager, MetricsReporter,
    MetricsReporterFactory, SecurityManager, SecurityManagerFactory, Table, TableProvider,
    TableProviderFactory,
};
pub use storage::{
    StorageContext, StorageEngine, StorageEngineFactory, StorageSupervisor,
    StorageSupervisorFactory, TaskStorage,
};
pub use systems::{
    CheckpointListener, PartitionMetadata, StreamMetadata, SystemAdmin, SystemConsumer,
    SystemFactory, SystemProducer,
};
