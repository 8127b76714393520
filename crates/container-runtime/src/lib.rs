//! # Container Runtime Library
//!
//! The per-node execution container of a stream-processing job. Given the
//! job configuration, the job model and this container's id, it builds the
//! runtime for every task assigned here and supervises their lifecycle.
//!
//! ## Architectural Patterns
//!
//! - **Capability registry**: systems, serdes, storage engines, policies and
//!   services are trait objects resolved by name, cached per container
//! - **Hexagonal Architecture**: `ports` define every collaborator contract;
//!   the container only starts, stops and wires them
//! - **Observer**: one optional `ContainerListener` sees lifecycle transitions
//! - **Fail-open shutdown**: the shutdown hook waits a bounded time, then
//!   lets the process proceed
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! let container = ContainerBuilder::new("0", job_model, config)
//!     .catalog(catalog)
//!     .task_factory(Arc::new(MyTaskFactory))
//!     .run_loop_factory(Arc::new(MyRunLoopFactory))
//!     .build()?;
//! container.run().await?;
//! ```

#![allow(clippy::type_complexity)]
#![allow(clippy::too_many_lines)]

pub mod config;
pub mod container;
pub mod error;
pub mod metadata;
pub mod monitor;
pub mod multiplex;
pub mod ports;
pub mod registry;
pub mod serdes;
pub mod tasks;
pub mod topology;

pub use config::{Config, ContainerConfig};
pub use container::{
    Container, ContainerBuilder, ContainerStatus, ShutdownHandle, ShutdownSignal, Stage,
};
pub use error::{ConfigError, ContainerError};
pub use registry::{CapabilityKind, CapabilityRegistry, Factory, FactoryCatalog};
pub use serdes::{Serde, SerdeTable};
pub use topology::{ContainerTopology, StreamTopologyResolver, TaskStreams};
