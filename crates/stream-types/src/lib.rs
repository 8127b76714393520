//! # Stream Types Crate
//!
//! Topology descriptors and message envelopes shared by the container runtime
//! and every pluggable collaborator.
//!
//! ## Design Principles
//!
//! - **Read-only topology**: `JobModel`, `ContainerModel` and `TaskModel` are
//!   supplied by the job coordinator and never mutated by a container.
//! - **SSP addressing**: every input, changelog and side-input assignment is
//!   expressed as a `SystemStreamPartition`.
//! - **Opaque payloads**: codecs live behind the runtime's serde table; this
//!   crate only names the payload shapes they exchange.

pub mod entities;
pub mod envelope;
pub mod errors;

pub use entities::*;
pub use envelope::*;
pub use errors::ModelError;
