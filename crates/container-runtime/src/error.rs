//! # Container Errors
//!
//! | Error | Raised | Fatal |
//! |-------|--------|-------|
//! | `ConfigError` | during `ContainerBuilder::build`, before anything starts | always |
//! | `ResourceAcquisition` | when a named system/serde/store factory fails to construct | only for mandatory resources |
//! | `Runtime` | any uncaught failure while Starting or Started | drives `Failed` |
//! | `Shutdown` | a step of the best-effort shutdown sequence fails | never aborts the sequence |

use stream_types::ModelError;
use thiserror::Error;

use container_telemetry::TelemetryError;

use crate::container::ContainerStatus;
use crate::registry::CapabilityKind;

/// Missing or invalid configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("Missing required configuration key: {key}")]
    MissingKey { key: String },

    #[error("Invalid value '{value}' for {key}: {reason}")]
    InvalidValue {
        key: String,
        value: String,
        reason: String,
    },

    #[error("No factory registered under '{name}' (expected a {kind} factory)")]
    UnknownFactory { kind: CapabilityKind, name: String },

    #[error("Factory '{name}' provides {actual}, expected {expected}")]
    CapabilityMismatch {
        name: String,
        expected: CapabilityKind,
        actual: CapabilityKind,
    },

    #[error("Serde '{serde}' has no registered factory or instance")]
    MissingSerde { serde: String },

    #[error("System '{system}' is referenced by the job topology but not configured")]
    UnknownSystem { system: String },

    #[error("Container '{container}' is not part of the job model")]
    UnknownContainer { container: String },

    #[error("Task '{task}' is assigned to this container more than once")]
    DuplicateTask { task: String },

    #[error("Required collaborator not supplied: {0}")]
    MissingCollaborator(&'static str),

    #[error("Invalid disk quota policy: {0}")]
    InvalidPolicy(String),

    #[error(transparent)]
    Model(#[from] ModelError),
}

/// Errors surfaced by the container lifecycle.
#[derive(Debug, Error)]
pub enum ContainerError {
    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigError),

    #[error("Failed to acquire {kind} '{name}': {source}")]
    ResourceAcquisition {
        kind: &'static str,
        name: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("Container failed during {stage}: {source}")]
    Runtime {
        stage: &'static str,
        #[source]
        source: anyhow::Error,
    },

    #[error("Shutdown of {stage} failed: {source}")]
    Shutdown {
        stage: &'static str,
        #[source]
        source: anyhow::Error,
    },

    #[error("Container cannot run from state {actual:?}")]
    InvalidState { actual: ContainerStatus },

    #[error("Telemetry error: {0}")]
    Telemetry(#[from] TelemetryError),
}

impl ContainerError {
    pub(crate) fn runtime(stage: &'static str, source: impl Into<anyhow::Error>) -> Self {
        Self::Runtime {
            stage,
            source: source.into(),
        }
    }

    pub(crate) fn shutdown(stage: &'static str, source: impl Into<anyhow::Error>) -> Self {
        Self::Shutdown {
            stage,
            source: source.into(),
        }
    }

    /// True for errors raised by the best-effort shutdown sequence.
    pub fn is_shutdown_failure(&self) -> bool {
        matches!(self, Self::Shutdown { .. })
    }
}
