//! # Error Types
//!
//! Errors raised while parsing or validating topology descriptors.

use thiserror::Error;

/// Errors in job/container model construction.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ModelError {
    /// A `system.stream` reference could not be split.
    #[error("Invalid stream reference '{0}': expected <system>.<stream>")]
    InvalidStreamRef(String),

    /// The same task name appears twice in one container.
    #[error("Duplicate task name '{task}' in container {container}")]
    DuplicateTask { container: String, task: String },

    /// A changelog partition of `u32::MAX` leaves no room for the count.
    #[error("Changelog partition of task '{task}' is out of range")]
    ChangelogPartitionOverflow { task: String },
}
