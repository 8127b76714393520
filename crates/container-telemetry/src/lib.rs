//! # Container Telemetry
//!
//! Observability plumbing for the stream task container.
//!
//! ## Components
//!
//! - **Logging**: `tracing-subscriber` bootstrap (pretty or JSON, `EnvFilter`)
//! - **Metrics**: one Prometheus `Registry` per container, holding container
//!   gauges (disk usage, work factor, memory) and per-task counters
//!
//! ## Usage
//!
//! ```rust,ignore
//! use container_telemetry::{init_logging, ContainerMetrics, TelemetryConfig};
//!
//! init_logging(&TelemetryConfig::for_container("wordcount", "0"))?;
//! let metrics = ContainerMetrics::new("container-0", true)?;
//! metrics.task("Partition 0").processed.inc();
//! ```
//!
//! ## Environment Variables
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | `CONTAINER_LOG_LEVEL` | `info` | Filter directives (falls back to `RUST_LOG`) |
//! | `CONTAINER_LOG_FORMAT` | `pretty` (`json` under Kubernetes) | Line format |

mod config;
mod logging;
mod metrics;

pub use config::{LogFormat, LogOutput, TelemetryConfig};
pub use logging::init_logging;
pub use metrics::{ContainerMetrics, HistogramTimer, TaskMetrics};

use thiserror::Error;

/// Telemetry initialization errors
#[derive(Error, Debug)]
pub enum TelemetryError {
    #[error("Failed to initialize logging: {0}")]
    LoggingInit(String),

    #[error("Failed to initialize Prometheus metrics: {0}")]
    MetricsInit(String),
}

/// Log a container lifecycle event with the standard `stage` field.
///
/// # Example
///
/// ```rust,ignore
/// log_stage!(info, "storage", "Started stores", stores = 3);
/// ```
#[macro_export]
macro_rules! log_stage {
    ($level:ident, $stage:expr, $msg:expr $(, $($field:tt)*)?) => {
        tracing::$level!(
            stage = $stage,
            $($($field)*,)?
            $msg
        )
    };
}
