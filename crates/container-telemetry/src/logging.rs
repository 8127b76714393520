//! Logging bootstrap.
//!
//! Installs a global `tracing` subscriber. JSON output carries the same fields
//! as the pretty output plus thread ids and source locations.

use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::fmt::TestWriter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::{LogFormat, LogOutput};
use crate::{TelemetryConfig, TelemetryError};

/// Install the global subscriber described by `config`.
///
/// Fails if a global subscriber is already set.
pub fn init_logging(config: &TelemetryConfig) -> Result<(), TelemetryError> {
    let env_filter = EnvFilter::try_new(&config.filter)
        .map_err(|e| TelemetryError::LoggingInit(e.to_string()))?;

    let (writer, ansi) = match config.output {
        LogOutput::Off => {
            return tracing_subscriber::registry()
                .with(env_filter)
                .try_init()
                .map_err(|e| TelemetryError::LoggingInit(e.to_string()));
        }
        LogOutput::Stdout => (BoxMakeWriter::new(std::io::stdout), true),
        LogOutput::TestWriter => (BoxMakeWriter::new(TestWriter::new()), false),
    };

    match config.format {
        LogFormat::Json => {
            let json_layer = tracing_subscriber::fmt::layer()
                .json()
                .with_writer(writer)
                .with_target(true)
                .with_thread_ids(true)
                .with_file(true)
                .with_line_number(true);

            tracing_subscriber::registry()
                .with(env_filter)
                .with(json_layer)
                .try_init()
                .map_err(|e| TelemetryError::LoggingInit(e.to_string()))?;
        }
        LogFormat::Pretty => {
            let fmt_layer = tracing_subscriber::fmt::layer()
                .with_writer(writer)
                .with_target(true)
                .with_thread_names(true)
                .with_ansi(ansi);

            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt_layer)
                .try_init()
                .map_err(|e| TelemetryError::LoggingInit(e.to_string()))?;
        }
    }

    tracing::info!(
        service = %config.service_name(),
        format = ?config.format,
        "Logging initialized"
    );

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_filter_rejected() {
        let config = TelemetryConfig::for_container("wordcount", "0")
            .with_filter("container=loud")
            .with_output(LogOutput::TestWriter);
        assert!(matches!(
            init_logging(&config),
            Err(TelemetryError::LoggingInit(_))
        ));
    }
}
