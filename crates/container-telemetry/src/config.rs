//! Logging settings for one container process.

use std::env;

/// Line format of emitted log events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Pretty,
    Json,
}

/// Destination of formatted log lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogOutput {
    Stdout,
    /// Captured per test by the libtest harness.
    TestWriter,
    /// Filter only, nothing is written.
    Off,
}

/// Logging settings, keyed by the job and container they describe.
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    pub job_name: String,
    pub container_id: String,
    /// `EnvFilter` directives, e.g. `info,container_runtime=debug`
    pub filter: String,
    pub format: LogFormat,
    pub output: LogOutput,
}

impl TelemetryConfig {
    /// Settings for container `container_id` of job `job_name`.
    ///
    /// # Environment Variables
    ///
    /// - `CONTAINER_LOG_LEVEL` or `RUST_LOG`: filter directives (default: info)
    /// - `CONTAINER_LOG_FORMAT`: `json` or `pretty` (default: json under
    ///   Kubernetes, pretty otherwise)
    pub fn for_container(job_name: &str, container_id: &str) -> Self {
        Self::from_vars(job_name, container_id, |key| env::var(key).ok())
    }

    fn from_vars(job_name: &str, container_id: &str, var: impl Fn(&str) -> Option<String>) -> Self {
        let format = match var("CONTAINER_LOG_FORMAT").as_deref().map(str::trim) {
            Some(f) if f.eq_ignore_ascii_case("json") => LogFormat::Json,
            Some(_) => LogFormat::Pretty,
            None if var("KUBERNETES_SERVICE_HOST").is_some() => LogFormat::Json,
            None => LogFormat::Pretty,
        };

        Self {
            job_name: job_name.to_string(),
            container_id: container_id.to_string(),
            filter: var("CONTAINER_LOG_LEVEL")
                .or_else(|| var("RUST_LOG"))
                .unwrap_or_else(|| "info".to_string()),
            format,
            output: LogOutput::Stdout,
        }
    }

    pub fn with_filter(mut self, filter: impl Into<String>) -> Self {
        self.filter = filter.into();
        self
    }

    pub fn with_output(mut self, output: LogOutput) -> Self {
        self.output = output;
        self
    }

    /// `<job>-<container>`, attached to the first log line.
    pub fn service_name(&self) -> String {
        format!("{}-{}", self.job_name, self.container_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn vars(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn test_defaults_without_environment() {
        let config = TelemetryConfig::from_vars("wordcount", "0", vars(&[]));
        assert_eq!(config.service_name(), "wordcount-0");
        assert_eq!(config.filter, "info");
        assert_eq!(config.format, LogFormat::Pretty);
        assert_eq!(config.output, LogOutput::Stdout);
    }

    #[test]
    fn test_kubernetes_defaults_to_json() {
        let config = TelemetryConfig::from_vars(
            "wordcount",
            "0",
            vars(&[("KUBERNETES_SERVICE_HOST", "10.0.0.1")]),
        );
        assert_eq!(config.format, LogFormat::Json);

        let forced = TelemetryConfig::from_vars(
            "wordcount",
            "0",
            vars(&[("KUBERNETES_SERVICE_HOST", "10.0.0.1"), ("CONTAINER_LOG_FORMAT", "pretty")]),
        );
        assert_eq!(forced.format, LogFormat::Pretty);
    }

    #[test]
    fn test_container_level_wins_over_rust_log() {
        let config = TelemetryConfig::from_vars(
            "wordcount",
            "0",
            vars(&[("RUST_LOG", "warn"), ("CONTAINER_LOG_LEVEL", "debug")]),
        );
        assert_eq!(config.filter, "debug");

        let overridden = config.with_filter("container_runtime=trace");
        assert_eq!(overridden.filter, "container_runtime=trace");
    }
}
