//! # Container Configuration
//!
//! Job configuration arrives as a flat map of dotted string keys, e.g.
//! `systems.kafka.samza.factory = kafka`. `Config` wraps that map with typed
//! accessors; `ContainerConfig` is the typed view of the container-level keys
//! with their defaults applied.
//!
//! ## Key Families
//!
//! ```text
//! job.*                    identity, store dirs, thread pool, admin flags
//! task.*                   shutdown grace period
//! container.*              disk quota, host statistics
//! metrics.*                reporters, timers
//! systems.<s>.*            system factories, system/stream serdes
//! stores.<st>.*            store factories, changelogs, side inputs
//! tables.<t>.*             table providers
//! serializers.registry.*   serde factories
//! ```

mod container;
mod streams;

pub use container::{resolve_logged_store_dir, ContainerConfig, DEFAULT_STORE_DIR};
pub use streams::{StoreDefinition, LOGGED_STORE_BASE_DIR_ENV};

use std::collections::BTreeMap;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Flat job configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Config {
    entries: BTreeMap<String, String>,
}

impl Config {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a JSON object of string keys to string values.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        serde_json::from_str(json).map_err(|e| ConfigError::InvalidValue {
            key: "<root>".to_string(),
            value: json.chars().take(64).collect(),
            reason: e.to_string(),
        })
    }

    /// Builder-style insert.
    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.entries.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(String::as_str)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    /// Required string value.
    pub fn require(&self, key: &str) -> Result<&str, ConfigError> {
        self.get(key).ok_or_else(|| ConfigError::MissingKey {
            key: key.to_string(),
        })
    }

    pub fn get_or<'a>(&'a self, key: &str, default: &'a str) -> &'a str {
        self.get(key).unwrap_or(default)
    }

    pub fn get_bool(&self, key: &str, default: bool) -> Result<bool, ConfigError> {
        match self.get(key) {
            None => Ok(default),
            Some(v) => match v.trim().to_ascii_lowercase().as_str() {
                "true" | "1" | "yes" => Ok(true),
                "false" | "0" | "no" => Ok(false),
                _ => Err(invalid(key, v, "expected a boolean")),
            },
        }
    }

    pub fn get_u64(&self, key: &str, default: u64) -> Result<u64, ConfigError> {
        self.parse_or(key, default)
    }

    pub fn get_usize(&self, key: &str, default: usize) -> Result<usize, ConfigError> {
        self.parse_or(key, default)
    }

    pub fn get_f64(&self, key: &str, default: f64) -> Result<f64, ConfigError> {
        let value: f64 = self.parse_or(key, default)?;
        if value.is_finite() {
            Ok(value)
        } else {
            Err(invalid(key, &value.to_string(), "expected a finite number"))
        }
    }

    /// Comma separated list; empty items are skipped.
    pub fn get_list(&self, key: &str) -> Vec<String> {
        self.get(key)
            .map(|v| {
                v.split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Every key under `prefix`, with the prefix stripped.
    pub fn subset(&self, prefix: &str) -> Config {
        let entries = self
            .entries
            .range(prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, v)| (k[prefix.len()..].to_string(), v.clone()))
            .collect();
        Config { entries }
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn parse_or<T: FromStr>(&self, key: &str, default: T) -> Result<T, ConfigError>
    where
        T::Err: std::fmt::Display,
    {
        match self.get(key) {
            None => Ok(default),
            Some(v) => v
                .trim()
                .parse()
                .map_err(|e: T::Err| invalid(key, v, &e.to_string())),
        }
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Config {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            entries: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

pub(crate) fn invalid(key: &str, value: &str, reason: &str) -> ConfigError {
    ConfigError::InvalidValue {
        key: key.to_string(),
        value: value.to_string(),
        reason: reason.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_typed_accessors() {
        let config = Config::new()
            .with("a.bool", "TRUE")
            .with("a.num", " 42 ")
            .with("a.float", "0.25")
            .with("a.list", "x, y,,z");

        assert!(config.get_bool("a.bool", false).unwrap());
        assert!(!config.get_bool("missing", false).unwrap());
        assert_eq!(config.get_u64("a.num", 0).unwrap(), 42);
        assert_eq!(config.get_f64("a.float", 1.0).unwrap(), 0.25);
        assert_eq!(config.get_list("a.list"), vec!["x", "y", "z"]);
        assert!(config.get_list("missing").is_empty());
    }

    #[test]
    fn test_invalid_number_reports_key() {
        let config = Config::new().with("task.shutdown.ms", "soon");
        let err = config.get_u64("task.shutdown.ms", 5000).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { ref key, .. } if key == "task.shutdown.ms"));
    }

    #[test]
    fn test_subset_strips_prefix() {
        let config = Config::new()
            .with("systems.kafka.samza.factory", "kafka")
            .with("systems.kafka.samza.msg.serde", "json")
            .with("systemsx", "ignored")
            .with("stores.s.factory", "mem");

        let sub = config.subset("systems.kafka.");
        assert_eq!(sub.get("samza.factory"), Some("kafka"));
        assert_eq!(sub.get("samza.msg.serde"), Some("json"));
        assert_eq!(sub.keys().count(), 2);
    }

    #[test]
    fn test_from_json() {
        let config = Config::from_json(r#"{"job.name": "wc", "job.id": "2"}"#).unwrap();
        assert_eq!(config.require("job.name").unwrap(), "wc");
        assert!(matches!(
            config.require("job.missing"),
            Err(ConfigError::MissingKey { .. })
        ));
        assert!(Config::from_json("[1, 2]").is_err());
    }
}
