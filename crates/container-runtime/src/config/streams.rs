//! Accessors for the system, stream, store, table and serde key families.

use std::collections::BTreeSet;

use stream_types::SystemStream;

use crate::config::{invalid, Config};
use crate::error::ConfigError;

/// Environment variable overriding the logged store base directory.
pub const LOGGED_STORE_BASE_DIR_ENV: &str = "LOGGED_STORE_BASE_DIR";

const STREAM_KEY_SERDE: &str = ".samza.key.serde";
const STREAM_MSG_SERDE: &str = ".samza.msg.serde";
const STREAM_INTERMEDIATE: &str = ".samza.intermediate";

/// One configured state store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreDefinition {
    pub name: String,
    /// Storage engine factory name.
    pub factory: String,
    pub changelog: Option<SystemStream>,
    pub side_inputs: Vec<SystemStream>,
}

impl Config {
    // =========================================================================
    // SYSTEMS
    // =========================================================================

    /// Systems with a configured factory.
    pub fn system_names(&self) -> BTreeSet<String> {
        self.subset("systems.")
            .keys()
            .filter_map(|k| k.strip_suffix(".samza.factory"))
            .filter(|s| !s.contains('.'))
            .map(str::to_string)
            .collect()
    }

    pub fn system_factory(&self, system: &str) -> Option<&str> {
        self.get(&format!("systems.{system}.samza.factory"))
    }

    pub fn system_key_serde(&self, system: &str) -> Option<&str> {
        self.get(&format!("systems.{system}.samza.key.serde"))
    }

    pub fn system_msg_serde(&self, system: &str) -> Option<&str> {
        self.get(&format!("systems.{system}.samza.msg.serde"))
    }

    // =========================================================================
    // STREAMS
    // =========================================================================

    pub fn stream_key_serde(&self, ss: &SystemStream) -> Option<&str> {
        self.get(&stream_key(ss, STREAM_KEY_SERDE))
    }

    pub fn stream_msg_serde(&self, ss: &SystemStream) -> Option<&str> {
        self.get(&stream_key(ss, STREAM_MSG_SERDE))
    }

    /// Streams carrying an explicit key or message serde.
    pub fn serde_configured_streams(&self) -> BTreeSet<SystemStream> {
        self.streams_with_suffix(&[STREAM_KEY_SERDE, STREAM_MSG_SERDE])
    }

    /// Whether the stream is relayed between job stages.
    pub fn is_intermediate(&self, ss: &SystemStream) -> Result<bool, ConfigError> {
        self.get_bool(&stream_key(ss, STREAM_INTERMEDIATE), false)
    }

    pub fn intermediate_streams(&self) -> Result<BTreeSet<SystemStream>, ConfigError> {
        let mut out = BTreeSet::new();
        for ss in self.streams_with_suffix(&[STREAM_INTERMEDIATE]) {
            if self.is_intermediate(&ss)? {
                out.insert(ss);
            }
        }
        Ok(out)
    }

    fn streams_with_suffix(&self, suffixes: &[&str]) -> BTreeSet<SystemStream> {
        self.subset("systems.")
            .keys()
            .filter_map(|k| {
                let (system, rest) = k.split_once('.')?;
                let rest = rest.strip_prefix("streams.")?;
                let stream = suffixes.iter().find_map(|s| rest.strip_suffix(s))?;
                (!stream.is_empty()).then(|| SystemStream::new(system, stream))
            })
            .collect()
    }

    // =========================================================================
    // STORES
    // =========================================================================

    pub fn store_names(&self) -> BTreeSet<String> {
        self.subset("stores.")
            .keys()
            .filter_map(|k| k.strip_suffix(".factory"))
            .filter(|s| !s.contains('.'))
            .map(str::to_string)
            .collect()
    }

    pub fn store_definition(&self, store: &str) -> Result<StoreDefinition, ConfigError> {
        let factory = self.require(&format!("stores.{store}.factory"))?.to_string();

        let changelog_key = format!("stores.{store}.changelog");
        let changelog = self
            .get(&changelog_key)
            .map(|v| parse_stream(&changelog_key, v))
            .transpose()?;

        let side_inputs_key = format!("stores.{store}.side.inputs");
        let side_inputs = self
            .get_list(&side_inputs_key)
            .iter()
            .map(|v| parse_stream(&side_inputs_key, v))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(StoreDefinition {
            name: store.to_string(),
            factory,
            changelog,
            side_inputs,
        })
    }

    pub fn store_definitions(&self) -> Result<Vec<StoreDefinition>, ConfigError> {
        self.store_names()
            .iter()
            .map(|s| self.store_definition(s))
            .collect()
    }

    // =========================================================================
    // TABLES, SERDES, REPORTERS
    // =========================================================================

    /// `(table id, provider factory)` pairs.
    pub fn table_providers(&self) -> Vec<(String, String)> {
        self.subset("tables.")
            .keys()
            .filter_map(|k| k.strip_suffix(".provider.factory"))
            .filter_map(|id| {
                self.get(&format!("tables.{id}.provider.factory"))
                    .map(|f| (id.to_string(), f.to_string()))
            })
            .collect()
    }

    /// Factory name registered for a serde, if any.
    pub fn serde_factory(&self, serde: &str) -> Option<&str> {
        self.get(&format!("serializers.registry.{serde}.class"))
    }

    /// `(reporter name, factory)` pairs listed in `metrics.reporters`.
    pub fn metrics_reporters(&self) -> Result<Vec<(String, String)>, ConfigError> {
        self.get_list("metrics.reporters")
            .into_iter()
            .map(|name| {
                let factory = self
                    .require(&format!("metrics.reporter.{name}.class"))?
                    .to_string();
                Ok((name, factory))
            })
            .collect()
    }
}

fn stream_key(ss: &SystemStream, suffix: &str) -> String {
    format!("systems.{}.streams.{}{}", ss.system, ss.stream, suffix)
}

fn parse_stream(key: &str, value: &str) -> Result<SystemStream, ConfigError> {
    SystemStream::parse(value).map_err(|e| invalid(key, value, &e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> Config {
        Config::new()
            .with("systems.kafka.samza.factory", "kafka-factory")
            .with("systems.kafka.samza.msg.serde", "json")
            .with("systems.kafka.streams.page.views.samza.key.serde", "string")
            .with("systems.kafka.streams.relay.samza.intermediate", "true")
            .with("systems.kafka.streams.plain.samza.intermediate", "false")
            .with("systems.hdfs.samza.factory", "hdfs-factory")
            .with("stores.counts.factory", "in-memory")
            .with("stores.counts.changelog", "kafka.counts-changelog")
            .with("stores.profiles.factory", "in-memory")
            .with("stores.profiles.side.inputs", "kafka.profiles, hdfs.dump")
            .with("tables.t1.provider.factory", "remote")
            .with("metrics.reporters", "jmx")
            .with("metrics.reporter.jmx.class", "jmx-reporter")
    }

    #[test]
    fn test_system_names() {
        let names: Vec<_> = config().system_names().into_iter().collect();
        assert_eq!(names, vec!["hdfs", "kafka"]);
        assert_eq!(config().system_factory("kafka"), Some("kafka-factory"));
        assert_eq!(config().system_msg_serde("kafka"), Some("json"));
        assert_eq!(config().system_key_serde("kafka"), None);
    }

    #[test]
    fn test_stream_keys_allow_dotted_names() {
        let streams = config().serde_configured_streams();
        let page_views = SystemStream::new("kafka", "page.views");
        assert!(streams.contains(&page_views));
        assert_eq!(config().stream_key_serde(&page_views), Some("string"));
    }

    #[test]
    fn test_intermediate_streams() {
        let streams = config().intermediate_streams().unwrap();
        assert_eq!(streams.len(), 1);
        assert!(streams.contains(&SystemStream::new("kafka", "relay")));
    }

    #[test]
    fn test_store_definitions() {
        let stores = config().store_definitions().unwrap();
        assert_eq!(stores.len(), 2);
        assert_eq!(
            stores[0].changelog,
            Some(SystemStream::new("kafka", "counts-changelog"))
        );
        assert_eq!(
            stores[1].side_inputs,
            vec![
                SystemStream::new("kafka", "profiles"),
                SystemStream::new("hdfs", "dump")
            ]
        );
    }

    #[test]
    fn test_bad_changelog_reference() {
        let config = config().with("stores.counts.changelog", "nodot");
        assert!(matches!(
            config.store_definition("counts"),
            Err(ConfigError::InvalidValue { .. })
        ));
    }

    #[test]
    fn test_tables_and_reporters() {
        assert_eq!(
            config().table_providers(),
            vec![("t1".to_string(), "remote".to_string())]
        );
        assert_eq!(
            config().metrics_reporters().unwrap(),
            vec![("jmx".to_string(), "jmx-reporter".to_string())]
        );
        let missing = config().with("metrics.reporters", "jmx,graphite");
        assert!(missing.metrics_reporters().is_err());
    }
}
