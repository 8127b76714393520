//! # Capability Registry
//!
//! Resolves pluggable implementations from configuration by symbolic name and
//! instantiates each one exactly once per container. The registry is an
//! ordinary value owned by the container; two containers in one process never
//! share instances.
//!
//! ## How It Works
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────────┐
//! │                     CapabilityRegistry                         │
//! │                                                                │
//! │  name ──► config key ──► factory name ──► FactoryCatalog       │
//! │  "kafka"  systems.kafka.samza.factory     "kafka" → System(..) │
//! │                                                                │
//! │  resolved: (kind, name) → Factory      (first lookup wins)     │
//! │  serdes:   name → Arc<dyn Serde>       (no-op never bound)     │
//! └────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Failure Modes
//!
//! - key absent from configuration: `ConfigError::MissingKey`
//! - factory name not in the catalog: `ConfigError::UnknownFactory`
//! - catalog entry of another kind: `ConfigError::CapabilityMismatch`
//! - serde with neither registry entry nor built-in: `ConfigError::MissingSerde`

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, info};

use crate::config::Config;
use crate::error::ConfigError;
use crate::monitor::{
    DiskQuotaPolicyFactory, LinearPolicyFactory, NoThrottlingPolicyFactory,
    WatermarkPolicyFactory, LINEAR_POLICY, NO_THROTTLING_POLICY, WATERMARK_POLICY,
};
use crate::ports::{
    MetricsReporterFactory, SecurityManagerFactory, StorageEngineFactory, SystemFactory,
    TableProviderFactory,
};
use crate::serdes::{
    BytesSerdeFactory, JsonSerdeFactory, NoOpSerdeFactory, Serde, SerdeFactory,
    StringSerdeFactory, BYTES_SERDE, JSON_SERDE, NOOP_SERDE, STRING_SERDE,
};

/// Pluggable capability kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CapabilityKind {
    System,
    Serde,
    StorageEngine,
    SecurityManager,
    DiskQuotaPolicy,
    MetricsReporter,
    TableProvider,
}

impl CapabilityKind {
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::System => "system",
            Self::Serde => "serde",
            Self::StorageEngine => "storage engine",
            Self::SecurityManager => "security manager",
            Self::DiskQuotaPolicy => "disk quota policy",
            Self::MetricsReporter => "metrics reporter",
            Self::TableProvider => "table provider",
        }
    }
}

impl fmt::Display for CapabilityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A registered factory, tagged with the capability it provides.
#[derive(Clone)]
pub enum Factory {
    System(Arc<dyn SystemFactory>),
    Serde(Arc<dyn SerdeFactory>),
    StorageEngine(Arc<dyn StorageEngineFactory>),
    SecurityManager(Arc<dyn SecurityManagerFactory>),
    DiskQuotaPolicy(Arc<dyn DiskQuotaPolicyFactory>),
    MetricsReporter(Arc<dyn MetricsReporterFactory>),
    TableProvider(Arc<dyn TableProviderFactory>),
}

impl Factory {
    #[must_use]
    pub fn kind(&self) -> CapabilityKind {
        match self {
            Self::System(_) => CapabilityKind::System,
            Self::Serde(_) => CapabilityKind::Serde,
            Self::StorageEngine(_) => CapabilityKind::StorageEngine,
            Self::SecurityManager(_) => CapabilityKind::SecurityManager,
            Self::DiskQuotaPolicy(_) => CapabilityKind::DiskQuotaPolicy,
            Self::MetricsReporter(_) => CapabilityKind::MetricsReporter,
            Self::TableProvider(_) => CapabilityKind::TableProvider,
        }
    }
}

impl fmt::Debug for Factory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Factory({})", self.kind())
    }
}

/// Factory names known to the container.
#[derive(Clone, Default)]
pub struct FactoryCatalog {
    factories: HashMap<String, Factory>,
}

impl FactoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Catalog pre-populated with the built-in serdes and disk quota policies.
    pub fn with_builtins() -> Self {
        let mut catalog = Self::new();
        catalog.register(NOOP_SERDE, Factory::Serde(Arc::new(NoOpSerdeFactory)));
        catalog.register(STRING_SERDE, Factory::Serde(Arc::new(StringSerdeFactory)));
        catalog.register(JSON_SERDE, Factory::Serde(Arc::new(JsonSerdeFactory)));
        catalog.register(BYTES_SERDE, Factory::Serde(Arc::new(BytesSerdeFactory)));
        catalog.register(
            NO_THROTTLING_POLICY,
            Factory::DiskQuotaPolicy(Arc::new(NoThrottlingPolicyFactory)),
        );
        catalog.register(
            LINEAR_POLICY,
            Factory::DiskQuotaPolicy(Arc::new(LinearPolicyFactory)),
        );
        catalog.register(
            WATERMARK_POLICY,
            Factory::DiskQuotaPolicy(Arc::new(WatermarkPolicyFactory)),
        );
        catalog
    }

    /// Register (or replace) a factory under `name`.
    pub fn register(&mut self, name: impl Into<String>, factory: Factory) {
        self.factories.insert(name.into(), factory);
    }

    #[must_use]
    pub fn with(mut self, name: impl Into<String>, factory: Factory) -> Self {
        self.register(name, factory);
        self
    }

    pub fn get(&self, name: &str) -> Option<&Factory> {
        self.factories.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    /// Look up a factory and check its kind.
    pub fn lookup(&self, kind: CapabilityKind, name: &str) -> Result<Factory, ConfigError> {
        let factory = self
            .factories
            .get(name)
            .ok_or_else(|| ConfigError::UnknownFactory {
                kind,
                name: name.to_string(),
            })?;
        if factory.kind() != kind {
            return Err(ConfigError::CapabilityMismatch {
                name: name.to_string(),
                expected: kind,
                actual: factory.kind(),
            });
        }
        Ok(factory.clone())
    }
}

/// Per-container resolver and cache of pluggable capabilities.
pub struct CapabilityRegistry {
    config: Config,
    catalog: FactoryCatalog,
    resolved: RwLock<HashMap<(CapabilityKind, String), Factory>>,
    serdes: RwLock<HashMap<String, Arc<dyn Serde>>>,
}

impl CapabilityRegistry {
    pub fn new(config: Config, catalog: FactoryCatalog) -> Self {
        Self {
            config,
            catalog,
            resolved: RwLock::new(HashMap::new()),
            serdes: RwLock::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn catalog(&self) -> &FactoryCatalog {
        &self.catalog
    }

    /// Resolve the factory configured under `key` for the logical `name`.
    fn resolve(
        &self,
        kind: CapabilityKind,
        name: &str,
        key: &str,
    ) -> Result<Factory, ConfigError> {
        match self.cached(kind, name) {
            Some(factory) => Ok(factory),
            None => self.bind(kind, name, self.config.require(key)?),
        }
    }

    fn cached(&self, kind: CapabilityKind, name: &str) -> Option<Factory> {
        self.resolved.read().get(&(kind, name.to_string())).cloned()
    }

    /// Look `factory_name` up in the catalog and cache it for `name`.
    fn bind(
        &self,
        kind: CapabilityKind,
        name: &str,
        factory_name: &str,
    ) -> Result<Factory, ConfigError> {
        let factory = self.catalog.lookup(kind, factory_name)?;
        debug!(%kind, name, factory = factory_name, "Resolved capability");

        Ok(self
            .resolved
            .write()
            .entry((kind, name.to_string()))
            .or_insert(factory)
            .clone())
    }

    pub fn system(&self, system: &str) -> Result<Arc<dyn SystemFactory>, ConfigError> {
        match self.resolve(
            CapabilityKind::System,
            system,
            &format!("systems.{system}.samza.factory"),
        )? {
            Factory::System(f) => Ok(f),
            other => Err(mismatch(system, CapabilityKind::System, &other)),
        }
    }

    pub fn storage_engine(&self, store: &str) -> Result<Arc<dyn StorageEngineFactory>, ConfigError> {
        match self.resolve(
            CapabilityKind::StorageEngine,
            store,
            &format!("stores.{store}.factory"),
        )? {
            Factory::StorageEngine(f) => Ok(f),
            other => Err(mismatch(store, CapabilityKind::StorageEngine, &other)),
        }
    }

    /// `None` when `job.security.manager.factory` is not configured.
    /// Security manager factory named by `job.security.manager.factory`, if any.
    pub fn security_manager(
        &self,
        factory: Option<&str>,
    ) -> Result<Option<Arc<dyn SecurityManagerFactory>>, ConfigError> {
        const SLOT: &str = "security-manager";
        let Some(factory) = factory else {
            return Ok(None);
        };
        let resolved = match self.cached(CapabilityKind::SecurityManager, SLOT) {
            Some(f) => f,
            None => self.bind(CapabilityKind::SecurityManager, SLOT, factory)?,
        };
        match resolved {
            Factory::SecurityManager(f) => Ok(Some(f)),
            other => Err(mismatch(factory, CapabilityKind::SecurityManager, &other)),
        }
    }

    /// Disk quota policy factory; the caller supplies the configured name or
    /// the `no-throttling` default.
    pub fn disk_quota_policy(
        &self,
        factory: &str,
    ) -> Result<Arc<dyn DiskQuotaPolicyFactory>, ConfigError> {
        const SLOT: &str = "disk-quota-policy";
        let resolved = match self.cached(CapabilityKind::DiskQuotaPolicy, SLOT) {
            Some(f) => f,
            None => self.bind(CapabilityKind::DiskQuotaPolicy, SLOT, factory)?,
        };
        match resolved {
            Factory::DiskQuotaPolicy(f) => Ok(f),
            other => Err(mismatch(factory, CapabilityKind::DiskQuotaPolicy, &other)),
        }
    }

    pub fn metrics_reporter(
        &self,
        reporter: &str,
    ) -> Result<Arc<dyn MetricsReporterFactory>, ConfigError> {
        match self.resolve(
            CapabilityKind::MetricsReporter,
            reporter,
            &format!("metrics.reporter.{reporter}.class"),
        )? {
            Factory::MetricsReporter(f) => Ok(f),
            other => Err(mismatch(reporter, CapabilityKind::MetricsReporter, &other)),
        }
    }

    pub fn table_provider(&self, table: &str) -> Result<Arc<dyn TableProviderFactory>, ConfigError> {
        match self.resolve(
            CapabilityKind::TableProvider,
            table,
            &format!("tables.{table}.provider.factory"),
        )? {
            Factory::TableProvider(f) => Ok(f),
            other => Err(mismatch(table, CapabilityKind::TableProvider, &other)),
        }
    }

    /// Serde instance for `name`, created on first use.
    ///
    /// The factory is `serializers.registry.<name>.class` when configured,
    /// otherwise the built-in catalog entry of the same name.
    pub fn serde(&self, name: &str) -> Result<Arc<dyn Serde>, ConfigError> {
        if let Some(serde) = self.serdes.read().get(name) {
            return Ok(Arc::clone(serde));
        }

        let factory_name = self.config.serde_factory(name).unwrap_or(name);
        let factory = match self.catalog.lookup(CapabilityKind::Serde, factory_name) {
            Ok(Factory::Serde(f)) => f,
            Ok(other) => return Err(mismatch(factory_name, CapabilityKind::Serde, &other)),
            Err(ConfigError::UnknownFactory { .. }) => {
                return Err(ConfigError::MissingSerde {
                    serde: name.to_string(),
                })
            }
            Err(e) => return Err(e),
        };

        let mut serdes = self.serdes.write();
        let serde = serdes
            .entry(name.to_string())
            .or_insert_with(|| factory.create(name, &self.config));
        info!(serde = name, codec = serde.name(), "Created serde");
        Ok(Arc::clone(serde))
    }
}

fn mismatch(name: &str, expected: CapabilityKind, actual: &Factory) -> ConfigError {
    ConfigError::CapabilityMismatch {
        name: name.to_string(),
        expected,
        actual: actual.kind(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::{SystemAdmin, SystemConsumer, SystemProducer};
    use container_telemetry::ContainerMetrics;

    struct NullSystem;

    impl SystemFactory for NullSystem {
        fn consumer(
            &self,
            _: &str,
            _: &Config,
            _: &ContainerMetrics,
        ) -> anyhow::Result<Arc<dyn SystemConsumer>> {
            anyhow::bail!("no consumer")
        }

        fn producer(
            &self,
            _: &str,
            _: &Config,
            _: &ContainerMetrics,
        ) -> anyhow::Result<Arc<dyn SystemProducer>> {
            anyhow::bail!("no producer")
        }

        fn admin(&self, _: &str, _: &Config) -> anyhow::Result<Arc<dyn SystemAdmin>> {
            anyhow::bail!("no admin")
        }
    }

    fn registry(config: Config) -> CapabilityRegistry {
        let catalog =
            FactoryCatalog::with_builtins().with("null", Factory::System(Arc::new(NullSystem)));
        CapabilityRegistry::new(config, catalog)
    }

    #[test]
    fn test_system_resolved_once_per_name() {
        let reg = registry(
            Config::new()
                .with("systems.a.samza.factory", "null")
                .with("systems.b.samza.factory", "null"),
        );
        let first = reg.system("a").unwrap();
        let second = reg.system("a").unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(reg.resolved.read().len(), 1);
        reg.system("b").unwrap();
        assert_eq!(reg.resolved.read().len(), 2);
    }

    #[test]
    fn test_missing_and_unknown_factories() {
        let reg = registry(Config::new().with("systems.x.samza.factory", "nope"));
        assert!(matches!(
            reg.system("absent"),
            Err(ConfigError::MissingKey { .. })
        ));
        assert!(matches!(
            reg.system("x"),
            Err(ConfigError::UnknownFactory { kind: CapabilityKind::System, .. })
        ));
    }

    #[test]
    fn test_capability_mismatch() {
        let reg = registry(Config::new().with("systems.x.samza.factory", "json"));
        assert!(matches!(
            reg.system("x"),
            Err(ConfigError::CapabilityMismatch {
                expected: CapabilityKind::System,
                actual: CapabilityKind::Serde,
                ..
            })
        ));
    }

    #[test]
    fn test_serde_instances_cached() {
        let reg = registry(Config::new().with("serializers.registry.words.class", "string"));
        let a = reg.serde("words").unwrap();
        let b = reg.serde("words").unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(a.name(), "string");

        // built-in fallback by name
        assert_eq!(reg.serde("json").unwrap().name(), "json");
        assert!(matches!(
            reg.serde("avro"),
            Err(ConfigError::MissingSerde { ref serde }) if serde == "avro"
        ));
    }

    #[test]
    fn test_policy_and_security_resolved_from_typed_settings() {
        let reg = registry(Config::new());
        assert!(reg.disk_quota_policy(NO_THROTTLING_POLICY).is_ok());
        assert!(reg.security_manager(None).unwrap().is_none());

        assert!(matches!(
            reg.security_manager(Some("kerberos")),
            Err(ConfigError::UnknownFactory {
                kind: CapabilityKind::SecurityManager,
                ..
            })
        ));

        assert!(matches!(
            reg.disk_quota_policy("json"),
            Err(ConfigError::CapabilityMismatch { .. })
        ));
    }
}
