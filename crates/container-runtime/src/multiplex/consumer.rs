use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context};
use parking_lot::RwLock;
use stream_types::{IncomingEnvelope, SystemStreamPartition};
use tracing::{info, warn};

use crate::ports::{CheckpointListener, SystemConsumer};
use crate::serdes::SerdeManager;

/// Reads from every usable system's consumer and decodes what it reads.
pub struct ConsumerMultiplexer {
    consumers: BTreeMap<String, Arc<dyn SystemConsumer>>,
    serdes: SerdeManager,
    registered: RwLock<BTreeMap<SystemStreamPartition, Option<String>>>,
}

impl ConsumerMultiplexer {
    pub fn new(consumers: BTreeMap<String, Arc<dyn SystemConsumer>>, serdes: SerdeManager) -> Self {
        Self {
            consumers,
            serdes,
            registered: RwLock::new(BTreeMap::new()),
        }
    }

    pub fn systems(&self) -> impl Iterator<Item = &str> {
        self.consumers.keys().map(String::as_str)
    }

    pub fn consumer(&self, system: &str) -> Option<&Arc<dyn SystemConsumer>> {
        self.consumers.get(system)
    }

    /// Partitions registered so far with their starting offsets.
    pub fn registered(&self) -> BTreeMap<SystemStreamPartition, Option<String>> {
        self.registered.read().clone()
    }

    pub fn register(
        &self,
        ssp: &SystemStreamPartition,
        starting_offset: Option<String>,
    ) -> anyhow::Result<()> {
        let consumer = self
            .consumers
            .get(ssp.system())
            .ok_or_else(|| anyhow!("no consumer for system '{}' to register {ssp}", ssp.system()))?;
        consumer.register(ssp, starting_offset.clone())?;
        self.registered.write().insert(ssp.clone(), starting_offset);
        Ok(())
    }

    /// Checkpoint listeners exposed by consumers, by system.
    pub fn checkpoint_listeners(&self) -> BTreeMap<String, Arc<dyn CheckpointListener>> {
        self.consumers
            .iter()
            .filter_map(|(system, c)| c.checkpoint_listener().map(|l| (system.clone(), l)))
            .collect()
    }

    pub async fn start(&self) -> anyhow::Result<()> {
        for (system, consumer) in &self.consumers {
            info!(system = %system, "Starting consumer");
            consumer
                .start()
                .await
                .with_context(|| format!("starting consumer for '{system}'"))?;
        }
        Ok(())
    }

    /// Stop every consumer; returns the first failure.
    pub async fn stop(&self) -> anyhow::Result<()> {
        let mut first_error = None;
        for (system, consumer) in &self.consumers {
            if let Err(e) = consumer.stop().await {
                warn!(system = %system, error = %e, "Failed to stop consumer");
                first_error.get_or_insert(e.context(format!("stopping consumer for '{system}'")));
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    /// Poll each system for its share of `ssps` and decode the results.
    pub async fn poll(
        &self,
        ssps: &BTreeSet<SystemStreamPartition>,
        timeout: Duration,
    ) -> anyhow::Result<Vec<IncomingEnvelope>> {
        let mut by_system: BTreeMap<&str, BTreeSet<SystemStreamPartition>> = BTreeMap::new();
        for ssp in ssps {
            by_system.entry(ssp.system()).or_default().insert(ssp.clone());
        }

        let mut out = Vec::new();
        for (system, wanted) in by_system {
            let Some(consumer) = self.consumers.get(system) else {
                continue;
            };
            for envelope in consumer.poll(&wanted, timeout).await? {
                out.push(self.serdes.from_bytes(envelope)?);
            }
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::serdes::SerdeTable;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use stream_types::Payload;

    #[derive(Default)]
    struct StubConsumer {
        registered: Mutex<Vec<(SystemStreamPartition, Option<String>)>>,
        fail_stop: bool,
    }

    #[async_trait]
    impl SystemConsumer for StubConsumer {
        fn register(&self, ssp: &SystemStreamPartition, offset: Option<String>) -> anyhow::Result<()> {
            self.registered.lock().push((ssp.clone(), offset));
            Ok(())
        }

        async fn start(&self) -> anyhow::Result<()> {
            Ok(())
        }

        async fn stop(&self) -> anyhow::Result<()> {
            if self.fail_stop {
                anyhow::bail!("stuck");
            }
            Ok(())
        }

        async fn poll(
            &self,
            ssps: &BTreeSet<SystemStreamPartition>,
            _timeout: Duration,
        ) -> anyhow::Result<Vec<IncomingEnvelope>> {
            Ok(ssps
                .iter()
                .map(|ssp| IncomingEnvelope {
                    ssp: ssp.clone(),
                    offset: "1".into(),
                    key: None,
                    message: Payload::Bytes(b"x".to_vec()),
                })
                .collect())
        }
    }

    fn mux(consumers: Vec<(&str, Arc<StubConsumer>)>) -> ConsumerMultiplexer {
        ConsumerMultiplexer::new(
            consumers
                .into_iter()
                .map(|(s, c)| (s.to_string(), c as Arc<dyn SystemConsumer>))
                .collect(),
            SerdeManager::new(Arc::new(SerdeTable::default())),
        )
    }

    #[test]
    fn test_register_routes_by_system() {
        let kafka = Arc::new(StubConsumer::default());
        let m = mux(vec![("kafka", kafka.clone())]);

        let ssp = SystemStreamPartition::new("kafka", "clicks", 3);
        m.register(&ssp, Some("42".into())).unwrap();
        assert_eq!(kafka.registered.lock()[0], (ssp.clone(), Some("42".to_string())));
        assert_eq!(m.registered()[&ssp], Some("42".to_string()));

        let unknown = SystemStreamPartition::new("hdfs", "x", 0);
        assert!(m.register(&unknown, None).is_err());
    }

    #[tokio::test]
    async fn test_poll_skips_systems_without_consumer() {
        let m = mux(vec![("kafka", Arc::new(StubConsumer::default()))]);
        let ssps = BTreeSet::from([
            SystemStreamPartition::new("kafka", "a", 0),
            SystemStreamPartition::new("hdfs", "b", 0),
        ]);
        let polled = m.poll(&ssps, Duration::from_millis(1)).await.unwrap();
        assert_eq!(polled.len(), 1);
        assert_eq!(polled[0].ssp.system(), "kafka");
    }

    #[tokio::test]
    async fn test_stop_continues_after_failure() {
        let m = mux(vec![
            (
                "a",
                Arc::new(StubConsumer {
                    fail_stop: true,
                    ..Default::default()
                }),
            ),
            ("b", Arc::new(StubConsumer::default())),
        ]);
        let err = m.stop().await.unwrap_err();
        assert!(err.to_string().contains("'a'"));
    }
}
