use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::{anyhow, Context};
use stream_types::OutgoingEnvelope;
use tracing::{info, warn};

use crate::ports::SystemProducer;
use crate::serdes::SerdeManager;

/// Encodes outgoing envelopes and routes them to their system's producer.
pub struct ProducerMultiplexer {
    producers: BTreeMap<String, Arc<dyn SystemProducer>>,
    serdes: SerdeManager,
}

impl ProducerMultiplexer {
    pub fn new(producers: BTreeMap<String, Arc<dyn SystemProducer>>, serdes: SerdeManager) -> Self {
        Self { producers, serdes }
    }

    pub fn systems(&self) -> impl Iterator<Item = &str> {
        self.producers.keys().map(String::as_str)
    }

    /// Register `source` with every producer.
    pub fn register(&self, source: &str) -> anyhow::Result<()> {
        for (system, producer) in &self.producers {
            producer
                .register(source)
                .with_context(|| format!("registering '{source}' with producer for '{system}'"))?;
        }
        Ok(())
    }

    pub async fn start(&self) -> anyhow::Result<()> {
        for (system, producer) in &self.producers {
            info!(system = %system, "Starting producer");
            producer
                .start()
                .await
                .with_context(|| format!("starting producer for '{system}'"))?;
        }
        Ok(())
    }

    /// Stop every producer; returns the first failure.
    pub async fn stop(&self) -> anyhow::Result<()> {
        let mut first_error = None;
        for (system, producer) in &self.producers {
            if let Err(e) = producer.stop().await {
                warn!(system = %system, error = %e, "Failed to stop producer");
                first_error.get_or_insert(e.context(format!("stopping producer for '{system}'")));
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    pub async fn send(&self, source: &str, envelope: OutgoingEnvelope) -> anyhow::Result<()> {
        let system = envelope.system_stream.system.clone();
        let producer = self
            .producers
            .get(&system)
            .ok_or_else(|| anyhow!("no producer for system '{system}'"))?;
        let encoded = self.serdes.to_bytes(envelope)?;
        producer.send(source, encoded).await
    }

    pub async fn flush(&self, source: &str) -> anyhow::Result<()> {
        for (system, producer) in &self.producers {
            producer
                .flush(source)
                .await
                .with_context(|| format!("flushing '{source}' on '{system}'"))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::registry::{CapabilityRegistry, FactoryCatalog};
    use crate::serdes::SerdeTable;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::collections::BTreeSet;
    use stream_types::{Payload, SystemStream};

    #[derive(Default)]
    struct CapturingProducer {
        sources: Mutex<Vec<String>>,
        sent: Mutex<Vec<OutgoingEnvelope>>,
    }

    #[async_trait]
    impl SystemProducer for CapturingProducer {
        fn register(&self, source: &str) -> anyhow::Result<()> {
            self.sources.lock().push(source.to_string());
            Ok(())
        }

        async fn start(&self) -> anyhow::Result<()> {
            Ok(())
        }

        async fn stop(&self) -> anyhow::Result<()> {
            Ok(())
        }

        async fn send(&self, _source: &str, envelope: OutgoingEnvelope) -> anyhow::Result<()> {
            self.sent.lock().push(envelope);
            Ok(())
        }

        async fn flush(&self, _source: &str) -> anyhow::Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_send_encodes_and_routes() {
        let config = Config::new()
            .with("systems.kafka.samza.factory", "kafka")
            .with("systems.kafka.samza.msg.serde", "string");
        let registry = CapabilityRegistry::new(config, FactoryCatalog::with_builtins());
        let table = SerdeTable::build(&registry, &BTreeSet::new()).unwrap();

        let kafka = Arc::new(CapturingProducer::default());
        let producers: BTreeMap<String, Arc<dyn SystemProducer>> =
            BTreeMap::from([("kafka".to_string(), kafka.clone() as Arc<dyn SystemProducer>)]);
        let mux = ProducerMultiplexer::new(producers, SerdeManager::new(Arc::new(table)));

        mux.register("Partition 0").unwrap();
        assert_eq!(kafka.sources.lock().as_slice(), ["Partition 0".to_string()]);

        mux.send(
            "Partition 0",
            OutgoingEnvelope::new(SystemStream::new("kafka", "out"), None, Payload::from("hi")),
        )
        .await
        .unwrap();
        assert_eq!(kafka.sent.lock()[0].message, Payload::Bytes(b"hi".to_vec()));

        let err = mux
            .send(
                "Partition 0",
                OutgoingEnvelope::new(SystemStream::new("hdfs", "out"), None, Payload::from("x")),
            )
            .await;
        assert!(err.is_err());
    }
}
