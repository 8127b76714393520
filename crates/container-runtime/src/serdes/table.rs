//! Serde resolution table and its application to envelopes.
//!
//! Lookup precedence: stream level, then system level, then none. The no-op
//! serde is never bound, so a stream configured with `noop` falls through to
//! its system's codec.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use anyhow::Context;
use stream_types::{IncomingEnvelope, OutgoingEnvelope, Payload, SystemStream};
use tracing::{debug, instrument};

use crate::error::ConfigError;
use crate::registry::CapabilityRegistry;
use crate::serdes::{IntermediateMessageSerde, Serde, StringSerde};

#[derive(Default)]
pub struct SerdeTable {
    system_keys: HashMap<String, Arc<dyn Serde>>,
    system_msgs: HashMap<String, Arc<dyn Serde>>,
    stream_keys: HashMap<SystemStream, Arc<dyn Serde>>,
    stream_msgs: HashMap<SystemStream, Arc<dyn Serde>>,
}

impl SerdeTable {
    /// Build the table for every configured system and for every stream that
    /// is an input or carries its own serde configuration.
    #[instrument(skip_all)]
    pub fn build(
        registry: &CapabilityRegistry,
        input_streams: &BTreeSet<SystemStream>,
    ) -> Result<Self, ConfigError> {
        let config = registry.config();
        let mut table = SerdeTable::default();

        for system in config.system_names() {
            if let Some(serde) = resolve(registry, config.system_key_serde(&system))? {
                table.system_keys.insert(system.clone(), serde);
            }
            if let Some(serde) = resolve(registry, config.system_msg_serde(&system))? {
                table.system_msgs.insert(system, serde);
            }
        }

        let intermediates = config.intermediate_streams()?;
        let streams: BTreeSet<SystemStream> = input_streams
            .iter()
            .cloned()
            .chain(config.serde_configured_streams())
            .chain(intermediates.iter().cloned())
            .collect();

        for ss in &streams {
            if let Some(serde) = resolve(registry, config.stream_key_serde(ss))? {
                table.stream_keys.insert(ss.clone(), serde);
            }
            if let Some(serde) = resolve(registry, config.stream_msg_serde(ss))? {
                table.stream_msgs.insert(ss.clone(), serde);
            }
        }

        for ss in intermediates {
            let inner = table.msg_serde(&ss);
            table.stream_keys.insert(ss.clone(), Arc::new(StringSerde));
            table
                .stream_msgs
                .insert(ss, Arc::new(IntermediateMessageSerde::new(inner)));
        }

        debug!(
            system_bindings = table.system_keys.len() + table.system_msgs.len(),
            stream_bindings = table.stream_keys.len() + table.stream_msgs.len(),
            "Built serde table"
        );
        Ok(table)
    }

    pub fn key_serde(&self, ss: &SystemStream) -> Option<Arc<dyn Serde>> {
        self.stream_keys
            .get(ss)
            .or_else(|| self.system_keys.get(&ss.system))
            .cloned()
    }

    pub fn msg_serde(&self, ss: &SystemStream) -> Option<Arc<dyn Serde>> {
        self.stream_msgs
            .get(ss)
            .or_else(|| self.system_msgs.get(&ss.system))
            .cloned()
    }

    pub fn is_empty(&self) -> bool {
        self.system_keys.is_empty()
            && self.system_msgs.is_empty()
            && self.stream_keys.is_empty()
            && self.stream_msgs.is_empty()
    }
}

fn resolve(
    registry: &CapabilityRegistry,
    name: Option<&str>,
) -> Result<Option<Arc<dyn Serde>>, ConfigError> {
    match name {
        None => Ok(None),
        Some(name) => {
            let serde = registry.serde(name)?;
            Ok((!serde.is_noop()).then_some(serde))
        }
    }
}

/// Applies the serde table on the way in and out of the transports.
#[derive(Clone)]
pub struct SerdeManager {
    table: Arc<SerdeTable>,
}

impl SerdeManager {
    pub fn new(table: Arc<SerdeTable>) -> Self {
        Self { table }
    }

    pub fn table(&self) -> &SerdeTable {
        &self.table
    }

    /// Encode key and message; streams without a codec pass through.
    pub fn to_bytes(&self, mut envelope: OutgoingEnvelope) -> anyhow::Result<OutgoingEnvelope> {
        let ss = envelope.system_stream.clone();
        envelope.key = match (self.table.key_serde(&ss), envelope.key.take()) {
            (Some(serde), Some(key)) => {
                Some(encode(serde.as_ref(), &key).with_context(|| format!("key for {ss}"))?)
            }
            (_, key) => key,
        };
        if let Some(serde) = self.table.msg_serde(&ss) {
            envelope.message = encode(serde.as_ref(), &envelope.message)
                .with_context(|| format!("message for {ss}"))?;
        }
        Ok(envelope)
    }

    /// Decode key and message of raw envelopes; others pass through.
    pub fn from_bytes(&self, mut envelope: IncomingEnvelope) -> anyhow::Result<IncomingEnvelope> {
        let ssp = envelope.ssp.clone();
        envelope.key = match (self.table.key_serde(&ssp.system_stream), envelope.key.take()) {
            (Some(serde), Some(Payload::Bytes(bytes))) => Some(
                serde
                    .from_bytes(&bytes)
                    .with_context(|| format!("key from {ssp}"))?,
            ),
            (_, key) => key,
        };
        let message = std::mem::replace(&mut envelope.message, Payload::Bytes(Vec::new()));
        envelope.message = match (self.table.msg_serde(&ssp.system_stream), message) {
            (Some(serde), Payload::Bytes(bytes)) => serde
                .from_bytes(&bytes)
                .with_context(|| format!("message from {ssp}"))?,
            (_, message) => message,
        };
        Ok(envelope)
    }
}

fn encode(serde: &dyn Serde, payload: &Payload) -> anyhow::Result<Payload> {
    Ok(Payload::Bytes(serde.to_bytes(payload)?))
}
