//! Stream metadata cache shared by the offset coordinator and storage.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use anyhow::{anyhow, Context};
use parking_lot::RwLock;
use stream_types::SystemStream;
use tracing::debug;

use crate::ports::{StreamMetadata, SystemAdmin};

/// Fetches stream metadata through the system admins, once per stream.
pub struct StreamMetadataCache {
    admins: BTreeMap<String, Arc<dyn SystemAdmin>>,
    cache: RwLock<BTreeMap<SystemStream, StreamMetadata>>,
}

impl StreamMetadataCache {
    pub fn new(admins: BTreeMap<String, Arc<dyn SystemAdmin>>) -> Self {
        Self {
            admins,
            cache: RwLock::new(BTreeMap::new()),
        }
    }

    pub fn admins(&self) -> &BTreeMap<String, Arc<dyn SystemAdmin>> {
        &self.admins
    }

    /// Metadata for every requested stream, fetching uncached ones in one
    /// request per system.
    pub async fn fetch(
        &self,
        streams: &BTreeSet<SystemStream>,
    ) -> anyhow::Result<BTreeMap<SystemStream, StreamMetadata>> {
        let missing: BTreeMap<&str, BTreeSet<String>> = {
            let cache = self.cache.read();
            let mut by_system: BTreeMap<&str, BTreeSet<String>> = BTreeMap::new();
            for ss in streams.iter().filter(|ss| !cache.contains_key(ss)) {
                by_system
                    .entry(ss.system.as_str())
                    .or_default()
                    .insert(ss.stream.clone());
            }
            by_system
        };

        for (system, names) in missing {
            let admin = self
                .admins
                .get(system)
                .ok_or_else(|| anyhow!("no admin for system '{system}'"))?;
            let fetched = admin
                .stream_metadata(&names)
                .await
                .with_context(|| format!("fetching metadata from '{system}'"))?;
            debug!(system, streams = fetched.len(), "Fetched stream metadata");

            let mut cache = self.cache.write();
            for (stream, metadata) in fetched {
                cache.insert(SystemStream::new(system, stream), metadata);
            }
        }

        let cache = self.cache.read();
        Ok(streams
            .iter()
            .filter_map(|ss| cache.get(ss).map(|m| (ss.clone(), m.clone())))
            .collect())
    }

    pub fn get(&self, ss: &SystemStream) -> Option<StreamMetadata> {
        self.cache.read().get(ss).cloned()
    }
}
