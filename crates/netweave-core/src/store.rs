// ── Persistence boundary ──
//
// The core never owns a database. It writes device records and whole
// snapshots through `TopologyStore`, one writer per key at a time.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::error::CoreError;
use crate::model::{NetworkDevice, TopologySnapshot};

#[async_trait]
pub trait TopologyStore: Send + Sync {
    async fn save_device(&self, device: &NetworkDevice) -> Result<(), CoreError>;

    async fn save_topology(&self, topology: &TopologySnapshot) -> Result<(), CoreError>;

    /// `Ok(None)` when nothing has been stored for (tenant, site) yet.
    async fn load_topology(
        &self,
        tenant: &str,
        site: &str,
    ) -> Result<Option<TopologySnapshot>, CoreError>;

    /// Every persisted device record, used to seed the registry on start.
    async fn load_devices(&self) -> Result<Vec<NetworkDevice>, CoreError>;
}

fn topology_key(tenant: &str, site: &str) -> String {
    format!("topology:{tenant}:{site}")
}

fn device_key(device_id: &str) -> String {
    format!("device:{device_id}")
}

const DEVICE_PREFIX: &str = "device:";

/// Key/value store holding JSON documents in memory.
///
/// Values go through a full serialize/deserialize cycle so callers see
/// the same behaviour as a document database would give them.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: RwLock<BTreeMap<String, String>>,
    fail_writes: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent write fail until switched back off.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    async fn put<T: serde::Serialize + Sync>(&self, key: String, value: &T) -> Result<(), CoreError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(CoreError::persistence(format!("write to {key} rejected")));
        }
        let json = serde_json::to_string(value)
            .map_err(|e| CoreError::persistence(format!("failed to encode {key}: {e}")))?;
        self.entries.write().await.insert(key, json);
        Ok(())
    }
}

#[async_trait]
impl TopologyStore for MemoryStore {
    async fn save_device(&self, device: &NetworkDevice) -> Result<(), CoreError> {
        self.put(device_key(&device.device_id), device).await
    }

    async fn save_topology(&self, topology: &TopologySnapshot) -> Result<(), CoreError> {
        self.put(topology_key(&topology.tenant, &topology.site), topology)
            .await
    }

    async fn load_topology(
        &self,
        tenant: &str,
        site: &str,
    ) -> Result<Option<TopologySnapshot>, CoreError> {
        let key = topology_key(tenant, site);
        let entries = self.entries.read().await;
        let Some(json) = entries.get(&key) else {
            return Ok(None);
        };
        serde_json::from_str(json)
            .map(Some)
            .map_err(|e| CoreError::persistence(format!("failed to decode {key}: {e}")))
    }

    async fn load_devices(&self) -> Result<Vec<NetworkDevice>, CoreError> {
        let entries = self.entries.read().await;
        entries
            .range(DEVICE_PREFIX.to_owned()..)
            .take_while(|(k, _)| k.starts_with(DEVICE_PREFIX))
            .map(|(key, json)| {
                serde_json::from_str(json)
                    .map_err(|e| CoreError::persistence(format!("failed to decode {key}: {e}")))
            })
            .collect()
    }
}
