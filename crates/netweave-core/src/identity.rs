// ── Identity side lookup ──
//
// Optional enrichment of device records with operator-assigned names and
// owners. Topology correctness never depends on it.

use async_trait::async_trait;
use dashmap::DashMap;

use crate::model::{DeviceIdentity, MacAddress};

#[async_trait]
pub trait IdentityDirectory: Send + Sync {
    async fn lookup(&self, mac: &MacAddress) -> Option<DeviceIdentity>;

    async fn record(&self, identity: DeviceIdentity);
}

/// Concurrent in-memory directory keyed by normalized MAC.
#[derive(Debug, Default)]
pub struct MemoryIdentityDirectory {
    by_mac: DashMap<MacAddress, DeviceIdentity>,
}

impl MemoryIdentityDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.by_mac.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_mac.is_empty()
    }
}

#[async_trait]
impl IdentityDirectory for MemoryIdentityDirectory {
    async fn lookup(&self, mac: &MacAddress) -> Option<DeviceIdentity> {
        self.by_mac.get(mac).map(|r| r.value().clone())
    }

    async fn record(&self, identity: DeviceIdentity) {
        if identity.mac.is_empty() {
            return;
        }
        self.by_mac.insert(identity.mac.clone(), identity);
    }
}
