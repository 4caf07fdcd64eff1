// ── Device registry ──
//
// Authoritative table of every device the controller has sighted. Owns
// merge-on-sighting, the online/offline counters, and the timeout sweep.
// All reads hand out clones; nothing outside this module can reach the
// records behind the lock.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::classify::Classifier;
use crate::config::DiscoveryConfig;
use crate::error::CoreError;
use crate::model::{DiscoveryMethod, NetworkDevice};
use crate::store::TopologyStore;
use crate::time::window_start;

/// Discovery counters. Totals only grow; online/offline track the
/// current split of registered devices.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DiscoveryStats {
    pub total_devices_discovered: u64,
    pub devices_online: u64,
    pub devices_offline: u64,
    pub connections_discovered: u64,
    pub last_discovery_run: Option<DateTime<Utc>>,
    pub discovery_run_duration: Duration,
    pub discovery_errors: u64,
}

#[derive(Default)]
struct RegistryState {
    devices: BTreeMap<String, NetworkDevice>,
    stats: DiscoveryStats,
}

pub struct DeviceRegistry {
    state: RwLock<RegistryState>,
    /// `None` when classification is disabled.
    classifier: Option<Classifier>,
    store: Arc<dyn TopologyStore>,
}

impl DeviceRegistry {
    pub fn new(store: Arc<dyn TopologyStore>, config: &DiscoveryConfig) -> Self {
        let classifier = config
            .enable_device_classification
            .then(|| Classifier::new(config.classification_rules.clone()));

        Self {
            state: RwLock::new(RegistryState::default()),
            classifier,
            store,
        }
    }

    // ── Sightings ────────────────────────────────────────────────────

    /// Merge a sighted record. Returns `true` if the device was new.
    pub async fn upsert(
        &self,
        device: NetworkDevice,
        source: DiscoveryMethod,
    ) -> Result<bool, CoreError> {
        self.upsert_at(device, source, Utc::now()).await
    }

    /// [`upsert`](Self::upsert) with an explicit clock reading.
    ///
    /// The incoming record replaces the stored one wholesale, except that
    /// `last_seen` keeps the later of the stored value and the sighting
    /// time (the record's own `last_seen`, or `now` if it has none).
    pub async fn upsert_at(
        &self,
        mut device: NetworkDevice,
        source: DiscoveryMethod,
        now: DateTime<Utc>,
    ) -> Result<bool, CoreError> {
        if device.device_id.trim().is_empty() {
            return Err(CoreError::validation("device ID cannot be empty"));
        }

        let mut state = self.state.write().await;
        let RegistryState { devices, stats } = &mut *state;

        let is_new = match devices.get(&device.device_id) {
            None => {
                device.last_seen = Some(now);
                stats.total_devices_discovered += 1;
                stats.devices_online += 1;
                info!(
                    device_id = %device.device_id,
                    device_type = %device.device_type,
                    %source,
                    "new device discovered"
                );
                true
            }
            Some(existing) => {
                let sighted_at = device.last_seen.unwrap_or(now);
                device.last_seen = existing.last_seen.max(Some(sighted_at));
                if !existing.online {
                    stats.devices_online += 1;
                    stats.devices_offline = stats.devices_offline.saturating_sub(1);
                    info!(device_id = %device.device_id, %source, "device back online");
                }
                false
            }
        };
        device.online = true;

        if let Some(classifier) = &self.classifier {
            classifier.classify(&mut device);
        }

        debug!(device_id = %device.device_id, %source, "sighting merged");
        devices.insert(device.device_id.clone(), device);
        Ok(is_new)
    }

    /// Operator-entered device: merged like any sighting, then persisted.
    ///
    /// The in-memory record is kept even if the write fails.
    pub async fn add_device(&self, device: NetworkDevice) -> Result<(), CoreError> {
        let device_id = device.device_id.clone();
        self.upsert(device, DiscoveryMethod::Manual).await?;

        let stored = self
            .get(&device_id)
            .await
            .ok_or_else(|| CoreError::Internal(format!("device {device_id} vanished after upsert")))?;

        if let Err(e) = self.store.save_device(&stored).await {
            warn!(device_id = %device_id, error = %e, "failed to save manually added device");
            self.record_error().await;
            return Err(e);
        }

        info!(device_id = %device_id, device_type = %stored.device_type, "manually added device");
        Ok(())
    }

    /// Seed from persisted records. Devices already sighted this session
    /// take precedence. Returns how many were loaded.
    pub async fn load_existing(&self, devices: Vec<NetworkDevice>) -> usize {
        let mut state = self.state.write().await;
        let RegistryState {
            devices: table,
            stats,
        } = &mut *state;

        let mut loaded = 0;
        for device in devices {
            if device.device_id.trim().is_empty() || table.contains_key(&device.device_id) {
                continue;
            }
            stats.total_devices_discovered += 1;
            if device.online {
                stats.devices_online += 1;
            } else {
                stats.devices_offline += 1;
            }
            table.insert(device.device_id.clone(), device);
            loaded += 1;
        }
        loaded
    }

    /// Seed from everything the store holds. Returns how many were loaded.
    pub async fn restore(&self) -> Result<usize, CoreError> {
        let devices = self.store.load_devices().await?;
        let loaded = self.load_existing(devices).await;
        info!(loaded, "restored devices from store");
        Ok(loaded)
    }

    // ── Reads ────────────────────────────────────────────────────────

    pub async fn get(&self, device_id: &str) -> Option<NetworkDevice> {
        self.state.read().await.devices.get(device_id).cloned()
    }

    /// All devices, ordered by id.
    pub async fn list(&self) -> Vec<NetworkDevice> {
        self.state.read().await.devices.values().cloned().collect()
    }

    pub async fn len(&self) -> usize {
        self.state.read().await.devices.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.state.read().await.devices.is_empty()
    }

    pub async fn stats(&self) -> DiscoveryStats {
        self.state.read().await.stats.clone()
    }

    // ── Transitions ──────────────────────────────────────────────────

    /// Flip every online device not seen within `timeout` to offline and
    /// persist the change. This is the only path that clears `online`.
    ///
    /// Returns the ids that went offline.
    pub async fn mark_timeouts(&self, now: DateTime<Utc>, timeout: Duration) -> Vec<String> {
        let Some(cutoff) = window_start(now, timeout) else {
            return Vec::new();
        };

        let expired: Vec<NetworkDevice> = {
            let mut state = self.state.write().await;
            let RegistryState { devices, stats } = &mut *state;

            let mut expired = Vec::new();
            for device in devices.values_mut() {
                if device.online && device.seen_before(cutoff) {
                    device.online = false;
                    stats.devices_online = stats.devices_online.saturating_sub(1);
                    stats.devices_offline += 1;
                    info!(device_id = %device.device_id, "device marked offline (timeout)");
                    expired.push(device.clone());
                }
            }
            expired
        };

        for device in &expired {
            if let Err(e) = self.store.save_device(device).await {
                warn!(device_id = %device.device_id, error = %e, "failed to save device offline status");
                self.record_error().await;
            }
        }

        expired.into_iter().map(|d| d.device_id).collect()
    }

    /// Drop a device entirely. Used by retention cleanup, which lives
    /// outside the online/offline state machine.
    pub async fn remove(&self, device_id: &str) -> Option<NetworkDevice> {
        let mut state = self.state.write().await;
        let RegistryState { devices, stats } = &mut *state;

        let removed = devices.remove(device_id)?;
        if removed.online {
            stats.devices_online = stats.devices_online.saturating_sub(1);
        } else {
            stats.devices_offline = stats.devices_offline.saturating_sub(1);
        }
        Some(removed)
    }

    // ── Bookkeeping for discovery cycles ─────────────────────────────

    pub(crate) async fn record_discovery_run(&self, started: DateTime<Utc>, took: Duration) {
        let mut state = self.state.write().await;
        state.stats.last_discovery_run = Some(started);
        state.stats.discovery_run_duration = took;
    }

    pub(crate) async fn record_connections(&self, count: usize) {
        let mut state = self.state.write().await;
        state.stats.connections_discovered = u64::try_from(count).unwrap_or(u64::MAX);
    }

    pub(crate) async fn record_error(&self) {
        self.state.write().await.stats.discovery_errors += 1;
    }
}
