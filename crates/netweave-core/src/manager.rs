// ── Topology manager ──
//
// Owns the live snapshot for one (tenant, site). Pulls devices from the
// registry, recomputes connections, persists the result and keeps the
// connection history and metrics samples that consumers query.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::ManagerConfig;
use crate::discovery::DeviceDiscovery;
use crate::error::CoreError;
use crate::identity::IdentityDirectory;
use crate::inference::ConnectionInference;
use crate::ingest::{Ingested, Ingestor};
use crate::model::{Connection, ConnectionType, NetworkDevice, TopologySnapshot};
use crate::registry::DiscoveryStats;
use crate::scheduler::Scheduler;
use crate::store::TopologyStore;
use crate::time::window_start;

/// A connection counts as active if seen within this window.
pub const ACTIVE_CONNECTION_WINDOW: Duration = Duration::from_secs(5 * 60);

const COMPONENT: &str = "topology manager";

// ── Statistics and history ───────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ManagerStats {
    pub total_devices: u64,
    pub online_devices: u64,
    pub offline_devices: u64,
    pub total_connections: u64,
    pub active_connections: u64,
    pub topology_updates: u64,
    pub connection_updates: u64,
    pub metrics_updates: u64,
    pub last_topology_update: Option<DateTime<Utc>>,
    pub processing_errors: u64,
    pub persistence_errors: u64,
    pub discovery: DiscoveryStats,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionChange {
    Appeared,
    Disappeared,
}

/// One entry in the connection history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConnectionEvent {
    pub connection_id: Uuid,
    pub from_device_id: String,
    pub to_device_id: String,
    pub connection_type: ConnectionType,
    pub change: ConnectionChange,
    pub at: DateTime<Utc>,
}

impl ConnectionEvent {
    fn new(connection: &Connection, change: ConnectionChange, at: DateTime<Utc>) -> Self {
        Self {
            connection_id: connection.id,
            from_device_id: connection.from_device_id.clone(),
            to_device_id: connection.to_device_id.clone(),
            connection_type: connection.connection_type.clone(),
            change,
            at,
        }
    }

    pub fn touches(&self, device_id: &str) -> bool {
        self.from_device_id == device_id || self.to_device_id == device_id
    }
}

/// Point-in-time topology counts taken by the metrics cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MetricsSample {
    pub at: DateTime<Utc>,
    pub total_devices: u64,
    pub online_devices: u64,
    pub offline_devices: u64,
    pub total_connections: u64,
    pub active_connections: u64,
}

// ── Manager ──────────────────────────────────────────────────────────

struct ManagerState {
    topology: TopologySnapshot,
    history: VecDeque<ConnectionEvent>,
    metrics: VecDeque<MetricsSample>,
    counters: ManagerStats,
}

struct ManagerInner {
    config: ManagerConfig,
    store: Arc<dyn TopologyStore>,
    discovery: DeviceDiscovery,
    ingestor: Ingestor,
    inference: ConnectionInference,
    state: RwLock<ManagerState>,
    /// Serializes snapshot writes; taken before `state`.
    persist: Mutex<()>,
    /// `Some` while running.
    scheduler: Mutex<Option<Scheduler>>,
}

/// Aggregator for one (tenant, site). Cheap to clone; clones share state.
#[derive(Clone)]
pub struct TopologyManager {
    inner: Arc<ManagerInner>,
}

impl TopologyManager {
    /// Load the persisted snapshot for the configured (tenant, site), or
    /// create and save an empty one.
    pub async fn new(
        config: ManagerConfig,
        store: Arc<dyn TopologyStore>,
        discovery: DeviceDiscovery,
    ) -> Result<Self, CoreError> {
        Self::with_identities(config, store, discovery, None).await
    }

    /// Like [`new`](Self::new), enriching sightings from `identities`.
    pub async fn with_identities(
        config: ManagerConfig,
        store: Arc<dyn TopologyStore>,
        discovery: DeviceDiscovery,
        identities: Option<Arc<dyn IdentityDirectory>>,
    ) -> Result<Self, CoreError> {
        let topology = match store.load_topology(&config.tenant, &config.site).await? {
            Some(topology) => {
                info!(
                    tenant = %config.tenant,
                    site = %config.site,
                    devices = topology.devices.len(),
                    connections = topology.connections.len(),
                    "loaded existing topology"
                );
                topology
            }
            None => {
                let topology = TopologySnapshot::empty(&config.tenant, &config.site, Utc::now());
                store.save_topology(&topology).await?;
                info!(tenant = %config.tenant, site = %config.site, "created empty topology");
                topology
            }
        };

        let ingestor = Ingestor::new(&config.tenant, &config.site, discovery.clone(), identities);
        let inference = ConnectionInference::new(config.inference);

        Ok(Self {
            inner: Arc::new(ManagerInner {
                config,
                store,
                discovery,
                ingestor,
                inference,
                state: RwLock::new(ManagerState {
                    topology,
                    history: VecDeque::new(),
                    metrics: VecDeque::new(),
                    counters: ManagerStats::default(),
                }),
                persist: Mutex::new(()),
                scheduler: Mutex::new(None),
            }),
        })
    }

    pub fn config(&self) -> &ManagerConfig {
        &self.inner.config
    }

    pub fn discovery(&self) -> &DeviceDiscovery {
        &self.inner.discovery
    }

    pub async fn is_running(&self) -> bool {
        self.inner.scheduler.lock().await.is_some()
    }

    // ── Lifecycle ────────────────────────────────────────────────────

    /// Start discovery, refresh once, then start the periodic cycles.
    pub async fn start(&self) -> Result<(), CoreError> {
        let mut slot = self.inner.scheduler.lock().await;
        if slot.is_some() {
            return Err(CoreError::AlreadyRunning {
                component: COMPONENT,
            });
        }

        self.inner.discovery.start().await?;

        if let Err(e) = self.refresh().await {
            warn!(error = %e, "initial topology refresh failed");
        }

        let config = &self.inner.config;
        let mut scheduler = Scheduler::new();

        let this = self.clone();
        scheduler.spawn_periodic("topology-refresh", config.topology_update_interval, move || {
            let this = this.clone();
            async move { this.refresh().await }
        });

        if config.enable_metrics_collection {
            let this = self.clone();
            scheduler.spawn_periodic("metrics", config.metrics_update_interval, move || {
                let this = this.clone();
                async move {
                    this.update_metrics().await;
                    Ok(())
                }
            });
        }

        let this = self.clone();
        scheduler.spawn_periodic("cleanup", config.cleanup_interval, move || {
            let this = this.clone();
            async move { this.run_cleanup(Utc::now()).await.map(|_| ()) }
        });

        *slot = Some(scheduler);
        info!(tenant = %config.tenant, site = %config.site, "topology manager started");
        Ok(())
    }

    pub async fn stop(&self) -> Result<(), CoreError> {
        let scheduler = self
            .inner
            .scheduler
            .lock()
            .await
            .take()
            .ok_or(CoreError::NotRunning {
                component: COMPONENT,
            })?;
        scheduler.shutdown().await;

        if let Err(e) = self.inner.discovery.stop().await {
            warn!(error = %e, "device discovery was not running");
        }

        info!("topology manager stopped");
        Ok(())
    }

    // ── Cycles ───────────────────────────────────────────────────────

    pub async fn refresh(&self) -> Result<(), CoreError> {
        self.refresh_at(Utc::now()).await
    }

    /// Merge the registry into the snapshot, recompute connections over
    /// the snapshot's device set and persist. If the save fails the
    /// in-memory snapshot stays committed.
    pub async fn refresh_at(&self, now: DateTime<Utc>) -> Result<(), CoreError> {
        let devices = self.inner.discovery.registry().list().await;

        // Held until the save completes so snapshots reach the store in
        // commit order.
        let _persist = self.inner.persist.lock().await;

        let snapshot = {
            let mut state = self.inner.state.write().await;
            let ManagerState {
                topology,
                history,
                counters,
                ..
            } = &mut *state;

            for device in devices {
                topology.devices.insert(device.device_id.clone(), device);
            }

            if self.inner.config.enable_connection_inference {
                let mut connections = self.inner.inference.infer(topology.devices.values(), now);
                let previous: HashMap<Uuid, &Connection> =
                    topology.connections.iter().map(|c| (c.id, c)).collect();

                for connection in &mut connections {
                    if let Some(old) = previous.get(&connection.id) {
                        connection.discovered = old.discovered;
                    } else {
                        history.push_back(ConnectionEvent::new(
                            connection,
                            ConnectionChange::Appeared,
                            now,
                        ));
                    }
                }
                let current: HashSet<Uuid> =
                    connections.iter().map(|c| c.id).collect();
                for gone in topology.connections.iter().filter(|c| !current.contains(&c.id)) {
                    history.push_back(ConnectionEvent::new(gone, ConnectionChange::Disappeared, now));
                }

                topology.connections = connections;
                counters.connection_updates += 1;
            }

            topology.updated_at = now;
            counters.topology_updates += 1;
            counters.last_topology_update = Some(now);
            topology.clone()
        };

        if let Err(e) = self.inner.store.save_topology(&snapshot).await {
            warn!(error = %e, "failed to save topology");
            self.inner.state.write().await.counters.persistence_errors += 1;
            return Err(e);
        }

        debug!(
            devices = snapshot.devices.len(),
            connections = snapshot.connections.len(),
            "topology refreshed"
        );
        Ok(())
    }

    pub async fn update_metrics(&self) -> MetricsSample {
        self.update_metrics_at(Utc::now()).await
    }

    /// Take a metrics sample and append it to the history.
    pub async fn update_metrics_at(&self, now: DateTime<Utc>) -> MetricsSample {
        let mut state = self.inner.state.write().await;
        let sample = sample(&state.topology, now);
        state.metrics.push_back(sample.clone());
        state.counters.metrics_updates += 1;
        debug!(
            devices = sample.total_devices,
            online = sample.online_devices,
            connections = sample.total_connections,
            "metrics sampled"
        );
        sample
    }

    /// Evict offline devices past the offline retention window (from the
    /// snapshot and the registry) and prune history and metrics past
    /// theirs. Returns the evicted ids.
    pub async fn run_cleanup(&self, now: DateTime<Utc>) -> Result<Vec<String>, CoreError> {
        let config = &self.inner.config;
        let device_cutoff = window_start(now, config.device_offline_retention);
        let history_cutoff = window_start(now, config.connection_history_retention);
        let metrics_cutoff = window_start(now, config.metrics_retention);

        let _persist = self.inner.persist.lock().await;

        let (evicted, snapshot) = {
            let mut state = self.inner.state.write().await;
            let ManagerState {
                topology,
                history,
                metrics,
                ..
            } = &mut *state;

            let evicted: Vec<String> = device_cutoff
                .map(|cutoff| {
                    topology
                        .devices
                        .values()
                        .filter(|d| !d.online && d.seen_before(cutoff))
                        .map(|d| d.device_id.clone())
                        .collect()
                })
                .unwrap_or_default();

            for id in &evicted {
                topology.devices.remove(id);
            }
            if !evicted.is_empty() {
                topology
                    .connections
                    .retain(|c| !evicted.iter().any(|id| c.touches(id)));
            }

            if let Some(cutoff) = history_cutoff {
                history.retain(|e| e.at >= cutoff);
            }
            if let Some(cutoff) = metrics_cutoff {
                metrics.retain(|s| s.at >= cutoff);
            }

            let snapshot = (!evicted.is_empty()).then(|| topology.clone());
            (evicted, snapshot)
        };

        let registry = self.inner.discovery.registry();
        for id in &evicted {
            // A sighting may have revived the device since the snapshot
            // was taken; leave those alone.
            if registry.get(id).await.is_some_and(|d| !d.online) {
                registry.remove(id).await;
            }
            info!(device_id = %id, "evicted offline device");
        }

        if let Some(snapshot) = snapshot {
            if let Err(e) = self.inner.store.save_topology(&snapshot).await {
                warn!(error = %e, "failed to save topology after cleanup");
                self.inner.state.write().await.counters.persistence_errors += 1;
                return Err(e);
            }
        }

        Ok(evicted)
    }

    // ── Ingestion ────────────────────────────────────────────────────

    /// Feed one agent message through ingestion.
    ///
    /// Every failure is reported as [`CoreError::Processing`] and counted.
    pub async fn process_message(&self, topic: &str, payload: &[u8]) -> Result<Ingested, CoreError> {
        let outcome = match self.inner.ingestor.ingest(topic, payload).await {
            Ok(outcome) => outcome,
            Err(e) => {
                self.inner.state.write().await.counters.processing_errors += 1;
                warn!(topic, error = %e, "failed to process message");
                return Err(match e {
                    e @ CoreError::Processing { .. } => e,
                    other => CoreError::processing(other.to_string()),
                });
            }
        };

        if self.inner.config.enable_real_time_updates {
            let this = self.clone();
            tokio::spawn(async move {
                if let Err(e) = this.refresh().await {
                    warn!(error = %e, "real-time topology refresh failed");
                }
            });
        }

        Ok(outcome)
    }

    /// Register an operator-entered device and refresh immediately.
    pub async fn add_device(&self, device: NetworkDevice) -> Result<(), CoreError> {
        self.inner.discovery.registry().add_device(device).await?;
        self.refresh().await
    }

    // ── Queries ──────────────────────────────────────────────────────

    pub async fn get_topology(&self) -> TopologySnapshot {
        self.inner.state.read().await.topology.clone()
    }

    pub async fn get_device(&self, device_id: &str) -> Result<NetworkDevice, CoreError> {
        self.inner
            .state
            .read()
            .await
            .topology
            .devices
            .get(device_id)
            .cloned()
            .ok_or_else(|| CoreError::DeviceNotFound {
                identifier: device_id.to_owned(),
            })
    }

    /// Connections with `device_id` at either end.
    pub async fn get_connections(&self, device_id: &str) -> Vec<Connection> {
        self.inner
            .state
            .read()
            .await
            .topology
            .connections_for(device_id)
            .cloned()
            .collect()
    }

    /// History entries with `device_id` at either end, oldest first.
    pub async fn get_connection_history(&self, device_id: &str) -> Vec<ConnectionEvent> {
        self.inner
            .state
            .read()
            .await
            .history
            .iter()
            .filter(|e| e.touches(device_id))
            .cloned()
            .collect()
    }

    pub async fn get_metrics_history(&self) -> Vec<MetricsSample> {
        self.inner.state.read().await.metrics.iter().cloned().collect()
    }

    pub async fn get_stats(&self) -> ManagerStats {
        self.stats_at(Utc::now()).await
    }

    pub async fn stats_at(&self, now: DateTime<Utc>) -> ManagerStats {
        let discovery = self.inner.discovery.stats().await;
        let state = self.inner.state.read().await;
        let current = sample(&state.topology, now);

        ManagerStats {
            total_devices: current.total_devices,
            online_devices: current.online_devices,
            offline_devices: current.offline_devices,
            total_connections: current.total_connections,
            active_connections: current.active_connections,
            discovery,
            ..state.counters.clone()
        }
    }
}

fn count(n: usize) -> u64 {
    u64::try_from(n).unwrap_or(u64::MAX)
}

fn sample(topology: &TopologySnapshot, now: DateTime<Utc>) -> MetricsSample {
    let online = topology.devices.values().filter(|d| d.online).count();
    let active = window_start(now, ACTIVE_CONNECTION_WINDOW).map_or(0, |cutoff| {
        topology
            .connections
            .iter()
            .filter(|c| c.last_seen >= cutoff)
            .count()
    });

    MetricsSample {
        at: now,
        total_devices: count(topology.devices.len()),
        online_devices: count(online),
        offline_devices: count(topology.devices.len() - online),
        total_connections: count(topology.connections.len()),
        active_connections: count(active),
    }
}
