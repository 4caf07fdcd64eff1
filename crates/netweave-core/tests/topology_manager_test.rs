#![allow(clippy::unwrap_used)]

// End-to-end behaviour of the topology pipeline: sightings in, snapshot
// and connections out, with the periodic cycles driven on paused time.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use pretty_assertions::assert_eq;

use netweave_core::{
    ConnectionChange, ConnectionType, CoreError, DeviceDiscovery, DeviceRegistry, DiscoveryMethod,
    IdentityDirectory, ManagerConfig, MemoryIdentityDirectory, MemoryStore, NetworkDevice,
    NetworkInterface, RouteEntry, RoutingInfo, TopologyManager, TopologySnapshot, TopologyStore,
};

// ── Helpers ──────────────────────────────────────────────────────────

struct Harness {
    manager: TopologyManager,
    store: Arc<MemoryStore>,
}

impl Harness {
    async fn new(config: ManagerConfig) -> Self {
        let store = Arc::new(MemoryStore::new());
        Self::with_store(config, store).await
    }

    async fn with_store(config: ManagerConfig, store: Arc<MemoryStore>) -> Self {
        let registry = Arc::new(DeviceRegistry::new(store.clone(), &config.discovery));
        let discovery = DeviceDiscovery::new(
            config.discovery.clone(),
            config.inference,
            registry,
            Vec::new(),
        );
        let identities: Arc<dyn IdentityDirectory> = Arc::new(MemoryIdentityDirectory::new());
        let manager =
            TopologyManager::with_identities(config, store.clone(), discovery, Some(identities))
                .await
                .unwrap();
        Self { manager, store }
    }

    fn registry(&self) -> &Arc<DeviceRegistry> {
        self.manager.discovery().registry()
    }
}

fn at(secs: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(secs, 0).unwrap()
}

fn router_with_gateway(id: &str, gateway: &str) -> NetworkDevice {
    let mut device = NetworkDevice::new(id);
    device.routing_info = Some(RoutingInfo {
        routes: vec![RouteEntry {
            destination: "0.0.0.0/0".into(),
            gateway: Some(gateway.parse().unwrap()),
            interface: "eth0".into(),
            metric: 0,
        }],
        ..RoutingInfo::default()
    });
    device
}

fn host_with_address(id: &str, iface: &str, address: &str) -> NetworkDevice {
    NetworkDevice::new(id)
        .with_interface(NetworkInterface::new(iface).with_address(address.parse().unwrap()))
}

// ── Scenarios ────────────────────────────────────────────────────────

#[tokio::test]
async fn route_evidence_yields_single_connection() {
    let h = Harness::new(ManagerConfig::default()).await;
    h.registry()
        .upsert(router_with_gateway("A", "10.0.0.1"), DiscoveryMethod::Mqtt)
        .await
        .unwrap();
    h.registry()
        .upsert(host_with_address("B", "lan0", "10.0.0.1"), DiscoveryMethod::Mqtt)
        .await
        .unwrap();

    h.manager.refresh().await.unwrap();

    let topo = h.manager.get_topology().await;
    assert_eq!(topo.connections.len(), 1);
    let conn = &topo.connections[0];
    assert_eq!(
        (conn.from_device_id.as_str(), conn.to_device_id.as_str()),
        ("A", "B")
    );
    assert_eq!(conn.connection_type, ConnectionType::Route);
    assert_eq!(conn.from_interface, "eth0");
    assert_eq!(conn.to_interface, "lan0");

    assert_eq!(h.manager.get_connections("B").await.len(), 1);
    assert!(h.manager.get_connections("C").await.is_empty());
}

#[tokio::test]
async fn snapshot_round_trips_through_store() {
    let h = Harness::new(ManagerConfig::default()).await;
    for device in [
        router_with_gateway("A", "10.0.0.1"),
        host_with_address("B", "lan0", "10.0.0.1"),
        NetworkDevice::new("C"),
    ] {
        h.registry().upsert(device, DiscoveryMethod::Mqtt).await.unwrap();
    }
    h.manager.refresh().await.unwrap();

    let saved = h.store.load_topology("default", "default").await.unwrap().unwrap();
    assert_eq!(saved.devices.len(), 3);
    assert_eq!(saved.connections.len(), 1);
    assert_eq!(saved, h.manager.get_topology().await);
}

#[tokio::test]
async fn existing_snapshot_is_loaded_on_construction() {
    let store = Arc::new(MemoryStore::new());
    {
        let h = Harness::with_store(ManagerConfig::default(), store.clone()).await;
        h.manager.add_device(NetworkDevice::new("persisted")).await.unwrap();
    }

    let h = Harness::with_store(ManagerConfig::default(), store).await;
    assert!(h.manager.get_device("persisted").await.is_ok());
}

#[tokio::test]
async fn restored_snapshot_keeps_its_connections_on_refresh() {
    let store = Arc::new(MemoryStore::new());
    let mut persisted = TopologySnapshot::empty("default", "default", Utc::now());
    for device in [
        router_with_gateway("A", "10.0.0.1"),
        host_with_address("B", "lan0", "10.0.0.1"),
    ] {
        persisted.devices.insert(device.device_id.clone(), device);
    }
    store.save_topology(&persisted).await.unwrap();

    let h = Harness::with_store(ManagerConfig::default(), store).await;
    assert!(h.registry().is_empty().await);

    h.manager.refresh().await.unwrap();

    let topo = h.manager.get_topology().await;
    assert_eq!(topo.devices.len(), 2);
    assert_eq!(topo.connections.len(), 1);
    assert_eq!(topo.connections[0].from_device_id, "A");
    assert_eq!(topo.connections[0].to_device_id, "B");
}

/// Delays the second topology write so a later refresh can race it.
struct SlowSecondWrite {
    inner: MemoryStore,
    writes: AtomicUsize,
}

#[async_trait]
impl TopologyStore for SlowSecondWrite {
    async fn save_device(&self, device: &NetworkDevice) -> Result<(), CoreError> {
        self.inner.save_device(device).await
    }

    async fn save_topology(&self, topology: &TopologySnapshot) -> Result<(), CoreError> {
        let snapshot = topology.clone();
        if self.writes.fetch_add(1, Ordering::SeqCst) == 1 {
            tokio::time::sleep(Duration::from_secs(5)).await;
        }
        self.inner.save_topology(&snapshot).await
    }

    async fn load_topology(
        &self,
        tenant: &str,
        site: &str,
    ) -> Result<Option<TopologySnapshot>, CoreError> {
        self.inner.load_topology(tenant, site).await
    }

    async fn load_devices(&self) -> Result<Vec<NetworkDevice>, CoreError> {
        self.inner.load_devices().await
    }
}

#[tokio::test(start_paused = true)]
async fn overlapping_refreshes_persist_latest_snapshot() {
    let store = Arc::new(SlowSecondWrite {
        inner: MemoryStore::new(),
        writes: AtomicUsize::new(0),
    });
    let config = ManagerConfig::default();
    let registry = Arc::new(DeviceRegistry::new(store.clone(), &config.discovery));
    let discovery = DeviceDiscovery::new(
        config.discovery.clone(),
        config.inference,
        registry.clone(),
        Vec::new(),
    );
    let manager = TopologyManager::new(config, store.clone(), discovery).await.unwrap();

    registry
        .upsert(NetworkDevice::new("a"), DiscoveryMethod::Mqtt)
        .await
        .unwrap();
    let first = tokio::spawn({
        let manager = manager.clone();
        async move { manager.refresh().await }
    });
    tokio::task::yield_now().await;

    registry
        .upsert(NetworkDevice::new("b"), DiscoveryMethod::Mqtt)
        .await
        .unwrap();
    manager.refresh().await.unwrap();
    first.await.unwrap().unwrap();

    let persisted = store.load_topology("default", "default").await.unwrap().unwrap();
    assert_eq!(manager.get_topology().await.devices.len(), 2);
    assert_eq!(persisted.devices.len(), 2);
}

#[tokio::test]
async fn timed_out_device_is_offline_in_next_snapshot() {
    let h = Harness::new(ManagerConfig::default()).await;
    let now = Utc::now();
    h.registry()
        .upsert_at(
            NetworkDevice::new("r1"),
            DiscoveryMethod::Mqtt,
            now - TimeDelta::minutes(10),
        )
        .await
        .unwrap();
    let before = h.manager.get_stats().await.discovery;

    h.manager.discovery().run_discovery_at(now).await.unwrap();
    h.manager.refresh_at(now).await.unwrap();

    let after = h.manager.get_stats().await;
    assert_eq!(after.discovery.devices_offline, before.devices_offline + 1);
    assert_eq!(after.discovery.devices_online, before.devices_online - 1);
    assert!(!h.manager.get_device("r1").await.unwrap().online);
    assert_eq!(after.offline_devices, 1);
}

#[tokio::test]
async fn cleanup_evicts_only_past_retention() {
    let config = ManagerConfig {
        device_offline_retention: Duration::from_secs(3600),
        ..ManagerConfig::default()
    };
    let h = Harness::new(config).await;
    let now = at(1_000_000);

    h.registry()
        .upsert_at(NetworkDevice::new("gone"), DiscoveryMethod::Mqtt, now - TimeDelta::hours(2))
        .await
        .unwrap();
    h.registry()
        .upsert_at(
            NetworkDevice::new("recent"),
            DiscoveryMethod::Mqtt,
            now - TimeDelta::minutes(30),
        )
        .await
        .unwrap();
    h.registry().mark_timeouts(now, Duration::from_secs(300)).await;
    h.manager.refresh_at(now).await.unwrap();

    let evicted = h.manager.run_cleanup(now).await.unwrap();

    assert_eq!(evicted, ["gone"]);
    assert!(h.manager.get_device("gone").await.is_err());
    assert!(h.manager.get_device("recent").await.is_ok());

    // Evicted devices do not come back on the next refresh.
    h.manager.refresh_at(now).await.unwrap();
    assert!(h.manager.get_device("gone").await.is_err());
}

#[tokio::test]
async fn connection_history_tracks_appearance_and_loss() {
    let h = Harness::new(ManagerConfig::default()).await;
    h.registry()
        .upsert(router_with_gateway("A", "10.0.0.1"), DiscoveryMethod::Mqtt)
        .await
        .unwrap();
    h.registry()
        .upsert(host_with_address("B", "lan0", "10.0.0.1"), DiscoveryMethod::Mqtt)
        .await
        .unwrap();
    h.manager.refresh_at(at(100)).await.unwrap();

    // B renumbers; the route no longer resolves.
    h.registry()
        .upsert(host_with_address("B", "lan0", "10.0.0.9"), DiscoveryMethod::Mqtt)
        .await
        .unwrap();
    h.manager.refresh_at(at(200)).await.unwrap();

    let changes: Vec<_> = h
        .manager
        .get_connection_history("A")
        .await
        .into_iter()
        .map(|e| (e.change, e.at))
        .collect();
    assert_eq!(
        changes,
        [
            (ConnectionChange::Appeared, at(100)),
            (ConnectionChange::Disappeared, at(200)),
        ]
    );
}

#[tokio::test]
async fn process_message_counts_failures() {
    let h = Harness::new(ManagerConfig::default()).await;

    let err = h
        .manager
        .process_message("rtk/v1/default/default/r1/topology/discovery", b"[")
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::Processing { .. }));

    let err = h
        .manager
        .process_message("rtk/v1/default/default/r1/telemetry/wifi_clients", b"{}")
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::Processing { .. }));

    assert_eq!(h.manager.get_stats().await.processing_errors, 2);
}

#[tokio::test]
async fn discovery_message_reaches_the_snapshot() {
    let h = Harness::new(ManagerConfig::default()).await;
    let payload = br#"{"timestamp": 1700000000000, "device_id": "ap1", "device_info": {"device_type": "ap"}}"#;

    h.manager
        .process_message("rtk/v1/default/default/ap1/topology/discovery", payload)
        .await
        .unwrap();
    h.manager.refresh().await.unwrap();

    let ap1 = h.manager.get_device("ap1").await.unwrap();
    assert_eq!(ap1.device_type, "ap");
    assert!(ap1.online);
}

#[tokio::test]
async fn add_device_refreshes_and_reports_persistence_failure() {
    let h = Harness::new(ManagerConfig::default()).await;
    h.manager.add_device(NetworkDevice::new("m1")).await.unwrap();
    assert!(h.manager.get_device("m1").await.is_ok());

    h.store.set_fail_writes(true);
    let err = h.manager.add_device(NetworkDevice::new("m2")).await.unwrap_err();
    assert!(matches!(err, CoreError::Persistence { .. }));
    assert!(h.registry().get("m2").await.is_some());

    let err = h
        .manager
        .add_device(NetworkDevice::new(""))
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::Validation { .. }));
}

// ── Lifecycle ────────────────────────────────────────────────────────

#[tokio::test]
async fn start_stop_misuse_is_reported() {
    let h = Harness::new(ManagerConfig::default()).await;

    assert!(matches!(
        h.manager.stop().await,
        Err(CoreError::NotRunning { .. })
    ));

    h.manager.start().await.unwrap();
    assert!(h.manager.is_running().await);
    assert!(h.manager.discovery().is_running().await);
    assert!(matches!(
        h.manager.start().await,
        Err(CoreError::AlreadyRunning { .. })
    ));

    h.manager.stop().await.unwrap();
    assert!(!h.manager.is_running().await);
    assert!(!h.manager.discovery().is_running().await);
}

#[tokio::test]
async fn start_fails_when_discovery_already_running() {
    let h = Harness::new(ManagerConfig::default()).await;
    h.manager.discovery().start().await.unwrap();

    let err = h.manager.start().await.unwrap_err();

    assert!(matches!(err, CoreError::AlreadyRunning { .. }));
    assert!(!h.manager.is_running().await);
    h.manager.discovery().stop().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn periodic_refresh_and_metrics_run_while_started() {
    let config = ManagerConfig {
        topology_update_interval: Duration::from_secs(30),
        metrics_update_interval: Duration::from_secs(60),
        ..ManagerConfig::default()
    };
    let h = Harness::new(config).await;
    h.manager.start().await.unwrap();
    let initial = h.manager.get_stats().await.topology_updates;

    h.registry()
        .upsert(NetworkDevice::new("late"), DiscoveryMethod::Mqtt)
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_secs(125)).await;

    let stats = h.manager.get_stats().await;
    assert_eq!(stats.topology_updates, initial + 4);
    assert_eq!(stats.metrics_updates, 2);
    assert!(h.manager.get_device("late").await.is_ok());

    h.manager.stop().await.unwrap();
    tokio::time::sleep(Duration::from_secs(300)).await;
    assert_eq!(h.manager.get_stats().await.topology_updates, initial + 4);
}

#[tokio::test(start_paused = true)]
async fn real_time_updates_refresh_after_messages() {
    let config = ManagerConfig {
        enable_real_time_updates: true,
        ..ManagerConfig::default()
    };
    let h = Harness::new(config).await;

    h.manager
        .process_message(
            "rtk/v1/default/default/sw1/topology/discovery",
            br#"{"device_id": "sw1"}"#,
        )
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(10)).await;

    assert!(h.manager.get_device("sw1").await.is_ok());
}
