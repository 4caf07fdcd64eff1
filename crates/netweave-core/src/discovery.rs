// ── Device discovery ──
//
// Drives the registry from two periodic cycles: the discovery cycle polls
// the configured sources and sweeps timeouts, the connection-scan cycle
// runs inference over the registry for the discovery counters. MQTT
// sightings arrive out of band through `process_discovery`.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::config::{DiscoveryConfig, InferenceConfig};
use crate::error::CoreError;
use crate::inference::ConnectionInference;
use crate::model::{Connection, DiscoveryMethod, NetworkDevice};
use crate::registry::{DeviceRegistry, DiscoveryStats};
use crate::scheduler::Scheduler;

/// A pollable channel that reports devices it can see.
///
/// Probing itself (ping sweeps, ARP or lease file parsing) lives in the
/// implementations; the core only schedules them and merges the results.
#[async_trait]
pub trait DiscoverySource: Send + Sync {
    /// Short label used in logs and errors.
    fn name(&self) -> &str;

    /// Recorded as the sighting source of every device this returns.
    fn method(&self) -> DiscoveryMethod;

    async fn discover(&self) -> Result<Vec<NetworkDevice>, CoreError>;
}

/// Cheaply cloneable handle; clones share one registry and one lifecycle.
#[derive(Clone)]
pub struct DeviceDiscovery {
    inner: Arc<DiscoveryInner>,
}

struct DiscoveryInner {
    config: DiscoveryConfig,
    registry: Arc<DeviceRegistry>,
    inference: ConnectionInference,
    sources: Vec<Arc<dyn DiscoverySource>>,
    /// `Some` while running.
    scheduler: Mutex<Option<Scheduler>>,
}

const COMPONENT: &str = "device discovery";

impl DeviceDiscovery {
    pub fn new(
        config: DiscoveryConfig,
        inference: InferenceConfig,
        registry: Arc<DeviceRegistry>,
        sources: Vec<Arc<dyn DiscoverySource>>,
    ) -> Self {
        Self {
            inner: Arc::new(DiscoveryInner {
                config,
                registry,
                inference: ConnectionInference::new(inference),
                sources,
                scheduler: Mutex::new(None),
            }),
        }
    }

    pub fn registry(&self) -> &Arc<DeviceRegistry> {
        &self.inner.registry
    }

    pub fn config(&self) -> &DiscoveryConfig {
        &self.inner.config
    }

    pub async fn stats(&self) -> DiscoveryStats {
        self.inner.registry.stats().await
    }

    pub async fn is_running(&self) -> bool {
        self.inner.scheduler.lock().await.is_some()
    }

    // ── Lifecycle ────────────────────────────────────────────────────

    /// Restore persisted devices and start both cycles.
    pub async fn start(&self) -> Result<(), CoreError> {
        let mut slot = self.inner.scheduler.lock().await;
        if slot.is_some() {
            return Err(CoreError::AlreadyRunning {
                component: COMPONENT,
            });
        }

        if let Err(e) = self.inner.registry.restore().await {
            warn!(error = %e, "failed to load existing devices");
        }

        let mut scheduler = Scheduler::new();

        let this = self.clone();
        scheduler.spawn_periodic("discovery", self.inner.config.discovery_interval, move || {
            let this = this.clone();
            async move { this.run_discovery().await }
        });

        let this = self.clone();
        scheduler.spawn_periodic(
            "connection-scan",
            self.inner.config.connection_scan_interval,
            move || {
                let this = this.clone();
                async move {
                    this.run_connection_scan().await;
                    Ok(())
                }
            },
        );

        *slot = Some(scheduler);
        info!(
            sources = self.inner.sources.len(),
            interval = ?self.inner.config.discovery_interval,
            "device discovery started"
        );
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
        info!("device discovery stopped");
        Ok(())
    }

    // ── Cycles ───────────────────────────────────────────────────────

    /// MQTT-sourced sighting. Returns whether the device was new.
    ///
    /// Rejected with [`CoreError::Processing`] while MQTT discovery is
    /// disabled.
    pub async fn process_discovery(&self, device: NetworkDevice) -> Result<bool, CoreError> {
        if !self.inner.config.enable_mqtt_discovery {
            debug!(device_id = %device.device_id, "mqtt discovery disabled, sighting dropped");
            return Err(CoreError::processing("mqtt discovery is disabled"));
        }
        self.inner
            .registry
            .upsert(device, DiscoveryMethod::Mqtt)
            .await
    }

    pub async fn run_discovery(&self) -> Result<(), CoreError> {
        self.run_discovery_at(Utc::now()).await
    }

    /// Poll every enabled source, merge what they report, then sweep
    /// timeouts. A failing source is counted and skipped.
    pub async fn run_discovery_at(&self, now: DateTime<Utc>) -> Result<(), CoreError> {
        let started = Instant::now();
        let registry = &self.inner.registry;

        for source in &self.inner.sources {
            if !self.method_enabled(source.method()) {
                continue;
            }
            let devices = match source.discover().await {
                Ok(devices) => devices,
                Err(e) => {
                    warn!(source = source.name(), error = %e, "discovery source failed");
                    registry.record_error().await;
                    continue;
                }
            };
            debug!(source = source.name(), found = devices.len(), "source polled");
            for device in devices {
                if let Err(e) = registry.upsert_at(device, source.method(), now).await {
                    warn!(source = source.name(), error = %e, "rejected sighting");
                    registry.record_error().await;
                }
            }
        }

        let expired = registry
            .mark_timeouts(now, self.inner.config.device_timeout)
            .await;
        registry.record_discovery_run(now, started.elapsed()).await;

        debug!(
            expired = expired.len(),
            took = ?started.elapsed(),
            "discovery cycle complete"
        );
        Ok(())
    }

    pub async fn run_connection_scan(&self) -> Vec<Connection> {
        self.run_connection_scan_at(Utc::now()).await
    }

    /// Infer over the current registry and record how many links exist.
    pub async fn run_connection_scan_at(&self, now: DateTime<Utc>) -> Vec<Connection> {
        let devices = self.inner.registry.list().await;
        let connections = self.inner.inference.infer(&devices, now);
        self.inner
            .registry
            .record_connections(connections.len())
            .await;
        debug!(connections = connections.len(), "connection scan complete");
        connections
    }

    fn method_enabled(&self, method: DiscoveryMethod) -> bool {
        let config = &self.inner.config;
        match method {
            DiscoveryMethod::Mqtt => config.enable_mqtt_discovery,
            DiscoveryMethod::NetworkScan => config.enable_network_scanning,
            DiscoveryMethod::ArpTable => config.enable_arp_table_scanning,
            DiscoveryMethod::DhcpLease => config.enable_dhcp_lease_scanning,
            DiscoveryMethod::Manual => true,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::model::{NetworkInterface, RouteEntry, RoutingInfo};
    use crate::store::MemoryStore;
    use std::time::Duration;
    use tokio_test::{assert_err, assert_ok};

    struct StaticSource {
        method: DiscoveryMethod,
        devices: Vec<NetworkDevice>,
    }

    #[async_trait]
    impl DiscoverySource for StaticSource {
        fn name(&self) -> &str {
            "static"
        }

        fn method(&self) -> DiscoveryMethod {
            self.method
        }

        async fn discover(&self) -> Result<Vec<NetworkDevice>, CoreError> {
            Ok(self.devices.clone())
        }
    }

    struct BrokenSource;

    #[async_trait]
    impl DiscoverySource for BrokenSource {
        fn name(&self) -> &str {
            "broken"
        }

        fn method(&self) -> DiscoveryMethod {
            DiscoveryMethod::ArpTable
        }

        async fn discover(&self) -> Result<Vec<NetworkDevice>, CoreError> {
            Err(CoreError::Discovery {
                source_name: "broken".into(),
                message: "arp table unreadable".into(),
            })
        }
    }

    fn discovery(config: DiscoveryConfig, sources: Vec<Arc<dyn DiscoverySource>>) -> DeviceDiscovery {
        let store = Arc::new(MemoryStore::new());
        let registry = Arc::new(DeviceRegistry::new(store, &config));
        DeviceDiscovery::new(config, InferenceConfig::default(), registry, sources)
    }

    fn at(secs: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(secs, 0).unwrap()
    }

    #[tokio::test]
    async fn only_enabled_sources_are_polled() {
        let scan = StaticSource {
            method: DiscoveryMethod::NetworkScan,
            devices: vec![NetworkDevice::new("scanned")],
        };
        let manual = StaticSource {
            method: DiscoveryMethod::Manual,
            devices: vec![NetworkDevice::new("manual")],
        };
        let sources: Vec<Arc<dyn DiscoverySource>> = vec![Arc::new(scan), Arc::new(manual)];
        let dd = discovery(DiscoveryConfig::default(), sources);

        dd.run_discovery_at(at(1_000)).await.unwrap();

        assert!(dd.registry().get("scanned").await.is_none());
        assert!(dd.registry().get("manual").await.is_some());
        let stats = dd.stats().await;
        assert_eq!(stats.last_discovery_run, Some(at(1_000)));
    }

    #[tokio::test]
    async fn failing_source_is_counted_and_skipped() {
        let config = DiscoveryConfig {
            enable_arp_table_scanning: true,
            ..DiscoveryConfig::default()
        };
        let good = StaticSource {
            method: DiscoveryMethod::ArpTable,
            devices: vec![NetworkDevice::new("ok")],
        };
        let sources: Vec<Arc<dyn DiscoverySource>> = vec![Arc::new(BrokenSource), Arc::new(good)];
        let dd = discovery(config, sources);

        dd.run_discovery_at(at(1_000)).await.unwrap();

        assert_eq!(dd.stats().await.discovery_errors, 1);
        assert!(dd.registry().get("ok").await.is_some());
    }

    #[tokio::test]
    async fn cycle_sweeps_timeouts() {
        let dd = discovery(DiscoveryConfig::default(), Vec::new());
        dd.registry()
            .upsert_at(NetworkDevice::new("old"), DiscoveryMethod::Mqtt, at(0))
            .await
            .unwrap();

        dd.run_discovery_at(at(10_000)).await.unwrap();

        assert!(!dd.registry().get("old").await.unwrap().online);
        assert_eq!(dd.stats().await.devices_offline, 1);
    }

    #[tokio::test]
    async fn connection_scan_records_count() {
        let dd = discovery(DiscoveryConfig::default(), Vec::new());
        let mut a = NetworkDevice::new("A");
        a.routing_info = Some(RoutingInfo {
            routes: vec![RouteEntry {
                destination: "0.0.0.0/0".into(),
                gateway: Some("10.0.0.1".parse().unwrap()),
                interface: "eth0".into(),
                metric: 0,
            }],
            ..RoutingInfo::default()
        });
        let b = NetworkDevice::new("B")
            .with_interface(NetworkInterface::new("lan0").with_address("10.0.0.1".parse().unwrap()));
        dd.process_discovery(a).await.unwrap();
        dd.process_discovery(b).await.unwrap();

        let conns = dd.run_connection_scan_at(at(5)).await;

        assert_eq!(conns.len(), 1);
        assert_eq!(dd.stats().await.connections_discovered, 1);
    }

    #[tokio::test]
    async fn mqtt_sightings_respect_the_method_switch() {
        let config = DiscoveryConfig {
            enable_mqtt_discovery: false,
            ..DiscoveryConfig::default()
        };
        let dd = discovery(config, Vec::new());

        let err = assert_err!(dd.process_discovery(NetworkDevice::new("r1")).await);
        assert!(matches!(err, CoreError::Processing { .. }));
        assert!(dd.registry().is_empty().await);
    }

    #[tokio::test]
    async fn lifecycle_misuse_is_reported() {
        let dd = discovery(DiscoveryConfig::default(), Vec::new());

        let err = assert_err!(dd.stop().await);
        assert!(matches!(err, CoreError::NotRunning { .. }));
        assert_ok!(dd.start().await);
        assert!(dd.is_running().await);
        let err = assert_err!(dd.start().await);
        assert!(matches!(err, CoreError::AlreadyRunning { .. }));
        assert_ok!(dd.stop().await);
        assert!(!dd.is_running().await);

        // Restartable after a clean stop.
        assert_ok!(dd.start().await);
        assert_ok!(dd.stop().await);
    }

    #[tokio::test(start_paused = true)]
    async fn running_discovery_marks_stale_devices_offline() {
        let config = DiscoveryConfig {
            discovery_interval: Duration::from_secs(60),
            ..DiscoveryConfig::default()
        };
        let dd = discovery(config, Vec::new());
        let mut stale = NetworkDevice::new("stale");
        stale.last_seen = Some(Utc::now() - chrono::TimeDelta::hours(1));
        dd.registry().load_existing(vec![NetworkDevice {
            online: true,
            ..stale
        }])
        .await;

        dd.start().await.unwrap();
        tokio::time::sleep(Duration::from_secs(61)).await;
        dd.stop().await.unwrap();

        assert!(!dd.registry().get("stale").await.unwrap().online);
    }
}
