// ── Runtime configuration ──
//
// These types describe how the registry, discovery cycles and topology
// manager behave. They never touch disk: `netweave-config` builds them
// from TOML + environment and hands them in.

use std::time::Duration;

use crate::classify::ClassificationRule;

/// Device discovery behaviour.
#[derive(Debug, Clone)]
#[allow(clippy::struct_excessive_bools)]
pub struct DiscoveryConfig {
    /// Period of the discovery cycle (sources + timeout sweep).
    pub discovery_interval: Duration,
    /// Period of the connection-scan cycle.
    pub connection_scan_interval: Duration,
    /// A device not seen for longer than this is marked offline.
    pub device_timeout: Duration,

    pub enable_mqtt_discovery: bool,
    pub enable_network_scanning: bool,
    pub enable_arp_table_scanning: bool,
    pub enable_dhcp_lease_scanning: bool,

    /// Only consumed by network-scan sources.
    pub network_ranges: Vec<String>,
    pub scan_ports: Vec<u16>,
    pub scan_timeout: Duration,

    pub enable_device_classification: bool,
    /// Evaluated in order; first full match wins.
    pub classification_rules: Vec<ClassificationRule>,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            discovery_interval: Duration::from_secs(60),
            connection_scan_interval: Duration::from_secs(120),
            device_timeout: Duration::from_secs(300),
            enable_mqtt_discovery: true,
            enable_network_scanning: false,
            enable_arp_table_scanning: false,
            enable_dhcp_lease_scanning: false,
            network_ranges: Vec::new(),
            scan_ports: Vec::new(),
            scan_timeout: Duration::from_secs(5),
            enable_device_classification: true,
            classification_rules: Vec::new(),
        }
    }
}

/// Which inference passes run each cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[allow(clippy::struct_excessive_bools)]
pub struct InferenceConfig {
    pub routing_tables: bool,
    pub bridge_tables: bool,
    pub dhcp_leases: bool,
}

impl Default for InferenceConfig {
    fn default() -> Self {
        Self {
            routing_tables: true,
            bridge_tables: true,
            dhcp_leases: false,
        }
    }
}

/// Topology manager behaviour for a single (tenant, site).
#[derive(Debug, Clone)]
#[allow(clippy::struct_excessive_bools)]
pub struct ManagerConfig {
    pub tenant: String,
    pub site: String,

    pub topology_update_interval: Duration,
    pub metrics_update_interval: Duration,
    pub cleanup_interval: Duration,

    pub connection_history_retention: Duration,
    pub metrics_retention: Duration,
    /// Offline devices not seen for this long are evicted.
    pub device_offline_retention: Duration,

    /// Refresh immediately after every successfully processed message.
    pub enable_real_time_updates: bool,
    pub enable_connection_inference: bool,
    pub enable_metrics_collection: bool,

    pub inference: InferenceConfig,
    pub discovery: DiscoveryConfig,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            tenant: "default".into(),
            site: "default".into(),
            topology_update_interval: Duration::from_secs(30),
            metrics_update_interval: Duration::from_secs(60),
            cleanup_interval: Duration::from_secs(3600),
            connection_history_retention: Duration::from_secs(24 * 3600),
            metrics_retention: Duration::from_secs(24 * 3600),
            device_offline_retention: Duration::from_secs(7 * 24 * 3600),
            enable_real_time_updates: false,
            enable_connection_inference: true,
            enable_metrics_collection: true,
            inference: InferenceConfig::default(),
            discovery: DiscoveryConfig::default(),
        }
    }
}
