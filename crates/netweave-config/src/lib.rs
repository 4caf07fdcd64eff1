//! Configuration for the netweave daemon.
//!
//! Layered TOML + environment loading, validation, and translation to
//! `netweave_core::ManagerConfig`.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use netweave_core::{ClassificationRule, DiscoveryConfig, InferenceConfig, ManagerConfig};

/// Overrides the config file location.
pub const CONFIG_PATH_ENV: &str = "NETWEAVE_CONFIG";

const ENV_PREFIX: &str = "NETWEAVE_";

// ── Error ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("failed to serialize config: {0}")]
    Serialization(#[from] toml::ser::Error),

    #[error("config loading failed: {0}")]
    Figment(Box<figment::Error>),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Figment(Box::new(err))
    }
}

fn invalid(field: impl Into<String>, reason: impl Into<String>) -> ConfigError {
    ConfigError::Validation {
        field: field.into(),
        reason: reason.into(),
    }
}

// ── TOML config structs ─────────────────────────────────────────────

/// Top-level daemon configuration.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub site: SiteSection,

    #[serde(default)]
    pub discovery: DiscoverySection,

    #[serde(default)]
    pub classification: ClassificationSection,

    #[serde(default)]
    pub topology: TopologySection,
}

/// Which (tenant, site) this daemon manages.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct SiteSection {
    #[serde(default = "default_name")]
    pub tenant: String,

    #[serde(default = "default_name")]
    pub site: String,
}

impl Default for SiteSection {
    fn default() -> Self {
        Self {
            tenant: default_name(),
            site: default_name(),
        }
    }
}

fn default_name() -> String {
    "default".into()
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[allow(clippy::struct_excessive_bools)]
pub struct DiscoverySection {
    #[serde(default = "default_discovery_interval")]
    pub interval_secs: u64,

    #[serde(default = "default_scan_interval")]
    pub connection_scan_interval_secs: u64,

    /// Devices silent for longer than this go offline.
    #[serde(default = "default_device_timeout")]
    pub device_timeout_secs: u64,

    #[serde(default = "default_true")]
    pub mqtt: bool,

    #[serde(default)]
    pub network_scanning: bool,

    #[serde(default)]
    pub arp_table: bool,

    #[serde(default)]
    pub dhcp_leases: bool,

    /// CIDR ranges for network-scan sources.
    #[serde(default)]
    pub network_ranges: Vec<String>,

    #[serde(default)]
    pub scan_ports: Vec<u16>,

    #[serde(default = "default_scan_timeout")]
    pub scan_timeout_secs: u64,
}

impl Default for DiscoverySection {
    fn default() -> Self {
        Self {
            interval_secs: default_discovery_interval(),
            connection_scan_interval_secs: default_scan_interval(),
            device_timeout_secs: default_device_timeout(),
            mqtt: true,
            network_scanning: false,
            arp_table: false,
            dhcp_leases: false,
            network_ranges: Vec::new(),
            scan_ports: Vec::new(),
            scan_timeout_secs: default_scan_timeout(),
        }
    }
}

fn default_discovery_interval() -> u64 {
    60
}
fn default_scan_interval() -> u64 {
    120
}
fn default_device_timeout() -> u64 {
    300
}
fn default_scan_timeout() -> u64 {
    5
}
fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ClassificationSection {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Evaluated in file order.
    #[serde(default)]
    pub rules: Vec<ClassificationRule>,
}

impl Default for ClassificationSection {
    fn default() -> Self {
        Self {
            enabled: true,
            rules: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[allow(clippy::struct_excessive_bools)]
pub struct TopologySection {
    #[serde(default = "default_update_interval")]
    pub update_interval_secs: u64,

    #[serde(default = "default_metrics_interval")]
    pub metrics_interval_secs: u64,

    #[serde(default = "default_cleanup_interval")]
    pub cleanup_interval_secs: u64,

    #[serde(default = "default_day_hours")]
    pub connection_history_retention_hours: u64,

    #[serde(default = "default_day_hours")]
    pub metrics_retention_hours: u64,

    #[serde(default = "default_offline_retention")]
    pub device_offline_retention_hours: u64,

    #[serde(default)]
    pub real_time_updates: bool,

    #[serde(default = "default_true")]
    pub connection_inference: bool,

    #[serde(default = "default_true")]
    pub metrics_collection: bool,

    #[serde(default = "default_true")]
    pub infer_from_routing: bool,

    #[serde(default = "default_true")]
    pub infer_from_bridges: bool,

    #[serde(default)]
    pub infer_from_dhcp_leases: bool,
}

impl Default for TopologySection {
    fn default() -> Self {
        Self {
            update_interval_secs: default_update_interval(),
            metrics_interval_secs: default_metrics_interval(),
            cleanup_interval_secs: default_cleanup_interval(),
            connection_history_retention_hours: default_day_hours(),
            metrics_retention_hours: default_day_hours(),
            device_offline_retention_hours: default_offline_retention(),
            real_time_updates: false,
            connection_inference: true,
            metrics_collection: true,
            infer_from_routing: true,
            infer_from_bridges: true,
            infer_from_dhcp_leases: false,
        }
    }
}

fn default_update_interval() -> u64 {
    30
}
fn default_metrics_interval() -> u64 {
    60
}
fn default_cleanup_interval() -> u64 {
    3600
}
fn default_day_hours() -> u64 {
    24
}
fn default_offline_retention() -> u64 {
    7 * 24
}

// ── Config file path ────────────────────────────────────────────────

/// `$NETWEAVE_CONFIG` if set, else the platform config directory.
pub fn config_path() -> PathBuf {
    if let Some(path) = std::env::var_os(CONFIG_PATH_ENV) {
        return PathBuf::from(path);
    }
    ProjectDirs::from("io", "netweave", "netweave").map_or_else(
        || PathBuf::from("netweave.toml"),
        |dirs| dirs.config_dir().join("config.toml"),
    )
}

// ── Config loading ──────────────────────────────────────────────────

/// Load and validate from the default path + environment.
pub fn load_config() -> Result<Config, ConfigError> {
    load_config_from(&config_path())
}

/// Load and validate from `path` + environment. A missing file is not an
/// error; defaults apply.
pub fn load_config_from(path: &Path) -> Result<Config, ConfigError> {
    let figment = Figment::new()
        .merge(Serialized::defaults(Config::default()))
        .merge(Toml::file(path))
        .merge(Env::prefixed(ENV_PREFIX).ignore(&["config"]).split("__"));

    let config: Config = figment.extract()?;
    config.validate()?;
    Ok(config)
}

/// Parse and validate a TOML document without touching the environment.
pub fn parse_config(toml_text: &str) -> Result<Config, ConfigError> {
    let config: Config = Figment::new()
        .merge(Serialized::defaults(Config::default()))
        .merge(Toml::string(toml_text))
        .extract()?;
    config.validate()?;
    Ok(config)
}

impl Config {
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Reject settings the daemon could not run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.site.tenant.trim().is_empty() {
            return Err(invalid("site.tenant", "must not be empty"));
        }
        if self.site.site.trim().is_empty() {
            return Err(invalid("site.site", "must not be empty"));
        }

        let intervals = [
            ("discovery.interval_secs", self.discovery.interval_secs),
            (
                "discovery.connection_scan_interval_secs",
                self.discovery.connection_scan_interval_secs,
            ),
            ("discovery.device_timeout_secs", self.discovery.device_timeout_secs),
            ("topology.update_interval_secs", self.topology.update_interval_secs),
            ("topology.cleanup_interval_secs", self.topology.cleanup_interval_secs),
        ];
        for (field, value) in intervals {
            if value == 0 {
                return Err(invalid(field, "must be greater than zero"));
            }
        }
        if self.topology.metrics_collection && self.topology.metrics_interval_secs == 0 {
            return Err(invalid(
                "topology.metrics_interval_secs",
                "must be greater than zero while metrics collection is on",
            ));
        }

        let mut seen = HashSet::new();
        for (i, rule) in self.classification.rules.iter().enumerate() {
            let field = format!("classification.rules[{i}]");
            if rule.id.trim().is_empty() {
                return Err(invalid(field, "rule id must not be empty"));
            }
            if !seen.insert(rule.id.as_str()) {
                return Err(invalid(field, format!("duplicate rule id '{}'", rule.id)));
            }
            rule.validate().map_err(|e| invalid(field, e.to_string()))?;
        }

        Ok(())
    }

    /// Build the runtime configuration the topology manager consumes.
    pub fn into_manager_config(self) -> ManagerConfig {
        let discovery = DiscoveryConfig {
            discovery_interval: secs(self.discovery.interval_secs),
            connection_scan_interval: secs(self.discovery.connection_scan_interval_secs),
            device_timeout: secs(self.discovery.device_timeout_secs),
            enable_mqtt_discovery: self.discovery.mqtt,
            enable_network_scanning: self.discovery.network_scanning,
            enable_arp_table_scanning: self.discovery.arp_table,
            enable_dhcp_lease_scanning: self.discovery.dhcp_leases,
            network_ranges: self.discovery.network_ranges,
            scan_ports: self.discovery.scan_ports,
            scan_timeout: secs(self.discovery.scan_timeout_secs),
            enable_device_classification: self.classification.enabled,
            classification_rules: self.classification.rules,
        };

        let topology = self.topology;
        ManagerConfig {
            tenant: self.site.tenant,
            site: self.site.site,
            topology_update_interval: secs(topology.update_interval_secs),
            metrics_update_interval: secs(topology.metrics_interval_secs),
            cleanup_interval: secs(topology.cleanup_interval_secs),
            connection_history_retention: hours(topology.connection_history_retention_hours),
            metrics_retention: hours(topology.metrics_retention_hours),
            device_offline_retention: hours(topology.device_offline_retention_hours),
            enable_real_time_updates: topology.real_time_updates,
            enable_connection_inference: topology.connection_inference,
            enable_metrics_collection: topology.metrics_collection,
            inference: InferenceConfig {
                routing_tables: topology.infer_from_routing,
                bridge_tables: topology.infer_from_bridges,
                dhcp_leases: topology.infer_from_dhcp_leases,
            },
            discovery,
        }
    }
}

fn secs(n: u64) -> Duration {
    Duration::from_secs(n)
}

fn hours(n: u64) -> Duration {
    Duration::from_secs(n.saturating_mul(3600))
}
