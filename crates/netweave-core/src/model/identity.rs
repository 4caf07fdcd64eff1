use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::mac::MacAddress;

/// Human-assigned identity for a device, keyed by MAC.
///
/// Purely descriptive: the topology graph never depends on it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeviceIdentity {
    pub mac: MacAddress,
    #[serde(default)]
    pub friendly_name: String,
    #[serde(default)]
    pub owner: String,
    /// personal, shared, infrastructure
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub location: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub confidence: f64,
    #[serde(default, with = "chrono::serde::ts_milliseconds_option")]
    pub updated_at: Option<DateTime<Utc>>,
}
