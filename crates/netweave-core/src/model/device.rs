// ── Device domain types ──

use std::collections::BTreeMap;
use std::net::IpAddr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use strum::{AsRefStr, Display, EnumString};

use super::identity::DeviceIdentity;
use super::mac::MacAddress;

/// Role a device plays in the network. Unset until a sighting or a
/// classification rule supplies one.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum DeviceRole {
    Gateway,
    AccessPoint,
    Switch,
    Client,
    Bridge,
    Router,
    #[serde(other)]
    Other,
}

/// Channel a sighting came through.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum DiscoveryMethod {
    /// Agent-published discovery message.
    Mqtt,
    /// Operator-entered record.
    Manual,
    /// Ping sweep / port scan of configured ranges.
    NetworkScan,
    /// Local ARP/neighbour table.
    ArpTable,
    /// DHCP server lease database.
    DhcpLease,
}

/// One address assigned to an interface.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IpAddressInfo {
    pub address: IpAddr,
    /// Network prefix, e.g. `192.168.1.0/24`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub network: Option<String>,
    /// `static`, `dhcp`, `link_local`, ...
    #[serde(
        default,
        rename = "type",
        alias = "assignment",
        skip_serializing_if = "Option::is_none"
    )]
    pub assignment: Option<String>,
}

impl IpAddressInfo {
    pub fn new(address: IpAddr) -> Self {
        Self {
            address,
            network: None,
            assignment: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkInterface {
    pub name: String,
    /// ethernet, wifi, bridge, loopback, tunnel
    #[serde(default, rename = "type", alias = "kind")]
    pub kind: String,
    #[serde(default, rename = "mac_address", alias = "mac")]
    pub mac: MacAddress,
    #[serde(default, rename = "ip_addresses", alias = "addresses")]
    pub addresses: Vec<IpAddressInfo>,
    #[serde(default)]
    pub status: String,
}

impl NetworkInterface {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn with_address(mut self, address: IpAddr) -> Self {
        self.addresses.push(IpAddressInfo::new(address));
        self
    }

    pub fn has_address(&self, address: &IpAddr) -> bool {
        self.addresses.iter().any(|a| a.address == *address)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteEntry {
    #[serde(default)]
    pub destination: String,
    /// Next hop. Absent for directly connected routes, which agents
    /// report as an empty string.
    #[serde(default, deserialize_with = "lenient_ip")]
    pub gateway: Option<IpAddr>,
    /// Egress interface name.
    #[serde(default)]
    pub interface: String,
    #[serde(default)]
    pub metric: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DhcpLease {
    #[serde(rename = "mac_address", alias = "mac")]
    pub mac: MacAddress,
    #[serde(default, rename = "ip_address", alias = "ip", deserialize_with = "lenient_ip")]
    pub ip: Option<IpAddr>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hostname: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DhcpServerInfo {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub active_leases: Vec<DhcpLease>,
}

/// Routing-table snapshot reported by a device.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoutingInfo {
    #[serde(default, rename = "routing_table", alias = "routes")]
    pub routes: Vec<RouteEntry>,
    #[serde(default)]
    pub forwarding_enabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dhcp_server: Option<DhcpServerInfo>,
}

/// A learned (or local) entry in a bridge forwarding table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BridgeEntry {
    #[serde(rename = "mac_address", alias = "mac")]
    pub mac: MacAddress,
    #[serde(default)]
    pub interface: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vlan_id: Option<u16>,
    #[serde(default)]
    pub is_local: bool,
    #[serde(default, rename = "age", alias = "age_secs")]
    pub age_secs: u32,
}

/// Bridge-table snapshot reported by a device.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BridgeInfo {
    #[serde(default, rename = "bridge_table", alias = "entries")]
    pub entries: Vec<BridgeEntry>,
    #[serde(default)]
    pub stp_enabled: bool,
    #[serde(default)]
    pub bridge_id: String,
    #[serde(default)]
    pub root_bridge: bool,
}

/// Reads an optional address from a string, treating empty or unparseable
/// text as absent.
fn lenient_ip<'de, D>(deserializer: D) -> Result<Option<IpAddr>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<String>::deserialize(deserializer)?;
    Ok(raw.and_then(|s| s.trim().parse().ok()))
}

/// The canonical device record.
///
/// Owned by the registry; everything handed out is a clone.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NetworkDevice {
    pub device_id: String,
    /// router, ap, switch, iot, client, bridge; empty until known.
    #[serde(default)]
    pub device_type: String,
    #[serde(default)]
    pub role: Option<DeviceRole>,
    #[serde(default)]
    pub manufacturer: String,
    #[serde(default)]
    pub model: String,
    #[serde(default)]
    pub hostname: String,
    #[serde(default)]
    pub location: String,
    #[serde(default)]
    pub primary_mac: MacAddress,
    /// Keyed by interface name.
    #[serde(default)]
    pub interfaces: BTreeMap<String, NetworkInterface>,
    #[serde(default)]
    pub online: bool,
    #[serde(default, with = "chrono::serde::ts_milliseconds_option")]
    pub last_seen: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub routing_info: Option<RoutingInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bridge_info: Option<BridgeInfo>,
    /// routing, bridge, ap, client, nat, dhcp
    #[serde(default)]
    pub capabilities: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identity: Option<DeviceIdentity>,
}

impl NetworkDevice {
    pub fn new(device_id: impl Into<String>) -> Self {
        Self {
            device_id: device_id.into(),
            ..Self::default()
        }
    }

    pub fn with_interface(mut self, iface: NetworkInterface) -> Self {
        self.interfaces.insert(iface.name.clone(), iface);
        self
    }

    /// Interfaces carrying `address`, in name order.
    pub fn interfaces_with_address<'a>(
        &'a self,
        address: &'a IpAddr,
    ) -> impl Iterator<Item = &'a NetworkInterface> + 'a {
        self.interfaces
            .values()
            .filter(move |iface| iface.has_address(address))
    }

    /// Whether the device was last seen strictly before `cutoff`.
    /// A device that was never seen counts as stale.
    pub fn seen_before(&self, cutoff: DateTime<Utc>) -> bool {
        self.last_seen.is_none_or(|seen| seen < cutoff)
    }
}
