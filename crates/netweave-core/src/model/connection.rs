// ── Inferred links between devices ──

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Namespace for connection ids. Changing it re-keys every stored edge.
const CONNECTION_NAMESPACE: Uuid = Uuid::from_u128(0x6e77_7665_6176_4c69_6e6b_0000_0000_0001);

/// How a connection was inferred.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionType {
    /// Next-hop relationship from a routing table.
    Route,
    /// Layer-2 adjacency from a learned bridge-table entry.
    Bridge,
    /// Lease handed out by a device's DHCP server.
    DhcpLease,
    /// Any other discovery method, tagged by name.
    #[serde(untagged)]
    Other(String),
}

impl ConnectionType {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Route => "route",
            Self::Bridge => "bridge",
            Self::DhcpLease => "dhcp_lease",
            Self::Other(tag) => tag,
        }
    }
}

impl fmt::Display for ConnectionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A directed edge between two devices.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Connection {
    pub id: Uuid,
    pub from_device_id: String,
    pub to_device_id: String,
    #[serde(default)]
    pub from_interface: String,
    #[serde(default)]
    pub to_interface: String,
    pub connection_type: ConnectionType,
    pub is_direct_link: bool,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub last_seen: DateTime<Utc>,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub discovered: DateTime<Utc>,
}

impl Connection {
    /// Deterministic id for the `(from, to, method)` triple.
    pub fn derive_id(from: &str, to: &str, connection_type: &ConnectionType) -> Uuid {
        let name = format!("{from}\u{1f}{to}\u{1f}{connection_type}");
        Uuid::new_v5(&CONNECTION_NAMESPACE, name.as_bytes())
    }

    /// Whether either endpoint is `device_id`.
    pub fn touches(&self, device_id: &str) -> bool {
        self.from_device_id == device_id || self.to_device_id == device_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derived_id_is_stable_and_direction_sensitive() {
        let a = Connection::derive_id("a", "b", &ConnectionType::Route);
        assert_eq!(a, Connection::derive_id("a", "b", &ConnectionType::Route));
        assert_ne!(a, Connection::derive_id("b", "a", &ConnectionType::Route));
        assert_ne!(a, Connection::derive_id("a", "b", &ConnectionType::Bridge));
    }

    #[test]
    fn ids_do_not_collide_on_separator_shuffles() {
        let left = Connection::derive_id("a-b", "c", &ConnectionType::Route);
        let right = Connection::derive_id("a", "b-c", &ConnectionType::Route);
        assert_ne!(left, right);
    }

    #[test]
    fn other_type_round_trips_as_plain_tag() {
        let ty = ConnectionType::Other("wifi".into());
        let json = serde_json::to_string(&ty).ok();
        assert_eq!(json.as_deref(), Some("\"wifi\""));
        assert_eq!(
            serde_json::from_str::<ConnectionType>("\"route\"").ok(),
            Some(ConnectionType::Route)
        );
    }
}
