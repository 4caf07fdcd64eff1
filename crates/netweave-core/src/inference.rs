// ── Connection inference ──
//
// Derives the edge set of the topology graph from routing, bridge and
// DHCP-lease evidence. A pure function of the device set: the same input
// always yields the same connections in the same order.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::config::InferenceConfig;
use crate::model::{Connection, ConnectionType, NetworkDevice};

#[derive(Debug, Clone, Copy, Default)]
pub struct ConnectionInference {
    config: InferenceConfig,
}

impl ConnectionInference {
    pub fn new(config: InferenceConfig) -> Self {
        Self { config }
    }

    /// Infer every connection supported by the evidence in `devices`.
    ///
    /// Devices are visited in id order whatever order they arrive in.
    /// `observed_at` stamps `last_seen` and `discovered` on each edge.
    pub fn infer<'a, I>(&self, devices: I, observed_at: DateTime<Utc>) -> Vec<Connection>
    where
        I: IntoIterator<Item = &'a NetworkDevice>,
    {
        let mut devices: Vec<&NetworkDevice> = devices.into_iter().collect();
        devices.sort_by(|a, b| a.device_id.cmp(&b.device_id));

        let mut edges = EdgeSet::new(observed_at);

        if self.config.routing_tables {
            for device in &devices {
                infer_routes(device, &devices, &mut edges);
            }
        }
        if self.config.bridge_tables {
            for device in &devices {
                infer_bridges(device, &devices, &mut edges);
            }
        }
        if self.config.dhcp_leases {
            for device in &devices {
                infer_leases(device, &devices, &mut edges);
            }
        }

        debug!(
            devices = devices.len(),
            connections = edges.connections.len(),
            "inference pass complete"
        );
        edges.connections
    }
}

/// Accumulates edges for one cycle, keeping the first of any duplicate id.
struct EdgeSet {
    observed_at: DateTime<Utc>,
    seen: HashSet<uuid::Uuid>,
    connections: Vec<Connection>,
}

impl EdgeSet {
    fn new(observed_at: DateTime<Utc>) -> Self {
        Self {
            observed_at,
            seen: HashSet::new(),
            connections: Vec::new(),
        }
    }

    fn push(
        &mut self,
        from: &NetworkDevice,
        to: &NetworkDevice,
        from_interface: &str,
        to_interface: &str,
        connection_type: ConnectionType,
        is_direct_link: bool,
    ) {
        let id = Connection::derive_id(&from.device_id, &to.device_id, &connection_type);
        if !self.seen.insert(id) {
            return;
        }
        self.connections.push(Connection {
            id,
            from_device_id: from.device_id.clone(),
            to_device_id: to.device_id.clone(),
            from_interface: from_interface.to_owned(),
            to_interface: to_interface.to_owned(),
            connection_type,
            is_direct_link,
            last_seen: self.observed_at,
            discovered: self.observed_at,
        });
    }
}

fn others<'a>(
    device: &'a NetworkDevice,
    devices: &'a [&'a NetworkDevice],
) -> impl Iterator<Item = &'a NetworkDevice> + 'a {
    devices
        .iter()
        .copied()
        .filter(move |other| other.device_id != device.device_id)
}

// Next hop: the device owning the gateway address.
fn infer_routes(device: &NetworkDevice, devices: &[&NetworkDevice], edges: &mut EdgeSet) {
    let Some(routing) = &device.routing_info else {
        return;
    };

    for route in &routing.routes {
        let Some(gateway) = route.gateway.filter(|gw| !gw.is_unspecified()) else {
            continue;
        };
        for other in others(device, devices) {
            for iface in other.interfaces_with_address(&gateway) {
                edges.push(
                    device,
                    other,
                    &route.interface,
                    &iface.name,
                    ConnectionType::Route,
                    false,
                );
            }
        }
    }
}

// Learned MACs on a bridge port are directly attached.
fn infer_bridges(device: &NetworkDevice, devices: &[&NetworkDevice], edges: &mut EdgeSet) {
    let Some(bridge) = &device.bridge_info else {
        return;
    };

    for entry in bridge.entries.iter().filter(|e| !e.is_local) {
        if entry.mac.is_empty() {
            continue;
        }
        for other in others(device, devices).filter(|o| o.primary_mac == entry.mac) {
            edges.push(
                device,
                other,
                &entry.interface,
                "",
                ConnectionType::Bridge,
                true,
            );
        }
    }
}

fn infer_leases(device: &NetworkDevice, devices: &[&NetworkDevice], edges: &mut EdgeSet) {
    let Some(server) = device
        .routing_info
        .as_ref()
        .and_then(|r| r.dhcp_server.as_ref())
        .filter(|s| s.enabled)
    else {
        return;
    };

    for lease in server.active_leases.iter().filter(|l| !l.mac.is_empty()) {
        for other in others(device, devices).filter(|o| o.primary_mac == lease.mac) {
            // Holder side: the interface carrying the leased address, if any.
            let to_interface = lease
                .ip
                .as_ref()
                .and_then(|ip| other.interfaces_with_address(ip).next())
                .map_or("", |iface| iface.name.as_str());
            edges.push(
                device,
                other,
                "",
                to_interface,
                ConnectionType::DhcpLease,
                false,
            );
        }
    }
}
