// ── Domain model ──
//
// Canonical representation of devices, links and snapshots. Every
// component exchanges these types by value.

pub mod connection;
pub mod device;
pub mod identity;
pub mod mac;
pub mod topology;

// ── Re-exports ──────────────────────────────────────────────────────

pub use connection::{Connection, ConnectionType};
pub use device::{
    BridgeEntry, BridgeInfo, DeviceRole, DhcpLease, DhcpServerInfo, DiscoveryMethod,
    IpAddressInfo, NetworkDevice, NetworkInterface, RouteEntry, RoutingInfo,
};
pub use identity::DeviceIdentity;
pub use mac::MacAddress;
pub use topology::TopologySnapshot;
