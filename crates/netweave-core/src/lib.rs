//! Live network topology model for a router fleet controller.
//!
//! This crate owns device tracking, link inference and snapshot
//! aggregation for one (tenant, site):
//!
//! - **[`DeviceRegistry`]**: authoritative device table. Merges sightings
//!   from every channel, runs classification rules and sweeps devices
//!   that stop reporting to offline.
//!
//! - **[`DeviceDiscovery`]**: polls pluggable [`DiscoverySource`]s and
//!   sweeps timeouts on a schedule. Agent messages reach it through
//!   [`TopologyManager::process_message`].
//!
//! - **[`ConnectionInference`]**: derives route, bridge and DHCP-lease
//!   links from the evidence devices report about themselves.
//!
//! - **[`TopologyManager`]**: periodically folds the registry into a
//!   [`TopologySnapshot`], recomputes connections, persists the result
//!   through a [`TopologyStore`] and keeps connection history and metrics.
//!
//! - **[`Scheduler`]**: cancellation-bound periodic tasks shared by the
//!   components above.
//!
//! Persistence and identity lookup are trait boundaries; [`MemoryStore`]
//! and [`MemoryIdentityDirectory`] are the in-process implementations.

pub mod classify;
pub mod config;
pub mod discovery;
pub mod error;
pub mod identity;
pub mod inference;
pub mod ingest;
pub mod manager;
pub mod model;
pub mod registry;
pub mod scheduler;
pub mod store;
mod time;

// ── Primary re-exports ──────────────────────────────────────────────
pub use classify::{
    ClassificationRule, Classifier, Condition, ConditionField, ConditionOperator, ConditionValue,
};
pub use config::{DiscoveryConfig, InferenceConfig, ManagerConfig};
pub use discovery::{DeviceDiscovery, DiscoverySource};
pub use error::CoreError;
pub use identity::{IdentityDirectory, MemoryIdentityDirectory};
pub use inference::ConnectionInference;
pub use ingest::{Ingested, MessageKind, MessageTopic};
pub use manager::{
    ConnectionChange, ConnectionEvent, ManagerStats, MetricsSample, TopologyManager,
};
pub use registry::{DeviceRegistry, DiscoveryStats};
pub use scheduler::Scheduler;
pub use store::{MemoryStore, TopologyStore};

pub use model::{
    BridgeEntry, BridgeInfo, Connection, ConnectionType, DeviceIdentity, DeviceRole, DhcpLease,
    DhcpServerInfo, DiscoveryMethod, IpAddressInfo, MacAddress, NetworkDevice, NetworkInterface,
    RouteEntry, RoutingInfo, TopologySnapshot,
};
