// ── Message ingestion ──
//
// Turns agent messages (`<prefix>/v1/{tenant}/{site}/{device_id}/<kind>`)
// into registry sightings and identity records. Transport is somebody
// else's problem: this only sees a topic string and a payload.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Deserialize;
use strum::{AsRefStr, Display, EnumString};
use tracing::debug;

use crate::discovery::DeviceDiscovery;
use crate::error::CoreError;
use crate::identity::IdentityDirectory;
use crate::model::{
    BridgeInfo, DeviceIdentity, DeviceRole, MacAddress, NetworkDevice, NetworkInterface,
    RoutingInfo,
};

const PROTOCOL_VERSION: &str = "v1";

/// Message kinds agents publish. Only some of them feed the topology.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString, AsRefStr)]
pub enum MessageKind {
    #[strum(serialize = "topology/discovery")]
    TopologyDiscovery,
    #[strum(serialize = "topology/connections")]
    TopologyConnections,
    #[strum(serialize = "telemetry/wifi_clients")]
    WifiClients,
    #[strum(serialize = "device/identity")]
    DeviceIdentity,
    #[strum(serialize = "diagnostics/network")]
    NetworkDiagnostics,
    #[strum(serialize = "telemetry/qos")]
    Qos,
}

/// A parsed message topic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageTopic<'a> {
    pub tenant: &'a str,
    pub site: &'a str,
    pub device_id: &'a str,
    pub kind: MessageKind,
}

impl<'a> MessageTopic<'a> {
    pub fn parse(topic: &'a str) -> Result<Self, CoreError> {
        let mut parts = topic.splitn(6, '/');
        let (Some(_prefix), Some(version), Some(tenant), Some(site), Some(device_id), Some(kind)) = (
            parts.next(),
            parts.next(),
            parts.next(),
            parts.next(),
            parts.next(),
            parts.next(),
        ) else {
            return Err(CoreError::processing(format!("malformed topic: {topic}")));
        };

        if version != PROTOCOL_VERSION {
            return Err(CoreError::processing(format!(
                "unsupported protocol version {version} in {topic}"
            )));
        }
        if [tenant, site, device_id].iter().any(|s| s.is_empty()) {
            return Err(CoreError::processing(format!("malformed topic: {topic}")));
        }

        let kind = kind
            .parse::<MessageKind>()
            .map_err(|_| CoreError::processing(format!("not a topology message: {topic}")))?;

        Ok(Self {
            tenant,
            site,
            device_id,
            kind,
        })
    }
}

// ── Payloads ─────────────────────────────────────────────────────────

/// `topology/discovery` payload.
#[derive(Debug, Deserialize)]
pub struct DiscoveryPayload {
    /// Milliseconds since the epoch.
    #[serde(default, with = "chrono::serde::ts_milliseconds_option")]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    pub device_id: String,
    #[serde(default)]
    pub device_info: DeviceInfoPayload,
    #[serde(default)]
    pub interfaces: Vec<NetworkInterface>,
    #[serde(default)]
    pub routing_info: Option<RoutingInfo>,
    #[serde(default)]
    pub bridge_info: Option<BridgeInfo>,
}

#[derive(Debug, Default, Deserialize)]
pub struct DeviceInfoPayload {
    #[serde(default)]
    pub device_type: String,
    #[serde(default)]
    pub primary_mac: MacAddress,
    #[serde(default)]
    pub hostname: String,
    #[serde(default)]
    pub manufacturer: String,
    #[serde(default)]
    pub model: String,
    #[serde(default)]
    pub location: String,
    #[serde(default)]
    pub role: Option<DeviceRole>,
    #[serde(default)]
    pub capabilities: Vec<String>,
}

impl DiscoveryPayload {
    /// Build the sighted record. The payload's id wins over the topic's.
    pub fn into_device(self, topic_device_id: &str) -> NetworkDevice {
        let device_id = if self.device_id.is_empty() {
            topic_device_id.to_owned()
        } else {
            self.device_id
        };
        let info = self.device_info;

        NetworkDevice {
            device_id,
            device_type: info.device_type,
            role: info.role,
            manufacturer: info.manufacturer,
            model: info.model,
            hostname: info.hostname,
            location: info.location,
            primary_mac: info.primary_mac,
            interfaces: self
                .interfaces
                .into_iter()
                .filter(|iface| !iface.name.is_empty())
                .map(|iface| (iface.name.clone(), iface))
                .collect(),
            online: true,
            last_seen: self.timestamp,
            routing_info: self.routing_info,
            bridge_info: self.bridge_info,
            capabilities: info.capabilities,
            identity: None,
        }
    }
}

/// `device/identity` payload.
#[derive(Debug, Deserialize)]
pub struct IdentityPayload {
    #[serde(default, with = "chrono::serde::ts_milliseconds_option")]
    pub timestamp: Option<DateTime<Utc>>,
    pub mac_address: MacAddress,
    #[serde(default)]
    pub friendly_name: String,
    #[serde(default)]
    pub owner: String,
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub location: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub confidence: f64,
}

impl From<IdentityPayload> for DeviceIdentity {
    fn from(p: IdentityPayload) -> Self {
        Self {
            mac: p.mac_address,
            friendly_name: p.friendly_name,
            owner: p.owner,
            category: p.category,
            location: p.location,
            tags: p.tags,
            confidence: p.confidence,
            updated_at: p.timestamp,
        }
    }
}

// ── Routing ──────────────────────────────────────────────────────────

/// What a successfully ingested message changed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Ingested {
    Device { device_id: String, is_new: bool },
    Identity { mac: MacAddress },
}

/// Routes messages for one (tenant, site) to discovery and the identity
/// directory.
pub struct Ingestor {
    tenant: String,
    site: String,
    discovery: DeviceDiscovery,
    identities: Option<Arc<dyn IdentityDirectory>>,
}

impl Ingestor {
    pub fn new(
        tenant: impl Into<String>,
        site: impl Into<String>,
        discovery: DeviceDiscovery,
        identities: Option<Arc<dyn IdentityDirectory>>,
    ) -> Self {
        Self {
            tenant: tenant.into(),
            site: site.into(),
            discovery,
            identities,
        }
    }

    pub async fn ingest(&self, topic: &str, payload: &[u8]) -> Result<Ingested, CoreError> {
        let parsed = MessageTopic::parse(topic)?;
        if parsed.tenant != self.tenant || parsed.site != self.site {
            return Err(CoreError::processing(format!(
                "message for {}/{} delivered to {}/{}",
                parsed.tenant, parsed.site, self.tenant, self.site
            )));
        }

        match parsed.kind {
            MessageKind::TopologyDiscovery => {
                let payload: DiscoveryPayload = serde_json::from_slice(payload)?;
                let mut device = payload.into_device(parsed.device_id);
                self.enrich(&mut device).await;

                let device_id = device.device_id.clone();
                let is_new = self.discovery.process_discovery(device).await?;
                debug!(device_id = %device_id, is_new, "discovery message processed");
                Ok(Ingested::Device { device_id, is_new })
            }
            MessageKind::DeviceIdentity => {
                let payload: IdentityPayload = serde_json::from_slice(payload)?;
                let Some(directory) = &self.identities else {
                    return Err(CoreError::processing("no identity directory configured"));
                };
                let identity = DeviceIdentity::from(payload);
                if identity.mac.is_empty() {
                    return Err(CoreError::processing("identity message without MAC address"));
                }
                let mac = identity.mac.clone();
                directory.record(identity).await;
                debug!(%mac, "identity recorded");
                Ok(Ingested::Identity { mac })
            }
            kind => Err(CoreError::processing(format!("no handler for {kind} messages"))),
        }
    }

    async fn enrich(&self, device: &mut NetworkDevice) {
        let Some(directory) = &self.identities else {
            return;
        };
        if device.primary_mac.is_empty() {
            return;
        }
        device.identity = directory.lookup(&device.primary_mac).await;
    }
}
