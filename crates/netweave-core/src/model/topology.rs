use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::connection::Connection;
use super::device::NetworkDevice;

/// The complete topology of one (tenant, site) at a point in time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TopologySnapshot {
    pub id: String,
    pub tenant: String,
    pub site: String,
    #[serde(default)]
    pub devices: BTreeMap<String, NetworkDevice>,
    #[serde(default)]
    pub connections: Vec<Connection>,
    pub updated_at: DateTime<Utc>,
}

impl TopologySnapshot {
    pub fn empty(tenant: &str, site: &str, now: DateTime<Utc>) -> Self {
        Self {
            id: format!("{tenant}-{site}"),
            tenant: tenant.to_owned(),
            site: site.to_owned(),
            devices: BTreeMap::new(),
            connections: Vec::new(),
            updated_at: now,
        }
    }

    pub fn connections_for<'a>(
        &'a self,
        device_id: &'a str,
    ) -> impl Iterator<Item = &'a Connection> + 'a {
        self.connections.iter().filter(move |c| c.touches(device_id))
    }
}
