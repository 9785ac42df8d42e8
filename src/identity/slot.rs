use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::Display;
use std::net::IpAddr;
use utoipa::ToSchema;

/// Instance id of a slot that was pre-created and never backed by a running node.
pub const PLACEHOLDER_INSTANCE_ID: &str = "new_slot";

/// A ring position claimed (or reserved) in the registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct Slot {
    pub id: i64,
    pub app_name: String,
    pub instance_id: String,
    pub hostname: String,
    #[schema(value_type = String)]
    pub host_ip: IpAddr,
    pub rack: String,
    pub region: String,
    pub token: String,
    pub updated_at: DateTime<Utc>,
}

impl Slot {
    pub fn is_placeholder(&self) -> bool {
        self.instance_id == PLACEHOLDER_INSTANCE_ID
    }

    /// Builds the record `node` registers when it takes over this slot's token.
    ///
    /// Id, app and token stay, the network identity and placement come from `node`.
    pub fn reissue_to(&self, node: &LocalNode) -> Slot {
        Slot {
            id: self.id,
            app_name: self.app_name.clone(),
            instance_id: node.instance_id.clone(),
            hostname: node.hostname.clone(),
            host_ip: node.host_ip,
            rack: node.rack.clone(),
            region: node.region.clone(),
            token: self.token.clone(),
            updated_at: Utc::now(),
        }
    }
}

impl Display for Slot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "slot {} [{}/{}] {} {} ({}) token={}",
            self.id,
            self.region,
            self.rack,
            self.instance_id,
            self.hostname,
            self.host_ip,
            self.token
        )
    }
}

/// Identity of the node this sidecar runs next to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalNode {
    pub app_name: String,
    pub instance_id: String,
    pub hostname: String,
    pub host_ip: IpAddr,
    pub rack: String,
    pub region: String,
}

impl LocalNode {
    pub fn owns(&self, slot: &Slot) -> bool {
        slot.instance_id == self.instance_id
    }
}

#[cfg(test)]
impl Slot {
    pub fn example(id: i64, instance_id: &str, host_ip: &str, rack: &str, token: &str) -> Self {
        Slot {
            id,
            app_name: "test_cluster".to_string(),
            instance_id: instance_id.to_string(),
            hostname: format!("host_{id}"),
            host_ip: host_ip.parse().unwrap(),
            rack: rack.to_string(),
            region: "us-east-1".to_string(),
            token: token.to_string(),
            updated_at: Utc::now(),
        }
    }
}

#[cfg(test)]
impl LocalNode {
    pub fn example() -> Self {
        LocalNode {
            app_name: "test_cluster".to_string(),
            instance_id: "i-booting".to_string(),
            hostname: "booting-host".to_string(),
            host_ip: "10.0.0.99".parse().unwrap(),
            rack: "us-east-1a".to_string(),
            region: "us-east-1".to_string(),
        }
    }
}
