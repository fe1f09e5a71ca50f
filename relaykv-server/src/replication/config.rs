use super::types::NodeRole;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Length of a replication id
pub const REPLID_LEN: usize = 40;

/// Replication configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReplicationConfig {
    /// Node role (master, replica)
    pub role: NodeRole,

    /// Master address as `host:port` (for replica nodes)
    pub master_address: Option<String>,

    /// Replication id announced in FULLRESYNC; generated when unset
    pub replid: Option<String>,

    /// Offset announced in FULLRESYNC before anything is propagated
    pub initial_offset: u64,

    /// Port a replica announces through `REPLCONF listening-port`.
    /// Filled from the listener address at startup.
    #[serde(skip)]
    pub listening_port: u16,

    /// Delay between reconnect attempts in milliseconds
    pub reconnect_delay_ms: u64,

    /// Interval between PINGs sent to replicas in milliseconds
    pub heartbeat_interval_ms: u64,
}

impl Default for ReplicationConfig {
    fn default() -> Self {
        Self {
            role: NodeRole::Master,
            master_address: None,
            replid: None,
            initial_offset: 0,
            listening_port: 6379,
            reconnect_delay_ms: 5000,     // 5 seconds
            heartbeat_interval_ms: 10000, // 10 seconds
        }
    }
}

impl ReplicationConfig {
    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        match self.role {
            NodeRole::Replica => {
                let Some(address) = &self.master_address else {
                    return Err("Replica node requires master_address".to_string());
                };
                split_host_port(address)
                    .ok_or_else(|| format!("Invalid master_address '{}'", address))?;
            }
            NodeRole::Master => {
                if self.master_address.is_some() {
                    return Err("Master node cannot have a master_address".to_string());
                }
            }
        }

        if let Some(replid) = &self.replid {
            if replid.len() != REPLID_LEN || !replid.bytes().all(|b| b.is_ascii_alphanumeric()) {
                return Err(format!(
                    "replid must be {} alphanumeric characters",
                    REPLID_LEN
                ));
            }
        }

        if self.heartbeat_interval_ms == 0 {
            return Err("heartbeat_interval_ms must be positive".to_string());
        }

        Ok(())
    }

    /// Check if this node is a master
    pub fn is_master(&self) -> bool {
        self.role == NodeRole::Master
    }

    /// Check if this node is a replica
    pub fn is_replica(&self) -> bool {
        self.role == NodeRole::Replica
    }

    /// Configured replication id, or a freshly generated one
    pub fn resolve_replid(&self) -> String {
        self.replid.clone().unwrap_or_else(generate_replid)
    }

    /// Master host and port, for replica nodes
    pub fn master_host_port(&self) -> Option<(String, u16)> {
        self.master_address.as_deref().and_then(split_host_port)
    }
}

/// 40 lowercase hex characters built from two random UUIDs
pub fn generate_replid() -> String {
    let mut id = Uuid::new_v4().simple().to_string();
    id.push_str(&Uuid::new_v4().simple().to_string());
    id.truncate(REPLID_LEN);
    id
}

/// Split `host:port`, also accepting the `host port` form of `--replicaof`
pub fn split_host_port(address: &str) -> Option<(String, u16)> {
    let address = address.trim();
    let (host, port) = address
        .rsplit_once(':')
        .or_else(|| address.rsplit_once(' '))?;
    let host = host.trim();
    if host.is_empty() {
        return None;
    }
    let port = port.trim().parse().ok()?;
    Some((host.to_string(), port))
}
