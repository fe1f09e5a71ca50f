use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::core::KeyspaceConfig;
use crate::replication::{NodeRole, ReplicationConfig};

/// Main server configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub server: Server,
    pub persistence: PersistenceConfig,
    pub replication: ReplicationConfig,
    pub kv_store: KvStoreConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Server {
    pub host: String,
    pub port: u16,
}

/// Location of the snapshot file loaded at startup
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PersistenceConfig {
    pub dir: Option<String>,
    pub dbfilename: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct KvStoreConfig {
    pub ttl_cleanup_interval_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    /// `json` or `plain`
    pub format: String,
}

impl Default for Server {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 6379,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "plain".to_string(),
        }
    }
}

impl ServerConfig {
    /// Load configuration from YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let content = fs::read_to_string(path)?;
        let config: ServerConfig = serde_yaml::from_str(&content)?;
        Ok(config)
    }

    /// Check cross-section consistency
    pub fn validate(&self) -> anyhow::Result<()> {
        self.replication
            .validate()
            .map_err(|e| anyhow::anyhow!("replication: {}", e))?;

        if !matches!(self.logging.format.as_str(), "json" | "plain") {
            anyhow::bail!(
                "logging.format must be 'json' or 'plain', got '{}'",
                self.logging.format
            );
        }

        if self
            .persistence
            .dbfilename
            .as_deref()
            .is_some_and(|name| name.is_empty() || name.contains('/'))
        {
            anyhow::bail!("persistence.dbfilename must be a plain file name");
        }

        Ok(())
    }

    /// Convert to KeyspaceConfig
    pub fn to_keyspace_config(&self) -> KeyspaceConfig {
        KeyspaceConfig {
            ttl_cleanup_interval_ms: self.kv_store.ttl_cleanup_interval_ms,
        }
    }

    /// Snapshot file path, when a file name is configured
    pub fn snapshot_path(&self) -> Option<PathBuf> {
        let name = self.persistence.dbfilename.as_deref()?;
        let dir = self.persistence.dir.as_deref().unwrap_or(".");
        Some(Path::new(dir).join(name))
    }

    /// Get server address
    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }

    /// Follow the master at `address` (`host port` or `host:port`)
    pub fn set_replica_of(&mut self, address: &str) {
        self.replication.role = NodeRole::Replica;
        self.replication.master_address = Some(address.trim().to_string());
    }
}
