use crate::core::KvError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::SocketAddr;
use thiserror::Error;
use uuid::Uuid;

/// Node role in replication topology
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeRole {
    /// Accepts writes and streams them to replicas
    #[default]
    Master,
    /// Read-only, follows a master
    Replica,
}

impl NodeRole {
    /// Name reported by `INFO replication`
    pub fn info_name(&self) -> &'static str {
        match self {
            NodeRole::Master => "master",
            NodeRole::Replica => "slave",
        }
    }
}

/// Progress of a replica's link to its master
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum ReplicaState {
    #[default]
    Disconnected,
    HandshakePing,
    HandshakeReplconf,
    HandshakePsync,
    ResyncLoading,
    Streaming,
}

impl fmt::Display for ReplicaState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ReplicaState::Disconnected => "disconnected",
            ReplicaState::HandshakePing => "handshake-ping",
            ReplicaState::HandshakeReplconf => "handshake-replconf",
            ReplicaState::HandshakePsync => "handshake-psync",
            ReplicaState::ResyncLoading => "resync-loading",
            ReplicaState::Streaming => "streaming",
        };
        f.write_str(name)
    }
}

/// Replication statistics
#[derive(Debug, Clone, Default, Serialize)]
pub struct ReplicationStats {
    /// Bytes propagated by the master, or consumed by a replica
    pub offset: u64,
    /// Registered replicas (master only)
    pub connected_replicas: usize,
    /// Commands propagated (master) or applied (replica)
    pub total_replicated: u64,
    /// Full resyncs served (master) or completed (replica)
    pub full_syncs: u64,
    /// Link to the master is streaming (replica only)
    pub connected: bool,
}

/// A replica registered with the master
#[derive(Debug, Clone, Serialize)]
pub struct ReplicaInfo {
    pub id: Uuid,
    pub address: SocketAddr,
    /// Port announced through `REPLCONF listening-port`
    pub listening_port: Option<u16>,
    /// Last offset reported through `REPLCONF ACK`
    pub acked_offset: u64,
    /// Registration time, milliseconds since the epoch
    pub connected_at: i64,
}

/// Replication error types
#[derive(Debug, Error)]
pub enum ReplicationError {
    #[error("Not a master node")]
    NotMaster,

    #[error("Not a replica node")]
    NotReplica,

    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Handshake failed: {0}")]
    Handshake(String),

    #[error("Unexpected command on replication stream: {0}")]
    UnexpectedCommand(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error(transparent)]
    Kv(#[from] KvError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type ReplicationResult<T> = std::result::Result<T, ReplicationError>;
