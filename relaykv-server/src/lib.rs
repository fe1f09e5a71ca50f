pub mod config;
pub mod core;
pub mod persistence;
pub mod protocol;
pub mod replication;
pub mod server;

// Re-export commonly used types
pub use config::ServerConfig;
pub use core::{Entry, Keyspace, KeyspaceConfig, KvError, WriteOp};
pub use protocol::{Command, Connection, Frame};
pub use replication::{
    MasterNode, NodeRole, ReplicaNode, ReplicaState, ReplicationConfig, ReplicationError,
    ReplicationStats,
};
pub use server::{Action, CommandTable, Server, ServerState};
