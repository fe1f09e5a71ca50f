/// Replication module - master/replica over the RESP wire protocol
///
/// - 1 Master node (accepts writes, streams them to replicas)
/// - N Replica nodes (read-only)
/// - Full resync only: PSYNC always answers FULLRESYNC plus a snapshot
/// - Replicas acknowledge their offset on `REPLCONF GETACK`
pub mod config;
pub mod master;
pub mod replica;
pub mod types;

pub use config::ReplicationConfig;
pub use master::MasterNode;
pub use replica::ReplicaNode;
pub use types::{
    NodeRole, ReplicaInfo, ReplicaState, ReplicationError, ReplicationResult, ReplicationStats,
};
