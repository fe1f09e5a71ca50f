pub mod error;
pub mod keyspace;
pub mod types;
pub mod write_op;

pub use error::{KvError, Result};
pub use keyspace::Keyspace;
pub use types::{Entry, KeyspaceConfig, KeyspaceStats, now_ms};
pub use write_op::WriteOp;
