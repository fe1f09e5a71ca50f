use super::table::{Action, CommandTable};
use crate::config::ServerConfig;
use crate::core::{Keyspace, KvError, Result, now_ms};
use crate::protocol::Command;
use crate::replication::{MasterNode, NodeRole, ReplicaNode, ReplicationResult};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Replication side of a running node
pub enum RoleState {
    Master(Arc<MasterNode>),
    Replica(Arc<ReplicaNode>),
}

/// Everything a connection handler can reach. Shared as `Arc<ServerState>`.
pub struct ServerState {
    config: ServerConfig,
    keyspace: Keyspace,
    role: RoleState,
    commands: CommandTable,
    started_at_ms: i64,
    connections_received: AtomicU64,
    commands_processed: AtomicU64,
}

impl ServerState {
    /// Start the configured replication role over `keyspace`
    pub fn new(
        config: ServerConfig,
        keyspace: Keyspace,
        commands: CommandTable,
    ) -> ReplicationResult<Arc<Self>> {
        let role = match config.replication.role {
            NodeRole::Master => {
                RoleState::Master(MasterNode::new(config.replication.clone(), keyspace.clone())?)
            }
            NodeRole::Replica => {
                RoleState::Replica(ReplicaNode::new(config.replication.clone(), keyspace.clone())?)
            }
        };

        Ok(Arc::new(Self {
            config,
            keyspace,
            role,
            commands,
            started_at_ms: now_ms(),
            connections_received: AtomicU64::new(0),
            commands_processed: AtomicU64::new(0),
        }))
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn keyspace(&self) -> &Keyspace {
        &self.keyspace
    }

    pub fn role(&self) -> &RoleState {
        &self.role
    }

    pub fn commands(&self) -> &CommandTable {
        &self.commands
    }

    pub fn master(&self) -> Option<&Arc<MasterNode>> {
        match &self.role {
            RoleState::Master(master) => Some(master),
            RoleState::Replica(_) => None,
        }
    }

    pub fn replica(&self) -> Option<&Arc<ReplicaNode>> {
        match &self.role {
            RoleState::Replica(replica) => Some(replica),
            RoleState::Master(_) => None,
        }
    }

    pub fn is_replica(&self) -> bool {
        self.replica().is_some()
    }

    /// Resolve and run one client command
    pub async fn dispatch(self: &Arc<Self>, command: Command) -> Result<Action> {
        let verb = command.verb();
        let Some(handler) = self.commands.get(&verb) else {
            let raw = command.parts().first().map(|v| String::from_utf8_lossy(v).into_owned());
            return Err(KvError::UnknownCommand(raw.unwrap_or_default()));
        };

        if !handler.accepts(command.parts().len()) {
            return Err(KvError::WrongArity(handler.name().to_ascii_lowercase()));
        }
        if handler.is_write() && self.is_replica() {
            return Err(KvError::ReadOnly);
        }

        self.commands_processed.fetch_add(1, Ordering::Relaxed);
        handler.call(Arc::clone(self), command).await
    }

    /// Apply a client write, replicating it when this node is a master
    pub fn apply_write<T>(&self, command: &Command, apply: impl FnOnce(&Keyspace) -> T) -> T {
        match &self.role {
            RoleState::Master(master) => master.apply_write(command, apply),
            RoleState::Replica(_) => apply(&self.keyspace),
        }
    }

    pub(crate) fn record_connection(&self) {
        self.connections_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn connections_received(&self) -> u64 {
        self.connections_received.load(Ordering::Relaxed)
    }

    pub fn commands_processed(&self) -> u64 {
        self.commands_processed.load(Ordering::Relaxed)
    }

    pub fn uptime_secs(&self) -> i64 {
        (now_ms() - self.started_at_ms) / 1000
    }

    /// Stop background replication work
    pub fn shutdown(&self) {
        if let RoleState::Replica(replica) = &self.role {
            replica.shutdown();
        }
    }
}
