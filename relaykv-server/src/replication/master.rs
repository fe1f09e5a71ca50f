use super::config::ReplicationConfig;
use super::types::{ReplicaInfo, ReplicationError, ReplicationResult, ReplicationStats};
use crate::core::{Keyspace, now_ms};
use crate::persistence::rdb;
use crate::protocol::resp::encode_snapshot_transfer;
use crate::protocol::{Command, Connection, Frame};
use bytes::{Bytes, BytesMut};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

type ReplicaRegistry = Arc<RwLock<HashMap<Uuid, ReplicaConnection>>>;

/// Master Node - accepts writes and streams them to replica nodes
///
/// Every registered replica gets an unbounded queue drained by its own
/// writer task. Writes go through [`MasterNode::apply_write`], which holds
/// the apply gate across "mutate keyspace, enqueue to replicas" so the
/// replication stream carries writes in local apply order.
pub struct MasterNode {
    config: ReplicationConfig,
    keyspace: Keyspace,
    replid: String,

    /// Bytes propagated so far
    offset: AtomicU64,

    /// Connected replicas
    replicas: ReplicaRegistry,

    apply_gate: Mutex<()>,

    total_replicated: AtomicU64,
    full_syncs: AtomicU64,
}

struct ReplicaConnection {
    id: Uuid,
    address: SocketAddr,
    listening_port: Option<u16>,
    acked_offset: Arc<AtomicU64>,
    connected_at: i64,
    sender: mpsc::UnboundedSender<Bytes>,
}

impl MasterNode {
    /// Create a new master node and start its heartbeat task
    pub fn new(config: ReplicationConfig, keyspace: Keyspace) -> ReplicationResult<Arc<Self>> {
        if !config.is_master() {
            return Err(ReplicationError::NotMaster);
        }
        config.validate().map_err(ReplicationError::InvalidConfig)?;

        let replid = config.resolve_replid();
        info!(replid = %replid, offset = config.initial_offset, "Initializing master node");

        let master = Arc::new(Self {
            offset: AtomicU64::new(config.initial_offset),
            replid,
            keyspace,
            replicas: Arc::new(RwLock::new(HashMap::new())),
            apply_gate: Mutex::new(()),
            total_replicated: AtomicU64::new(0),
            full_syncs: AtomicU64::new(0),
            config,
        });

        tokio::spawn(Self::heartbeat_task(
            Arc::downgrade(&master),
            master.config.heartbeat_interval_ms,
        ));

        Ok(master)
    }

    pub fn replid(&self) -> &str {
        &self.replid
    }

    /// Current master replication offset
    pub fn offset(&self) -> u64 {
        self.offset.load(Ordering::SeqCst)
    }

    /// Apply a client write and enqueue it to every replica, atomically with
    /// respect to other writes.
    pub fn apply_write<T>(&self, command: &Command, apply: impl FnOnce(&Keyspace) -> T) -> T {
        let _gate = self.apply_gate.lock();
        let result = apply(&self.keyspace);
        self.enqueue(command);
        result
    }

    /// Send a command to every replica without touching the keyspace
    pub fn propagate(&self, command: &Command) {
        let _gate = self.apply_gate.lock();
        self.enqueue(command);
    }

    /// Must be called with the apply gate held
    fn enqueue(&self, command: &Command) {
        let encoded = command.to_bytes();
        self.offset.fetch_add(encoded.len() as u64, Ordering::SeqCst);
        self.total_replicated.fetch_add(1, Ordering::Relaxed);

        let senders: Vec<(Uuid, mpsc::UnboundedSender<Bytes>)> = self
            .replicas
            .read()
            .values()
            .map(|r| (r.id, r.sender.clone()))
            .collect();

        let failed: Vec<Uuid> = senders
            .into_iter()
            .filter(|(_, sender)| sender.send(encoded.clone()).is_err())
            .map(|(id, _)| id)
            .collect();

        if !failed.is_empty() {
            let mut reps = self.replicas.write();
            for id in failed {
                reps.remove(&id);
                warn!(replica = %id, "Replica queue closed, removed");
            }
        }
    }

    /// Take over a connection that sent PSYNC: reply FULLRESYNC, transfer a
    /// snapshot of the keyspace and register the connection as a replica.
    pub async fn attach_replica(
        &self,
        mut conn: Connection<TcpStream>,
        listening_port: Option<u16>,
    ) -> ReplicationResult<Uuid> {
        let address = conn.get_ref().peer_addr()?;
        let id = Uuid::new_v4();
        let (tx, rx) = mpsc::unbounded_channel();
        let acked_offset = Arc::new(AtomicU64::new(0));

        // Snapshot and registration happen under the gate: every write not in
        // the snapshot lands in the replica's queue instead.
        let (snapshot, offset) = {
            let _gate = self.apply_gate.lock();
            let snapshot = rdb::encode(&self.keyspace.entries());
            self.replicas.write().insert(
                id,
                ReplicaConnection {
                    id,
                    address,
                    listening_port,
                    acked_offset: Arc::clone(&acked_offset),
                    connected_at: now_ms(),
                    sender: tx,
                },
            );
            (snapshot, self.offset())
        };

        info!(
            replica = %id,
            %address,
            snapshot_bytes = snapshot.len(),
            offset,
            "Performing full sync"
        );

        let mut transfer = BytesMut::with_capacity(snapshot.len() + 16);
        Frame::Simple(format!("FULLRESYNC {} {}", self.replid, offset)).encode(&mut transfer);
        encode_snapshot_transfer(&snapshot, &mut transfer);

        if let Err(e) = conn.write_raw(&transfer).await {
            self.replicas.write().remove(&id);
            warn!(replica = %id, error = %e, "Full sync failed");
            return Err(e.into());
        }
        self.full_syncs.fetch_add(1, Ordering::Relaxed);

        let (stream, buffered) = conn.into_parts();
        let (read_half, write_half) = stream.into_split();

        tokio::spawn(Self::writer_task(
            id,
            Connection::new(write_half),
            rx,
            Arc::clone(&self.replicas),
        ));
        tokio::spawn(Self::ack_reader_task(
            id,
            Connection::with_buffer(read_half, buffered),
            acked_offset,
            Arc::clone(&self.replicas),
        ));

        info!(replica = %id, "Replica connected and synced");
        Ok(id)
    }

    /// Drain a replica's queue onto its socket
    async fn writer_task(
        id: Uuid,
        mut conn: Connection<OwnedWriteHalf>,
        mut rx: mpsc::UnboundedReceiver<Bytes>,
        replicas: ReplicaRegistry,
    ) {
        while let Some(bytes) = rx.recv().await {
            if let Err(e) = conn.write_raw(&bytes).await {
                warn!(replica = %id, error = %e, "Replica write failed");
                break;
            }
        }

        if replicas.write().remove(&id).is_some() {
            info!(replica = %id, "Replica disconnected");
        }
    }

    /// Read `REPLCONF ACK <offset>` messages until the replica goes away
    async fn ack_reader_task(
        id: Uuid,
        mut conn: Connection<OwnedReadHalf>,
        acked_offset: Arc<AtomicU64>,
        replicas: ReplicaRegistry,
    ) {
        loop {
            match conn.read_command().await {
                Ok(Some((command, _))) => {
                    if command.verb() == "REPLCONF" && command.arg_eq(0, "ACK") {
                        match parse_ack_offset(&command) {
                            Some(offset) => {
                                acked_offset.store(offset, Ordering::SeqCst);
                                debug!(replica = %id, offset, "Replica ack");
                            }
                            None => warn!(replica = %id, "Malformed REPLCONF ACK"),
                        }
                    } else {
                        debug!(replica = %id, verb = %command.verb(), "Ignoring replica command");
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    warn!(replica = %id, error = %e, "Replica read failed");
                    break;
                }
            }
        }

        // Dropping the registration closes the queue and ends the writer task
        if replicas.write().remove(&id).is_some() {
            info!(replica = %id, "Replica disconnected");
        }
    }

    /// Background task to send heartbeats
    async fn heartbeat_task(master: Weak<MasterNode>, interval_ms: u64) {
        let mut interval = tokio::time::interval(Duration::from_millis(interval_ms));
        interval.tick().await;

        loop {
            interval.tick().await;

            let Some(node) = master.upgrade() else {
                break;
            };
            if node.replica_count() > 0 {
                node.propagate(&Command::from_parts(["PING"]));
            }
        }
    }

    pub fn replica_count(&self) -> usize {
        self.replicas.read().len()
    }

    /// Get list of connected replicas
    pub fn list_replicas(&self) -> Vec<ReplicaInfo> {
        let reps = self.replicas.read();
        let mut list: Vec<ReplicaInfo> = reps
            .values()
            .map(|r| ReplicaInfo {
                id: r.id,
                address: r.address,
                listening_port: r.listening_port,
                acked_offset: r.acked_offset.load(Ordering::SeqCst),
                connected_at: r.connected_at,
            })
            .collect();
        list.sort_by_key(|r| r.connected_at);
        list
    }

    /// Get replication statistics
    pub fn stats(&self) -> ReplicationStats {
        ReplicationStats {
            offset: self.offset(),
            connected_replicas: self.replica_count(),
            total_replicated: self.total_replicated.load(Ordering::Relaxed),
            full_syncs: self.full_syncs.load(Ordering::Relaxed),
            connected: true,
        }
    }
}

fn parse_ack_offset(command: &Command) -> Option<u64> {
    let raw = command.args().get(1)?;
    std::str::from_utf8(raw).ok()?.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::WriteOp;

    fn master_config() -> ReplicationConfig {
        let mut config = ReplicationConfig::default();
        config.replid = Some("8371b4fb1155b71f4a04d3e1bc3e18c4a990aeeb".to_string());
        config
    }

    #[tokio::test]
    async fn test_master_initialization() {
        let master = MasterNode::new(master_config(), Keyspace::default()).unwrap();
        assert_eq!(master.replid(), "8371b4fb1155b71f4a04d3e1bc3e18c4a990aeeb");
        assert_eq!(master.offset(), 0);
        assert_eq!(master.replica_count(), 0);
    }

    #[tokio::test]
    async fn test_replica_role_rejected() {
        let mut config = master_config();
        config.role = super::super::types::NodeRole::Replica;
        config.master_address = Some("127.0.0.1:6379".to_string());
        assert!(matches!(
            MasterNode::new(config, Keyspace::default()),
            Err(ReplicationError::NotMaster)
        ));
    }

    #[tokio::test]
    async fn test_apply_write_advances_offset() {
        let keyspace = Keyspace::default();
        let master = MasterNode::new(master_config(), keyspace.clone()).unwrap();

        let command = Command::from_parts(["SET", "k", "v"]);
        let op = WriteOp::from_command(&command).unwrap();
        let written = master.apply_write(&command, |ks| op.apply(ks));

        assert_eq!(written, 1);
        assert_eq!(keyspace.get(b"k"), Some(Bytes::from("v")));
        assert_eq!(master.offset(), command.encoded_len() as u64);
        assert_eq!(master.stats().total_replicated, 1);
    }

    #[tokio::test]
    async fn test_initial_offset() {
        let mut config = master_config();
        config.initial_offset = 100;
        let master = MasterNode::new(config, Keyspace::default()).unwrap();
        master.propagate(&Command::from_parts(["PING"]));
        assert_eq!(master.offset(), 114);
    }

    #[test]
    fn test_parse_ack_offset() {
        assert_eq!(
            parse_ack_offset(&Command::from_parts(["REPLCONF", "ACK", "31"])),
            Some(31)
        );
        assert_eq!(
            parse_ack_offset(&Command::from_parts(["REPLCONF", "ACK"])),
            None
        );
        assert_eq!(
            parse_ack_offset(&Command::from_parts(["REPLCONF", "ACK", "x"])),
            None
        );
    }
}
