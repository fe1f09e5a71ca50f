use super::config::ReplicationConfig;
use super::types::{ReplicaState, ReplicationError, ReplicationResult, ReplicationStats};
use crate::core::{Keyspace, WriteOp};
use crate::persistence::rdb;
use crate::protocol::{Command, Connection, Frame};
use bytes::Bytes;
use parking_lot::RwLock;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

/// Replica Node - read-only node that follows a master
///
/// Connects to the master, performs the PSYNC handshake, loads the
/// transferred snapshot and then applies the command stream. Any failure
/// drops the link and the loop reconnects after `reconnect_delay_ms`.
pub struct ReplicaNode {
    config: ReplicationConfig,
    master_address: String,
    keyspace: Keyspace,

    /// Bytes of the command stream processed since the last full resync
    offset: AtomicU64,

    state: RwLock<ReplicaState>,

    /// Replication id announced by the master in FULLRESYNC
    master_replid: RwLock<Option<String>>,

    commands_applied: AtomicU64,
    full_syncs: AtomicU64,

    shutdown: watch::Sender<bool>,
}

impl ReplicaNode {
    /// Create a new replica node and start its replication loop
    pub fn new(config: ReplicationConfig, keyspace: Keyspace) -> ReplicationResult<Arc<Self>> {
        let (replica, shutdown_rx) = Self::build(config, keyspace)?;
        tokio::spawn(Arc::clone(&replica).replication_loop(shutdown_rx));
        Ok(replica)
    }

    fn build(
        config: ReplicationConfig,
        keyspace: Keyspace,
    ) -> ReplicationResult<(Arc<Self>, watch::Receiver<bool>)> {
        if !config.is_replica() {
            return Err(ReplicationError::NotReplica);
        }
        config.validate().map_err(ReplicationError::InvalidConfig)?;
        let master_address = config
            .master_host_port()
            .map(|(host, port)| format!("{}:{}", host, port))
            .ok_or_else(|| ReplicationError::InvalidConfig("missing master_address".to_string()))?;

        info!(master = %master_address, "Initializing replica node");

        let (shutdown, shutdown_rx) = watch::channel(false);
        let replica = Arc::new(Self {
            config,
            master_address,
            keyspace,
            offset: AtomicU64::new(0),
            state: RwLock::new(ReplicaState::Disconnected),
            master_replid: RwLock::new(None),
            commands_applied: AtomicU64::new(0),
            full_syncs: AtomicU64::new(0),
            shutdown,
        });

        Ok((replica, shutdown_rx))
    }

    /// Main replication loop - connect, sync, and receive updates
    async fn replication_loop(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let reconnect_delay = Duration::from_millis(self.config.reconnect_delay_ms);

        loop {
            if *shutdown.borrow() {
                break;
            }
            info!("Connecting to master at {}", self.master_address);

            tokio::select! {
                result = self.connect_and_sync() => match result {
                    Ok(()) => info!("Master closed the replication link"),
                    Err(e) => error!("Replication error: {}", e),
                },
                _ = shutdown.changed() => {
                    self.set_state(ReplicaState::Disconnected);
                    break;
                }
            }
            self.set_state(ReplicaState::Disconnected);

            debug!("Reconnecting in {:?}", reconnect_delay);
            tokio::select! {
                _ = tokio::time::sleep(reconnect_delay) => {}
                _ = shutdown.changed() => break,
            }
        }

        info!("Replication loop stopped");
    }

    /// Connect to master and follow it until the link fails
    async fn connect_and_sync(&self) -> ReplicationResult<()> {
        let stream = TcpStream::connect(&self.master_address)
            .await
            .map_err(|e| ReplicationError::ConnectionFailed(format!("{}: {}", self.master_address, e)))?;
        info!("Connected to master");

        let mut conn = Connection::new(stream);
        self.handshake(&mut conn).await?;
        self.receive_commands(&mut conn).await
    }

    /// PING, REPLCONF and PSYNC, then load the snapshot the master sends
    pub(crate) async fn handshake<S>(&self, conn: &mut Connection<S>) -> ReplicationResult<()>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        self.set_state(ReplicaState::HandshakePing);
        conn.write_command(&Command::from_parts(["PING"])).await?;
        expect_status(conn, "PONG").await?;

        self.set_state(ReplicaState::HandshakeReplconf);
        conn.write_command(&Command::new(vec![
            Bytes::from_static(b"REPLCONF"),
            Bytes::from_static(b"listening-port"),
            Bytes::from(self.config.listening_port.to_string()),
        ]))
        .await?;
        expect_status(conn, "OK").await?;
        conn.write_command(&Command::from_parts(["REPLCONF", "capa", "psync2"]))
            .await?;
        expect_status(conn, "OK").await?;

        self.set_state(ReplicaState::HandshakePsync);
        conn.write_command(&Command::from_parts(["PSYNC", "?", "-1"]))
            .await?;
        let (replid, master_offset) = match conn.read_reply().await? {
            Frame::Simple(line) => parse_fullresync(&line)?,
            other => {
                return Err(ReplicationError::Handshake(format!(
                    "expected FULLRESYNC, got {:?}",
                    other
                )));
            }
        };

        self.set_state(ReplicaState::ResyncLoading);
        let payload = conn.read_snapshot_payload().await?;
        self.keyspace.clear();
        let keys = rdb::load(&payload, &self.keyspace)?;
        self.offset.store(0, Ordering::SeqCst);
        *self.master_replid.write() = Some(replid.clone());
        self.full_syncs.fetch_add(1, Ordering::Relaxed);

        info!(
            replid = %replid,
            master_offset,
            keys = keys.len(),
            snapshot_bytes = payload.len(),
            "Full sync complete"
        );
        self.set_state(ReplicaState::Streaming);
        Ok(())
    }

    /// Apply the command stream. Returns `Ok` when the master closes the
    /// connection cleanly.
    pub(crate) async fn receive_commands<S>(&self, conn: &mut Connection<S>) -> ReplicationResult<()>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        while let Some((command, len)) = conn.read_command().await? {
            self.apply_command(&command, conn).await?;
            self.offset.fetch_add(len as u64, Ordering::SeqCst);
        }
        Ok(())
    }

    async fn apply_command<S>(&self, command: &Command, conn: &mut Connection<S>) -> ReplicationResult<()>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let verb = command.verb();
        match verb.as_str() {
            "SET" | "DEL" => {
                let op = WriteOp::from_command(command)?;
                op.apply(&self.keyspace);
                self.commands_applied.fetch_add(1, Ordering::Relaxed);
            }
            "PING" => {}
            "REPLCONF" if command.arg_eq(0, "GETACK") => {
                let offset = self.offset();
                debug!(offset, "Acknowledging offset");
                conn.write_command(&Command::new(vec![
                    Bytes::from_static(b"REPLCONF"),
                    Bytes::from_static(b"ACK"),
                    Bytes::from(offset.to_string()),
                ]))
                .await?;
            }
            _ => {
                warn!(verb = %verb, "Unexpected command from master");
                return Err(ReplicationError::UnexpectedCommand(verb));
            }
        }
        Ok(())
    }

    /// Stop the replication loop and drop the link
    pub fn shutdown(&self) {
        let _ = self.shutdown.send(true);
    }

    pub fn state(&self) -> ReplicaState {
        *self.state.read()
    }

    fn set_state(&self, state: ReplicaState) {
        let mut current = self.state.write();
        if *current != state {
            debug!(from = %*current, to = %state, "Replica state change");
            *current = state;
        }
    }

    /// Check if the link to the master is streaming
    pub fn is_connected(&self) -> bool {
        self.state() == ReplicaState::Streaming
    }

    /// Get current offset
    pub fn offset(&self) -> u64 {
        self.offset.load(Ordering::SeqCst)
    }

    pub fn master_replid(&self) -> Option<String> {
        self.master_replid.read().clone()
    }

    pub fn master_address(&self) -> &str {
        &self.master_address
    }

    /// Get replication statistics
    pub fn stats(&self) -> ReplicationStats {
        ReplicationStats {
            offset: self.offset(),
            connected_replicas: 0,
            total_replicated: self.commands_applied.load(Ordering::Relaxed),
            full_syncs: self.full_syncs.load(Ordering::Relaxed),
            connected: self.is_connected(),
        }
    }
}

async fn expect_status<S>(conn: &mut Connection<S>, expected: &str) -> ReplicationResult<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    match conn.read_reply().await? {
        Frame::Simple(status) if status.eq_ignore_ascii_case(expected) => Ok(()),
        other => Err(ReplicationError::Handshake(format!(
            "expected +{}, got {:?}",
            expected, other
        ))),
    }
}

/// `FULLRESYNC <replid> <offset>`
fn parse_fullresync(line: &str) -> ReplicationResult<(String, i64)> {
    let mut parts = line.split_whitespace();
    match (parts.next(), parts.next(), parts.next(), parts.next()) {
        (Some(tag), Some(replid), Some(offset), None) if tag.eq_ignore_ascii_case("FULLRESYNC") => {
            let offset = offset
                .parse()
                .map_err(|_| ReplicationError::Handshake(format!("bad FULLRESYNC offset '{}'", offset)))?;
            Ok((replid.to_string(), offset))
        }
        _ => Err(ReplicationError::Handshake(format!(
            "expected FULLRESYNC, got '{}'",
            line
        ))),
    }
}
