//! Client command handlers.

use super::state::{RoleState, ServerState};
use super::table::{Action, CommandTable};
use crate::core::{Keyspace, KvError, Result, WriteOp};
use crate::persistence::rdb;
use crate::protocol::{Command, Frame};
use bytes::Bytes;
use std::fmt::Write as _;
use std::sync::Arc;
use tracing::debug;

pub fn register_all(table: &mut CommandTable) {
    table
        .register("PING", -1, false, ping)
        .register("ECHO", 2, false, echo)
        .register("SET", -3, true, set)
        .register("GET", 2, false, get)
        .register("DEL", -2, true, del)
        .register("CONFIG", -2, false, config)
        .register("KEYS", 2, false, keys)
        .register("INFO", -1, false, info)
        .register("REPLCONF", -2, false, replconf)
        .register("PSYNC", 3, false, psync)
        .register("CLIENT", -2, false, client);
}

async fn ping(_state: Arc<ServerState>, command: Command) -> Result<Action> {
    match command.args() {
        [] => Ok(Action::Reply(Frame::Simple("PONG".to_string()))),
        [message] => Ok(Action::Reply(Frame::Bulk(message.clone()))),
        _ => Err(KvError::WrongArity("ping".to_string())),
    }
}

async fn echo(_state: Arc<ServerState>, command: Command) -> Result<Action> {
    Ok(Action::Reply(Frame::Bulk(command.args()[0].clone())))
}

async fn set(state: Arc<ServerState>, command: Command) -> Result<Action> {
    let op = WriteOp::from_command(&command)?;
    state.apply_write(&command, |keyspace| op.apply(keyspace));
    Ok(Action::Reply(Frame::ok()))
}

async fn get(state: Arc<ServerState>, command: Command) -> Result<Action> {
    let reply = match state.keyspace().get(&command.args()[0]) {
        Some(value) => Frame::Bulk(value),
        None => Frame::Null,
    };
    Ok(Action::Reply(reply))
}

async fn del(state: Arc<ServerState>, command: Command) -> Result<Action> {
    let op = WriteOp::from_command(&command)?;
    let removed = state.apply_write(&command, |keyspace| op.apply(keyspace));
    Ok(Action::Reply(Frame::Integer(removed as i64)))
}

/// `CONFIG GET <param> [param ...]`
async fn config(state: Arc<ServerState>, command: Command) -> Result<Action> {
    if !command.arg_eq(0, "GET") {
        let sub = String::from_utf8_lossy(&command.args()[0]).into_owned();
        return Err(KvError::InvalidRequest(format!(
            "unknown subcommand '{}'. Try CONFIG GET.",
            sub
        )));
    }
    let params = &command.args()[1..];
    if params.is_empty() {
        return Err(KvError::WrongArity("config|get".to_string()));
    }

    let persistence = &state.config().persistence;
    let mut reply = Vec::new();
    for param in params {
        let name = String::from_utf8_lossy(param).to_ascii_lowercase();
        let value = match name.as_str() {
            "dir" => persistence.dir.clone().unwrap_or_default(),
            "dbfilename" => persistence.dbfilename.clone().unwrap_or_default(),
            _ => continue,
        };
        reply.push(Bytes::from(name));
        reply.push(Bytes::from(value));
    }
    Ok(Action::Reply(Frame::bulk_array(reply)))
}

/// Keys come from the snapshot file when one exists, otherwise from the live
/// keyspace. The file is decoded into a throwaway keyspace.
async fn keys(state: Arc<ServerState>, command: Command) -> Result<Action> {
    let pattern = &command.args()[0];

    let snapshot = match state.config().snapshot_path() {
        Some(path) => tokio::fs::try_exists(&path)
            .await
            .unwrap_or(false)
            .then_some(path),
        None => None,
    };

    let keys = match snapshot {
        Some(path) => {
            debug!(path = %path.display(), "Listing keys from snapshot");
            let transient = Keyspace::default();
            rdb::load_file(&path, &transient)
                .await
                .map_err(|e| KvError::InvalidRequest(e.to_string()))?;
            transient.keys(pattern)
        }
        None => state.keyspace().keys(pattern),
    };

    Ok(Action::Reply(Frame::bulk_array(keys)))
}

async fn info(state: Arc<ServerState>, command: Command) -> Result<Action> {
    let section = command
        .args()
        .first()
        .map(|s| String::from_utf8_lossy(s).to_ascii_lowercase())
        .unwrap_or_else(|| "all".to_string());

    let text = match section.as_str() {
        "server" => info_server(&state),
        "replication" => info_replication(&state),
        "stats" => info_stats(&state),
        "keyspace" => info_keyspace(&state),
        "all" | "default" | "everything" => [
            info_server(&state),
            info_replication(&state),
            info_stats(&state),
            info_keyspace(&state),
        ]
        .join("\r\n"),
        _ => String::new(),
    };
    Ok(Action::Reply(Frame::Bulk(Bytes::from(text))))
}

fn info_server(state: &ServerState) -> String {
    let mut out = String::from("# Server\r\n");
    let _ = write!(out, "redis_version:7.2.0\r\n");
    let _ = write!(out, "relaykv_version:{}\r\n", env!("CARGO_PKG_VERSION"));
    let _ = write!(out, "process_id:{}\r\n", std::process::id());
    let _ = write!(out, "tcp_port:{}\r\n", state.config().server.port);
    let _ = write!(out, "uptime_in_seconds:{}\r\n", state.uptime_secs());
    out
}

fn info_replication(state: &ServerState) -> String {
    let mut out = String::from("# Replication\r\n");
    match state.role() {
        RoleState::Master(master) => {
            let replicas = master.list_replicas();
            let _ = write!(out, "role:master\r\n");
            let _ = write!(out, "connected_slaves:{}\r\n", replicas.len());
            for (i, replica) in replicas.iter().enumerate() {
                let port = replica.listening_port.unwrap_or(replica.address.port());
                let _ = write!(
                    out,
                    "slave{}:ip={},port={},state=online,offset={},lag=0\r\n",
                    i,
                    replica.address.ip(),
                    port,
                    replica.acked_offset
                );
            }
            let _ = write!(out, "master_replid:{}\r\n", master.replid());
            let _ = write!(out, "master_repl_offset:{}\r\n", master.offset());
        }
        RoleState::Replica(replica) => {
            let (host, port) = state
                .config()
                .replication
                .master_host_port()
                .unwrap_or_default();
            let link = if replica.is_connected() { "up" } else { "down" };
            let _ = write!(out, "role:slave\r\n");
            let _ = write!(out, "master_host:{}\r\n", host);
            let _ = write!(out, "master_port:{}\r\n", port);
            let _ = write!(out, "master_link_status:{}\r\n", link);
            let _ = write!(out, "slave_repl_offset:{}\r\n", replica.offset());
            let _ = write!(out, "connected_slaves:0\r\n");
            let _ = write!(
                out,
                "master_replid:{}\r\n",
                replica.master_replid().unwrap_or_default()
            );
            let _ = write!(out, "master_repl_offset:{}\r\n", replica.offset());
        }
    }
    out
}

fn info_stats(state: &ServerState) -> String {
    let stats = state.keyspace().stats();
    let mut out = String::from("# Stats\r\n");
    let _ = write!(
        out,
        "total_connections_received:{}\r\n",
        state.connections_received()
    );
    let _ = write!(
        out,
        "total_commands_processed:{}\r\n",
        state.commands_processed()
    );
    let _ = write!(out, "expired_keys:{}\r\n", stats.expired);
    let _ = write!(out, "keyspace_hits:{}\r\n", stats.hits);
    let _ = write!(out, "keyspace_misses:{}\r\n", stats.misses);
    out
}

fn info_keyspace(state: &ServerState) -> String {
    let keyspace = state.keyspace();
    let mut out = String::from("# Keyspace\r\n");
    if !keyspace.is_empty() {
        let _ = write!(
            out,
            "db0:keys={},expires={},avg_ttl=0\r\n",
            keyspace.len(),
            keyspace.volatile_len()
        );
    }
    out
}

async fn replconf(_state: Arc<ServerState>, command: Command) -> Result<Action> {
    if command.arg_eq(0, "listening-port") {
        let port = command
            .args()
            .get(1)
            .and_then(|raw| std::str::from_utf8(raw).ok())
            .and_then(|raw| raw.parse::<u16>().ok())
            .ok_or_else(|| {
                KvError::InvalidRequest("value is not an integer or out of range".to_string())
            })?;
        return Ok(Action::ListeningPort(port));
    }
    if command.arg_eq(0, "ACK") {
        return Ok(Action::NoReply);
    }
    Ok(Action::Reply(Frame::ok()))
}

async fn psync(state: Arc<ServerState>, _command: Command) -> Result<Action> {
    match state.role() {
        RoleState::Master(_) => Ok(Action::FullResync),
        RoleState::Replica(_) => Err(KvError::InvalidRequest(
            "PSYNC not supported on a replica".to_string(),
        )),
    }
}

/// Accepts the handshake client libraries send (`CLIENT SETINFO ...`)
async fn client(_state: Arc<ServerState>, _command: Command) -> Result<Action> {
    Ok(Action::Reply(Frame::ok()))
}
