//! Startup snapshot loading and snapshot-backed KEYS

use bytes::Bytes;
use relaykv_server::core::now_ms;
use relaykv_server::persistence::rdb;
use relaykv_server::{CommandTable, Entry, Server, ServerConfig, ServerState};
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;

fn config_for(dir: &Path, dbfilename: &str) -> ServerConfig {
    let mut config = ServerConfig::default();
    config.server.port = 0;
    config.persistence.dir = Some(dir.display().to_string());
    config.persistence.dbfilename = Some(dbfilename.to_string());
    config
}

async fn start(config: ServerConfig) -> (SocketAddr, Arc<ServerState>) {
    let server = Server::bind(config, CommandTable::standard()).await.unwrap();
    let addr = server.local_addr().unwrap();
    let state = server.state();
    tokio::spawn(server.run());
    (addr, state)
}

fn write_snapshot(dir: &TempDir, name: &str, entries: &[(&str, &str, Option<i64>)]) {
    let entries: Vec<(Bytes, Entry)> = entries
        .iter()
        .map(|(key, value, expiry)| {
            (
                Bytes::copy_from_slice(key.as_bytes()),
                Entry::new(Bytes::copy_from_slice(value.as_bytes()), *expiry),
            )
        })
        .collect();
    std::fs::write(dir.path().join(name), rdb::encode(&entries)).unwrap();
}

async fn roundtrip(stream: &mut TcpStream, request: &[u8]) -> String {
    stream.write_all(request).await.unwrap();
    let mut buf = vec![0u8; 1024];
    let n = timeout(Duration::from_secs(5), stream.read(&mut buf))
        .await
        .unwrap()
        .unwrap();
    String::from_utf8_lossy(&buf[..n]).into_owned()
}

#[tokio::test]
async fn test_startup_loads_snapshot() {
    let dir = tempfile::tempdir().unwrap();
    let future = now_ms() + 3_600_000;
    let past = now_ms() - 1_000;
    write_snapshot(
        &dir,
        "dump.rdb",
        &[
            ("plain", "1", None),
            ("volatile", "2", Some(future)),
            ("stale", "3", Some(past)),
        ],
    );

    let (addr, state) = start(config_for(dir.path(), "dump.rdb")).await;
    assert_eq!(state.keyspace().get(b"plain"), Some(Bytes::from("1")));
    assert_eq!(state.keyspace().get(b"volatile"), Some(Bytes::from("2")));
    assert_eq!(state.keyspace().get(b"stale"), None);

    let mut stream = TcpStream::connect(addr).await.unwrap();
    assert_eq!(
        roundtrip(&mut stream, b"*2\r\n$3\r\nGET\r\n$5\r\nplain\r\n").await,
        "$1\r\n1\r\n"
    );
}

#[tokio::test]
async fn test_missing_snapshot_starts_empty() {
    let dir = tempfile::tempdir().unwrap();
    let (_addr, state) = start(config_for(dir.path(), "absent.rdb")).await;
    assert!(state.keyspace().is_empty());
}

#[tokio::test]
async fn test_corrupt_snapshot_fails_startup() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("dump.rdb"), b"NOTREDIS0011").unwrap();

    let result = Server::bind(config_for(dir.path(), "dump.rdb"), CommandTable::standard()).await;
    assert!(result.is_err());
}

#[tokio::test]
async fn test_keys_reads_snapshot_file() {
    let dir = tempfile::tempdir().unwrap();
    write_snapshot(&dir, "dump.rdb", &[("from-file", "1", None)]);

    let (addr, state) = start(config_for(dir.path(), "dump.rdb")).await;
    // Written after startup, so only the live keyspace knows it
    state.keyspace().set("live-only", "x", None);

    let mut stream = TcpStream::connect(addr).await.unwrap();
    assert_eq!(
        roundtrip(&mut stream, b"*2\r\n$4\r\nKEYS\r\n$1\r\n*\r\n").await,
        "*1\r\n$9\r\nfrom-file\r\n"
    );
}

#[tokio::test]
async fn test_keys_falls_back_to_live_keyspace() {
    let dir = tempfile::tempdir().unwrap();
    let (addr, state) = start(config_for(dir.path(), "absent.rdb")).await;
    state.keyspace().set("live-only", "x", None);

    let mut stream = TcpStream::connect(addr).await.unwrap();
    assert_eq!(
        roundtrip(&mut stream, b"*2\r\n$4\r\nKEYS\r\n$6\r\nlive-*\r\n").await,
        "*1\r\n$9\r\nlive-only\r\n"
    );
}

#[tokio::test]
async fn test_config_get_reports_snapshot_location() {
    let dir = tempfile::tempdir().unwrap();
    let (addr, _state) = start(config_for(dir.path(), "dump.rdb")).await;
    let dir_str = dir.path().display().to_string();

    let mut stream = TcpStream::connect(addr).await.unwrap();
    assert_eq!(
        roundtrip(&mut stream, b"*3\r\n$6\r\nCONFIG\r\n$3\r\nGET\r\n$3\r\ndir\r\n").await,
        format!("*2\r\n$3\r\ndir\r\n${}\r\n{}\r\n", dir_str.len(), dir_str)
    );
}
