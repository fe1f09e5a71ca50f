//! End-to-end tests for the client protocol over real TCP connections
//!
//! These tests cover:
//! - Basic commands and their exact wire replies
//! - Pipelined commands and frames split across writes
//! - Error replies that keep the connection open
//! - Malformed frames that close it

use relaykv_server::{CommandTable, Server, ServerConfig, ServerState};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::{sleep, timeout};

/// Helper to start a master on an ephemeral port
async fn start_server() -> (SocketAddr, Arc<ServerState>) {
    let mut config = ServerConfig::default();
    config.server.port = 0;

    let server = Server::bind(config, CommandTable::standard()).await.unwrap();
    let addr = server.local_addr().unwrap();
    let state = server.state();
    tokio::spawn(server.run());

    (addr, state)
}

/// Read exactly `expected.len()` bytes and compare
async fn expect(stream: &mut TcpStream, expected: &[u8]) {
    let mut buf = vec![0u8; expected.len()];
    timeout(Duration::from_secs(5), stream.read_exact(&mut buf))
        .await
        .expect("timed out waiting for reply")
        .unwrap();
    assert_eq!(
        String::from_utf8_lossy(&buf),
        String::from_utf8_lossy(expected)
    );
}

async fn expect_closed(stream: &mut TcpStream) {
    let mut buf = [0u8; 64];
    let n = timeout(Duration::from_secs(5), stream.read(&mut buf))
        .await
        .expect("timed out waiting for close")
        .unwrap_or(0);
    assert_eq!(n, 0, "unexpected bytes: {:?}", &buf[..n]);
}

#[tokio::test]
async fn test_ping() {
    let (addr, _state) = start_server().await;
    let mut stream = TcpStream::connect(addr).await.unwrap();

    stream.write_all(b"*1\r\n$4\r\nPING\r\n").await.unwrap();
    expect(&mut stream, b"+PONG\r\n").await;
}

#[tokio::test]
async fn test_set_get_and_null() {
    let (addr, _state) = start_server().await;
    let mut stream = TcpStream::connect(addr).await.unwrap();

    stream
        .write_all(b"*3\r\n$3\r\nSET\r\n$3\r\nfoo\r\n$3\r\nbar\r\n")
        .await
        .unwrap();
    expect(&mut stream, b"+OK\r\n").await;

    stream
        .write_all(b"*2\r\n$3\r\nGET\r\n$3\r\nfoo\r\n")
        .await
        .unwrap();
    expect(&mut stream, b"$3\r\nbar\r\n").await;

    stream
        .write_all(b"*2\r\n$3\r\nGET\r\n$7\r\nmissing\r\n")
        .await
        .unwrap();
    expect(&mut stream, b"$-1\r\n").await;
}

#[tokio::test]
async fn test_echo_binary_value() {
    let (addr, _state) = start_server().await;
    let mut stream = TcpStream::connect(addr).await.unwrap();

    stream
        .write_all(b"*2\r\n$4\r\nECHO\r\n$4\r\na\r\nb\r\n")
        .await
        .unwrap();
    expect(&mut stream, b"$4\r\na\r\nb\r\n").await;
}

#[tokio::test]
async fn test_pipelined_commands() {
    let (addr, _state) = start_server().await;
    let mut stream = TcpStream::connect(addr).await.unwrap();

    stream
        .write_all(
            b"*3\r\n$3\r\nSET\r\n$1\r\na\r\n$1\r\n1\r\n\
              *2\r\n$3\r\nGET\r\n$1\r\na\r\n\
              *1\r\n$4\r\nPING\r\n",
        )
        .await
        .unwrap();
    expect(&mut stream, b"+OK\r\n$1\r\n1\r\n+PONG\r\n").await;
}

#[tokio::test]
async fn test_frame_split_across_writes() {
    let (addr, _state) = start_server().await;
    let mut stream = TcpStream::connect(addr).await.unwrap();

    for chunk in [&b"*2\r\n$4\r\nEC"[..], b"HO\r\n$5\r", b"\nhello\r\n"] {
        stream.write_all(chunk).await.unwrap();
        stream.flush().await.unwrap();
        sleep(Duration::from_millis(20)).await;
    }
    expect(&mut stream, b"$5\r\nhello\r\n").await;
}

#[tokio::test]
async fn test_set_px_expires() {
    let (addr, _state) = start_server().await;
    let mut stream = TcpStream::connect(addr).await.unwrap();

    stream
        .write_all(b"*5\r\n$3\r\nSET\r\n$1\r\nk\r\n$1\r\nv\r\n$2\r\nPX\r\n$3\r\n100\r\n")
        .await
        .unwrap();
    expect(&mut stream, b"+OK\r\n").await;

    stream.write_all(b"*2\r\n$3\r\nGET\r\n$1\r\nk\r\n").await.unwrap();
    expect(&mut stream, b"$1\r\nv\r\n").await;

    sleep(Duration::from_millis(150)).await;
    stream.write_all(b"*2\r\n$3\r\nGET\r\n$1\r\nk\r\n").await.unwrap();
    expect(&mut stream, b"$-1\r\n").await;
}

#[tokio::test]
async fn test_errors_keep_connection_open() {
    let (addr, _state) = start_server().await;
    let mut stream = TcpStream::connect(addr).await.unwrap();

    stream
        .write_all(b"*2\r\n$7\r\nFLUSHDB\r\n$5\r\nASYNC\r\n")
        .await
        .unwrap();
    expect(&mut stream, b"-ERR unknown command 'FLUSHDB'\r\n").await;

    stream.write_all(b"*1\r\n$3\r\nGET\r\n").await.unwrap();
    expect(
        &mut stream,
        b"-ERR wrong number of arguments for 'get' command\r\n",
    )
    .await;

    stream.write_all(b"*1\r\n$4\r\nPING\r\n").await.unwrap();
    expect(&mut stream, b"+PONG\r\n").await;
}

#[tokio::test]
async fn test_malformed_frame_closes_connection() {
    let (addr, _state) = start_server().await;
    let mut stream = TcpStream::connect(addr).await.unwrap();

    stream.write_all(b"PING\r\n").await.unwrap();
    expect(&mut stream, b"-ERR Protocol error: expected array\r\n").await;
    expect_closed(&mut stream).await;
}

#[tokio::test]
async fn test_bad_bulk_length_applies_nothing() {
    let (addr, state) = start_server().await;
    let mut stream = TcpStream::connect(addr).await.unwrap();

    stream
        .write_all(b"*3\r\n$3\r\nSET\r\n$1\r\nk\r\n$x\r\nv\r\n")
        .await
        .unwrap();

    let mut reply = Vec::new();
    let mut buf = [0u8; 128];
    loop {
        match timeout(Duration::from_secs(5), stream.read(&mut buf))
            .await
            .expect("timed out waiting for close")
        {
            Ok(0) | Err(_) => break,
            Ok(n) => reply.extend_from_slice(&buf[..n]),
        }
    }
    let reply = String::from_utf8_lossy(&reply);
    assert!(reply.starts_with("-ERR Protocol error"), "{}", reply);
    assert!(reply.ends_with("\r\n"));
    assert_eq!(reply.matches("\r\n").count(), 1);

    assert_eq!(state.keyspace().get(b"k"), None);
    assert!(state.keyspace().is_empty());
}

#[tokio::test]
async fn test_del_and_config_get() {
    let (addr, _state) = start_server().await;
    let mut stream = TcpStream::connect(addr).await.unwrap();

    stream
        .write_all(b"*3\r\n$3\r\nSET\r\n$1\r\nx\r\n$1\r\n1\r\n*3\r\n$3\r\nDEL\r\n$1\r\nx\r\n$1\r\ny\r\n")
        .await
        .unwrap();
    expect(&mut stream, b"+OK\r\n:1\r\n").await;

    stream
        .write_all(b"*3\r\n$6\r\nCONFIG\r\n$3\r\nGET\r\n$10\r\ndbfilename\r\n")
        .await
        .unwrap();
    expect(&mut stream, b"*2\r\n$10\r\ndbfilename\r\n$0\r\n\r\n").await;
}

#[tokio::test]
async fn test_concurrent_clients() {
    let (addr, state) = start_server().await;

    let mut handles = Vec::new();
    for i in 0..10 {
        handles.push(tokio::spawn(async move {
            let mut stream = TcpStream::connect(addr).await.unwrap();
            let key = format!("client{}", i);
            let frame = format!(
                "*3\r\n$3\r\nSET\r\n${}\r\n{}\r\n$1\r\nv\r\n",
                key.len(),
                key
            );
            stream.write_all(frame.as_bytes()).await.unwrap();
            expect(&mut stream, b"+OK\r\n").await;
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    assert_eq!(state.keyspace().len(), 10);
    assert!(state.connections_received() >= 10);
}

#[tokio::test]
async fn test_psync_on_replica_is_an_error_reply() {
    // Nothing listens on the master address; the replica keeps retrying
    let mut config = ServerConfig::default();
    config.server.port = 0;
    config.set_replica_of("127.0.0.1 1");
    config.replication.reconnect_delay_ms = 100;

    let server = Server::bind(config, CommandTable::standard()).await.unwrap();
    let addr = server.local_addr().unwrap();
    tokio::spawn(server.run());

    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream
        .write_all(b"*3\r\n$5\r\nPSYNC\r\n$1\r\n?\r\n$2\r\n-1\r\n")
        .await
        .unwrap();
    expect(&mut stream, b"-ERR PSYNC not supported on a replica\r\n").await;

    stream.write_all(b"*1\r\n$4\r\nPING\r\n").await.unwrap();
    expect(&mut stream, b"+PONG\r\n").await;
}
