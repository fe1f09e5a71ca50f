use super::state::ServerState;
use super::table::Action;
use crate::core::KvError;
use crate::protocol::{Connection, Frame};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpStream;
use tracing::{debug, info, warn};

/// Serve one client connection until it closes, fails, or turns into a
/// replica link after PSYNC.
pub async fn handle_client(state: Arc<ServerState>, stream: TcpStream, addr: SocketAddr) {
    state.record_connection();
    debug!(%addr, "Client connected");

    let mut conn = Connection::new(stream);
    let mut listening_port = None;

    loop {
        let command = match conn.read_command().await {
            Ok(Some((command, _))) => command,
            Ok(None) => break,
            Err(e) => {
                if let KvError::Protocol(msg) = &e {
                    let reply = Frame::Error(format!("ERR Protocol error: {}", msg));
                    let _ = conn.write_frame(&reply).await;
                }
                debug!(%addr, error = %e, "Closing connection");
                break;
            }
        };
        if command.is_empty() {
            continue;
        }

        let action = match state.dispatch(command).await {
            Ok(action) => action,
            Err(e) if e.is_fatal_to_connection() => {
                warn!(%addr, error = %e, "Command failed, closing connection");
                break;
            }
            Err(e) => Action::Reply(e.to_frame()),
        };

        let written = match action {
            Action::Reply(frame) => conn.write_frame(&frame).await,
            Action::NoReply => Ok(()),
            Action::ListeningPort(port) => {
                listening_port = Some(port);
                conn.write_frame(&Frame::ok()).await
            }
            Action::FullResync => {
                if let Some(master) = state.master().cloned() {
                    info!(%addr, "Client requested full resync");
                    if let Err(e) = master.attach_replica(conn, listening_port).await {
                        warn!(%addr, error = %e, "Failed to attach replica");
                    }
                }
                return;
            }
        };

        if let Err(e) = written {
            debug!(%addr, error = %e, "Write failed");
            break;
        }
    }

    debug!(%addr, "Client disconnected");
}
