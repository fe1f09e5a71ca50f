//! TCP listener, per-connection command loop and the command table.

pub mod commands;
pub mod session;
pub mod state;
pub mod table;

pub use state::{RoleState, ServerState};
pub use table::{Action, CommandSpec, CommandTable, Handler};

use crate::config::ServerConfig;
use crate::core::{Keyspace, KvError};
use crate::persistence::rdb;
use anyhow::Context;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{info, warn};

/// A bound server with its shared state
pub struct Server {
    state: Arc<ServerState>,
    listener: TcpListener,
}

impl Server {
    /// Bind the listener, load the startup snapshot and start the configured
    /// replication role.
    pub async fn bind(mut config: ServerConfig, commands: CommandTable) -> anyhow::Result<Self> {
        config.validate()?;

        let addr = config.server_addr();
        let listener = TcpListener::bind(&addr)
            .await
            .with_context(|| format!("failed to bind {}", addr))?;
        let local = listener.local_addr()?;
        config.server.port = local.port();
        config.replication.listening_port = local.port();

        let keyspace = Keyspace::new(config.to_keyspace_config());
        keyspace.start_ttl_cleanup();
        load_startup_snapshot(&config, &keyspace).await?;

        let state = ServerState::new(config, keyspace, commands)?;
        info!(addr = %local, replica = state.is_replica(), "Listening");

        Ok(Self { state, listener })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn state(&self) -> Arc<ServerState> {
        Arc::clone(&self.state)
    }

    /// Accept connections forever, one task per client
    pub async fn run(self) -> anyhow::Result<()> {
        loop {
            match self.listener.accept().await {
                Ok((stream, addr)) => {
                    if let Err(e) = stream.set_nodelay(true) {
                        warn!(%addr, error = %e, "Failed to set TCP_NODELAY");
                    }
                    tokio::spawn(session::handle_client(Arc::clone(&self.state), stream, addr));
                }
                Err(e) => {
                    warn!("Failed to accept connection: {}", e);
                }
            }
        }
    }
}

/// A missing file means an empty keyspace; anything else that fails is fatal.
async fn load_startup_snapshot(config: &ServerConfig, keyspace: &Keyspace) -> anyhow::Result<()> {
    let Some(path) = config.snapshot_path() else {
        return Ok(());
    };

    match rdb::load_file(&path, keyspace).await {
        Ok(_) => Ok(()),
        Err(KvError::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => {
            info!(path = %path.display(), "No snapshot file, starting empty");
            Ok(())
        }
        Err(e) => Err(e).with_context(|| format!("failed to load snapshot {}", path.display())),
    }
}
