use anyhow::{Context, Result};
use clap::Parser;
use relaykv_server::{CommandTable, Server, ServerConfig};
use std::path::PathBuf;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "relaykv-server")]
#[command(about = "RESP key-value server with RDB snapshots and replication", long_about = None)]
struct Args {
    /// YAML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Listen port
    #[arg(short, long)]
    port: Option<u16>,

    /// Listen address
    #[arg(long)]
    bind: Option<String>,

    /// Follow a master, given as "host port"
    #[arg(long, value_name = "HOST PORT")]
    replicaof: Option<String>,

    /// Directory holding the snapshot file
    #[arg(long)]
    dir: Option<String>,

    /// Snapshot file name
    #[arg(long)]
    dbfilename: Option<String>,
}

impl Args {
    fn into_config(self) -> Result<ServerConfig> {
        let mut config = match &self.config {
            Some(path) => ServerConfig::from_file(path)
                .with_context(|| format!("failed to read config {}", path.display()))?,
            None => ServerConfig::default(),
        };

        if let Some(port) = self.port {
            config.server.port = port;
        }
        if let Some(host) = self.bind {
            config.server.host = host;
        }
        if let Some(master) = self.replicaof {
            config.set_replica_of(&master);
        }
        if let Some(dir) = self.dir {
            config.persistence.dir = Some(dir);
        }
        if let Some(name) = self.dbfilename {
            config.persistence.dbfilename = Some(name);
        }

        config.validate()?;
        Ok(config)
    }
}

fn init_tracing(config: &ServerConfig) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.logging.level));

    if config.logging.format == "json" {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = Args::parse().into_config()?;
    init_tracing(&config);

    info!("Starting relaykv server v{}", env!("CARGO_PKG_VERSION"));

    let server = Server::bind(config, CommandTable::standard()).await?;
    server.run().await
}
