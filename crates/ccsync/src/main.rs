//! ccsync command line.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use ccsync::{ServerConfig, SyncConfig, SyncServer};

#[derive(Parser)]
#[command(name = "ccsync")]
#[command(author, version, about = "Sync Lua channels to ComputerCraft computers", long_about = None)]
struct Cli {
    /// Port to listen on
    #[arg(short, long, default_value = "4000")]
    port: u16,

    /// Project description file
    #[arg(long, default_value = "project.json")]
    project: PathBuf,

    /// Directory holding sync.lua, msgpack.lua and base64.lua
    #[arg(long, default_value = "lua")]
    lua_root: PathBuf,

    /// Strip comments and whitespace from delivered sources
    #[arg(long)]
    minify: bool,

    /// Milliseconds between change scans
    #[arg(long, default_value = "500")]
    scan_interval_ms: u64,

    /// Seconds to wait for each ack before dropping a subscriber (0 waits forever)
    #[arg(long, default_value = "30")]
    ack_timeout_secs: u64,

    /// Queued operations per subscriber before it is dropped
    #[arg(long, default_value = "4096")]
    max_backlog: usize,
}

impl Cli {
    fn into_config(self) -> ServerConfig {
        let defaults = SyncConfig::default();
        ServerConfig {
            port: self.port,
            project_path: self.project,
            lua_root: self.lua_root,
            scan_interval: Duration::from_millis(self.scan_interval_ms.max(1)),
            minify: self.minify,
            sync: SyncConfig {
                ack_timeout: (self.ack_timeout_secs > 0)
                    .then(|| Duration::from_secs(self.ack_timeout_secs)),
                max_backlog: self.max_backlog,
                chunk_limits: defaults.chunk_limits,
            },
        }
    }
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_err() {
        // Without a signal handler, run until killed.
        std::future::pending::<()>().await;
    }
    tracing::info!("shutting down");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("ccsync=info,ccsync_sync=info")))
        .with(fmt::layer())
        .init();

    let config = Cli::parse().into_config();
    let project_path = config.project_path.clone();
    let server = SyncServer::load(config)
        .with_context(|| format!("loading {}", project_path.display()))?;

    server.run(shutdown_signal()).await?;
    Ok(())
}
