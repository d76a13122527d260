//! Server configuration.

use std::net::{Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

use ccsync_sync::SyncConfig;

/// Configuration for [`SyncServer`](crate::SyncServer).
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// TCP port for the HTTP and WebSocket listener.
    pub port: u16,
    /// Path to the project JSON file.
    pub project_path: PathBuf,
    /// Directory holding `sync.lua` and its bundled modules.
    pub lua_root: PathBuf,
    /// Time between change scans.
    pub scan_interval: Duration,
    /// Strip comments and whitespace from delivered sources.
    pub minify: bool,
    /// Delivery configuration.
    pub sync: SyncConfig,
}

impl ServerConfig {
    pub fn bind_addr(&self) -> SocketAddr {
        SocketAddr::from((Ipv4Addr::UNSPECIFIED, self.port))
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 4000,
            project_path: PathBuf::from("project.json"),
            lua_root: PathBuf::from("lua"),
            scan_interval: Duration::from_millis(500),
            minify: false,
            sync: SyncConfig::default(),
        }
    }
}
