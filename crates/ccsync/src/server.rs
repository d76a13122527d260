//! The sync server: a project, its engine, and the periodic scan loop.

use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use ccsync_core::{LuaPreprocessor, Project};
use ccsync_sync::{encode_listing, BroadcastReport, SyncEngine};

use crate::bootstrap::Bundler;
use crate::config::ServerConfig;
use crate::error::{Result, ServerError};
use crate::http;

/// The server.
///
/// Provides:
/// - The channel listing
/// - Subscriber sessions over any [`Outbound`](ccsync_sync::Outbound)
/// - The bundled bootstrap script
/// - A scan loop that pushes changes to subscribers
pub struct SyncServer {
    engine: Arc<SyncEngine>,
    bundler: Bundler,
    config: ServerConfig,
}

impl SyncServer {
    /// Create a server for an already loaded project.
    pub fn new(project: Project, config: ServerConfig) -> Arc<Self> {
        let preprocessor = Arc::new(LuaPreprocessor::new(config.minify));
        let engine = SyncEngine::new(Arc::new(project), preprocessor, config.sync.clone());
        Arc::new(Self {
            engine,
            bundler: Bundler::new(&config.lua_root),
            config,
        })
    }

    /// Load the project named by `config.project_path` and create a server.
    pub fn load(config: ServerConfig) -> Result<Arc<Self>> {
        let project = Project::load(&config.project_path)?;
        tracing::info!(
            root = %project.root().display(),
            channels = project.channels().len(),
            "project loaded"
        );
        Ok(Self::new(project, config))
    }

    pub fn engine(&self) -> &Arc<SyncEngine> {
        &self.engine
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Base64 CBOR listing of every channel.
    pub fn listing(&self) -> Result<String> {
        Ok(encode_listing(self.engine.project())?)
    }

    /// Bundle the bootstrap script from the Lua root.
    pub async fn bootstrap(&self) -> Result<String> {
        let bundler = self.bundler.clone();
        tokio::task::spawn_blocking(move || bundler.bundle())
            .await
            .map_err(|e| ServerError::Task(e.to_string()))?
    }

    /// Run one scan so fingerprints and snapshots start from the current tree.
    pub async fn prime(&self) -> Result<BroadcastReport> {
        let report = self.engine.tick().await?;
        for name in &report.failed {
            tracing::warn!(channel = %name, "channel failed to resolve at startup");
        }
        tracing::info!(
            channels = report.changed.len(),
            failed = report.failed.len(),
            "initial scan complete"
        );
        Ok(report)
    }

    /// Scan forever at `scan_interval`. Ticks that fall behind are skipped.
    ///
    /// Rounds are left to finish in the background, so a slow subscriber
    /// never holds up the next scan.
    pub async fn run_scanner(&self) {
        let mut interval = tokio::time::interval(self.config.scan_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            interval.tick().await;
            match self.engine.scan().await {
                Ok(report) => {
                    let round = self.engine.broadcast(report);
                    tracing::trace!(generation = round.generation(), "round dispatched");
                }
                Err(error) => tracing::error!(%error, "scan failed"),
            }
        }
    }

    pub fn spawn_scanner(self: &Arc<Self>) -> JoinHandle<()> {
        let server = Arc::clone(self);
        tokio::spawn(async move { server.run_scanner().await })
    }

    /// Serve HTTP and WebSocket requests until `shutdown` resolves.
    pub async fn serve<F>(self: Arc<Self>, listener: TcpListener, shutdown: F) -> Result<()>
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let router = http::router(self);
        axum::serve(listener, router)
            .with_graceful_shutdown(shutdown)
            .await?;
        Ok(())
    }

    /// Prime, bind, scan and serve.
    pub async fn run<F>(self: Arc<Self>, shutdown: F) -> Result<()>
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        self.prime().await?;

        let addr = self.config.bind_addr();
        let listener = TcpListener::bind(addr).await?;
        tracing::info!(%addr, "listening");

        let scanner = self.spawn_scanner();
        let result = self.serve(listener, shutdown).await;
        scanner.abort();
        result
    }
}
