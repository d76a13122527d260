//! The sync engine: scanning, broadcasting and subscribing.
//!
//! Scans and new subscriptions are serialized through a generation gate.
//! A scan holds the gate exclusively while it resolves; a subscriber holds
//! it shared while it registers and resolves its own initial state, and
//! remembers the generation it saw. Rounds from that generation or older
//! are then skipped by the subscriber's session, so a connection never
//! receives an operation twice or misses one because of a concurrent scan.
//!
//! Broadcasting does not wait for subscribers. Each round's barrier runs in
//! its own task and commits the round's snapshots once every addressed
//! connection has finished it, in scan order. Later scans meanwhile resolve
//! against the committed snapshots merged with those still in flight.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::{oneshot, RwLock};
use tokio::task::JoinHandle;

use ccsync_core::{Fingerprint, Preprocessor, Project, SyncOperation};

use crate::detector::{ChangeDetector, ChannelFailure, ScanReport, SnapshotTable};
use crate::error::{Result, SyncError};
use crate::protocol::{Session, SessionReport, SyncConfig};
use crate::registry::{Registration, RoundOutcome, SubscriptionRegistry};
use crate::resolver::{Resolver, Snapshots};
use crate::transport::{Inbox, Outbound};

/// A new connection's registration and initial state.
pub struct Subscription {
    pub registration: Registration,
    /// Requested channels resolved in handshake order.
    pub operations: Vec<SyncOperation>,
    /// Last scan generation covered by `operations`.
    pub generation: u64,
    /// Channels whose resolution failed and were left out.
    pub failures: Vec<ChannelFailure>,
}

/// Outcome of one broadcast round.
#[derive(Debug, Default)]
pub struct BroadcastReport {
    pub generation: u64,
    /// Changed channels in project order.
    pub changed: Vec<String>,
    /// Connections that were sent a round.
    pub addressed: usize,
    pub delivered: usize,
    pub skipped: usize,
    /// Connections that closed before finishing the round.
    pub dropped: usize,
    pub evicted: usize,
    /// Channels that failed to resolve during the scan.
    pub failed: Vec<String>,
}

/// A dispatched round whose barrier and commit run in the background.
///
/// Dropping it detaches the round; it still completes and commits.
pub struct PendingBroadcast {
    generation: u64,
    handle: JoinHandle<BroadcastReport>,
}

impl PendingBroadcast {
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Wait until every addressed connection has finished the round and its
    /// snapshots are committed.
    pub async fn finished(self) -> Result<BroadcastReport> {
        self.handle
            .await
            .map_err(|e| SyncError::Internal(format!("broadcast task failed: {e}")))
    }
}

/// Shared engine state. Create with [`SyncEngine::new`] and share the `Arc`.
pub struct SyncEngine {
    resolver: Resolver,
    detector: Arc<Mutex<ChangeDetector>>,
    snapshots: SnapshotTable,
    registry: Arc<SubscriptionRegistry>,
    gate: RwLock<u64>,
    /// Signalled when the most recent round has committed.
    last_commit: Mutex<Option<oneshot::Receiver<()>>>,
    config: SyncConfig,
}

impl SyncEngine {
    pub fn new(
        project: Arc<Project>,
        preprocessor: Arc<dyn Preprocessor>,
        config: SyncConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            resolver: Resolver::new(project, preprocessor, config.chunk_limits),
            detector: Arc::new(Mutex::new(ChangeDetector::new())),
            snapshots: SnapshotTable::new(),
            registry: SubscriptionRegistry::new(),
            gate: RwLock::new(0),
            last_commit: Mutex::new(None),
            config,
        })
    }

    pub fn project(&self) -> &Arc<Project> {
        self.resolver.project()
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<SubscriptionRegistry> {
        &self.registry
    }

    /// Last recorded fingerprint of a channel.
    pub fn fingerprint(&self, channel: &str) -> Option<Fingerprint> {
        self.detector
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .fingerprint(channel)
    }

    pub fn committed_snapshots(&self) -> Snapshots {
        self.snapshots.snapshot()
    }

    /// Keep the known channels of a request, in order, without repeats.
    pub fn select_channels(&self, requested: &[String]) -> Vec<String> {
        let mut seen = HashSet::new();
        requested
            .iter()
            .filter(|name| self.project().contains(name))
            .filter(|name| seen.insert(name.as_str()))
            .cloned()
            .collect()
    }

    /// Resolve one channel against the committed snapshots.
    pub async fn resolve(&self, channel: &str) -> Result<Vec<SyncOperation>> {
        let resolver = self.resolver.clone();
        let committed = self.snapshots.snapshot();
        let channel = channel.to_string();
        tokio::task::spawn_blocking(move || resolver.resolve(&channel, &committed))
            .await
            .map_err(|e| SyncError::Internal(format!("resolve task failed: {e}")))?
            .map(|r| r.operations)
    }

    /// Resolve every channel and record changed fingerprints.
    ///
    /// A scan with changes stages its observed snapshots; they commit when
    /// its report goes through [`SyncEngine::broadcast`] and the round ends.
    pub async fn scan(&self) -> Result<ScanReport> {
        let mut generation = self.gate.write().await;

        let detector = Arc::clone(&self.detector);
        let resolver = self.resolver.clone();
        let baseline = self.snapshots.baseline();
        let report = tokio::task::spawn_blocking(move || {
            detector
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .scan_all(&resolver, &baseline)
        })
        .await
        .map_err(|e| SyncError::Internal(format!("scan task failed: {e}")))?;

        if report.has_changes() {
            self.snapshots.stage(report.generation, report.observed.clone());
        }
        *generation = report.generation;
        Ok(report)
    }

    /// Queue a scan's changes to every interested connection and return
    /// without waiting for them.
    ///
    /// The returned round commits its snapshots once every addressed
    /// connection has finished it and every earlier round has committed.
    pub fn broadcast(&self, report: ScanReport) -> PendingBroadcast {
        let generation = report.generation;
        let mut out = BroadcastReport {
            generation,
            changed: report.changed.iter().map(|c| c.name.clone()).collect(),
            failed: report.failures.iter().map(|f| f.name.clone()).collect(),
            ..BroadcastReport::default()
        };

        if !report.has_changes() {
            return PendingBroadcast {
                generation,
                handle: tokio::spawn(async move { out }),
            };
        }

        let dispatch = self
            .registry
            .dispatch(generation, &report.changed, self.config.max_backlog);
        out.addressed = dispatch.pending.len();
        out.evicted = dispatch.evicted.len();

        let (committed, commit_signal) = oneshot::channel();
        let previous = self
            .last_commit
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(commit_signal);
        let snapshots = self.snapshots.clone();

        let handle = tokio::spawn(async move {
            for (connection, done) in dispatch.pending {
                match done.await {
                    Ok(RoundOutcome::Delivered(_)) => out.delivered += 1,
                    Ok(RoundOutcome::Skipped) => out.skipped += 1,
                    Err(_) => {
                        tracing::debug!(connection, "connection closed during round");
                        out.dropped += 1;
                    }
                }
            }

            // Commits land in scan order.
            if let Some(previous) = previous {
                let _ = previous.await;
            }
            snapshots.commit(out.generation);
            let _ = committed.send(());

            tracing::info!(
                generation = out.generation,
                changed = ?out.changed,
                addressed = out.addressed,
                delivered = out.delivered,
                dropped = out.dropped,
                "broadcast complete"
            );
            out
        });

        PendingBroadcast { generation, handle }
    }

    /// Scan, broadcast, and wait for the round to finish.
    pub async fn tick(&self) -> Result<BroadcastReport> {
        let report = self.scan().await?;
        self.broadcast(report).finished().await
    }

    /// Register a connection and resolve its initial state.
    pub async fn subscribe(&self, channels: Vec<String>) -> Result<Subscription> {
        let generation = self.gate.read().await;
        let registration = self.registry.register(channels.clone());

        let resolver = self.resolver.clone();
        let committed = self.snapshots.snapshot();
        let (operations, failures) = tokio::task::spawn_blocking(move || {
            let mut operations = Vec::new();
            let mut failures = Vec::new();
            for name in channels {
                match resolver.resolve(&name, &committed) {
                    Ok(resolution) => operations.extend(resolution.operations),
                    Err(error) => failures.push(ChannelFailure { name, error }),
                }
            }
            (operations, failures)
        })
        .await
        .map_err(|e| SyncError::Internal(format!("subscribe task failed: {e}")))?;

        Ok(Subscription {
            registration,
            operations,
            generation: *generation,
            failures,
        })
    }

    /// Run a full subscriber session over the given connection halves.
    pub async fn serve<O: Outbound>(&self, outbound: O, inbox: Inbox) -> Result<SessionReport> {
        Session::new(self, outbound, inbox).run().await
    }
}
