//! Per-connection delivery protocol.
//!
//! A session reads the handshake, sends the initial state with one ack
//! token per operation, marks the end of the initial state, then forwards
//! broadcast rounds under the same ack discipline until the connection
//! closes or is evicted.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use ccsync_core::{ChunkLimits, SyncOperation};

use crate::engine::{Subscription, SyncEngine};
use crate::error::{Result, SyncError};
use crate::messages::{encode_operation, AckToken, Cursor, Frame, Handshake, Phase};
use crate::registry::{ConnectionId, Eviction, Registration, RoundOutcome};
use crate::transport::{Inbox, Outbound};

/// Reason reported when the registry evicts a connection.
pub const BACKLOG_EXCEEDED: &str = "backlog limit exceeded";

/// Configuration for delivery behavior.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Max wait for the handshake and for each ack token. `None` waits
    /// indefinitely.
    pub ack_timeout: Option<Duration>,
    /// Max operations a connection may have queued from earlier rounds
    /// when a new round is dispatched. Beyond that it is evicted.
    pub max_backlog: usize,
    /// Chunk size thresholds for explicit files and directory files.
    pub chunk_limits: ChunkLimits,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            ack_timeout: Some(Duration::from_secs(30)),
            max_backlog: 4096,
            chunk_limits: ChunkLimits::default(),
        }
    }
}

/// Why a session stopped after a successful handshake.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum SessionEnd {
    /// The peer closed the connection.
    #[default]
    Disconnected,
    /// The peer stopped acking or fell behind.
    SlowConsumer(String),
    /// Sending failed.
    Failed(String),
}

impl From<SyncError> for SessionEnd {
    fn from(err: SyncError) -> Self {
        match err {
            SyncError::Disconnected => SessionEnd::Disconnected,
            SyncError::SlowConsumer(reason) => SessionEnd::SlowConsumer(reason),
            other => SessionEnd::Failed(other.to_string()),
        }
    }
}

/// Result of a session.
#[derive(Debug, Default)]
pub struct SessionReport {
    pub connection: ConnectionId,
    /// Subscribed channels in handshake order.
    pub channels: Vec<String>,
    /// Operations sent in the initial phase.
    pub initial_sent: usize,
    /// Operations sent by broadcast rounds.
    pub pushed: usize,
    pub rounds_delivered: usize,
    /// Rounds already covered by this connection's initial resolution.
    pub rounds_skipped: usize,
    pub end: SessionEnd,
}

/// One subscriber connection.
pub struct Session<'e, O: Outbound> {
    engine: &'e SyncEngine,
    outbound: O,
    inbox: Inbox,
    ack_timeout: Option<Duration>,
}

impl<'e, O: Outbound> Session<'e, O> {
    pub fn new(engine: &'e SyncEngine, outbound: O, inbox: Inbox) -> Self {
        Self {
            engine,
            outbound,
            inbox,
            ack_timeout: engine.config().ack_timeout,
        }
    }

    /// Run the session to completion. The connection is closed on return.
    ///
    /// Errors are handshake or subscription failures; anything after that
    /// is reported through [`SessionReport::end`].
    pub async fn run(mut self) -> Result<SessionReport> {
        let result = self.run_inner().await;
        self.outbound.close().await;
        match &result {
            Ok(report) => tracing::info!(
                connection = report.connection,
                initial = report.initial_sent,
                pushed = report.pushed,
                end = ?report.end,
                "session ended"
            ),
            Err(error) => tracing::warn!(%error, "session rejected"),
        }
        result
    }

    async fn run_inner(&mut self) -> Result<SessionReport> {
        let channels = self.receive_handshake().await?;
        let Subscription {
            mut registration,
            operations,
            generation,
            failures,
        } = self.engine.subscribe(channels.clone()).await?;

        for failure in &failures {
            tracing::warn!(
                connection = registration.id,
                channel = %failure.name,
                error = %failure.error,
                "initial resolution failed, channel skipped"
            );
        }
        tracing::info!(
            connection = registration.id,
            ?channels,
            operations = operations.len(),
            "session started"
        );

        let mut report = SessionReport {
            connection: registration.id,
            channels,
            ..SessionReport::default()
        };

        let end = match self.send_initial(&registration, &operations, &mut report).await {
            Ok(()) => self.push_rounds(&mut registration, generation, &mut report).await,
            Err(e) => e.into(),
        };
        report.end = end;
        Ok(report)
    }

    async fn receive_handshake(&mut self) -> Result<Vec<String>> {
        let bytes = match self.ack_timeout {
            Some(limit) => tokio::time::timeout(limit, self.inbox.handshake())
                .await
                .map_err(|_| SyncError::MalformedHandshake("no handshake received".into()))??,
            None => self.inbox.handshake().await?,
        };

        let handshake = Handshake::decode(&bytes)?;
        let channels = self.engine.select_channels(&handshake.channels);
        if channels.is_empty() {
            return Err(SyncError::MalformedHandshake(format!(
                "no known channels in {:?}",
                handshake.channels
            )));
        }
        Ok(channels)
    }

    async fn send_initial(
        &mut self,
        registration: &Registration,
        operations: &[SyncOperation],
        report: &mut SessionReport,
    ) -> Result<()> {
        let mut cursor = Cursor::new(Phase::Initial);
        for op in operations {
            self.send_operation(&mut cursor, op, &registration.eviction).await?;
            report.initial_sent += 1;
        }
        self.outbound
            .send(Frame::initial_complete(operations.len()).encode()?)
            .await
    }

    async fn push_rounds(
        &mut self,
        registration: &mut Registration,
        seen_generation: u64,
        report: &mut SessionReport,
    ) -> SessionEnd {
        let mut cursor = Cursor::new(Phase::Push);
        let eviction = Arc::clone(&registration.eviction);

        loop {
            let next = tokio::select! {
                biased;
                _ = eviction.wait() => None,
                _ = self.inbox.closed() => return SessionEnd::Disconnected,
                round = registration.rounds.recv() => round,
            };
            // The outbox only closes when the registry evicts this connection.
            let Some(round) = next.filter(|_| !eviction.is_evicted()) else {
                return SessionEnd::SlowConsumer(BACKLOG_EXCEEDED.into());
            };

            let count = round.operations.len();
            if round.generation <= seen_generation {
                registration.backlog.fetch_sub(count, Ordering::SeqCst);
                report.rounds_skipped += 1;
                round.finish(RoundOutcome::Skipped);
                continue;
            }

            for op in &round.operations {
                if let Err(e) = self.send_operation(&mut cursor, op, &eviction).await {
                    return e.into();
                }
                registration.backlog.fetch_sub(1, Ordering::SeqCst);
                report.pushed += 1;
            }
            report.rounds_delivered += 1;
            round.finish(RoundOutcome::Delivered(count));
        }
    }

    /// Wait for the cursor's token, then send one operation.
    async fn send_operation(
        &mut self,
        cursor: &mut Cursor,
        op: &SyncOperation,
        eviction: &Eviction,
    ) -> Result<()> {
        await_ack(&mut self.inbox, &cursor.token(), eviction, self.ack_timeout).await?;
        self.outbound.send(encode_operation(op)?).await?;
        cursor.advance();
        Ok(())
    }
}

async fn await_ack(
    inbox: &mut Inbox,
    token: &AckToken,
    eviction: &Eviction,
    timeout: Option<Duration>,
) -> Result<()> {
    let wait = async {
        match timeout {
            Some(limit) => match tokio::time::timeout(limit, inbox.wait_for_token(token)).await {
                Ok(result) => result,
                Err(_) => Err(SyncError::SlowConsumer(format!(
                    "no {token} within {limit:?}"
                ))),
            },
            None => inbox.wait_for_token(token).await,
        }
    };

    tokio::select! {
        biased;
        _ = eviction.wait() => Err(SyncError::SlowConsumer(BACKLOG_EXCEEDED.into())),
        result = wait => result,
    }
}
