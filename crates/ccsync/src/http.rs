//! HTTP and WebSocket adapter.
//!
//! - `GET /` - channel listing
//! - `GET /subscribe` - WebSocket subscriber session
//! - `GET /sync.lua` - bundled bootstrap script

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;

use ccsync_sync::{inbox, Outbound, SyncError};

use crate::error::ServerError;
use crate::server::SyncServer;

/// Error returned by HTTP handlers.
pub struct HttpError(ServerError);

impl IntoResponse for HttpError {
    fn into_response(self) -> Response {
        tracing::error!(error = %self.0, "request failed");
        (StatusCode::INTERNAL_SERVER_ERROR, self.0.to_string()).into_response()
    }
}

impl<E> From<E> for HttpError
where
    E: Into<ServerError>,
{
    fn from(err: E) -> Self {
        HttpError(err.into())
    }
}

type HttpResult<T> = Result<T, HttpError>;

/// Build the router.
pub fn router(server: Arc<SyncServer>) -> Router {
    Router::new()
        .route("/", get(list_channels))
        .route("/subscribe", get(subscribe))
        .route("/sync.lua", get(bootstrap_script))
        .with_state(server)
}

/// GET / - base64 CBOR channel listing
async fn list_channels(State(server): State<Arc<SyncServer>>) -> HttpResult<String> {
    Ok(server.listing()?)
}

/// GET /sync.lua - bundled bootstrap script
async fn bootstrap_script(State(server): State<Arc<SyncServer>>) -> HttpResult<Response> {
    let script = server.bootstrap().await?;
    Ok(([(header::CONTENT_TYPE, "text/plain; charset=utf-8")], script).into_response())
}

/// GET /subscribe - upgrade to a subscriber session
async fn subscribe(ws: WebSocketUpgrade, State(server): State<Arc<SyncServer>>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(server, socket))
}

enum Outgoing {
    Frame(Vec<u8>),
    Close,
}

/// Outbound half of a WebSocket, feeding the writer task.
struct WsOutbound {
    tx: mpsc::UnboundedSender<Outgoing>,
    closed: AtomicBool,
}

#[async_trait]
impl Outbound for WsOutbound {
    async fn send(&self, frame: Vec<u8>) -> ccsync_sync::Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(SyncError::Disconnected);
        }
        self.tx
            .send(Outgoing::Frame(frame))
            .map_err(|_| SyncError::Disconnected)
    }

    async fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            let _ = self.tx.send(Outgoing::Close);
        }
    }
}

async fn handle_socket(server: Arc<SyncServer>, socket: WebSocket) {
    let (mut sink, mut stream) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel();
    let (mut inbox_tx, inbox) = inbox();

    let writer = tokio::spawn(async move {
        while let Some(outgoing) = rx.recv().await {
            match outgoing {
                Outgoing::Frame(bytes) => {
                    if sink.send(Message::Binary(bytes)).await.is_err() {
                        break;
                    }
                }
                Outgoing::Close => {
                    let _ = sink.send(Message::Close(None)).await;
                    break;
                }
            }
        }
    });

    // Dropping `inbox_tx` when the socket ends is what the session sees
    // as a disconnect.
    let reader = tokio::spawn(async move {
        while let Some(Ok(message)) = stream.next().await {
            match message {
                Message::Text(text) => inbox_tx.deliver(text.into_bytes()),
                Message::Binary(bytes) => inbox_tx.deliver(bytes),
                Message::Close(_) => break,
                Message::Ping(_) | Message::Pong(_) => {}
            }
        }
    });

    let outbound = WsOutbound {
        tx,
        closed: AtomicBool::new(false),
    };
    if let Err(error) = server.engine().serve(outbound, inbox).await {
        tracing::debug!(%error, "subscriber rejected");
    }

    reader.abort();
    let _ = writer.await;
}
