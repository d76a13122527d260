//! HTTP and WebSocket endpoints against a live listener.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use base64::Engine as _;
use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;
use tokio_tungstenite::tungstenite::Message;

use ccsync::sync::{ChannelListing, Frame, Handshake, Phase};
use ccsync::{ChannelKind, ServerConfig, SyncServer};
use ccsync_testkit::ProjectFixture;

struct Running {
    addr: SocketAddr,
    server: Arc<SyncServer>,
    stop: Option<oneshot::Sender<()>>,
}

impl Drop for Running {
    fn drop(&mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
    }
}

async fn start(fixture: &ProjectFixture) -> Running {
    let config = ServerConfig {
        project_path: fixture.write_project_json(),
        lua_root: fixture.write_lua_root(),
        ..ServerConfig::default()
    };
    let server = SyncServer::load(config).unwrap();
    server.prime().await.unwrap();

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (stop, stopped) = oneshot::channel::<()>();
    let serving = Arc::clone(&server);
    tokio::spawn(async move {
        serving
            .serve(listener, async move {
                let _ = stopped.await;
            })
            .await
    });

    Running {
        addr,
        server,
        stop: Some(stop),
    }
}

async fn get(addr: SocketAddr, path: &str) -> (String, String) {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    let request = format!("GET {path} HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n");
    stream.write_all(request.as_bytes()).await.unwrap();

    let mut raw = Vec::new();
    stream.read_to_end(&mut raw).await.unwrap();
    let text = String::from_utf8(raw).unwrap();
    let (head, body) = text.split_once("\r\n\r\n").unwrap();
    (head.to_string(), body.to_string())
}

async fn next_frame<S>(ws: &mut S) -> Frame
where
    S: StreamExt<Item = Result<Message, tokio_tungstenite::tungstenite::Error>> + Unpin,
{
    loop {
        let message = tokio::time::timeout(Duration::from_secs(5), ws.next())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        if let Message::Binary(bytes) = message {
            return Frame::decode(&bytes).unwrap();
        }
    }
}

#[tokio::test]
async fn test_listing_endpoint() {
    let fixture = ProjectFixture::util_main();
    let running = start(&fixture).await;

    let (head, body) = get(running.addr, "/").await;
    assert!(head.starts_with("HTTP/1.1 200"));

    let bytes = base64::engine::general_purpose::STANDARD
        .decode(body.trim())
        .unwrap();
    let listing: Vec<ChannelListing> = ciborium::from_reader(bytes.as_slice()).unwrap();
    assert_eq!(listing.len(), 2);
    assert_eq!(listing[0].channel, "util");
    assert_eq!(listing[0].kind, ChannelKind::Library);
    assert_eq!(listing[1].kind, ChannelKind::Script);
}

#[tokio::test]
async fn test_bootstrap_endpoint() {
    let fixture = ProjectFixture::util_main();
    let running = start(&fixture).await;

    let (head, body) = get(running.addr, "/sync.lua").await;
    assert!(head.starts_with("HTTP/1.1 200"));
    assert!(body.contains("__bundle_modules[\"msgpack\"]"));
    assert!(body.contains("__bundle_modules[\"base64\"]"));
}

#[tokio::test]
async fn test_websocket_session() {
    let fixture = ProjectFixture::util_main();
    let running = start(&fixture).await;

    let url = format!("ws://{}/subscribe", running.addr);
    let (mut ws, _) = tokio_tungstenite::connect_async(url).await.unwrap();

    // Text handshake: base64 of the CBOR body.
    let handshake = Handshake::new(["main"]).encode_text().unwrap();
    ws.send(Message::Text(handshake)).await.unwrap();

    ws.send(Message::Text(Phase::Initial.token(0).to_string())).await.unwrap();
    let first = next_frame(&mut ws).await;
    assert_eq!(first.as_operation().and_then(|op| op.file_path()), Some("a.lua"));

    ws.send(Message::Text(Phase::Initial.token(1).to_string())).await.unwrap();
    let second = next_frame(&mut ws).await;
    assert_eq!(
        second.as_operation().and_then(|op| op.data()),
        Some("local util = require(\"/util\")\nprint(util.answer)\n")
    );
    assert_eq!(next_frame(&mut ws).await, Frame::initial_complete(2));

    // Push phase.
    ws.send(Message::Text(Phase::Push.token(0).to_string())).await.unwrap();
    fixture.write("main.lua", "print('v2')\n");
    let tick = {
        let engine = Arc::clone(running.server.engine());
        tokio::spawn(async move { engine.tick().await })
    };

    let pushed = next_frame(&mut ws).await;
    assert_eq!(pushed.as_operation().and_then(|op| op.file_path()), Some("a.lua"));
    ws.send(Message::Text(Phase::Push.token(1).to_string())).await.unwrap();
    let pushed = next_frame(&mut ws).await;
    assert_eq!(pushed.as_operation().and_then(|op| op.data()), Some("print('v2')\n"));

    let report = tick.await.unwrap().unwrap();
    assert_eq!(report.delivered, 1);

    ws.close(None).await.unwrap();
}

#[tokio::test]
async fn test_websocket_bad_handshake_closes() {
    let fixture = ProjectFixture::util_main();
    let running = start(&fixture).await;

    let url = format!("ws://{}/subscribe", running.addr);
    let (mut ws, _) = tokio_tungstenite::connect_async(url).await.unwrap();
    ws.send(Message::Binary(Handshake::new(["missing"]).encode().unwrap()))
        .await
        .unwrap();

    let next = tokio::time::timeout(Duration::from_secs(5), ws.next())
        .await
        .unwrap();
    assert!(matches!(next, Some(Ok(Message::Close(_))) | None | Some(Err(_))));
}
