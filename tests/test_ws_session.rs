//! WebSocket session behavior over real frames.
//!
//! Runs the gateway on an ephemeral port and drives it with a client
//! connection: frame-level error handling, command independence on one
//! connection, and binary delivery of Arrow payloads.

use std::sync::Arc;
use std::time::Duration;

use actix_web::{web, App, HttpServer};
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value as JsonValue};
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use duckgate::cache::MemoryCache;
use duckgate::engine::mock::{Gate, MockEngine};
use duckgate::executor::TaskExecutor;
use duckgate::handlers::{self, AppState};
use duckgate::registry::CursorRegistry;
use duckgate::Dispatcher;

type WsClient = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

/// Generous for a reply, far below the mock engine's 5s gate timeout, so a
/// reply observed within it cannot have waited for a gated query to finish.
const FRAME_TIMEOUT: Duration = Duration::from_secs(3);

fn state_for(engine: &MockEngine) -> web::Data<AppState> {
    let executor = Arc::new(TaskExecutor::new(engine, 2).unwrap());
    let registry = Arc::new(CursorRegistry::new());
    let cache = Arc::new(MemoryCache::new());
    web::Data::new(AppState {
        dispatcher: Arc::new(Dispatcher::new(executor, registry, cache)),
    })
}

async fn spawn_gateway(engine: &MockEngine) -> String {
    let state = state_for(engine);
    let server = HttpServer::new(move || {
        App::new()
            .app_data(state.clone())
            .configure(handlers::configure)
    })
    .workers(1)
    .bind(("127.0.0.1", 0))
    .unwrap();
    let addr = server.addrs()[0];
    actix_rt::spawn(server.run());
    format!("ws://{addr}/")
}

async fn connect(url: &str) -> WsClient {
    let (client, _) = connect_async(url).await.expect("websocket handshake");
    client
}

async fn send_command(client: &mut WsClient, command: JsonValue) {
    client
        .send(Message::Text(command.to_string()))
        .await
        .unwrap();
}

/// Next data frame, answering heartbeat pings along the way.
async fn next_frame(client: &mut WsClient) -> Message {
    loop {
        let msg = tokio::time::timeout(FRAME_TIMEOUT, client.next())
            .await
            .expect("timed out waiting for a frame")
            .expect("connection closed unexpectedly")
            .expect("websocket protocol error");
        match msg {
            Message::Ping(payload) => client.send(Message::Pong(payload)).await.unwrap(),
            other => return other,
        }
    }
}

fn as_json(msg: &Message) -> JsonValue {
    match msg {
        Message::Text(text) => serde_json::from_str(text).unwrap(),
        other => panic!("expected a text frame, got {other:?}"),
    }
}

#[actix_rt::test]
async fn test_malformed_frame_replies_in_band_without_closing() {
    let engine = MockEngine::new();
    let url = spawn_gateway(&engine).await;
    let mut client = connect(&url).await;

    client
        .send(Message::Text("this is not json".into()))
        .await
        .unwrap();
    let reply = as_json(&next_frame(&mut client).await);
    assert_eq!(reply["type"], "error");
    assert_eq!(reply["kind"], "decode");

    // The same connection still serves commands afterwards.
    send_command(&mut client, json!({"type": "json", "sql": "select 1"})).await;
    let reply = as_json(&next_frame(&mut client).await);
    assert_eq!(reply["type"], "json");
    assert_eq!(reply["data"][0]["1"], 1);
}

#[actix_rt::test]
async fn test_unknown_command_type_keeps_the_connection() {
    let engine = MockEngine::new();
    let url = spawn_gateway(&engine).await;
    let mut client = connect(&url).await;

    send_command(&mut client, json!({"type": "frobnicate"})).await;
    let reply = as_json(&next_frame(&mut client).await);
    assert_eq!(reply["type"], "error");
    assert_eq!(reply["kind"], "decode");

    send_command(&mut client, json!({"type": "exec", "sql": "select 1"})).await;
    let reply = as_json(&next_frame(&mut client).await);
    assert_eq!(reply["type"], "done");
}

#[actix_rt::test]
async fn test_cancel_is_not_blocked_behind_a_running_query() {
    let gate = Gate::new();
    let engine = MockEngine::gated(Arc::clone(&gate));
    let url = spawn_gateway(&engine).await;
    let mut client = connect(&url).await;

    send_command(
        &mut client,
        json!({"type": "json", "sql": "select slow()", "queryId": "q1"}),
    )
    .await;
    // Let the query reach the worker before cancelling it.
    tokio::time::sleep(Duration::from_millis(50)).await;
    send_command(&mut client, json!({"type": "cancel", "queryId": "q1"})).await;

    // The gate is never released: both replies arriving within the frame
    // timeout means the cancel frame was processed while the query ran.
    let first = as_json(&next_frame(&mut client).await);
    let second = as_json(&next_frame(&mut client).await);

    let done_count = [&first, &second]
        .iter()
        .filter(|v| v["type"] == "done")
        .count();
    assert_eq!(done_count, 1, "expected exactly one done reply");

    let error = if first["type"] == "error" { &first } else { &second };
    assert_eq!(error["type"], "error");
    assert_eq!(error["kind"], "cancelled");
}

#[actix_rt::test]
async fn test_arrow_reply_is_a_binary_frame() {
    let engine = MockEngine::new();
    let url = spawn_gateway(&engine).await;
    let mut client = connect(&url).await;

    send_command(&mut client, json!({"type": "arrow", "sql": "select 1"})).await;
    match next_frame(&mut client).await {
        Message::Binary(data) => assert_eq!(data, vec![0xAA, 0xBB, 0xCC]),
        other => panic!("expected a binary frame, got {other:?}"),
    }
}
