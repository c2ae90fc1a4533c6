//! WebSocket session actor
//!
//! One actor per connection. Each text frame is a self-contained command;
//! commands run concurrently on the worker pool and their envelopes come
//! back in completion order, so a slow query never blocks a cancel sent
//! after it. A failed command produces an error envelope on the same
//! connection and never terminates the session.

use std::sync::Arc;
use std::time::{Duration, Instant};

use actix::{Actor, ActorContext, Addr, AsyncContext, Handler, Message, StreamHandler};
use actix_web_actors::ws;
use async_trait::async_trait;
use log::{debug, info, warn};
use serde_json::Value as JsonValue;
use uuid::Uuid;

use crate::command::Envelope;
use crate::dispatch::{Dispatcher, ResponseSink};
use crate::error::{GatewayError, Result};
use crate::handlers::effective_query_id;

/// How often heartbeat pings are sent
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(5);

/// How long before lack of client response causes a timeout
const CLIENT_TIMEOUT: Duration = Duration::from_secs(10);

/// WebSocket session actor
///
/// Manages the lifecycle of one duplex connection: heartbeat/ping-pong for
/// connection health, command intake, and envelope delivery.
pub struct WsSession {
    dispatcher: Arc<Dispatcher>,

    /// Unique connection identifier, for log correlation only.
    connection_id: String,

    /// Client must answer a ping within CLIENT_TIMEOUT, otherwise we drop
    /// the connection.
    hb: Instant,
}

impl WsSession {
    pub fn new(dispatcher: Arc<Dispatcher>) -> Self {
        Self {
            dispatcher,
            connection_id: Uuid::new_v4().to_string(),
            hb: Instant::now(),
        }
    }

    /// Start the heartbeat process
    fn hb(&self, ctx: &mut ws::WebsocketContext<Self>) {
        ctx.run_interval(HEARTBEAT_INTERVAL, |act, ctx| {
            if Instant::now().duration_since(act.hb) > CLIENT_TIMEOUT {
                warn!(
                    "WebSocket client heartbeat failed, disconnecting: {}",
                    act.connection_id
                );
                ctx.stop();
                return;
            }
            ctx.ping(b"");
        });
    }

    /// Hand one raw command to the dispatcher without blocking the mailbox.
    fn submit_command(&self, raw: JsonValue, ctx: &mut ws::WebsocketContext<Self>) {
        let dispatcher = Arc::clone(&self.dispatcher);
        let query_id = effective_query_id(&raw);
        let sink = WsSink {
            addr: ctx.address(),
        };
        // Deliberately not ctx.wait/ctx.spawn: a pending command must not
        // stop the actor from reading the next frame (a cancel, usually).
        actix::spawn(async move {
            dispatcher.dispatch(&raw, &query_id, &sink).await;
        });
    }
}

impl Actor for WsSession {
    type Context = ws::WebsocketContext<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        info!("WebSocket connection established: {}", self.connection_id);
        self.hb(ctx);
    }

    fn stopped(&mut self, _ctx: &mut Self::Context) {
        info!("WebSocket connection closed: {}", self.connection_id);
    }
}

/// Handle WebSocket messages from the client
impl StreamHandler<std::result::Result<ws::Message, ws::ProtocolError>> for WsSession {
    fn handle(
        &mut self,
        msg: std::result::Result<ws::Message, ws::ProtocolError>,
        ctx: &mut Self::Context,
    ) {
        match msg {
            Ok(ws::Message::Ping(msg)) => {
                self.hb = Instant::now();
                ctx.pong(&msg);
            }
            Ok(ws::Message::Pong(_)) => {
                self.hb = Instant::now();
            }
            Ok(ws::Message::Text(text)) => {
                debug!("received command frame: {}", text);
                match serde_json::from_str::<JsonValue>(&text) {
                    Ok(raw) => self.submit_command(raw, ctx),
                    Err(e) => {
                        // Malformed frame: reply in-band, keep the
                        // connection for subsequent commands.
                        let envelope = Envelope::from(GatewayError::Decode(format!(
                            "invalid JSON frame: {e}"
                        )));
                        ctx.text(envelope.json_body());
                    }
                }
            }
            Ok(ws::Message::Binary(_)) => {
                warn!("Binary messages not supported");
            }
            Ok(ws::Message::Close(reason)) => {
                info!("Client requested close: {:?}", reason);
                ctx.close(reason);
                ctx.stop();
            }
            Err(e) => {
                warn!("WebSocket protocol error: {}", e);
                ctx.stop();
            }
            _ => {}
        }
    }
}

/// Envelope delivery back into the session actor's context.
#[derive(Message)]
#[rtype(result = "()")]
pub struct Reply(pub Envelope);

impl Handler<Reply> for WsSession {
    type Result = ();

    fn handle(&mut self, msg: Reply, ctx: &mut Self::Context) {
        match msg.0 {
            // Arrow payloads go out as binary frames; everything else as a
            // JSON text frame.
            Envelope::Arrow { data } => ctx.binary(data),
            other => ctx.text(other.json_body()),
        }
    }
}

/// Sink that routes dispatcher replies back through the actor mailbox.
struct WsSink {
    addr: Addr<WsSession>,
}

#[async_trait]
impl ResponseSink for WsSink {
    async fn send(&self, envelope: Envelope) -> Result<()> {
        // do_send drops silently if the connection is already gone; there
        // is no one left to reply to in that case.
        self.addr.do_send(Reply(envelope));
        Ok(())
    }
}
