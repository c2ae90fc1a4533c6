//! HTTP endpoints for one-shot commands.
//!
//! `GET /` doubles as the WebSocket attach point: requests carrying an
//! `Upgrade: websocket` header are handed to the session actor, everything
//! else is treated as a command in query-parameter form. `POST /` takes the
//! command as a JSON body, `POST /cancel` is a convenience wrapper around
//! the cancel command.

use std::collections::HashMap;
use std::sync::Arc;

use actix_web::http::{header, StatusCode};
use actix_web::{get, post, web, Error, HttpRequest, HttpResponse};
use actix_web_actors::ws;
use async_trait::async_trait;
use log::debug;
use parking_lot::Mutex;
use serde_json::Value as JsonValue;
use uuid::Uuid;

use crate::command::Envelope;
use crate::dispatch::{Dispatcher, ResponseSink};
use crate::error::{ErrorKind, GatewayError, Result};
use crate::handlers::{effective_query_id, AppState};
use crate::handlers::ws::WsSession;

/// Media type for Arrow IPC stream payloads.
const ARROW_CONTENT_TYPE: &str = "application/vnd.apache.arrow.stream";

/// Response header echoing the effective query id, so clients that let the
/// server generate one still learn what to cancel.
const QUERY_ID_HEADER: &str = "X-Query-ID";

#[get("/")]
pub async fn command_get(
    req: HttpRequest,
    stream: web::Payload,
    query: web::Query<HashMap<String, String>>,
    state: web::Data<AppState>,
) -> std::result::Result<HttpResponse, Error> {
    if is_websocket_upgrade(&req) {
        debug!("upgrading GET / to a WebSocket session");
        let session = WsSession::new(Arc::clone(&state.dispatcher));
        return ws::start(session, &req, stream);
    }

    let params = query.into_inner();
    // A full command may be passed as `?query=<json>`; otherwise the query
    // parameters map directly onto the command object's string fields.
    let raw = if let Some(encoded) = params.get("query") {
        match serde_json::from_str::<JsonValue>(encoded) {
            Ok(value) => value,
            Err(e) => {
                let envelope = Envelope::from(GatewayError::Decode(format!(
                    "invalid 'query' parameter: {e}"
                )));
                return Ok(envelope_response(envelope, &Uuid::new_v4().to_string()));
            }
        }
    } else {
        JsonValue::Object(
            params
                .into_iter()
                .map(|(k, v)| (k, JsonValue::String(v)))
                .collect(),
        )
    };
    Ok(run_buffered(&state.dispatcher, raw).await)
}

#[post("/")]
pub async fn command_post(
    body: web::Bytes,
    state: web::Data<AppState>,
) -> std::result::Result<HttpResponse, Error> {
    let raw: JsonValue = match serde_json::from_slice(&body) {
        Ok(value) => value,
        Err(e) => {
            // No command to take an id from; responses carry one anyway.
            let envelope =
                Envelope::from(GatewayError::Decode(format!("invalid JSON body: {e}")));
            return Ok(envelope_response(envelope, &Uuid::new_v4().to_string()));
        }
    };
    Ok(run_buffered(&state.dispatcher, raw).await)
}

/// `POST /cancel` with a `{"queryId": "..."}` body. Equivalent to sending a
/// cancel command on either transport.
#[post("/cancel")]
pub async fn cancel_post(
    body: web::Bytes,
    state: web::Data<AppState>,
) -> std::result::Result<HttpResponse, Error> {
    let raw: JsonValue = match serde_json::from_slice(&body) {
        Ok(JsonValue::Object(mut fields)) => {
            fields.insert("type".to_string(), JsonValue::String("cancel".to_string()));
            JsonValue::Object(fields)
        }
        _ => {
            let envelope = Envelope::from(GatewayError::Decode(
                "cancel body must be a JSON object".into(),
            ));
            return Ok(envelope_response(envelope, &Uuid::new_v4().to_string()));
        }
    };
    Ok(run_buffered(&state.dispatcher, raw).await)
}

/// Run one command to completion and translate its envelope into a response.
async fn run_buffered(dispatcher: &Arc<Dispatcher>, raw: JsonValue) -> HttpResponse {
    let query_id = effective_query_id(&raw);
    let sink = BufferedSink::default();
    dispatcher.dispatch(&raw, &query_id, &sink).await;
    sink.into_response(&query_id)
}

/// Captures the single envelope produced for a one-shot HTTP command.
#[derive(Default)]
struct BufferedSink {
    slot: Mutex<Option<Envelope>>,
}

#[async_trait]
impl ResponseSink for BufferedSink {
    async fn send(&self, envelope: Envelope) -> Result<()> {
        *self.slot.lock() = Some(envelope);
        Ok(())
    }
}

impl BufferedSink {
    fn into_response(self, query_id: &str) -> HttpResponse {
        let envelope = self.slot.into_inner().unwrap_or_else(|| {
            Envelope::from(GatewayError::Executor("no response was produced".into()))
        });
        envelope_response(envelope, query_id)
    }
}

fn envelope_response(envelope: Envelope, query_id: &str) -> HttpResponse {
    let status = match &envelope {
        Envelope::Error { kind, .. } => status_for(*kind),
        _ => StatusCode::OK,
    };
    let mut builder = HttpResponse::build(status);
    builder.insert_header((QUERY_ID_HEADER, query_id));
    match envelope {
        Envelope::Arrow { data } => builder
            .insert_header((header::CONTENT_TYPE, ARROW_CONTENT_TYPE))
            .body(data),
        other => builder
            .insert_header((header::CONTENT_TYPE, "application/json"))
            .body(other.json_body()),
    }
}

fn status_for(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::Decode => StatusCode::BAD_REQUEST,
        ErrorKind::Conflict => StatusCode::CONFLICT,
        // Nonstandard "client closed request"; the conventional status for
        // work abandoned at the client's initiative.
        ErrorKind::Cancelled => {
            StatusCode::from_u16(499).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
        }
        ErrorKind::Execution | ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn is_websocket_upgrade(req: &HttpRequest) -> bool {
    req.headers()
        .get(header::UPGRADE)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.eq_ignore_ascii_case("websocket"))
        .unwrap_or(false)
}
