//! Transport adapters.
//!
//! Both adapters decode commands at the boundary, pick an effective query id,
//! and hand the raw command to the shared dispatcher; neither contains any
//! query semantics of its own.

pub mod http;
pub mod ws;

use std::sync::Arc;

use actix_web::web;
use serde_json::Value as JsonValue;
use uuid::Uuid;

use crate::dispatch::Dispatcher;

/// Shared application state injected into every handler.
pub struct AppState {
    pub dispatcher: Arc<Dispatcher>,
}

/// Register all routes on an actix `App`.
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(http::command_get)
        .service(http::command_post)
        .service(http::cancel_post);
}

/// The id under which a command's execution is registered for cancellation.
///
/// Clients that want to cancel supply their own `queryId`; everything else
/// gets a generated one so the registry never has to deal with anonymous
/// executions.
pub fn effective_query_id(raw: &JsonValue) -> String {
    match raw.get("queryId").and_then(JsonValue::as_str) {
        Some(id) if !id.is_empty() => id.to_string(),
        _ => Uuid::new_v4().to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_effective_query_id_prefers_client_supplied() {
        let raw = json!({"type": "json", "sql": "select 1", "queryId": "mine"});
        assert_eq!(effective_query_id(&raw), "mine");
    }

    #[test]
    fn test_effective_query_id_generates_when_absent() {
        let a = effective_query_id(&json!({"type": "exec", "sql": "select 1"}));
        let b = effective_query_id(&json!({"type": "exec", "sql": "select 1"}));
        assert_ne!(a, b);
        assert!(Uuid::parse_str(&a).is_ok());
    }

    #[test]
    fn test_effective_query_id_ignores_non_string() {
        let raw = json!({"queryId": 42});
        assert!(Uuid::parse_str(&effective_query_id(&raw)).is_ok());
    }
}
