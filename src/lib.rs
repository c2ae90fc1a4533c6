//! duckgate — local SQL query gateway over an embedded analytical engine.
//!
//! Accepts JSON-framed commands over HTTP and WebSocket, executes them
//! against DuckDB on a bounded worker pool, and replies with tagged
//! envelopes carrying JSON documents or Arrow IPC streams. In-flight
//! queries are cancellable by id; successful results are cached by a
//! fingerprint of the SQL text and output format.
//!
//! This library exposes the server modules for integration testing.

pub mod cache;
pub mod command;
pub mod config;
pub mod dispatch;
pub mod engine;
pub mod error;
pub mod executor;
pub mod handlers;
pub mod logging;
pub mod registry;
pub mod server;

pub use command::{Command, Envelope, OutputFormat};
pub use config::ServerConfig;
pub use dispatch::{CommandHook, Dispatcher, HookOutcome, ResponseSink};
pub use error::{ErrorKind, GatewayError, Result};
