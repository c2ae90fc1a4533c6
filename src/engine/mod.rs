//! Database engine abstraction for pluggable engine implementations.
//!
//! The gateway never calls the embedded engine directly; it goes through a
//! trait seam so the executor, registry, and dispatcher can be exercised
//! against a mock engine in tests. The DuckDB implementation lives in
//! [`duckdb`] behind the `duckdb` cargo feature.
//!
//! ## Concurrency model
//!
//! A [`QueryEngine`] hands out one [`EngineSession`] per worker thread; a
//! session is owned by exactly one worker and is never entered concurrently.
//! The only cross-thread interaction is through [`InterruptToken`], which an
//! engine must make safe to fire from any thread while the owning worker is
//! executing.

use std::sync::Arc;

use crate::error::Result;

#[cfg(feature = "duckdb")]
pub mod duckdb;
pub mod mock;

/// A handle to the embedded engine, able to open per-worker sessions.
pub trait QueryEngine: Send + Sync {
    /// Open a session with its own physical connection to the database.
    fn open_session(&self) -> Result<Box<dyn EngineSession>>;
}

/// One worker's exclusive connection to the engine.
pub trait EngineSession: Send {
    /// An interrupt token scoped to the next execution on this session.
    ///
    /// Fetched by the worker immediately before running a query and handed
    /// to the cursor registry so a concurrent cancel request can abort the
    /// running operation at the engine level.
    fn interrupt_token(&self) -> Arc<dyn InterruptToken>;

    /// Run `sql` for its side effects, materializing nothing.
    fn execute(&mut self, sql: &str) -> Result<()>;

    /// Run `sql` and serialize the full result set as a JSON array of
    /// row objects.
    fn query_json(&mut self, sql: &str) -> Result<Vec<u8>>;

    /// Run `sql` and serialize the full result set as an Arrow IPC stream.
    fn query_arrow(&mut self, sql: &str) -> Result<Vec<u8>>;
}

/// Cross-thread signal that aborts the execution it was scoped to.
pub trait InterruptToken: Send + Sync {
    fn interrupt(&self);
}
