//! Command dispatcher: decode, custom-handler offer, built-ins, envelope.
//!
//! Every command ends in exactly one envelope, whether it came from a
//! built-in handler, a cache hit, or the custom handler. No failure on
//! this path may propagate to the transport layer uncaught — a persistent
//! connection serves many unrelated commands and must not be torn down by
//! one of them.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use log::{debug, info, warn};
use serde_json::Value as JsonValue;

use crate::cache::{fingerprint, ResultCache};
use crate::command::{Command, Envelope, OutputFormat};
use crate::error::{GatewayError, Result};
use crate::executor::TaskExecutor;
use crate::registry::CursorRegistry;

/// Where replies go. Implemented by each transport adapter.
#[async_trait]
pub trait ResponseSink: Send + Sync {
    async fn send(&self, envelope: Envelope) -> Result<()>;
}

/// Outcome of offering a command to the custom handler.
pub enum HookOutcome {
    /// Fall through to the built-in handlers.
    NotHandled,
    /// The handler already responded through the sink; stop here.
    Responded,
    /// Send this envelope and stop.
    Reply(Envelope),
}

/// Extension seam for externally supplied command types.
///
/// Injected at construction time; offered the raw command before built-in
/// handling, so it can also intercept built-in types.
#[async_trait]
pub trait CommandHook: Send + Sync {
    async fn handle(
        &self,
        sink: &dyn ResponseSink,
        cache: &dyn ResultCache,
        command: &JsonValue,
        query_id: &str,
    ) -> Result<HookOutcome>;
}

/// Decodes commands and routes them to the executor, registry, and cache.
pub struct Dispatcher {
    executor: Arc<TaskExecutor>,
    registry: Arc<CursorRegistry>,
    cache: Arc<dyn ResultCache>,
    hook: Option<Arc<dyn CommandHook>>,
}

impl Dispatcher {
    pub fn new(
        executor: Arc<TaskExecutor>,
        registry: Arc<CursorRegistry>,
        cache: Arc<dyn ResultCache>,
    ) -> Self {
        Self {
            executor,
            registry,
            cache,
            hook: None,
        }
    }

    pub fn with_hook(mut self, hook: Arc<dyn CommandHook>) -> Self {
        self.hook = Some(hook);
        self
    }

    pub fn registry(&self) -> &Arc<CursorRegistry> {
        &self.registry
    }

    /// Interrupt everything in flight and drain the worker pool.
    pub fn shutdown(&self) {
        let interrupted = self.registry.interrupt_all();
        if interrupted > 0 {
            info!("interrupted {interrupted} in-flight quer(ies) for shutdown");
        }
        self.executor.shutdown();
    }

    /// Process one raw command and deliver exactly one reply through the
    /// sink (unless the custom handler already responded itself).
    pub async fn dispatch(&self, command: &JsonValue, query_id: &str, sink: &dyn ResponseSink) {
        let started = Instant::now();
        let reply = match self.process(command, query_id, sink).await {
            Ok(Some(envelope)) => envelope,
            Ok(None) => {
                debug!("custom handler responded directly (query_id: {query_id})");
                return;
            }
            Err(err) => {
                warn!("command failed (query_id: {query_id}): {err}");
                Envelope::from(err)
            }
        };
        if let Err(err) = sink.send(reply).await {
            warn!("failed to deliver reply (query_id: {query_id}): {err}");
        }
        info!(
            "command done in {} ms (query_id: {query_id})",
            started.elapsed().as_millis()
        );
    }

    async fn process(
        &self,
        raw: &JsonValue,
        query_id: &str,
        sink: &dyn ResponseSink,
    ) -> Result<Option<Envelope>> {
        if let Some(hook) = &self.hook {
            match hook.handle(sink, self.cache.as_ref(), raw, query_id).await? {
                HookOutcome::NotHandled => {}
                HookOutcome::Responded => return Ok(None),
                HookOutcome::Reply(envelope) => return Ok(Some(envelope)),
            }
        }

        match Command::from_value(raw)? {
            Command::Cancel { query_id: target } => {
                let found = self.registry.interrupt(&target);
                // Cancelling a finished or unknown query is a race the
                // protocol tolerates silently.
                debug!("cancel for '{target}': registration found = {found}");
                Ok(Some(Envelope::Done))
            }
            Command::Exec { sql, .. } => {
                // Registered like a data command so a long-running statement
                // (CREATE TABLE AS, bulk INSERT) is cancellable too.
                self.run_interruptible(query_id, move |session| session.execute(&sql))
                    .await?;
                Ok(Some(Envelope::Done))
            }
            Command::Query { format, sql, .. } => {
                self.run_query(format, sql, query_id).await.map(Some)
            }
            Command::Extension(ext) => Err(GatewayError::Decode(format!(
                "unknown command type '{}'",
                ext.name
            ))),
        }
    }

    /// Data command path: cache lookup, then registered execution on miss.
    async fn run_query(
        &self,
        format: OutputFormat,
        sql: String,
        query_id: &str,
    ) -> Result<Envelope> {
        let key = fingerprint(&sql, format);
        if let Some(bytes) = self.cache.get(&key)? {
            debug!("cache hit for {} (query_id: {query_id})", format.as_str());
            return Envelope::payload(format, bytes);
        }

        let payload = self
            .run_interruptible(query_id, move |session| match format {
                OutputFormat::Json => session.query_json(&sql),
                OutputFormat::Arrow => session.query_arrow(&sql),
            })
            .await?;

        if let Err(err) = self.cache.put(&key, &payload) {
            warn!("cache write failed for {key}: {err}");
        }
        Envelope::payload(format, payload)
    }

    /// Run engine work on the pool under a live cursor registration.
    async fn run_interruptible<T, F>(&self, query_id: &str, work: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut dyn crate::engine::EngineSession) -> Result<T> + Send + 'static,
    {
        // Reserve the id before touching the executor so a duplicate
        // registration is rejected immediately.
        let guard = self.registry.claim(query_id)?;
        self.executor
            .submit(move |session| {
                let token = session.interrupt_token();
                if !guard.arm(token) {
                    // Cancelled while still queued; never reached the engine.
                    return Err(GatewayError::Cancelled);
                }
                match work(session) {
                    // The engine surfaces an interrupt as a generic failure;
                    // reclassify it so clients can tell the difference.
                    Err(_) if guard.interrupted() => Err(GatewayError::Cancelled),
                    other => other,
                }
                // `guard` drops here on every path, releasing the id.
            })
            .await
    }
}
