//! Mock engine for exercising the executor, registry, and dispatcher
//! without a real database.
//!
//! Counts engine invocations (to verify cache hits never re-execute) and
//! can hold queries open on a gate until released or interrupted (to
//! verify cancellation mid-flight).

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::engine::{EngineSession, InterruptToken, QueryEngine};
use crate::error::{GatewayError, Result};

/// How long a gated query waits before giving up. Only a misbehaving test
/// leaves a gate unreleased this long.
const GATE_TIMEOUT: Duration = Duration::from_secs(5);

/// A gate that keeps mock executions blocked until released.
#[derive(Default)]
pub struct Gate {
    released: AtomicBool,
}

impl Gate {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn release(&self) {
        self.released.store(true, Ordering::SeqCst);
    }

    fn is_released(&self) -> bool {
        self.released.load(Ordering::SeqCst)
    }
}

struct Shared {
    calls: AtomicUsize,
    gate: Option<Arc<Gate>>,
    fail_with: Option<String>,
    json_payload: Vec<u8>,
    arrow_payload: Vec<u8>,
}

/// Configurable in-process stand-in for the embedded engine.
pub struct MockEngine {
    shared: Arc<Shared>,
}

impl MockEngine {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                calls: AtomicUsize::new(0),
                gate: None,
                fail_with: None,
                json_payload: b"[{\"1\":1}]".to_vec(),
                arrow_payload: vec![0xAA, 0xBB, 0xCC],
            }),
        }
    }

    /// Block every execution on `gate` until it is released or the query
    /// is interrupted.
    pub fn gated(gate: Arc<Gate>) -> Self {
        let mut engine = Self::new();
        Arc::get_mut(&mut engine.shared).unwrap().gate = Some(gate);
        engine
    }

    /// Fail every execution with the given engine message.
    pub fn failing(message: &str) -> Self {
        let mut engine = Self::new();
        Arc::get_mut(&mut engine.shared).unwrap().fail_with = Some(message.to_string());
        engine
    }

    /// Handle onto the invocation counter, usable after the engine has been
    /// handed to the executor.
    pub fn calls(&self) -> CallCounter {
        CallCounter {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl Default for MockEngine {
    fn default() -> Self {
        Self::new()
    }
}

/// Observer for the number of times the mock engine actually executed.
#[derive(Clone)]
pub struct CallCounter {
    shared: Arc<Shared>,
}

impl CallCounter {
    pub fn get(&self) -> usize {
        self.shared.calls.load(Ordering::SeqCst)
    }
}

impl QueryEngine for MockEngine {
    fn open_session(&self) -> Result<Box<dyn EngineSession>> {
        Ok(Box::new(MockSession {
            shared: Arc::clone(&self.shared),
            interrupted: Arc::new(AtomicBool::new(false)),
        }))
    }
}

struct MockSession {
    shared: Arc<Shared>,
    interrupted: Arc<AtomicBool>,
}

impl MockSession {
    fn run(&mut self) -> Result<()> {
        self.shared.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(message) = &self.shared.fail_with {
            return Err(GatewayError::Execution(message.clone()));
        }
        if let Some(gate) = &self.shared.gate {
            let started = Instant::now();
            loop {
                if self.interrupted.load(Ordering::SeqCst) {
                    // Mirrors the engine surfacing an interrupt as a
                    // failed execution; the dispatcher reclassifies it.
                    return Err(GatewayError::Execution("INTERRUPT: query aborted".into()));
                }
                if gate.is_released() {
                    break;
                }
                if started.elapsed() > GATE_TIMEOUT {
                    return Err(GatewayError::Execution("gate was never released".into()));
                }
                std::thread::sleep(Duration::from_millis(2));
            }
        }
        Ok(())
    }
}

impl EngineSession for MockSession {
    fn interrupt_token(&self) -> Arc<dyn InterruptToken> {
        // Scope the token to the upcoming execution.
        self.interrupted.store(false, Ordering::SeqCst);
        Arc::new(MockInterrupt {
            flag: Arc::clone(&self.interrupted),
        })
    }

    fn execute(&mut self, _sql: &str) -> Result<()> {
        self.run()
    }

    fn query_json(&mut self, _sql: &str) -> Result<Vec<u8>> {
        self.run()?;
        Ok(self.shared.json_payload.clone())
    }

    fn query_arrow(&mut self, _sql: &str) -> Result<Vec<u8>> {
        self.run()?;
        Ok(self.shared.arrow_payload.clone())
    }
}

struct MockInterrupt {
    flag: Arc<AtomicBool>,
}

impl InterruptToken for MockInterrupt {
    fn interrupt(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }
}
