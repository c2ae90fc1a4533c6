//! Bounded worker pool for blocking database work.
//!
//! Actix's event loop never runs engine calls directly; it submits them
//! here and suspends only on the reply channel. Each worker thread owns its
//! own engine session, so the engine is never entered concurrently through
//! one physical handle. When all workers are busy, submissions queue FIFO
//! with no depth limit — an accepted tradeoff for a local, single-tenant
//! server.

use std::panic::{self, AssertUnwindSafe};
use std::sync::{mpsc, Arc};
use std::thread;

use log::{debug, warn};
use parking_lot::Mutex;
use tokio::sync::oneshot;

use crate::engine::{EngineSession, QueryEngine};
use crate::error::{GatewayError, Result};

type Job = Box<dyn FnOnce(&mut dyn EngineSession) + Send + 'static>;

/// Thread pool running synchronous engine work off the event loop.
pub struct TaskExecutor {
    sender: Mutex<Option<mpsc::Sender<Job>>>,
    workers: Mutex<Vec<thread::JoinHandle<()>>>,
}

impl TaskExecutor {
    /// Spawn `worker_count` threads, each with its own engine session.
    pub fn new(engine: &dyn QueryEngine, worker_count: usize) -> Result<Self> {
        let worker_count = worker_count.max(1);
        let (sender, receiver) = mpsc::channel::<Job>();
        let receiver = Arc::new(Mutex::new(receiver));

        let mut workers = Vec::with_capacity(worker_count);
        for idx in 0..worker_count {
            let mut session = engine.open_session()?;
            let receiver = Arc::clone(&receiver);
            let handle = thread::Builder::new()
                .name(format!("duckgate-worker-{idx}"))
                .spawn(move || loop {
                    // Holding the lock while waiting parks idle workers on
                    // the mutex; whichever holds it takes the next job.
                    let job = {
                        let guard = receiver.lock();
                        guard.recv()
                    };
                    match job {
                        Ok(job) => job(session.as_mut()),
                        Err(_) => break, // queue closed, pool shutting down
                    }
                })
                .map_err(|e| GatewayError::Executor(format!("failed to spawn worker: {e}")))?;
            workers.push(handle);
        }
        debug!("task executor started with {worker_count} worker(s)");

        Ok(Self {
            sender: Mutex::new(Some(sender)),
            workers: Mutex::new(workers),
        })
    }

    /// Submit one unit of synchronous engine work and await its result.
    ///
    /// Never runs on the caller's thread. A panic inside `work` is caught
    /// and surfaced as a failed result; the worker and the pool survive.
    pub async fn submit<T, F>(&self, work: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut dyn EngineSession) -> Result<T> + Send + 'static,
    {
        let (done_tx, done_rx) = oneshot::channel();
        let job: Job = Box::new(move |session| {
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| work(session)))
                .unwrap_or_else(|payload| {
                    Err(GatewayError::Execution(panic_message(payload.as_ref())))
                });
            // The caller may have disconnected; nothing left to do then.
            let _ = done_tx.send(outcome);
        });

        {
            let sender = self.sender.lock();
            let sender = sender
                .as_ref()
                .ok_or_else(|| GatewayError::Executor("worker pool is shut down".into()))?;
            sender
                .send(job)
                .map_err(|_| GatewayError::Executor("worker pool is shut down".into()))?;
        }

        done_rx
            .await
            .map_err(|_| GatewayError::Executor("worker dropped the reply channel".into()))?
    }

    /// Close the queue and join the workers. Queued jobs still drain first.
    pub fn shutdown(&self) {
        if self.sender.lock().take().is_none() {
            return;
        }
        let workers: Vec<_> = self.workers.lock().drain(..).collect();
        for handle in workers {
            if handle.join().is_err() {
                warn!("worker thread terminated abnormally during shutdown");
            }
        }
        debug!("task executor shut down");
    }
}

impl Drop for TaskExecutor {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        format!("worker panicked: {msg}")
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        format!("worker panicked: {msg}")
    } else {
        "worker panicked".to_string()
    }
}
