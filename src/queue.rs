//! Named background job queues.
//!
//! A thin fire-and-forget layer over tokio: each named queue is an unbounded
//! channel drained by one worker task, and jobs run on the blocking pool so
//! they may do synchronous I/O (gateway calls, database writes). Callers get
//! at-least-once execution while the process lives and no ordering guarantee
//! relative to subsequent requests.

use std::collections::HashMap;
use std::sync::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// A unit of background work.
pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// Registry of named queues, each backed by a single worker task.
#[derive(Default)]
pub struct JobQueue {
    queues: Mutex<HashMap<String, mpsc::UnboundedSender<Job>>>,
}

impl JobQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Submit a job to the named queue, spawning its worker on first use.
    pub fn enqueue(&self, queue: &str, job: Job) {
        let mut queues = self.queues.lock().unwrap();
        let send_result = queues
            .entry(queue.to_string())
            .or_insert_with(|| {
                let (tx, rx) = mpsc::unbounded_channel();
                spawn_worker(queue.to_string(), rx);
                tx
            })
            .send(job);
        if let Err(mpsc::error::SendError(job)) = send_result {
            // Worker died; replace it and retry once.
            warn!(queue = %queue, "queue worker gone, respawning");
            let (tx, rx) = mpsc::unbounded_channel();
            spawn_worker(queue.to_string(), rx);
            let _ = tx.send(job);
            queues.insert(queue.to_string(), tx);
        }
    }
}

fn spawn_worker(name: String, mut rx: mpsc::UnboundedReceiver<Job>) {
    tokio::spawn(async move {
        debug!(queue = %name, "queue worker started");
        while let Some(job) = rx.recv().await {
            let queue = name.clone();
            let result = tokio::task::spawn_blocking(job).await;
            if let Err(e) = result {
                warn!(queue = %queue, error = %e, "background job panicked");
            }
        }
        debug!(queue = %name, "queue worker stopped");
    });
}
