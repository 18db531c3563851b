//! Worker loop that pops jobs from the queue and runs them.

use crate::orchestrator::JobHandler;
use crate::queue::{JobQueue, decode_job};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::sleep;
use tracing::{error, info, warn};

const QUEUE_ERROR_BACKOFF: Duration = Duration::from_secs(1);

/// A worker that dequeues jobs and hands each one to a [`JobHandler`].
///
/// Builds run one at a time and are never retried or requeued.
pub struct Worker {
    id: String,
    queue: Arc<dyn JobQueue>,
    handler: Arc<dyn JobHandler>,
    poll_timeout: Duration,
}

impl Worker {
    pub fn new(
        id: impl Into<String>,
        queue: Arc<dyn JobQueue>,
        handler: Arc<dyn JobHandler>,
        poll_timeout: Duration,
    ) -> Self {
        Self {
            id: id.into(),
            queue,
            handler,
            poll_timeout,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Run until `shutdown` becomes true.
    ///
    /// The signal is checked before every dequeue; a build that has
    /// already been popped always runs to completion.
    pub async fn run(&self, shutdown: watch::Receiver<bool>) {
        info!(worker_id = %self.id, "Starting worker");

        while !*shutdown.borrow() {
            let payload = match self.queue.dequeue(self.poll_timeout).await {
                Ok(Some(payload)) => payload,
                Ok(None) => continue,
                Err(e) => {
                    warn!(worker_id = %self.id, error = %e, "Failed to dequeue job");
                    sleep(QUEUE_ERROR_BACKOFF).await;
                    continue;
                }
            };

            let job = match decode_job(&payload) {
                Ok(job) => job,
                Err(e) => {
                    warn!(worker_id = %self.id, error = %e, payload = %payload, "Dropping malformed job");
                    continue;
                }
            };

            info!(worker_id = %self.id, build_id = %job.build_id, "Picked up job");
            if let Err(e) = self.handler.handle(&job).await {
                error!(worker_id = %self.id, build_id = %job.build_id, error = %e, "Job failed");
            }
        }

        info!(worker_id = %self.id, "Worker stopped");
    }
}

/// A fixed number of workers sharing one queue, handler and shutdown
/// signal.
pub struct WorkerPool {
    workers: Vec<Arc<Worker>>,
}

impl WorkerPool {
    pub fn new(
        name: &str,
        size: usize,
        queue: Arc<dyn JobQueue>,
        handler: Arc<dyn JobHandler>,
        poll_timeout: Duration,
    ) -> Self {
        let workers = (0..size.max(1))
            .map(|i| {
                Arc::new(Worker::new(
                    format!("{}-{}", name, i),
                    queue.clone(),
                    handler.clone(),
                    poll_timeout,
                ))
            })
            .collect();
        Self { workers }
    }

    pub fn len(&self) -> usize {
        self.workers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }

    /// Run every worker and wait until all of them have stopped.
    pub async fn run(self, shutdown: watch::Receiver<bool>) {
        let mut handles = Vec::with_capacity(self.workers.len());
        for worker in self.workers {
            let shutdown = shutdown.clone();
            handles.push(tokio::spawn(async move { worker.run(shutdown).await }));
        }
        for handle in handles {
            if let Err(e) = handle.await {
                error!(error = %e, "Worker task panicked");
            }
        }
    }
}
