//! Durable FIFO of build triggers.
//!
//! Delivery is at-most-once: an item is removed when popped, so a worker
//! that dies mid-build loses that job.

use async_trait::async_trait;
use kiln_core::Job;
use sqlx::PgPool;
use sqlx::postgres::PgListener;
use std::collections::VecDeque;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{Mutex, Notify};
use tokio::time::Instant;
use tracing::debug;

/// Well-known list every trigger is appended to.
pub const JOB_QUEUE_KEY: &str = "kiln:jobs";

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("queue database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("malformed job payload: {0}")]
    Decode(serde_json::Error),

    #[error("failed to encode job: {0}")]
    Encode(serde_json::Error),
}

pub fn encode_job(job: &Job) -> Result<String, QueueError> {
    serde_json::to_string(job).map_err(QueueError::Encode)
}

pub fn decode_job(payload: &str) -> Result<Job, QueueError> {
    serde_json::from_str(payload).map_err(QueueError::Decode)
}

#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Append a job to the tail of the queue.
    async fn enqueue(&self, job: &Job) -> Result<(), QueueError>;

    /// Pop the head of the queue, waiting up to `timeout` for one to
    /// arrive. Returns the raw payload so callers decide what to do with
    /// items they cannot decode.
    async fn dequeue(&self, timeout: Duration) -> Result<Option<String>, QueueError>;
}

/// Job queue backed by PostgreSQL.
pub struct PgJobQueue {
    pool: PgPool,
    key: String,
    listener: Mutex<Option<PgListener>>,
}

impl PgJobQueue {
    pub fn new(pool: PgPool) -> Self {
        Self::with_key(pool, JOB_QUEUE_KEY)
    }

    pub fn with_key(pool: PgPool, key: impl Into<String>) -> Self {
        Self {
            pool,
            key: key.into(),
            listener: Mutex::new(None),
        }
    }

    /// Remove and return the oldest item.
    /// Uses SKIP LOCKED so concurrent workers never pop the same row.
    async fn try_pop(&self) -> Result<Option<String>, QueueError> {
        let payload = sqlx::query_scalar::<_, String>(
            r#"
            DELETE FROM job_queue
            WHERE id = (
                SELECT id FROM job_queue
                WHERE queue = $1
                ORDER BY id
                FOR UPDATE SKIP LOCKED
                LIMIT 1
            )
            RETURNING payload
            "#,
        )
        .bind(&self.key)
        .fetch_optional(&self.pool)
        .await?;
        Ok(payload)
    }

    async fn connect_listener(&self) -> Result<PgListener, QueueError> {
        let mut listener = PgListener::connect_with(&self.pool).await?;
        listener.listen(&self.key).await?;
        debug!(queue = %self.key, "Listening for enqueued jobs");
        Ok(listener)
    }

    async fn pop_or_wait(
        &self,
        listener: &mut PgListener,
        deadline: Instant,
    ) -> Result<Option<String>, QueueError> {
        loop {
            if let Some(payload) = self.try_pop().await? {
                return Ok(Some(payload));
            }
            match tokio::time::timeout_at(deadline, listener.recv()).await {
                Ok(notification) => {
                    notification?;
                }
                // One last look in case a notification was missed.
                Err(_) => return self.try_pop().await,
            }
        }
    }
}

#[async_trait]
impl JobQueue for PgJobQueue {
    async fn enqueue(&self, job: &Job) -> Result<(), QueueError> {
        let payload = encode_job(job)?;

        let mut tx = self.pool.begin().await?;
        sqlx::query("INSERT INTO job_queue (queue, payload) VALUES ($1, $2)")
            .bind(&self.key)
            .bind(&payload)
            .execute(&mut *tx)
            .await?;
        sqlx::query("SELECT pg_notify($1, '')")
            .bind(&self.key)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        debug!(build_id = %job.build_id, queue = %self.key, "Enqueued job");
        Ok(())
    }

    async fn dequeue(&self, timeout: Duration) -> Result<Option<String>, QueueError> {
        let deadline = Instant::now() + timeout;

        // Workers in one process share a single listener connection.
        let Ok(mut guard) = tokio::time::timeout_at(deadline, self.listener.lock()).await else {
            return Ok(None);
        };
        let mut listener = match guard.take() {
            Some(listener) => listener,
            None => self.connect_listener().await?,
        };

        let result = self.pop_or_wait(&mut listener, deadline).await;
        // A listener that errored is dropped and reconnected next time.
        if result.is_ok() {
            *guard = Some(listener);
        }
        result
    }
}

/// In-process queue for tests and single-binary development runs.
#[derive(Default)]
pub struct MemoryJobQueue {
    items: std::sync::Mutex<VecDeque<String>>,
    notify: Notify,
}

impl MemoryJobQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a payload verbatim, bypassing job encoding.
    pub fn push_raw(&self, payload: impl Into<String>) {
        self.items().push_back(payload.into());
        self.notify.notify_one();
    }

    pub fn len(&self) -> usize {
        self.items().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn items(&self) -> std::sync::MutexGuard<'_, VecDeque<String>> {
        self.items.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl JobQueue for MemoryJobQueue {
    async fn enqueue(&self, job: &Job) -> Result<(), QueueError> {
        self.push_raw(encode_job(job)?);
        Ok(())
    }

    async fn dequeue(&self, timeout: Duration) -> Result<Option<String>, QueueError> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(payload) = self.items().pop_front() {
                return Ok(Some(payload));
            }
            if tokio::time::timeout_at(deadline, self.notify.notified())
                .await
                .is_err()
            {
                return Ok(self.items().pop_front());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kiln_core::ResourceId;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_dequeue_returns_enqueued_job() {
        let queue = MemoryJobQueue::new();
        let job = Job::new(ResourceId::new());
        queue.enqueue(&job).await.unwrap();

        let payload = queue.dequeue(Duration::from_secs(1)).await.unwrap().unwrap();
        assert_eq!(decode_job(&payload).unwrap().build_id, job.build_id);
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn test_fifo_order() {
        let queue = MemoryJobQueue::new();
        let jobs: Vec<_> = (0..3).map(|_| Job::new(ResourceId::new())).collect();
        for job in &jobs {
            queue.enqueue(job).await.unwrap();
        }

        for job in &jobs {
            let payload = queue.dequeue(Duration::from_millis(50)).await.unwrap().unwrap();
            assert_eq!(decode_job(&payload).unwrap(), *job);
        }
    }

    #[tokio::test]
    async fn test_empty_queue_times_out() {
        let queue = MemoryJobQueue::new();
        let popped = queue.dequeue(Duration::from_millis(50)).await.unwrap();
        assert!(popped.is_none());
    }

    #[tokio::test]
    async fn test_blocked_dequeue_wakes_on_enqueue() {
        let queue = Arc::new(MemoryJobQueue::new());
        let job = Job::new(ResourceId::new());

        let waiter = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.dequeue(Duration::from_secs(10)).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        queue.enqueue(&job).await.unwrap();

        let payload = waiter.await.unwrap().unwrap().unwrap();
        assert_eq!(decode_job(&payload).unwrap(), job);
    }

    #[tokio::test]
    async fn test_each_item_goes_to_one_popper() {
        let queue = Arc::new(MemoryJobQueue::new());
        for _ in 0..20 {
            queue.enqueue(&Job::new(ResourceId::new())).await.unwrap();
        }

        let mut handles = Vec::new();
        for _ in 0..4 {
            let queue = queue.clone();
            handles.push(tokio::spawn(async move {
                let mut got = Vec::new();
                while let Some(p) = queue.dequeue(Duration::from_millis(20)).await.unwrap() {
                    got.push(p);
                }
                got
            }));
        }

        let mut all = Vec::new();
        for handle in handles {
            all.extend(handle.await.unwrap());
        }
        let total = all.len();
        all.sort();
        all.dedup();
        assert_eq!(total, 20);
        assert_eq!(all.len(), 20);
    }

    #[test]
    fn test_wire_format() {
        let id: ResourceId = "0190a5b2-7c1e-7d3a-9f00-0123456789ab".parse().unwrap();
        assert_eq!(
            encode_job(&Job::new(id)).unwrap(),
            r#"{"build_id":"0190a5b2-7c1e-7d3a-9f00-0123456789ab"}"#
        );
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(matches!(decode_job("not json"), Err(QueueError::Decode(_))));
        assert!(matches!(
            decode_job(r#"{"build_id":"nope"}"#),
            Err(QueueError::Decode(_))
        ));
    }

    async fn pg_queue() -> PgJobQueue {
        let url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set");
        let pool = PgPool::connect(&url).await.unwrap();
        sqlx::migrate!("../kiln-db/migrations").run(&pool).await.unwrap();
        PgJobQueue::with_key(pool, format!("kiln:test:{}", ResourceId::new()))
    }

    #[tokio::test]
    #[ignore]
    async fn test_pg_round_trip() {
        let queue = pg_queue().await;
        let job = Job::new(ResourceId::new());
        queue.enqueue(&job).await.unwrap();

        let payload = queue.dequeue(Duration::from_secs(2)).await.unwrap().unwrap();
        assert_eq!(decode_job(&payload).unwrap(), job);
        assert!(queue.dequeue(Duration::from_millis(200)).await.unwrap().is_none());
    }

    #[tokio::test]
    #[ignore]
    async fn test_pg_dequeue_wakes_on_notify() {
        let queue = Arc::new(pg_queue().await);
        let job = Job::new(ResourceId::new());

        let waiter = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.dequeue(Duration::from_secs(10)).await })
        };
        tokio::time::sleep(Duration::from_millis(300)).await;
        queue.enqueue(&job).await.unwrap();

        let payload = waiter.await.unwrap().unwrap().unwrap();
        assert_eq!(decode_job(&payload).unwrap(), job);
    }
}
