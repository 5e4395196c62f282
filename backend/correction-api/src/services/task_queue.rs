use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, Notify};

use crate::error::QueueError;
use crate::metrics::record_queue_event;

/// One correction task: "correct this attempt". `delivery` counts how many
/// times the job has been handed to a worker before this one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CorrectionJob {
    pub task_id: String,
    pub attempt_id: String,
    #[serde(default)]
    pub delivery: u32,
}

impl CorrectionJob {
    pub fn new(task_id: &str, attempt_id: &str) -> Self {
        Self {
            task_id: task_id.to_string(),
            attempt_id: attempt_id.to_string(),
            delivery: 0,
        }
    }

    pub fn redelivery(&self) -> Self {
        Self {
            delivery: self.delivery + 1,
            ..self.clone()
        }
    }
}

/// A job taken off the queue. It stays in the processing list of the
/// consumer that reserved it until it is acknowledged or buried.
#[derive(Debug, Clone)]
pub struct Reservation {
    pub job: CorrectionJob,
    consumer: String,
    raw: String,
}

impl Reservation {
    pub fn consumer(&self) -> &str {
        &self.consumer
    }
}

/// At-least-once delivery of correction jobs.
#[async_trait]
pub trait TaskQueue: Send + Sync {
    async fn ping(&self) -> Result<(), QueueError>;

    async fn enqueue(&self, job: &CorrectionJob) -> Result<(), QueueError>;

    /// Waits up to `timeout` for a job and parks it in the processing list
    /// of `consumer`.
    async fn reserve(
        &self,
        consumer: &str,
        timeout: Duration,
    ) -> Result<Option<Reservation>, QueueError>;

    async fn ack(&self, reservation: &Reservation) -> Result<(), QueueError>;

    /// Moves a job to the dead-letter list.
    async fn bury(&self, reservation: &Reservation) -> Result<(), QueueError>;

    /// Puts jobs left in the processing list of `consumer` by a previous run
    /// back in the queue. Lists of other consumers are left alone. Returns
    /// how many were moved.
    async fn recover_in_flight(&self, consumer: &str) -> Result<usize, QueueError>;
}

const POLL_INTERVAL: Duration = Duration::from_millis(200);

pub struct RedisTaskQueue {
    redis: ConnectionManager,
    queue_key: String,
    processing_prefix: String,
    dead_key: String,
}

impl RedisTaskQueue {
    pub fn new(redis: ConnectionManager, key_prefix: &str) -> Self {
        Self {
            redis,
            queue_key: format!("{}:queue", key_prefix),
            processing_prefix: format!("{}:processing", key_prefix),
            dead_key: format!("{}:dead", key_prefix),
        }
    }

    fn processing_key(&self, consumer: &str) -> String {
        format!("{}:{}", self.processing_prefix, consumer)
    }

    async fn bury_raw(&self, processing_key: &str, raw: &str) -> Result<(), QueueError> {
        let mut conn = self.redis.clone();
        redis::pipe()
            .atomic()
            .cmd("LREM")
            .arg(processing_key)
            .arg(1)
            .arg(raw)
            .ignore()
            .cmd("LPUSH")
            .arg(&self.dead_key)
            .arg(raw)
            .ignore()
            .query_async::<()>(&mut conn)
            .await?;
        record_queue_event("dead_lettered");
        Ok(())
    }
}

#[async_trait]
impl TaskQueue for RedisTaskQueue {
    async fn ping(&self) -> Result<(), QueueError> {
        let mut conn = self.redis.clone();
        redis::cmd("PING").query_async::<String>(&mut conn).await?;
        Ok(())
    }

    async fn enqueue(&self, job: &CorrectionJob) -> Result<(), QueueError> {
        let payload = serde_json::to_string(job)?;
        let mut conn = self.redis.clone();
        redis::cmd("LPUSH")
            .arg(&self.queue_key)
            .arg(payload)
            .query_async::<i64>(&mut conn)
            .await?;
        record_queue_event("enqueued");
        tracing::debug!(
            task_id = %job.task_id,
            attempt_id = %job.attempt_id,
            delivery = job.delivery,
            "correction job enqueued"
        );
        Ok(())
    }

    async fn reserve(
        &self,
        consumer: &str,
        timeout: Duration,
    ) -> Result<Option<Reservation>, QueueError> {
        let deadline = tokio::time::Instant::now() + timeout;
        let processing_key = self.processing_key(consumer);
        let mut conn = self.redis.clone();

        loop {
            let raw: Option<String> = redis::cmd("LMOVE")
                .arg(&self.queue_key)
                .arg(&processing_key)
                .arg("RIGHT")
                .arg("LEFT")
                .query_async(&mut conn)
                .await?;

            match raw {
                Some(raw) => match serde_json::from_str::<CorrectionJob>(&raw) {
                    Ok(job) => {
                        record_queue_event("reserved");
                        return Ok(Some(Reservation {
                            job,
                            consumer: consumer.to_string(),
                            raw,
                        }));
                    }
                    Err(e) => {
                        tracing::error!(payload = %raw, error = %e, "dropping malformed correction job");
                        self.bury_raw(&processing_key, &raw).await?;
                    }
                },
                None => {
                    if tokio::time::Instant::now() >= deadline {
                        return Ok(None);
                    }
                    tokio::time::sleep(POLL_INTERVAL).await;
                }
            }
        }
    }

    async fn ack(&self, reservation: &Reservation) -> Result<(), QueueError> {
        let mut conn = self.redis.clone();
        redis::cmd("LREM")
            .arg(self.processing_key(&reservation.consumer))
            .arg(1)
            .arg(&reservation.raw)
            .query_async::<i64>(&mut conn)
            .await?;
        record_queue_event("acked");
        Ok(())
    }

    async fn bury(&self, reservation: &Reservation) -> Result<(), QueueError> {
        self.bury_raw(&self.processing_key(&reservation.consumer), &reservation.raw)
            .await
    }

    async fn recover_in_flight(&self, consumer: &str) -> Result<usize, QueueError> {
        let processing_key = self.processing_key(consumer);
        let mut conn = self.redis.clone();
        let mut moved = 0;
        loop {
            let raw: Option<String> = redis::cmd("LMOVE")
                .arg(&processing_key)
                .arg(&self.queue_key)
                .arg("LEFT")
                .arg("RIGHT")
                .query_async(&mut conn)
                .await?;
            if raw.is_none() {
                break;
            }
            moved += 1;
        }
        if moved > 0 {
            record_queue_event("recovered");
            tracing::warn!(consumer, count = moved, "requeued in-flight correction jobs");
        }
        Ok(moved)
    }
}

#[derive(Default)]
struct Lists {
    queue: VecDeque<String>,
    processing: HashMap<String, Vec<String>>,
    dead: Vec<String>,
}

/// Queue kept in process memory, with the same list semantics as
/// [`RedisTaskQueue`].
#[derive(Default)]
pub struct InMemoryTaskQueue {
    lists: Mutex<Lists>,
    notify: Notify,
}

impl InMemoryTaskQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Jobs waiting to be reserved, oldest first.
    pub async fn queued(&self) -> Vec<CorrectionJob> {
        let lists = self.lists.lock().await;
        lists
            .queue
            .iter()
            .filter_map(|raw| serde_json::from_str(raw).ok())
            .collect()
    }

    /// Jobs reserved and not yet settled, across all consumers.
    pub async fn in_flight(&self) -> usize {
        self.lists.lock().await.processing.values().map(Vec::len).sum()
    }

    pub async fn in_flight_for(&self, consumer: &str) -> usize {
        self.lists
            .lock()
            .await
            .processing
            .get(consumer)
            .map_or(0, Vec::len)
    }

    pub async fn dead(&self) -> Vec<CorrectionJob> {
        let lists = self.lists.lock().await;
        lists
            .dead
            .iter()
            .filter_map(|raw| serde_json::from_str(raw).ok())
            .collect()
    }

    fn remove_processing(lists: &mut Lists, reservation: &Reservation) {
        if let Some(processing) = lists.processing.get_mut(&reservation.consumer) {
            if let Some(index) = processing.iter().position(|r| *r == reservation.raw) {
                processing.remove(index);
            }
        }
    }
}

#[async_trait]
impl TaskQueue for InMemoryTaskQueue {
    async fn ping(&self) -> Result<(), QueueError> {
        Ok(())
    }

    async fn enqueue(&self, job: &CorrectionJob) -> Result<(), QueueError> {
        let raw = serde_json::to_string(job)?;
        self.lists.lock().await.queue.push_back(raw);
        self.notify.notify_one();
        record_queue_event("enqueued");
        Ok(())
    }

    async fn reserve(
        &self,
        consumer: &str,
        timeout: Duration,
    ) -> Result<Option<Reservation>, QueueError> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            {
                let mut lists = self.lists.lock().await;
                if let Some(raw) = lists.queue.pop_front() {
                    let job = serde_json::from_str(&raw)?;
                    lists
                        .processing
                        .entry(consumer.to_string())
                        .or_default()
                        .push(raw.clone());
                    record_queue_event("reserved");
                    return Ok(Some(Reservation {
                        job,
                        consumer: consumer.to_string(),
                        raw,
                    }));
                }
            }
            if tokio::time::timeout_at(deadline, self.notify.notified())
                .await
                .is_err()
            {
                return Ok(None);
            }
        }
    }

    async fn ack(&self, reservation: &Reservation) -> Result<(), QueueError> {
        let mut lists = self.lists.lock().await;
        Self::remove_processing(&mut lists, reservation);
        record_queue_event("acked");
        Ok(())
    }

    async fn bury(&self, reservation: &Reservation) -> Result<(), QueueError> {
        let mut lists = self.lists.lock().await;
        Self::remove_processing(&mut lists, reservation);
        lists.dead.push(reservation.raw.clone());
        record_queue_event("dead_lettered");
        Ok(())
    }

    async fn recover_in_flight(&self, consumer: &str) -> Result<usize, QueueError> {
        let mut lists = self.lists.lock().await;
        let moved = lists.processing.remove(consumer).unwrap_or_default();
        let count = moved.len();
        for raw in moved.into_iter().rev() {
            lists.queue.push_front(raw);
        }
        if count > 0 {
            self.notify.notify_one();
        }
        Ok(count)
    }
}
