use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::sync::Semaphore;
use tracing::{info, warn, Instrument};

use crate::config::{QueueSettings, WorkerSettings};
use crate::error::QueueError;
use crate::metrics::{record_queue_event, CORRECTION_TASKS_ACTIVE};
use crate::services::dispatcher::CorrectionDispatcher;
use crate::services::task_queue::{Reservation, TaskQueue};
use crate::utils::retry::{retry_async_with_config, RetryConfig};

/// What happened to a reserved job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobDisposition {
    Completed,
    /// Pushed back to the queue for another delivery.
    Redelivered,
    DeadLettered,
    /// Failed for a reason another delivery would not fix.
    Dropped,
}

/// Consumes the correction queue with at most `concurrency` tasks running
/// at the same time. Reserved jobs sit in a processing list named after
/// the worker id.
pub struct CorrectionWorker {
    dispatcher: Arc<CorrectionDispatcher>,
    queue: Arc<dyn TaskQueue>,
    settings: QueueSettings,
    id: String,
    concurrency: usize,
    queue_retry: RetryConfig,
}

impl CorrectionWorker {
    pub fn new(
        dispatcher: Arc<CorrectionDispatcher>,
        queue: Arc<dyn TaskQueue>,
        settings: QueueSettings,
        worker: WorkerSettings,
    ) -> Self {
        Self {
            dispatcher,
            queue,
            settings,
            id: worker.id,
            concurrency: worker.concurrency.max(1),
            queue_retry: RetryConfig::default(),
        }
    }

    pub fn with_queue_retry(mut self, queue_retry: RetryConfig) -> Self {
        self.queue_retry = queue_retry;
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Requeues jobs a previous run of this worker left unsettled.
    pub async fn recover(&self) -> Result<usize, QueueError> {
        self.queue.recover_in_flight(&self.id).await
    }

    pub async fn run(self: Arc<Self>) -> Result<()> {
        let recovered = self.recover().await?;
        info!(
            worker_id = %self.id,
            concurrency = self.concurrency,
            recovered,
            endpoints = self.dispatcher.endpoints().len(),
            "Starting correction worker"
        );

        let reserve_timeout = Duration::from_secs(self.settings.reserve_timeout_secs);
        let semaphore = Arc::new(Semaphore::new(self.concurrency));

        loop {
            let permit = semaphore.clone().acquire_owned().await?;

            match self.queue.reserve(&self.id, reserve_timeout).await {
                Ok(Some(reservation)) => {
                    let worker = self.clone();
                    tokio::spawn(async move {
                        let _permit = permit;
                        if let Err(e) = worker.handle(reservation).await {
                            warn!(error = %e, "job left in processing list");
                        }
                    });
                }
                Ok(None) => {}
                Err(e) => {
                    warn!(error = %e, "failed to reserve a correction job");
                    tokio::time::sleep(Duration::from_secs(self.settings.retry_delay_secs)).await;
                }
            }
        }
    }

    /// Reserves and handles a single job, if one shows up within `timeout`.
    pub async fn run_once(&self, timeout: Duration) -> Result<Option<JobDisposition>, QueueError> {
        match self.queue.reserve(&self.id, timeout).await? {
            Some(reservation) => self.handle(reservation).await.map(Some),
            None => Ok(None),
        }
    }

    pub async fn handle(&self, reservation: Reservation) -> Result<JobDisposition, QueueError> {
        let job = reservation.job.clone();
        let span = tracing::info_span!(
            "correction",
            task_id = %job.task_id,
            attempt_id = %job.attempt_id,
            delivery = job.delivery
        );

        self.process(reservation).instrument(span).await
    }

    async fn process(&self, reservation: Reservation) -> Result<JobDisposition, QueueError> {
        let job = &reservation.job;
        CORRECTION_TASKS_ACTIVE.inc();
        let result = self.dispatcher.correct(&job.attempt_id).await;
        CORRECTION_TASKS_ACTIVE.dec();

        match result {
            Ok(outcome) => {
                tracing::debug!(?outcome, "correction task done");
                self.ack(&reservation).await?;
                Ok(JobDisposition::Completed)
            }
            Err(e) if e.is_retryable() && job.delivery < self.settings.max_retries => {
                warn!(error = %e, "correction task failed, will retry");
                tokio::time::sleep(Duration::from_secs(self.settings.retry_delay_secs)).await;
                let next = job.redelivery();
                retry_async_with_config("enqueue", &self.queue_retry, || {
                    self.queue.enqueue(&next)
                })
                .await?;
                self.ack(&reservation).await?;
                record_queue_event("redelivered");
                Ok(JobDisposition::Redelivered)
            }
            Err(e) if e.is_retryable() => {
                tracing::error!(
                    error = %e,
                    max_retries = self.settings.max_retries,
                    "correction task exhausted its retries"
                );
                retry_async_with_config("bury", &self.queue_retry, || {
                    self.queue.bury(&reservation)
                })
                .await?;
                Ok(JobDisposition::DeadLettered)
            }
            Err(e) => {
                tracing::error!(error = %e, "correction task failed permanently");
                self.ack(&reservation).await?;
                Ok(JobDisposition::Dropped)
            }
        }
    }

    async fn ack(&self, reservation: &Reservation) -> Result<(), QueueError> {
        retry_async_with_config("ack", &self.queue_retry, || self.queue.ack(reservation)).await
    }
}
