use std::sync::Arc;

use crate::error::{ProblemError, SubmitError};
use crate::metrics::SUBMISSIONS_TOTAL;
use crate::models::{AttemptView, Language, SubmissionCode, SubmitCodeRequest, SubmitCodeResponse};
use crate::services::problem_repository::ProblemRepository;
use crate::services::submission_store::SubmissionStore;
use crate::services::task_queue::{CorrectionJob, TaskQueue};
use crate::utils::retry::{retry_async_with_config, RetryConfig};

/// Entry point for code uploads and manual correction requests.
pub struct SubmissionService {
    store: Arc<dyn SubmissionStore>,
    queue: Arc<dyn TaskQueue>,
    problems: Arc<ProblemRepository>,
    upload_max_length: usize,
    queue_retry: RetryConfig,
}

impl SubmissionService {
    pub fn new(
        store: Arc<dyn SubmissionStore>,
        queue: Arc<dyn TaskQueue>,
        problems: Arc<ProblemRepository>,
        upload_max_length: usize,
    ) -> Self {
        Self {
            store,
            queue,
            problems,
            upload_max_length,
            queue_retry: RetryConfig::default(),
        }
    }

    pub async fn submit_code(
        &self,
        request: &SubmitCodeRequest,
    ) -> Result<SubmitCodeResponse, SubmitError> {
        self.problems
            .clone()
            .load_async(&request.challenge, &request.problem)
            .await
            .map_err(|e| match e {
                ProblemError::NotFound(_) => SubmitError::UnknownProblem {
                    challenge: request.challenge.clone(),
                    problem: request.problem.clone(),
                },
                other => SubmitError::Problem(other),
            })?;

        let language: Language = request
            .language
            .parse()
            .map_err(|_| SubmitError::InvalidLanguage(request.language.clone()))?;

        if request.code.trim().is_empty() {
            return Err(SubmitError::InvalidCode("code is empty".to_string()));
        }
        if request.code.len() > self.upload_max_length {
            return Err(SubmitError::InvalidCode(format!(
                "code is larger than {} bytes",
                self.upload_max_length
            )));
        }

        let submission = self
            .store
            .find_or_create_submission(&request.user_id, &request.challenge, &request.problem)
            .await?;

        let mut attempt = SubmissionCode::new(&submission.id, language, &request.code);
        let task_id = uuid::Uuid::new_v4().to_string();
        if language.is_correctable() {
            attempt.correction_task_id = Some(task_id.clone());
        }
        self.store.insert_attempt(&attempt).await?;

        SUBMISSIONS_TOTAL
            .with_label_values(&[language.as_str()])
            .inc();

        if language.is_correctable() {
            self.enqueue(&CorrectionJob::new(&task_id, &attempt.id)).await;
        } else {
            tracing::info!(
                attempt_id = %attempt.id,
                language = %language,
                "language is not correctable, attempt will not be sent to correctors"
            );
        }

        tracing::info!(
            attempt_id = %attempt.id,
            submission_id = %submission.id,
            user_id = %request.user_id,
            problem = %format!("{}/{}", request.challenge, request.problem),
            "code submitted"
        );

        Ok(SubmitCodeResponse {
            attempt_id: attempt.id.clone(),
            submission_id: submission.id,
            status: attempt.status(),
        })
    }

    /// Resets an attempt to pending and queues it again. The submission
    /// keeps its best score and malus.
    pub async fn recorrect(&self, attempt_id: &str) -> Result<AttemptView, SubmitError> {
        let task_id = uuid::Uuid::new_v4().to_string();
        let (current, _) = self
            .store
            .load_attempt(attempt_id)
            .await?
            .ok_or_else(|| SubmitError::AttemptNotFound(attempt_id.to_string()))?;
        if !current.language.is_correctable() {
            return Err(SubmitError::InvalidLanguage(current.language.to_string()));
        }

        self.store
            .reset_attempt(attempt_id, &task_id)
            .await?
            .ok_or_else(|| SubmitError::AttemptNotFound(attempt_id.to_string()))?;

        self.queue
            .enqueue(&CorrectionJob::new(&task_id, attempt_id))
            .await?;
        tracing::info!(attempt_id, task_id = %task_id, "attempt queued for recorrection");

        self.attempt_view(attempt_id).await
    }

    /// Attempts that were dispatched but never scored, oldest first.
    pub async fn pending_attempts(&self) -> Result<Vec<SubmissionCode>, SubmitError> {
        Ok(self.store.pending_dispatched_attempts().await?)
    }

    /// Queues every pending attempt again. With `renew`, each one gets a
    /// fresh task id first.
    pub async fn resume(&self, renew: bool) -> Result<Vec<CorrectionJob>, SubmitError> {
        let pending = self.pending_attempts().await?;
        let mut jobs = Vec::with_capacity(pending.len());

        for attempt in pending {
            let task_id = match (&attempt.correction_task_id, renew) {
                (Some(task_id), false) => task_id.clone(),
                _ => {
                    let task_id = uuid::Uuid::new_v4().to_string();
                    self.store.set_task_id(&attempt.id, &task_id).await?;
                    task_id
                }
            };
            let job = CorrectionJob::new(&task_id, &attempt.id);
            self.queue.enqueue(&job).await?;
            jobs.push(job);
        }

        tracing::info!(count = jobs.len(), renew, "pending corrections resumed");
        Ok(jobs)
    }

    pub async fn attempt_view(&self, attempt_id: &str) -> Result<AttemptView, SubmitError> {
        let (attempt, submission) = self
            .store
            .load_attempt(attempt_id)
            .await?
            .ok_or_else(|| SubmitError::AttemptNotFound(attempt_id.to_string()))?;
        Ok(AttemptView::new(&attempt, &submission))
    }

    /// A failed push leaves the attempt pending with its task id, so
    /// `resume_corrections` can pick it up later.
    async fn enqueue(&self, job: &CorrectionJob) {
        if let Err(e) =
            retry_async_with_config("enqueue", &self.queue_retry, || self.queue.enqueue(job)).await
        {
            tracing::warn!(
                attempt_id = %job.attempt_id,
                error = %e,
                "could not queue correction, attempt stays pending"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::AttemptStatus;
    use crate::services::submission_store::InMemorySubmissionStore;
    use crate::services::task_queue::InMemoryTaskQueue;

    fn service(
        store: Arc<InMemorySubmissionStore>,
        queue: Arc<InMemoryTaskQueue>,
    ) -> SubmissionService {
        // nothing under this root: every problem lookup fails
        let problems = Arc::new(ProblemRepository::new("/nonexistent-problem-root"));
        SubmissionService::new(store, queue, problems, 16)
    }

    #[tokio::test]
    async fn unknown_problem_is_rejected() {
        let store = Arc::new(InMemorySubmissionStore::new());
        let queue = Arc::new(InMemoryTaskQueue::new());
        let request = SubmitCodeRequest {
            user_id: "u1".to_string(),
            challenge: "qcm2015".to_string(),
            problem: "sum".to_string(),
            language: "python".to_string(),
            code: "print(1)".to_string(),
        };
        let err = service(store, queue.clone())
            .submit_code(&request)
            .await
            .unwrap_err();
        assert!(matches!(err, SubmitError::UnknownProblem { .. }));
        assert!(queue.queued().await.is_empty());
    }

    #[tokio::test]
    async fn resume_renews_task_ids_on_request() {
        let store = Arc::new(InMemorySubmissionStore::new());
        let queue = Arc::new(InMemoryTaskQueue::new());
        let submission = store
            .find_or_create_submission("u1", "qcm2015", "sum")
            .await
            .unwrap();
        let mut attempt = SubmissionCode::new(&submission.id, Language::C, "int main(){}");
        attempt.correction_task_id = Some("old-task".to_string());
        store.insert_attempt(&attempt).await.unwrap();

        let service = service(store.clone(), queue.clone());
        let kept = service.resume(false).await.unwrap();
        assert_eq!(kept[0].task_id, "old-task");

        let renewed = service.resume(true).await.unwrap();
        assert_ne!(renewed[0].task_id, "old-task");
        assert_eq!(
            store.attempt(&attempt.id).await.unwrap().correction_task_id,
            Some(renewed[0].task_id.clone())
        );
        assert_eq!(queue.queued().await.len(), 2);
    }

    #[tokio::test]
    async fn recorrect_resets_attempt_and_queues_it() {
        let store = Arc::new(InMemorySubmissionStore::new());
        let queue = Arc::new(InMemoryTaskQueue::new());
        let submission = store
            .find_or_create_submission("u1", "qcm2015", "sum")
            .await
            .unwrap();
        let mut attempt = SubmissionCode::new(&submission.id, Language::Rust, "fn main(){}");
        attempt.score = Some(0);
        store.insert_attempt(&attempt).await.unwrap();

        let view = service(store, queue.clone())
            .recorrect(&attempt.id)
            .await
            .unwrap();
        assert_eq!(view.status, AttemptStatus::Pending);
        assert_eq!(queue.queued().await[0].attempt_id, attempt.id);
    }
}
