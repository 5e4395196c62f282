use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::TryStreamExt;
use mongodb::{
    bson::{doc, to_bson, Bson},
    options::{IndexOptions, ReturnDocument},
    Collection, Database, IndexModel,
};
use tokio::sync::Mutex;

use crate::error::StoreError;
use crate::metrics::track_db_operation;
use crate::models::{CorrectionReport, ScoreState, Submission, SubmissionCode};
use crate::services::scorer::FoldEffect;

const SUBMISSIONS: &str = "submissions";
const SUBMISSION_CODES: &str = "submission_codes";

/// Reads the current score state of a submission and returns the next one.
pub type ScoreFold = dyn Fn(ScoreState) -> (ScoreState, FoldEffect) + Send + Sync;

#[derive(Debug, Clone, PartialEq)]
pub enum RecordOutcome {
    Applied {
        submission: Submission,
        effect: FoldEffect,
    },
    /// The attempt had already been scored, nothing was written.
    AlreadyCorrected,
}

#[async_trait]
pub trait SubmissionStore: Send + Sync {
    async fn ping(&self) -> Result<(), StoreError>;

    async fn find_or_create_submission(
        &self,
        user_id: &str,
        challenge: &str,
        problem: &str,
    ) -> Result<Submission, StoreError>;

    async fn insert_attempt(&self, attempt: &SubmissionCode) -> Result<(), StoreError>;

    async fn load_attempt(
        &self,
        attempt_id: &str,
    ) -> Result<Option<(SubmissionCode, Submission)>, StoreError>;

    /// Stores the attempt result and folds its score into the submission,
    /// both or neither.
    async fn record_correction(
        &self,
        attempt_id: &str,
        score: i64,
        report: &CorrectionReport,
        corrected_at: DateTime<Utc>,
        fold: &ScoreFold,
    ) -> Result<RecordOutcome, StoreError>;

    /// Clears the result of an attempt and assigns it a new task id.
    async fn reset_attempt(
        &self,
        attempt_id: &str,
        task_id: &str,
    ) -> Result<Option<SubmissionCode>, StoreError>;

    async fn set_task_id(&self, attempt_id: &str, task_id: &str) -> Result<(), StoreError>;

    /// Attempts that were handed to the queue but never scored.
    async fn pending_dispatched_attempts(&self) -> Result<Vec<SubmissionCode>, StoreError>;
}

pub struct MongoSubmissionStore {
    mongo: Database,
}

impl MongoSubmissionStore {
    pub fn new(mongo: Database) -> Self {
        Self { mongo }
    }

    fn submissions(&self) -> Collection<Submission> {
        self.mongo.collection(SUBMISSIONS)
    }

    fn attempts(&self) -> Collection<SubmissionCode> {
        self.mongo.collection(SUBMISSION_CODES)
    }

    pub async fn ensure_indexes(&self) -> Result<(), StoreError> {
        self.submissions()
            .create_index(
                IndexModel::builder()
                    .keys(doc! { "user_id": 1, "challenge": 1, "problem": 1 })
                    .options(IndexOptions::builder().unique(true).build())
                    .build(),
            )
            .await?;

        self.attempts()
            .create_index(
                IndexModel::builder()
                    .keys(doc! { "submission_id": 1, "date_submitted": -1 })
                    .build(),
            )
            .await?;

        tracing::info!("submission indexes ensured");
        Ok(())
    }

    async fn upsert_submission(
        &self,
        user_id: &str,
        challenge: &str,
        problem: &str,
    ) -> Result<Option<Submission>, StoreError> {
        let fresh = Submission::new(user_id, challenge, problem);
        let update = doc! {
            "$setOnInsert": {
                "_id": &fresh.id,
                "score_base": 0i64,
                "malus": 0i64,
                "created_at": to_bson(&fresh.created_at)?,
            }
        };

        let found = self
            .submissions()
            .find_one_and_update(
                doc! { "user_id": user_id, "challenge": challenge, "problem": problem },
                update,
            )
            .upsert(true)
            .return_document(ReturnDocument::After)
            .await?;
        Ok(found)
    }

    async fn record_in_transaction(
        &self,
        attempt_id: &str,
        score: i64,
        report: &CorrectionReport,
        corrected_at: DateTime<Utc>,
        fold: &ScoreFold,
    ) -> Result<RecordOutcome, StoreError> {
        let mut session = self.mongo.client().start_session().await?;
        session.start_transaction().await?;

        let attempt = self
            .attempts()
            .find_one(doc! { "_id": attempt_id })
            .session(&mut session)
            .await?;
        let Some(attempt) = attempt else {
            session.abort_transaction().await?;
            return Err(StoreError::NotFound(format!("attempt {}", attempt_id)));
        };
        if attempt.done() {
            session.abort_transaction().await?;
            return Ok(RecordOutcome::AlreadyCorrected);
        }

        let submission = self
            .submissions()
            .find_one(doc! { "_id": &attempt.submission_id })
            .session(&mut session)
            .await?;
        let Some(mut submission) = submission else {
            session.abort_transaction().await?;
            return Err(StoreError::NotFound(format!(
                "submission {}",
                attempt.submission_id
            )));
        };

        let (state, effect) = fold(submission.score_state());

        self.attempts()
            .update_one(
                doc! { "_id": attempt_id },
                doc! {
                    "$set": {
                        "score": score,
                        "date_corrected": to_bson(&corrected_at)?,
                        "result": to_bson(report)?,
                    }
                },
            )
            .session(&mut session)
            .await?;

        if state != submission.score_state() {
            self.submissions()
                .update_one(
                    doc! { "_id": &submission.id },
                    doc! { "$set": { "score_base": state.score_base, "malus": state.malus } },
                )
                .session(&mut session)
                .await?;
        }

        session.commit_transaction().await?;
        submission.set_score_state(state);
        Ok(RecordOutcome::Applied { submission, effect })
    }
}

fn is_duplicate_key(error: &mongodb::error::Error) -> bool {
    matches!(
        *error.kind,
        mongodb::error::ErrorKind::Write(mongodb::error::WriteFailure::WriteError(ref we))
            if we.code == 11000
    ) || matches!(
        *error.kind,
        mongodb::error::ErrorKind::Command(ref ce) if ce.code == 11000
    )
}

#[async_trait]
impl SubmissionStore for MongoSubmissionStore {
    async fn ping(&self) -> Result<(), StoreError> {
        self.mongo.run_command(doc! { "ping": 1 }).await?;
        Ok(())
    }

    async fn find_or_create_submission(
        &self,
        user_id: &str,
        challenge: &str,
        problem: &str,
    ) -> Result<Submission, StoreError> {
        let result = track_db_operation(
            "find_or_create",
            SUBMISSIONS,
            self.upsert_submission(user_id, challenge, problem),
        )
        .await;

        let found = match result {
            Ok(found) => found,
            // two concurrent upserts raced on the unique index, the other one won
            Err(StoreError::Database(ref e)) if is_duplicate_key(e) => {
                self.submissions()
                    .find_one(doc! { "user_id": user_id, "challenge": challenge, "problem": problem })
                    .await?
            }
            Err(e) => return Err(e),
        };

        found.ok_or_else(|| StoreError::NotFound(format!("submission {}/{}", challenge, problem)))
    }

    async fn insert_attempt(&self, attempt: &SubmissionCode) -> Result<(), StoreError> {
        track_db_operation("insert", SUBMISSION_CODES, async {
            self.attempts().insert_one(attempt).await?;
            Ok::<_, StoreError>(())
        })
        .await
    }

    async fn load_attempt(
        &self,
        attempt_id: &str,
    ) -> Result<Option<(SubmissionCode, Submission)>, StoreError> {
        track_db_operation("find", SUBMISSION_CODES, async {
            let Some(attempt) = self.attempts().find_one(doc! { "_id": attempt_id }).await? else {
                return Ok(None);
            };
            let submission = self
                .submissions()
                .find_one(doc! { "_id": &attempt.submission_id })
                .await?
                .ok_or_else(|| {
                    StoreError::NotFound(format!("submission {}", attempt.submission_id))
                })?;
            Ok::<_, StoreError>(Some((attempt, submission)))
        })
        .await
    }

    async fn record_correction(
        &self,
        attempt_id: &str,
        score: i64,
        report: &CorrectionReport,
        corrected_at: DateTime<Utc>,
        fold: &ScoreFold,
    ) -> Result<RecordOutcome, StoreError> {
        track_db_operation(
            "record_correction",
            SUBMISSION_CODES,
            self.record_in_transaction(attempt_id, score, report, corrected_at, fold),
        )
        .await
    }

    async fn reset_attempt(
        &self,
        attempt_id: &str,
        task_id: &str,
    ) -> Result<Option<SubmissionCode>, StoreError> {
        track_db_operation("reset", SUBMISSION_CODES, async {
            let attempt = self
                .attempts()
                .find_one_and_update(
                    doc! { "_id": attempt_id },
                    doc! {
                        "$set": {
                            "score": Bson::Null,
                            "date_corrected": Bson::Null,
                            "result": Bson::Null,
                            "correction_task_id": task_id,
                        }
                    },
                )
                .return_document(ReturnDocument::After)
                .await?;
            Ok::<_, StoreError>(attempt)
        })
        .await
    }

    async fn set_task_id(&self, attempt_id: &str, task_id: &str) -> Result<(), StoreError> {
        track_db_operation("set_task_id", SUBMISSION_CODES, async {
            self.attempts()
                .update_one(
                    doc! { "_id": attempt_id },
                    doc! { "$set": { "correction_task_id": task_id } },
                )
                .await?;
            Ok::<_, StoreError>(())
        })
        .await
    }

    async fn pending_dispatched_attempts(&self) -> Result<Vec<SubmissionCode>, StoreError> {
        track_db_operation("find_pending", SUBMISSION_CODES, async {
            let cursor = self
                .attempts()
                .find(doc! { "score": Bson::Null, "correction_task_id": { "$ne": Bson::Null } })
                .sort(doc! { "date_submitted": 1 })
                .await?;
            let attempts: Vec<SubmissionCode> = cursor.try_collect().await?;
            Ok::<_, StoreError>(attempts
                .into_iter()
                .filter(|a| a.language.is_correctable())
                .collect())
        })
        .await
    }
}

#[derive(Default)]
struct MemoryState {
    submissions: HashMap<String, Submission>,
    attempts: HashMap<String, SubmissionCode>,
    correction_writes: usize,
}

/// Store kept in process memory. Every operation runs under one lock, so
/// folds are serialised the same way a transaction would.
#[derive(Default)]
pub struct InMemorySubmissionStore {
    state: Mutex<MemoryState>,
}

impl InMemorySubmissionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of successful `record_correction` writes so far.
    pub async fn correction_writes(&self) -> usize {
        self.state.lock().await.correction_writes
    }

    pub async fn submission(&self, submission_id: &str) -> Option<Submission> {
        self.state.lock().await.submissions.get(submission_id).cloned()
    }

    pub async fn attempt(&self, attempt_id: &str) -> Option<SubmissionCode> {
        self.state.lock().await.attempts.get(attempt_id).cloned()
    }
}

#[async_trait]
impl SubmissionStore for InMemorySubmissionStore {
    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }

    async fn find_or_create_submission(
        &self,
        user_id: &str,
        challenge: &str,
        problem: &str,
    ) -> Result<Submission, StoreError> {
        let mut state = self.state.lock().await;
        if let Some(existing) = state
            .submissions
            .values()
            .find(|s| s.user_id == user_id && s.challenge == challenge && s.problem == problem)
        {
            return Ok(existing.clone());
        }
        let submission = Submission::new(user_id, challenge, problem);
        state
            .submissions
            .insert(submission.id.clone(), submission.clone());
        Ok(submission)
    }

    async fn insert_attempt(&self, attempt: &SubmissionCode) -> Result<(), StoreError> {
        self.state
            .lock()
            .await
            .attempts
            .insert(attempt.id.clone(), attempt.clone());
        Ok(())
    }

    async fn load_attempt(
        &self,
        attempt_id: &str,
    ) -> Result<Option<(SubmissionCode, Submission)>, StoreError> {
        let state = self.state.lock().await;
        let Some(attempt) = state.attempts.get(attempt_id) else {
            return Ok(None);
        };
        let submission = state
            .submissions
            .get(&attempt.submission_id)
            .ok_or_else(|| StoreError::NotFound(format!("submission {}", attempt.submission_id)))?;
        Ok(Some((attempt.clone(), submission.clone())))
    }

    async fn record_correction(
        &self,
        attempt_id: &str,
        score: i64,
        report: &CorrectionReport,
        corrected_at: DateTime<Utc>,
        fold: &ScoreFold,
    ) -> Result<RecordOutcome, StoreError> {
        let mut guard = self.state.lock().await;
        let state = &mut *guard;

        let attempt = state
            .attempts
            .get_mut(attempt_id)
            .ok_or_else(|| StoreError::NotFound(format!("attempt {}", attempt_id)))?;
        if attempt.done() {
            return Ok(RecordOutcome::AlreadyCorrected);
        }
        let submission = state
            .submissions
            .get_mut(&attempt.submission_id)
            .ok_or_else(|| StoreError::NotFound(format!("submission {}", attempt.submission_id)))?;

        let (next, effect) = fold(submission.score_state());
        submission.set_score_state(next);
        attempt.score = Some(score);
        attempt.date_corrected = Some(corrected_at);
        attempt.result = Some(report.clone());
        state.correction_writes += 1;

        Ok(RecordOutcome::Applied {
            submission: submission.clone(),
            effect,
        })
    }

    async fn reset_attempt(
        &self,
        attempt_id: &str,
        task_id: &str,
    ) -> Result<Option<SubmissionCode>, StoreError> {
        let mut state = self.state.lock().await;
        Ok(state.attempts.get_mut(attempt_id).map(|attempt| {
            attempt.reset(task_id);
            attempt.clone()
        }))
    }

    async fn set_task_id(&self, attempt_id: &str, task_id: &str) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        if let Some(attempt) = state.attempts.get_mut(attempt_id) {
            attempt.correction_task_id = Some(task_id.to_string());
        }
        Ok(())
    }

    async fn pending_dispatched_attempts(&self) -> Result<Vec<SubmissionCode>, StoreError> {
        let state = self.state.lock().await;
        let mut pending: Vec<SubmissionCode> = state
            .attempts
            .values()
            .filter(|a| {
                a.score.is_none() && a.correction_task_id.is_some() && a.language.is_correctable()
            })
            .cloned()
            .collect();
        pending.sort_by_key(|a| a.date_submitted);
        Ok(pending)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{CorrectionResult, Language};

    fn report() -> CorrectionReport {
        CorrectionReport {
            endpoint: "http://vm1/run".to_string(),
            result: CorrectionResult::default(),
            verdicts: Vec::new(),
        }
    }

    fn raise_to(score: i64) -> impl Fn(ScoreState) -> (ScoreState, FoldEffect) {
        move |state: ScoreState| {
            (
                ScoreState {
                    score_base: score,
                    ..state
                },
                FoldEffect::BestScoreRaised {
                    from: state.score_base,
                    to: score,
                },
            )
        }
    }

    #[tokio::test]
    async fn submission_is_unique_per_triple() {
        let store = InMemorySubmissionStore::new();
        let a = store
            .find_or_create_submission("u1", "qcm2015", "sum")
            .await
            .unwrap();
        let b = store
            .find_or_create_submission("u1", "qcm2015", "sum")
            .await
            .unwrap();
        let c = store
            .find_or_create_submission("u2", "qcm2015", "sum")
            .await
            .unwrap();
        assert_eq!(a.id, b.id);
        assert_ne!(a.id, c.id);
    }

    #[tokio::test]
    async fn second_record_is_a_no_op() {
        let store = InMemorySubmissionStore::new();
        let submission = store
            .find_or_create_submission("u1", "qcm2015", "sum")
            .await
            .unwrap();
        let attempt = SubmissionCode::new(&submission.id, Language::Python, "print(1)");
        store.insert_attempt(&attempt).await.unwrap();

        let first = store
            .record_correction(&attempt.id, 64, &report(), Utc::now(), &raise_to(64))
            .await
            .unwrap();
        assert!(matches!(first, RecordOutcome::Applied { .. }));

        let second = store
            .record_correction(&attempt.id, 256, &report(), Utc::now(), &raise_to(256))
            .await
            .unwrap();
        assert_eq!(second, RecordOutcome::AlreadyCorrected);
        assert_eq!(store.correction_writes().await, 1);
        assert_eq!(store.submission(&submission.id).await.unwrap().score_base, 64);
    }

    #[tokio::test]
    async fn reset_attempt_makes_it_pending_again() {
        let store = InMemorySubmissionStore::new();
        let submission = store
            .find_or_create_submission("u1", "qcm2015", "sum")
            .await
            .unwrap();
        let attempt = SubmissionCode::new(&submission.id, Language::C, "int main(){}");
        store.insert_attempt(&attempt).await.unwrap();
        store
            .record_correction(&attempt.id, 0, &report(), Utc::now(), &raise_to(0))
            .await
            .unwrap();
        assert!(store.pending_dispatched_attempts().await.unwrap().is_empty());

        let reset = store.reset_attempt(&attempt.id, "t-2").await.unwrap().unwrap();
        assert!(reset.score.is_none());
        let pending = store.pending_dispatched_attempts().await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].correction_task_id.as_deref(), Some("t-2"));
    }

    #[tokio::test]
    async fn unknown_attempt_is_not_found() {
        let store = InMemorySubmissionStore::new();
        let err = store
            .record_correction("nope", 0, &report(), Utc::now(), &raise_to(0))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
        assert!(store.load_attempt("nope").await.unwrap().is_none());
    }
}
