use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use validator::Validate;

use super::correction::{CorrectionReport, TestVerdict};
use super::language::Language;

/// Best score and accumulated penalty of a submission, the only state the
/// correction fold reads and writes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScoreState {
    pub score_base: i64,
    pub malus: i64,
}

/// One (user, challenge, problem) triple, stored in the "submissions"
/// collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Submission {
    #[serde(rename = "_id")]
    pub id: String,
    pub user_id: String,
    pub challenge: String,
    pub problem: String,
    pub score_base: i64,
    pub malus: i64,
    pub created_at: DateTime<Utc>,
}

impl Submission {
    pub fn new(user_id: &str, challenge: &str, problem: &str) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            challenge: challenge.to_string(),
            problem: problem.to_string(),
            score_base: 0,
            malus: 0,
            created_at: Utc::now(),
        }
    }

    pub fn score(&self) -> i64 {
        self.score_base - self.malus
    }

    pub fn succeeded(&self) -> bool {
        self.score_base > 0
    }

    pub fn score_state(&self) -> ScoreState {
        ScoreState {
            score_base: self.score_base,
            malus: self.malus,
        }
    }

    pub fn set_score_state(&mut self, state: ScoreState) {
        self.score_base = state.score_base;
        self.malus = state.malus;
    }
}

/// One code upload ("attempt") of a submission, stored in the
/// "submission_codes" collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubmissionCode {
    #[serde(rename = "_id")]
    pub id: String,
    pub submission_id: String,
    pub language: Language,
    pub code: String,
    pub date_submitted: DateTime<Utc>,
    pub score: Option<i64>,
    pub date_corrected: Option<DateTime<Utc>>,
    pub result: Option<CorrectionReport>,
    pub correction_task_id: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptStatus {
    Pending,
    Failed,
    Corrected,
}

impl SubmissionCode {
    pub fn new(submission_id: &str, language: Language, code: &str) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            submission_id: submission_id.to_string(),
            language,
            code: code.to_string(),
            date_submitted: Utc::now(),
            score: None,
            date_corrected: None,
            result: None,
            correction_task_id: None,
        }
    }

    pub fn done(&self) -> bool {
        self.language.is_correctable() && self.score.is_some()
    }

    pub fn succeeded(&self) -> bool {
        self.done() && self.score.unwrap_or(0) > 0
    }

    pub fn status(&self) -> AttemptStatus {
        match self.score {
            _ if !self.done() => AttemptStatus::Pending,
            Some(0) => AttemptStatus::Failed,
            _ => AttemptStatus::Corrected,
        }
    }

    /// Back to "not yet corrected", keeping the code and language.
    pub fn reset(&mut self, task_id: &str) {
        self.score = None;
        self.date_corrected = None;
        self.result = None;
        self.correction_task_id = Some(task_id.to_string());
    }
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct SubmitCodeRequest {
    #[validate(length(min = 1, max = 128))]
    pub user_id: String,
    #[validate(length(min = 1, max = 64))]
    pub challenge: String,
    #[validate(length(min = 1, max = 64))]
    pub problem: String,
    pub language: String,
    pub code: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SubmitCodeResponse {
    pub attempt_id: String,
    pub submission_id: String,
    pub status: AttemptStatus,
}

/// Contestant-facing view of an attempt. Corrector errors never show up
/// here; an uncorrected attempt is simply pending.
#[derive(Debug, Serialize, Deserialize)]
pub struct AttemptView {
    pub attempt_id: String,
    pub submission_id: String,
    pub language: Language,
    pub status: AttemptStatus,
    pub score: Option<i64>,
    pub date_submitted: DateTime<Utc>,
    pub date_corrected: Option<DateTime<Utc>>,
    pub verdicts: Vec<TestVerdict>,
    pub submission_score: i64,
}

impl AttemptView {
    pub fn new(attempt: &SubmissionCode, submission: &Submission) -> Self {
        Self {
            attempt_id: attempt.id.clone(),
            submission_id: submission.id.clone(),
            language: attempt.language,
            status: attempt.status(),
            score: attempt.score,
            date_submitted: attempt.date_submitted,
            date_corrected: attempt.date_corrected,
            verdicts: attempt
                .result
                .as_ref()
                .map(|report| report.verdicts.clone())
                .unwrap_or_default(),
            submission_score: submission.score(),
        }
    }
}
