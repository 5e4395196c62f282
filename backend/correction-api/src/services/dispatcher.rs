use std::sync::Arc;

use chrono::Utc;

use crate::config::{Config, CorrectorEndpoint, ScoringConfig};
use crate::error::DispatchError;
use crate::metrics::{CORRECTION_SCORE, CORRECTION_STATUS_TOTAL, CORRECTION_TASKS_TOTAL};
use crate::models::{CompileLimits, CorrectionReport, ScoreState};
use crate::services::corrector_client::{build_request, Corrector};
use crate::services::problem_repository::ProblemRepository;
use crate::services::scorer::{self, FoldEffect};
use crate::services::submission_store::{RecordOutcome, SubmissionStore};

#[derive(Debug, Clone, PartialEq)]
pub enum CorrectionOutcome {
    Corrected {
        score: i64,
        endpoint: String,
        effect: FoldEffect,
    },
    /// Duplicate delivery of a task whose attempt already has a score.
    AlreadyCorrected,
}

/// Runs one correction task: sends the attempt to the corrector endpoints
/// in order until one answers, scores the answer and records it.
pub struct CorrectionDispatcher {
    store: Arc<dyn SubmissionStore>,
    problems: Arc<ProblemRepository>,
    corrector: Arc<dyn Corrector>,
    endpoints: Vec<CorrectorEndpoint>,
    compile_limits: CompileLimits,
    scoring: ScoringConfig,
}

impl CorrectionDispatcher {
    pub fn new(
        store: Arc<dyn SubmissionStore>,
        problems: Arc<ProblemRepository>,
        corrector: Arc<dyn Corrector>,
        endpoints: Vec<CorrectorEndpoint>,
        compile_limits: CompileLimits,
        scoring: ScoringConfig,
    ) -> Self {
        Self {
            store,
            problems,
            corrector,
            endpoints,
            compile_limits,
            scoring,
        }
    }

    pub fn from_config(
        config: &Config,
        store: Arc<dyn SubmissionStore>,
        problems: Arc<ProblemRepository>,
        corrector: Arc<dyn Corrector>,
    ) -> Self {
        Self::new(
            store,
            problems,
            corrector,
            config.correctors.endpoints.clone(),
            config.correctors.compile.clone(),
            config.scoring.clone(),
        )
    }

    pub fn endpoints(&self) -> &[CorrectorEndpoint] {
        &self.endpoints
    }

    pub async fn correct(&self, attempt_id: &str) -> Result<CorrectionOutcome, DispatchError> {
        let result = self.run(attempt_id).await;
        let label = match &result {
            Ok(CorrectionOutcome::Corrected { .. }) => "corrected",
            Ok(CorrectionOutcome::AlreadyCorrected) => "already_corrected",
            Err(DispatchError::AllCorrectorsFailed { .. }) => "all_correctors_failed",
            Err(DispatchError::NotCorrectable { .. }) => "not_correctable",
            Err(_) => "error",
        };
        CORRECTION_TASKS_TOTAL.with_label_values(&[label]).inc();
        result
    }

    async fn run(&self, attempt_id: &str) -> Result<CorrectionOutcome, DispatchError> {
        let (attempt, submission) = self
            .store
            .load_attempt(attempt_id)
            .await?
            .ok_or_else(|| DispatchError::AttemptNotFound(attempt_id.to_string()))?;

        if attempt.done() {
            tracing::info!(attempt_id, "attempt already corrected, skipping");
            return Ok(CorrectionOutcome::AlreadyCorrected);
        }

        let problem = self
            .problems
            .clone()
            .load_async(&submission.challenge, &submission.problem)
            .await?;
        let problem_key = problem.key();

        let request = build_request(&attempt, &problem, &self.compile_limits).ok_or_else(|| {
            DispatchError::NotCorrectable {
                attempt_id: attempt_id.to_string(),
                language: attempt.language.to_string(),
            }
        })?;

        for endpoint in &self.endpoints {
            let result = match self.corrector.correct(endpoint, &request).await {
                Ok(result) => result,
                Err(e) => {
                    CORRECTION_STATUS_TOTAL
                        .with_label_values(&[problem_key.as_str(), "error"])
                        .inc();
                    tracing::warn!(
                        attempt_id,
                        endpoint = %endpoint,
                        error = %e,
                        "corrector unavailable, trying next one"
                    );
                    continue;
                }
            };

            let evaluation = scorer::evaluate(&problem, &result);
            let score = evaluation.score;
            let report = CorrectionReport {
                endpoint: endpoint.to_string(),
                result,
                verdicts: evaluation.verdicts,
            };

            let difficulty = problem.difficulty();
            let scoring = self.scoring.clone();
            let fold =
                move |state: ScoreState| scorer::apply_result(state, score, difficulty, &scoring);

            let outcome = self
                .store
                .record_correction(attempt_id, score, &report, Utc::now(), &fold)
                .await?;

            return Ok(match outcome {
                RecordOutcome::AlreadyCorrected => {
                    tracing::info!(attempt_id, "attempt corrected concurrently, result dropped");
                    CorrectionOutcome::AlreadyCorrected
                }
                RecordOutcome::Applied { submission, effect } => {
                    CORRECTION_STATUS_TOTAL
                        .with_label_values(&[problem_key.as_str(), "ok"])
                        .inc();
                    CORRECTION_SCORE
                        .with_label_values(&[problem_key.as_str()])
                        .observe(score as f64);
                    tracing::info!(
                        attempt_id,
                        problem = %problem_key,
                        endpoint = %endpoint,
                        score,
                        passed_correction = evaluation.passed_correction,
                        total_correction = evaluation.total_correction,
                        passed_performance = evaluation.passed_performance,
                        total_performance = evaluation.total_performance,
                        submission_score = submission.score(),
                        ?effect,
                        "attempt corrected"
                    );
                    CorrectionOutcome::Corrected {
                        score,
                        endpoint: endpoint.to_string(),
                        effect,
                    }
                }
            });
        }

        let endpoints: Vec<String> = self.endpoints.iter().map(|e| e.to_string()).collect();
        tracing::error!(
            attempt_id,
            problem = %problem_key,
            tried = ?endpoints,
            "all correctors failed, attempt stays pending"
        );
        Err(DispatchError::AllCorrectorsFailed {
            attempt_id: attempt_id.to_string(),
            endpoints,
        })
    }
}
