use std::path::PathBuf;

use thiserror::Error;

/// Errors raised while reading a problem definition from the repository.
#[derive(Debug, Error)]
pub enum ProblemError {
    #[error("problem not found: {0}")]
    NotFound(String),

    #[error("malformed property file {path}:{line}: {reason}")]
    MalformedProperties {
        path: PathBuf,
        line: usize,
        reason: String,
    },

    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Every variant means "this corrector endpoint could not produce a usable
/// result". None of them is retried by the client itself.
#[derive(Debug, Error)]
pub enum CorrectorError {
    #[error("corrector {endpoint} timed out")]
    Timeout { endpoint: String },

    #[error("corrector {endpoint} unreachable: {source}")]
    Transport {
        endpoint: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("corrector {endpoint} answered with HTTP {status}")]
    Status { endpoint: String, status: u16 },

    #[error("corrector {endpoint} sent a malformed response: {reason}")]
    MalformedResponse { endpoint: String, reason: String },

    #[error("corrector {endpoint} reported an internal error: {message}")]
    Internal { endpoint: String, message: String },
}

impl CorrectorError {
    /// Short label used for metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            CorrectorError::Timeout { .. } => "timeout",
            CorrectorError::Transport { .. } => "transport",
            CorrectorError::Status { .. } => "status",
            CorrectorError::MalformedResponse { .. } => "malformed",
            CorrectorError::Internal { .. } => "internal",
        }
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{0} not found")]
    NotFound(String),

    #[error("database error: {0}")]
    Database(#[from] mongodb::error::Error),

    #[error("failed to encode document: {0}")]
    Encoding(#[from] mongodb::bson::ser::Error),
}

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("invalid job payload: {0}")]
    Payload(#[from] serde_json::Error),
}

/// Failure of one correction task invocation.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("attempt {0} not found")]
    AttemptNotFound(String),

    #[error(transparent)]
    Problem(#[from] ProblemError),

    #[error("attempt {attempt_id} uses non-correctable language {language}")]
    NotCorrectable { attempt_id: String, language: String },

    #[error("all correctors failed for attempt {attempt_id} (tried: {})", endpoints.join(", "))]
    AllCorrectorsFailed {
        attempt_id: String,
        endpoints: Vec<String>,
    },

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl DispatchError {
    /// Whether the queue should deliver the task again.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            DispatchError::AllCorrectorsFailed { .. } | DispatchError::Store(_)
        )
    }
}

/// Errors surfaced by the submission service to the HTTP layer and tools.
#[derive(Debug, Error)]
pub enum SubmitError {
    #[error("unknown problem {challenge}/{problem}")]
    UnknownProblem { challenge: String, problem: String },

    #[error("unknown language: {0}")]
    InvalidLanguage(String),

    #[error("invalid code: {0}")]
    InvalidCode(String),

    #[error("attempt {0} not found")]
    AttemptNotFound(String),

    #[error(transparent)]
    Problem(ProblemError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Queue(#[from] QueueError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn all_correctors_failed_lists_endpoints() {
        let err = DispatchError::AllCorrectorsFailed {
            attempt_id: "a1".to_string(),
            endpoints: vec!["http://a/run".to_string(), "http://b/run".to_string()],
        };
        assert_eq!(
            err.to_string(),
            "all correctors failed for attempt a1 (tried: http://a/run, http://b/run)"
        );
        assert!(err.is_retryable());
    }

    #[test]
    fn missing_problem_is_not_retried() {
        let err = DispatchError::from(ProblemError::NotFound("qcm2015/sum".to_string()));
        assert!(!err.is_retryable());
    }
}
