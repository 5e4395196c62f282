use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;

use crate::config::CorrectorEndpoint;
use crate::error::CorrectorError;
use crate::metrics::CORRECTOR_REQUEST_DURATION_SECONDS;
use crate::models::{
    CompileLimits, CorrectionRequest, CorrectionResult, Problem, SubmissionCode, TestInput,
};

/// Something able to compile and run a submission against its tests.
#[async_trait]
pub trait Corrector: Send + Sync {
    async fn correct(
        &self,
        endpoint: &CorrectorEndpoint,
        request: &CorrectionRequest,
    ) -> Result<CorrectionResult, CorrectorError>;
}

/// Builds the request for `attempt`, or `None` when its language cannot be
/// corrected. Correction tests come first so that a failing performance
/// test can only cut other performance tests short.
pub fn build_request(
    attempt: &SubmissionCode,
    problem: &Problem,
    compile: &CompileLimits,
) -> Option<CorrectionRequest> {
    let lang = attempt.language.corrector_name()?;

    let tests = problem
        .correction_tests()
        .chain(problem.performance_tests())
        .map(|test| TestInput {
            name: test.name.clone(),
            stdin: test.stdin.clone(),
        })
        .collect();

    Some(CorrectionRequest {
        lang: lang.to_string(),
        source: attempt.code.clone(),
        all_fatal: problem.stop_early(),
        execute: problem.execution_limits(attempt.language),
        compile: compile.clone(),
        tests,
    })
}

#[derive(Debug, Deserialize)]
struct CorrectorResponse {
    #[serde(default)]
    success: Option<bool>,
    #[serde(default)]
    error: Option<String>,
    #[serde(flatten)]
    result: CorrectionResult,
}

/// HTTP client for corrector services. One blocking round-trip per call,
/// bounded by the configured request timeout.
#[derive(Clone)]
pub struct CorrectorClient {
    http: Client,
    compile: CompileLimits,
}

impl CorrectorClient {
    pub fn new(timeout: Duration, compile: CompileLimits) -> Result<Self, reqwest::Error> {
        let http = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("prologin-correction/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { http, compile })
    }

    /// Sends `attempt` to `endpoint` and returns the parsed report.
    pub async fn submit(
        &self,
        endpoint: &CorrectorEndpoint,
        attempt: &SubmissionCode,
        problem: &Problem,
    ) -> Result<CorrectionResult, CorrectorError> {
        let request = build_request(attempt, problem, &self.compile).ok_or_else(|| {
            CorrectorError::Internal {
                endpoint: endpoint.to_string(),
                message: format!("language {} is not correctable", attempt.language),
            }
        })?;
        self.correct(endpoint, &request).await
    }

    async fn post(
        &self,
        endpoint: &CorrectorEndpoint,
        request: &CorrectionRequest,
    ) -> Result<CorrectionResult, CorrectorError> {
        let name = endpoint.to_string();
        let transport = |e: reqwest::Error| {
            if e.is_timeout() {
                CorrectorError::Timeout {
                    endpoint: name.clone(),
                }
            } else {
                CorrectorError::Transport {
                    endpoint: name.clone(),
                    source: e,
                }
            }
        };

        let response = self
            .http
            .post(endpoint.url().clone())
            .json(request)
            .send()
            .await
            .map_err(transport)?;

        let status = response.status();
        if !status.is_success() {
            return Err(CorrectorError::Status {
                endpoint: name,
                status: status.as_u16(),
            });
        }

        let body = response.bytes().await.map_err(transport)?;
        let parsed: CorrectorResponse =
            serde_json::from_slice(&body).map_err(|e| CorrectorError::MalformedResponse {
                endpoint: name.clone(),
                reason: e.to_string(),
            })?;

        if parsed.success == Some(false) {
            return Err(CorrectorError::Internal {
                endpoint: name,
                message: parsed.error.unwrap_or_else(|| "unknown error".to_string()),
            });
        }

        if parsed.result.compile.is_none() && parsed.result.tests.is_none() {
            return Err(CorrectorError::MalformedResponse {
                endpoint: name,
                reason: "response has neither `compile` nor `tests`".to_string(),
            });
        }

        Ok(parsed.result)
    }
}

#[async_trait]
impl Corrector for CorrectorClient {
    async fn correct(
        &self,
        endpoint: &CorrectorEndpoint,
        request: &CorrectionRequest,
    ) -> Result<CorrectionResult, CorrectorError> {
        tracing::debug!(
            endpoint = %endpoint,
            lang = %request.lang,
            tests = request.tests.len(),
            "sending to corrector"
        );

        let start = Instant::now();
        let result = self.post(endpoint, request).await;
        let status = match &result {
            Ok(_) => "ok",
            Err(e) => e.kind(),
        };
        CORRECTOR_REQUEST_DURATION_SECONDS
            .with_label_values(&[endpoint.as_str(), status])
            .observe(start.elapsed().as_secs_f64());

        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Fixture, Language, PropValue, Properties};

    fn problem() -> Problem {
        let mut props = Properties::new();
        props.insert("performance".to_string(), PropValue::Text("a_big".to_string()));
        props.insert("time".to_string(), PropValue::Int(500));
        let fixtures = ["a_big", "t1", "t2"]
            .iter()
            .map(|name| Fixture {
                name: name.to_string(),
                stdin: format!("in {}", name),
                stdout: format!("out {}", name),
            })
            .collect();
        Problem::from_parts("qcm2015", "sum", props, fixtures).unwrap()
    }

    #[test]
    fn request_lists_correction_tests_first_without_outputs() {
        let attempt = SubmissionCode::new("s1", Language::Cpp, "int main() {}");
        let request = build_request(&attempt, &problem(), &CompileLimits::default()).unwrap();

        assert_eq!(request.lang, "c++");
        assert!(request.all_fatal);
        let names: Vec<_> = request.tests.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, ["t1", "t2", "a_big"]);
        assert_eq!(request.tests[0].stdin, "in t1");

        let json = serde_json::to_string(&request).unwrap();
        assert!(!json.contains("out t1"));
        assert!(json.contains("\"wall-time\":1.5"));
    }

    #[test]
    fn pseudocode_builds_no_request() {
        let attempt = SubmissionCode::new("s1", Language::Pseudocode, "lire n");
        assert!(build_request(&attempt, &problem(), &CompileLimits::default()).is_none());
    }
}
