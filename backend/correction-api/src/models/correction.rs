use serde::{Deserialize, Serialize};

use super::problem::{ExecutionLimits, TestType};

/// Limits applied to the compilation step, identical for every problem.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompileLimits {
    #[serde(rename = "cg-mem")]
    pub cg_mem: i64,
    pub time: f64,
    #[serde(rename = "wall-time")]
    pub wall_time: f64,
    pub fsize: i64,
}

impl Default for CompileLimits {
    fn default() -> Self {
        Self {
            cg_mem: 500_000,
            time: 20.0,
            wall_time: 60.0,
            fsize: 50_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestInput {
    pub name: String,
    pub stdin: String,
}

/// Payload sent to a corrector endpoint. Expected outputs never leave the
/// service; they are compared locally.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorrectionRequest {
    pub lang: String,
    pub source: String,
    pub all_fatal: bool,
    pub execute: ExecutionLimits,
    pub compile: CompileLimits,
    pub tests: Vec<TestInput>,
}

/// Sandbox accounting for one compilation or test run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecutionMeta {
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exitcode: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exitsig: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time: Option<f64>,
    #[serde(
        rename = "wall-time",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub wall_time: Option<f64>,
    #[serde(rename = "max-rss", default, skip_serializing_if = "Option::is_none")]
    pub max_rss: Option<i64>,
}

pub const META_STATUS_OK: &str = "OK";

impl ExecutionMeta {
    pub fn is_ok(&self) -> bool {
        self.status == META_STATUS_OK
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompileOutcome {
    pub exitcode: i64,
    pub meta: ExecutionMeta,
    #[serde(default)]
    pub stdout: String,
    #[serde(default)]
    pub stderr: String,
}

impl CompileOutcome {
    /// Non-zero exit, timeout and signals all count as a failed build.
    pub fn failed(&self) -> bool {
        self.exitcode != 0 || !self.meta.is_ok()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestOutcome {
    pub name: String,
    pub exitcode: i64,
    pub meta: ExecutionMeta,
    #[serde(default)]
    pub stdout: String,
    #[serde(default)]
    pub stderr: String,
}

/// Compile + execute + test report of a corrector. A `None` entry in
/// `tests` is a test the corrector did not run (stopped early).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CorrectionResult {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compile: Option<CompileOutcome>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tests: Option<Vec<Option<TestOutcome>>>,
}

impl CorrectionResult {
    pub fn outcome(&self, name: &str) -> Option<&TestOutcome> {
        self.tests
            .as_ref()?
            .iter()
            .flatten()
            .find(|outcome| outcome.name == name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Passed,
    Failed,
    Skipped,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestVerdict {
    pub name: String,
    pub test_type: TestType,
    pub verdict: Verdict,
}

/// What gets stored on an attempt once it has been corrected: the raw
/// corrector report plus the locally derived verdicts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorrectionReport {
    pub endpoint: String,
    pub result: CorrectionResult,
    pub verdicts: Vec<TestVerdict>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_report_with_skipped_tests() {
        let raw = json!({
            "compile": {
                "exitcode": 0,
                "meta": {"status": "OK", "time": 0.2, "wall-time": 0.3, "max-rss": 1200},
                "stdout": "",
                "stderr": ""
            },
            "tests": [
                {"name": "t1", "exitcode": 0, "meta": {"status": "OK"}, "stdout": "9\n", "stderr": ""},
                null
            ]
        });

        let result: CorrectionResult = serde_json::from_value(raw).unwrap();
        let compile = result.compile.as_ref().unwrap();
        assert!(!compile.failed());
        assert_eq!(compile.meta.max_rss, Some(1200));
        assert_eq!(result.tests.as_ref().unwrap().len(), 2);
        assert!(result.outcome("t1").is_some());
        assert!(result.outcome("t2").is_none());
    }

    #[test]
    fn test_without_exitcode_is_rejected() {
        let raw = json!({"tests": [{"name": "t1", "meta": {"status": "OK"}}]});
        assert!(serde_json::from_value::<CorrectionResult>(raw).is_err());
    }

    #[test]
    fn timed_out_compilation_failed() {
        let compile = CompileOutcome {
            exitcode: 0,
            meta: ExecutionMeta {
                status: "TIMED_OUT".to_string(),
                ..Default::default()
            },
            stdout: String::new(),
            stderr: String::new(),
        };
        assert!(compile.failed());
    }

    #[test]
    fn request_uses_wire_key_names() {
        let value = serde_json::to_value(CompileLimits::default()).unwrap();
        assert!(value.get("cg-mem").is_some());
        assert!(value.get("wall-time").is_some());
    }
}
