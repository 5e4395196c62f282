#![allow(dead_code)]

use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum::Router;
use prologin_correction::{
    config::{Config, CorrectorEndpoint},
    create_router,
    error::CorrectorError,
    models::{CorrectionRequest, CorrectionResult, ExecutionMeta, TestOutcome},
    services::{
        corrector_client::Corrector, submission_store::InMemorySubmissionStore,
        task_queue::InMemoryTaskQueue, AppState,
    },
};
use tempfile::TempDir;

pub const CHALLENGE: &str = "qcm2015";

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
}

/// On-disk problem repository in a temporary directory.
pub struct ProblemTree {
    pub dir: TempDir,
}

impl ProblemTree {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().expect("failed to create temp dir");
        let challenge = dir.path().join(CHALLENGE);
        fs::create_dir_all(&challenge).unwrap();
        fs::write(challenge.join("challenge.props"), "title: QCM 2015\n").unwrap();
        Self { dir }
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    /// Writes `problem.props` and one `.in`/`.out` pair per test.
    pub fn add_problem(&self, name: &str, props: &str, tests: &[(&str, &str, &str)]) -> &Self {
        let problem = self.dir.path().join(CHALLENGE).join(name);
        let test_dir = problem.join("test");
        fs::create_dir_all(&test_dir).unwrap();
        fs::write(problem.join("problem.props"), props).unwrap();
        for (test, stdin, stdout) in tests {
            fs::write(test_dir.join(format!("{}.in", test)), stdin).unwrap();
            fs::write(test_dir.join(format!("{}.out", test)), stdout).unwrap();
        }
        self
    }
}

pub fn outcome(name: &str, stdout: &str) -> Option<TestOutcome> {
    Some(TestOutcome {
        name: name.to_string(),
        exitcode: 0,
        meta: ExecutionMeta {
            status: "OK".to_string(),
            ..Default::default()
        },
        stdout: stdout.to_string(),
        stderr: String::new(),
    })
}

pub fn result_with(tests: Vec<Option<TestOutcome>>) -> CorrectionResult {
    CorrectionResult {
        compile: None,
        tests: Some(tests),
    }
}

/// Corrector double: answers per endpoint URL, records every call.
#[derive(Default)]
pub struct StubCorrector {
    answers: Mutex<HashMap<String, CorrectionResult>>,
    calls: Mutex<Vec<String>>,
}

impl StubCorrector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn answer(self, endpoint: &str, result: CorrectionResult) -> Self {
        self.answers
            .lock()
            .unwrap()
            .insert(endpoint.to_string(), result);
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl Corrector for StubCorrector {
    async fn correct(
        &self,
        endpoint: &CorrectorEndpoint,
        _request: &CorrectionRequest,
    ) -> Result<CorrectionResult, CorrectorError> {
        self.calls.lock().unwrap().push(endpoint.to_string());
        match self.answers.lock().unwrap().get(endpoint.as_str()) {
            Some(result) => Ok(result.clone()),
            None => Err(CorrectorError::Timeout {
                endpoint: endpoint.to_string(),
            }),
        }
    }
}

pub fn endpoint(url: &str) -> CorrectorEndpoint {
    CorrectorEndpoint::parse(url).unwrap()
}

pub fn test_config(problems_root: &Path) -> Config {
    let toml = format!(
        r#"
        [problems]
        repository_path = "{}"
        upload_max_length = 1024

        [correctors]
        endpoints = ["http://vm1.test/run", "http://vm2.test/run"]

        [queue]
        retry_delay_secs = 0
        reserve_timeout_secs = 1
        "#,
        problems_root.display()
    );
    let settings = config::Config::builder()
        .add_source(config::File::from_str(&toml, config::FileFormat::Toml))
        .build()
        .expect("invalid test settings");
    Config::from_settings(&settings).expect("Failed to load test configuration")
}

pub struct TestApp {
    pub router: Router,
    pub store: Arc<InMemorySubmissionStore>,
    pub queue: Arc<InMemoryTaskQueue>,
    pub state: Arc<AppState>,
}

pub fn create_test_app(config: Config) -> TestApp {
    init_tracing();

    let store = Arc::new(InMemorySubmissionStore::new());
    let queue = Arc::new(InMemoryTaskQueue::new());
    let state = Arc::new(AppState::from_parts(config, store.clone(), queue.clone()));

    TestApp {
        router: create_router(state.clone()),
        store,
        queue,
        state,
    }
}
