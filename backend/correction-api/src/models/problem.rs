use std::collections::{BTreeMap, HashSet};

use serde::{Deserialize, Serialize};

use super::language::Language;
use crate::error::ProblemError;

/// A typed value of a `key: value` property file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PropValue {
    Int(i64),
    Bool(bool),
    Text(String),
}

impl PropValue {
    /// Auto-types a raw value: integers, then booleans, else text.
    pub fn parse(raw: &str) -> PropValue {
        let value = raw.trim();
        let digits = value.strip_prefix('-').unwrap_or(value);
        if !digits.is_empty() && digits.chars().all(|c| c.is_ascii_digit()) {
            if let Ok(n) = value.parse::<i64>() {
                return PropValue::Int(n);
            }
        }
        match value.to_lowercase().as_str() {
            "true" => PropValue::Bool(true),
            "false" => PropValue::Bool(false),
            _ => PropValue::Text(value.to_string()),
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            PropValue::Int(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            PropValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_text(&self) -> String {
        match self {
            PropValue::Int(n) => n.to_string(),
            PropValue::Bool(b) => b.to_string(),
            PropValue::Text(s) => s.clone(),
        }
    }
}

pub type Properties = BTreeMap<String, PropValue>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TestType {
    Correction,
    Performance,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestCase {
    pub name: String,
    pub test_type: TestType,
    pub hidden: bool,
    pub stdin: String,
    pub stdout: String,
}

/// Raw fixture pair as found on disk, before classification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fixture {
    pub name: String,
    pub stdin: String,
    pub stdout: String,
}

/// Sandbox limits for running a submission, in the corrector's units
/// (seconds, KiB).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionLimits {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time: Option<f64>,
    #[serde(rename = "wall-time", skip_serializing_if = "Option::is_none")]
    pub wall_time: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mem: Option<i64>,
    pub fsize: i64,
}

pub const EXECUTION_FSIZE_LIMIT: i64 = 4000;

/// An immutable problem definition, loaded once from the repository.
#[derive(Debug, Clone)]
pub struct Problem {
    challenge: String,
    name: String,
    title: String,
    difficulty: u32,
    stop_early: bool,
    time_limit_ms: Option<i64>,
    memory_limit_kib: Option<i64>,
    tests: Vec<TestCase>,
}

impl Problem {
    /// Builds a problem from its parsed `problem.props` and its fixtures.
    /// Fixtures are sorted by name and classified as performance tests iff
    /// listed in the `performance` property.
    pub fn from_parts(
        challenge: &str,
        name: &str,
        properties: Properties,
        fixtures: Vec<Fixture>,
    ) -> Result<Self, ProblemError> {
        let malformed = |reason: String| ProblemError::MalformedProperties {
            path: format!("{}/{}/problem.props", challenge, name).into(),
            line: 0,
            reason,
        };

        let difficulty = match properties.get("difficulty") {
            None => 0,
            Some(value) => value
                .as_int()
                .and_then(|d| u32::try_from(d).ok())
                .ok_or_else(|| malformed(format!("invalid difficulty {:?}", value)))?,
        };
        let stop_early = match properties.get("stop-early") {
            None => true,
            Some(value) => value
                .as_bool()
                .ok_or_else(|| malformed(format!("invalid stop-early {:?}", value)))?,
        };
        let time_limit_ms = optional_int(&properties, "time").map_err(malformed)?;
        let memory_limit_kib = optional_int(&properties, "mem").map_err(malformed)?;

        let performance = word_set(&properties, "performance");
        let hidden = word_set(&properties, "hidden");

        let mut fixtures = fixtures;
        fixtures.sort_by(|a, b| a.name.cmp(&b.name));
        let tests = fixtures
            .into_iter()
            .map(|fixture| TestCase {
                test_type: if performance.contains(&fixture.name) {
                    TestType::Performance
                } else {
                    TestType::Correction
                },
                hidden: hidden.contains(&fixture.name),
                name: fixture.name,
                stdin: fixture.stdin,
                stdout: fixture.stdout,
            })
            .collect();

        Ok(Self {
            challenge: challenge.to_string(),
            name: name.to_string(),
            title: properties
                .get("title")
                .map(PropValue::as_text)
                .unwrap_or_default(),
            difficulty,
            stop_early,
            time_limit_ms,
            memory_limit_kib,
            tests,
        })
    }

    pub fn challenge(&self) -> &str {
        &self.challenge
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// `challenge/problem`, used as metrics label and in logs.
    pub fn key(&self) -> String {
        format!("{}/{}", self.challenge, self.name)
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn difficulty(&self) -> u32 {
        self.difficulty
    }

    pub fn stop_early(&self) -> bool {
        self.stop_early
    }

    pub fn tests(&self) -> &[TestCase] {
        &self.tests
    }

    pub fn test(&self, name: &str) -> Option<&TestCase> {
        self.tests.iter().find(|t| t.name == name)
    }

    pub fn correction_tests(&self) -> impl Iterator<Item = &TestCase> {
        self.tests
            .iter()
            .filter(|t| t.test_type == TestType::Correction)
    }

    pub fn performance_tests(&self) -> impl Iterator<Item = &TestCase> {
        self.tests
            .iter()
            .filter(|t| t.test_type == TestType::Performance)
    }

    pub fn execution_limits(&self, language: Language) -> ExecutionLimits {
        let mut limits = ExecutionLimits {
            time: None,
            wall_time: None,
            mem: None,
            fsize: EXECUTION_FSIZE_LIMIT,
        };
        if let Some(mem) = self.memory_limit_kib.filter(|m| *m > 0) {
            limits.mem = Some(language.memory_limit(mem));
        }
        if let Some(ms) = self.time_limit_ms.filter(|t| *t > 0) {
            let time = language.time_limit(ms as f64 / 1000.0);
            limits.time = Some(time);
            // lets a program idle up to 3x its cpu budget
            limits.wall_time = Some(3.0 * time);
        }
        limits
    }
}

fn optional_int(properties: &Properties, key: &str) -> Result<Option<i64>, String> {
    match properties.get(key) {
        None => Ok(None),
        Some(value) => value
            .as_int()
            .map(Some)
            .ok_or_else(|| format!("invalid {} {:?}", key, value)),
    }
}

fn word_set(properties: &Properties, key: &str) -> HashSet<String> {
    properties
        .get(key)
        .map(|v| v.as_text().split_whitespace().map(str::to_string).collect())
        .unwrap_or_default()
}
