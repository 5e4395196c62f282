use std::collections::HashMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use lazy_static::lazy_static;
use regex::Regex;

use crate::error::ProblemError;
use crate::models::{Fixture, Problem, PropValue, Properties};

lazy_static! {
    static ref NAME_PATTERN: Regex = Regex::new(r"^[a-z0-9_.-]+$").unwrap();
}

const CHALLENGE_PROPS: &str = "challenge.props";
const PROBLEM_PROPS: &str = "problem.props";
const TESTS_DIR: &str = "test";

/// Reads problem definitions from the on-disk repository:
///
/// ```text
/// <root>/<challenge>/challenge.props
/// <root>/<challenge>/<problem>/problem.props
/// <root>/<challenge>/<problem>/test/<name>.in
/// <root>/<challenge>/<problem>/test/<name>.out
/// ```
///
/// Problems are loaded on first access and kept for the lifetime of the
/// repository; files changed afterwards are not picked up.
pub struct ProblemRepository {
    root: PathBuf,
    cache: RwLock<HashMap<(String, String), Arc<Problem>>>,
}

impl ProblemRepository {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            cache: RwLock::new(HashMap::new()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn load(&self, challenge: &str, problem: &str) -> Result<Arc<Problem>, ProblemError> {
        let key = (challenge.to_string(), problem.to_string());
        if let Some(cached) = self
            .cache
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(&key)
        {
            return Ok(cached.clone());
        }

        let loaded = Arc::new(self.read_problem(challenge, problem)?);
        tracing::debug!(
            challenge,
            problem,
            tests = loaded.tests().len(),
            "problem loaded"
        );

        let mut cache = self
            .cache
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        Ok(cache.entry(key).or_insert(loaded).clone())
    }

    /// Same as [`load`](Self::load), off the async runtime threads.
    pub async fn load_async(
        self: Arc<Self>,
        challenge: &str,
        problem: &str,
    ) -> Result<Arc<Problem>, ProblemError> {
        let root = self.root.clone();
        let (challenge, problem) = (challenge.to_string(), problem.to_string());
        match tokio::task::spawn_blocking(move || self.load(&challenge, &problem)).await {
            Ok(result) => result,
            Err(join_error) => Err(ProblemError::Io {
                path: root,
                source: std::io::Error::other(join_error.to_string()),
            }),
        }
    }

    fn read_problem(&self, challenge: &str, problem: &str) -> Result<Problem, ProblemError> {
        let not_found = || ProblemError::NotFound(format!("{}/{}", challenge, problem));

        if !is_valid_name(challenge) || !is_valid_name(problem) {
            return Err(not_found());
        }

        let challenge_dir = self.root.join(challenge);
        if !challenge_dir.join(CHALLENGE_PROPS).is_file() {
            return Err(not_found());
        }

        let problem_dir = challenge_dir.join(problem);
        let props_path = problem_dir.join(PROBLEM_PROPS);
        if !props_path.is_file() {
            return Err(not_found());
        }

        let properties = parse_properties(&read_text(&props_path)?, &props_path)?;
        let fixtures = read_fixtures(&problem_dir.join(TESTS_DIR))?;

        let problem = Problem::from_parts(challenge, problem, properties, fixtures)
            .map_err(|e| match e {
                ProblemError::MalformedProperties { line, reason, .. } => {
                    ProblemError::MalformedProperties {
                        path: props_path.clone(),
                        line,
                        reason,
                    }
                }
                other => other,
            })?;

        if problem.correction_tests().next().is_none() {
            tracing::warn!(problem = %problem.key(), "problem has no correction test");
        }
        Ok(problem)
    }
}

fn is_valid_name(name: &str) -> bool {
    !name.starts_with('.') && NAME_PATTERN.is_match(name)
}

/// Parses a `key: value` property file. Blank lines are skipped, keys are
/// trimmed and `_` is normalised to `-`.
pub fn parse_properties(content: &str, path: &Path) -> Result<Properties, ProblemError> {
    let mut properties = Properties::new();
    for (index, line) in content.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let (key, value) = line
            .split_once(':')
            .ok_or_else(|| ProblemError::MalformedProperties {
                path: path.to_path_buf(),
                line: index + 1,
                reason: format!("expected `key: value`, got {:?}", line),
            })?;
        let key = key.trim().replace('_', "-");
        if key.is_empty() {
            return Err(ProblemError::MalformedProperties {
                path: path.to_path_buf(),
                line: index + 1,
                reason: "empty key".to_string(),
            });
        }
        properties.insert(key, PropValue::parse(value));
    }
    Ok(properties)
}

/// Pairs `<name>.in` with `<name>.out`; names missing either side are ignored.
fn read_fixtures(dir: &Path) -> Result<Vec<Fixture>, ProblemError> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
        Err(source) => {
            return Err(ProblemError::Io {
                path: dir.to_path_buf(),
                source,
            })
        }
    };

    let mut inputs = HashMap::new();
    let mut outputs = HashMap::new();
    for entry in entries {
        let entry = entry.map_err(|source| ProblemError::Io {
            path: dir.to_path_buf(),
            source,
        })?;
        let path = entry.path();
        let (Some(stem), Some(ext)) = (
            path.file_stem().and_then(|s| s.to_str()),
            path.extension().and_then(|s| s.to_str()),
        ) else {
            continue;
        };
        let storage = match ext {
            "in" => &mut inputs,
            "out" => &mut outputs,
            _ => continue,
        };
        storage.insert(stem.to_string(), read_text(&path)?);
    }

    let mut fixtures: Vec<Fixture> = inputs
        .into_iter()
        .filter_map(|(name, stdin)| {
            let stdout = outputs.remove(&name)?;
            Some(Fixture {
                name,
                stdin,
                stdout,
            })
        })
        .collect();
    fixtures.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(fixtures)
}

/// UTF-8 first, Latin-1 as a fallback for legacy fixtures.
fn read_text(path: &Path) -> Result<String, ProblemError> {
    let bytes = fs::read(path).map_err(|source| ProblemError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(match String::from_utf8(bytes) {
        Ok(text) => text,
        Err(e) => e.into_bytes().iter().map(|&b| b as char).collect(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_properties_normalises_keys() {
        let props = parse_properties(
            "title: Sum of two\n\nstop_early: false\ndifficulty: 3\nurl: http://x\n",
            Path::new("problem.props"),
        )
        .unwrap();

        assert_eq!(props["title"], PropValue::Text("Sum of two".to_string()));
        assert_eq!(props["stop-early"], PropValue::Bool(false));
        assert_eq!(props["difficulty"], PropValue::Int(3));
        assert_eq!(props["url"], PropValue::Text("http://x".to_string()));
    }

    #[test]
    fn parse_properties_rejects_lines_without_colon() {
        let err = parse_properties("title: ok\ngarbage\n", Path::new("problem.props")).unwrap_err();
        match err {
            ProblemError::MalformedProperties { line, .. } => assert_eq!(line, 2),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn invalid_names_are_not_found() {
        let repository = ProblemRepository::new("/nonexistent");
        for (challenge, problem) in [("qcm2015", "../etc"), ("..", "sum"), ("QCM", "sum")] {
            assert!(matches!(
                repository.load(challenge, problem),
                Err(ProblemError::NotFound(_))
            ));
        }
    }
}
