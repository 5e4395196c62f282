use serde::Deserialize;
use std::env;
use std::fmt;
use std::path::PathBuf;
use url::Url;

use crate::models::CompileLimits;

/// A corrector service URL. Endpoints are tried in the order they are
/// configured.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CorrectorEndpoint {
    url: Url,
}

impl CorrectorEndpoint {
    pub fn parse(raw: &str) -> Result<Self, config::ConfigError> {
        let url = Url::parse(raw.trim()).map_err(|e| {
            config::ConfigError::Message(format!("invalid corrector endpoint {:?}: {}", raw, e))
        })?;
        if url.scheme() != "http" && url.scheme() != "https" {
            return Err(config::ConfigError::Message(format!(
                "corrector endpoint must use http or https: {}",
                raw
            )));
        }
        Ok(Self { url })
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn as_str(&self) -> &str {
        self.url.as_str()
    }
}

impl fmt::Display for CorrectorEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.url.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct CorrectorSettings {
    pub endpoints: Vec<CorrectorEndpoint>,
    pub request_timeout_secs: u64,
    pub compile: CompileLimits,
}

impl Default for CorrectorSettings {
    fn default() -> Self {
        Self {
            endpoints: Vec::new(),
            request_timeout_secs: 10 * 60,
            compile: CompileLimits::default(),
        }
    }
}

/// Scoring knobs that are product decisions rather than formula.
#[derive(Debug, Clone, Deserialize)]
pub struct ScoringConfig {
    /// Malus added per failed attempt on a difficulty-0 problem, where the
    /// regular `4^(difficulty-1)` increment is fractional.
    pub zero_difficulty_malus: i64,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            zero_difficulty_malus: 0,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ProblemsSettings {
    pub repository_path: PathBuf,
    /// Max size of an uploaded source, in bytes.
    pub upload_max_length: usize,
}

impl Default for ProblemsSettings {
    fn default() -> Self {
        Self {
            repository_path: PathBuf::from("problems"),
            upload_max_length: 1 << 21,
        }
    }
}

#[derive(Debug, Clone)]
pub struct QueueSettings {
    pub key_prefix: String,
    /// Deliveries of one job before it is dead-lettered.
    pub max_retries: u32,
    pub retry_delay_secs: u64,
    pub reserve_timeout_secs: u64,
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            key_prefix: "correction".to_string(),
            max_retries: 5,
            retry_delay_secs: 3,
            reserve_timeout_secs: 5,
        }
    }
}

/// `id` names the processing list of this worker process; two running
/// workers must not share one.
#[derive(Debug, Clone)]
pub struct WorkerSettings {
    pub id: String,
    pub concurrency: usize,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            id: "worker".to_string(),
            concurrency: 4,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub mongo_uri: String,
    pub mongo_database: String,
    pub redis_uri: String,
    pub server_addr: String,
    pub problems: ProblemsSettings,
    pub correctors: CorrectorSettings,
    pub scoring: ScoringConfig,
    pub queue: QueueSettings,
    pub worker: WorkerSettings,
}

impl Config {
    pub fn load() -> Result<Self, config::ConfigError> {
        // Root .env first, then the local one
        let skip_root_env = env::var("SKIP_ROOT_ENV").is_ok();
        if skip_root_env {
            dotenvy::dotenv().ok();
        } else if dotenvy::from_path("../../.env").is_err() {
            dotenvy::dotenv().ok();
        }

        let env = env::var("APP_ENV").unwrap_or_else(|_| "dev".to_string());

        // config/<env>.toml, overridden by APP__SECTION__KEY variables
        let settings = config::Config::builder()
            .add_source(config::File::with_name(&format!("config/{}", env)).required(false))
            .add_source(
                config::Environment::with_prefix("APP")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("correctors.endpoints")
                    .try_parsing(true),
            )
            .build()?;

        Self::from_settings(&settings)
    }

    pub fn from_settings(settings: &config::Config) -> Result<Self, config::ConfigError> {
        let mongo_uri = settings
            .get_string("database.mongo_uri")
            .or_else(|_| env::var("MONGO_URI"))
            .unwrap_or_else(|_| "mongodb://localhost:27017/?replicaSet=rs0".to_string());

        let mongo_database = settings
            .get_string("database.mongo_database")
            .or_else(|_| env::var("MONGO_DATABASE"))
            .unwrap_or_else(|_| "prologin".to_string());

        let redis_uri = settings
            .get_string("redis.uri")
            .or_else(|_| env::var("REDIS_URI"))
            .unwrap_or_else(|_| "redis://127.0.0.1:6379/0".to_string());

        let server_addr = settings
            .get_string("server.addr")
            .or_else(|_| env::var("SERVER_ADDR"))
            .unwrap_or_else(|_| "0.0.0.0:8081".to_string());

        let problems_defaults = ProblemsSettings::default();
        let problems = ProblemsSettings {
            repository_path: settings
                .get_string("problems.repository_path")
                .or_else(|_| env::var("PROBLEMS_REPOSITORY_PATH"))
                .map(PathBuf::from)
                .unwrap_or(problems_defaults.repository_path),
            upload_max_length: get_or(
                settings,
                "problems.upload_max_length",
                problems_defaults.upload_max_length,
            )?,
        };

        let raw_endpoints: Vec<String> = match settings.get::<Vec<String>>("correctors.endpoints") {
            Ok(list) => list,
            Err(config::ConfigError::NotFound(_)) => env::var("PROBLEMS_CORRECTORS")
                .map(|v| {
                    v.split(',')
                        .map(str::trim)
                        .filter(|s| !s.is_empty())
                        .map(str::to_string)
                        .collect()
                })
                .unwrap_or_default(),
            Err(e) => return Err(e),
        };
        let endpoints = raw_endpoints
            .iter()
            .map(|raw| CorrectorEndpoint::parse(raw))
            .collect::<Result<Vec<_>, _>>()?;
        if endpoints.is_empty() {
            eprintln!("WARNING: no corrector endpoint configured, every correction will fail");
        }

        let corrector_defaults = CorrectorSettings::default();
        let correctors = CorrectorSettings {
            endpoints,
            request_timeout_secs: get_or(
                settings,
                "correctors.request_timeout_secs",
                corrector_defaults.request_timeout_secs,
            )?,
            compile: get_or(settings, "correctors.compile", corrector_defaults.compile)?,
        };

        let scoring = get_or(settings, "scoring", ScoringConfig::default())?;

        let queue_defaults = QueueSettings::default();
        let queue = QueueSettings {
            key_prefix: settings
                .get_string("queue.key_prefix")
                .unwrap_or(queue_defaults.key_prefix),
            max_retries: get_or(settings, "queue.max_retries", queue_defaults.max_retries)?,
            retry_delay_secs: get_or(
                settings,
                "queue.retry_delay_secs",
                queue_defaults.retry_delay_secs,
            )?,
            reserve_timeout_secs: get_or(
                settings,
                "queue.reserve_timeout_secs",
                queue_defaults.reserve_timeout_secs,
            )?,
        };

        let worker_defaults = WorkerSettings::default();
        let worker = WorkerSettings {
            id: settings
                .get_string("worker.id")
                .or_else(|_| env::var("WORKER_ID"))
                .unwrap_or(worker_defaults.id),
            concurrency: get_or(settings, "worker.concurrency", worker_defaults.concurrency)?
                .max(1),
        };

        Ok(Config {
            mongo_uri,
            mongo_database,
            redis_uri,
            server_addr,
            problems,
            correctors,
            scoring,
            queue,
            worker,
        })
    }
}

/// Reads `key`, falling back to `default` only when the key is absent.
fn get_or<T>(settings: &config::Config, key: &str, default: T) -> Result<T, config::ConfigError>
where
    T: serde::de::DeserializeOwned,
{
    match settings.get::<T>(key) {
        Ok(value) => Ok(value),
        Err(config::ConfigError::NotFound(_)) => Ok(default),
        Err(e) => Err(e),
    }
}
