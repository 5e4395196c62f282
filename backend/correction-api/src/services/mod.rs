use std::sync::Arc;

use crate::config::Config;
use mongodb::Client as MongoClient;
use redis::aio::ConnectionManager;

use self::problem_repository::ProblemRepository;
use self::submission_service::SubmissionService;
use self::submission_store::{MongoSubmissionStore, SubmissionStore};
use self::task_queue::{RedisTaskQueue, TaskQueue};

pub struct AppState {
    pub config: Config,
    pub store: Arc<dyn SubmissionStore>,
    pub queue: Arc<dyn TaskQueue>,
    pub problems: Arc<ProblemRepository>,
    pub submissions: SubmissionService,
}

impl AppState {
    pub fn from_parts(
        config: Config,
        store: Arc<dyn SubmissionStore>,
        queue: Arc<dyn TaskQueue>,
    ) -> Self {
        let problems = Arc::new(ProblemRepository::new(
            config.problems.repository_path.clone(),
        ));
        let submissions = SubmissionService::new(
            store.clone(),
            queue.clone(),
            problems.clone(),
            config.problems.upload_max_length,
        );
        Self {
            config,
            store,
            queue,
            problems,
            submissions,
        }
    }

    /// Connects to MongoDB and Redis and builds the state on top of them.
    pub async fn connect(config: Config) -> anyhow::Result<Self> {
        let mongo_client = MongoClient::with_uri_str(&config.mongo_uri).await?;
        let mongo = mongo_client.database(&config.mongo_database);
        tracing::info!(database = %config.mongo_database, "MongoDB client created");

        let store = MongoSubmissionStore::new(mongo);
        if let Err(e) = store.ensure_indexes().await {
            tracing::warn!(error = %e, "could not ensure submission indexes");
        }

        tracing::info!("Attempting to connect to Redis...");
        let redis_client = redis::Client::open(config.redis_uri.clone())?;
        let redis = tokio::time::timeout(
            std::time::Duration::from_secs(30),
            ConnectionManager::new(redis_client),
        )
        .await
        .map_err(|_| anyhow::anyhow!("Redis connection timeout after 30s"))??;

        let mut conn = redis.clone();
        tokio::time::timeout(
            std::time::Duration::from_secs(5),
            redis::cmd("PING").query_async::<String>(&mut conn),
        )
        .await
        .map_err(|_| anyhow::anyhow!("Redis PING timeout after 5s"))??;
        tracing::info!("Redis connection established successfully");

        let queue = RedisTaskQueue::new(redis, &config.queue.key_prefix);

        Ok(Self::from_parts(config, Arc::new(store), Arc::new(queue)))
    }
}

pub mod correction_worker;
pub mod corrector_client;
pub mod dispatcher;
pub mod problem_repository;
pub mod scorer;
pub mod submission_service;
pub mod submission_store;
pub mod task_queue;
