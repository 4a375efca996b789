pub mod mongo;
pub mod postgres;
pub mod redis;

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;

use crate::config::StorageSettings;
use crate::models::{CrawlResult, CrawlSession, CrawlTask, SessionStats, TaskStatus};

pub use mongo::MongoStorage;
pub use postgres::PostgresStorage;
pub use redis::RedisStorage;

/// Persistence collaborator consumed by the engine and the control API.
///
/// `get_pending_tasks` takes no locks, so a task may be redelivered across
/// ticks; callers mark tasks in-flight promptly and handle results
/// idempotently downstream.
#[async_trait]
pub trait Storage: Send + Sync {
    /// Persist a completed result (document store + hot cache).
    async fn store_crawl_result(&self, result: &CrawlResult) -> Result<()>;

    /// At most `limit` pending tasks, ordered by priority desc, age asc.
    async fn get_pending_tasks(&self, limit: i64) -> Result<Vec<CrawlTask>>;

    async fn create_crawl_session(&self, session: &CrawlSession) -> Result<()>;

    /// Persist tasks durably; the scheduler is the only path from here onto
    /// the worker queue.
    async fn create_crawl_tasks(&self, tasks: &[CrawlTask]) -> Result<()>;

    /// Moving a task to `InFlight` must not regress an already-terminal
    /// status; the scheduler's flip can land after the sink's.
    async fn update_task_status(&self, task_id: &str, status: TaskStatus) -> Result<()>;

    async fn update_session_stats(&self, session_id: &str, stats: &SessionStats) -> Result<()>;

    async fn get_crawl_sessions(&self) -> Result<Vec<CrawlSession>>;

    async fn get_crawl_results(&self, session_id: &str, limit: i64) -> Result<Vec<CrawlResult>>;

    /// Mark a session stopped and fail its still-pending tasks.
    async fn stop_session(&self, session_id: &str) -> Result<()>;

    async fn close(&self) -> Result<()>;
}

/// Fans persistence out across the three backing stores: PostgreSQL for
/// sessions and tasks, MongoDB for result documents, Redis for the
/// hot-result cache.
pub struct MultiStorage {
    postgres: PostgresStorage,
    mongo: MongoStorage,
    redis: RedisStorage,
}

impl MultiStorage {
    pub async fn new(config: &StorageSettings) -> Result<Arc<dyn Storage>> {
        let postgres = PostgresStorage::new(&config.postgresql).await?;
        let mongo = MongoStorage::new(&config.mongodb).await?;
        let redis = RedisStorage::new(&config.redis).await?;

        Ok(Arc::new(Self { postgres, mongo, redis }))
    }
}

#[async_trait]
impl Storage for MultiStorage {
    async fn store_crawl_result(&self, result: &CrawlResult) -> Result<()> {
        self.mongo.store_crawl_result(result).await?;
        self.redis.cache_crawl_result(result).await
    }

    async fn get_pending_tasks(&self, limit: i64) -> Result<Vec<CrawlTask>> {
        self.postgres.get_pending_tasks(limit).await
    }

    async fn create_crawl_session(&self, session: &CrawlSession) -> Result<()> {
        self.postgres.create_crawl_session(session).await
    }

    async fn create_crawl_tasks(&self, tasks: &[CrawlTask]) -> Result<()> {
        self.postgres.create_crawl_tasks(tasks).await
    }

    async fn update_task_status(&self, task_id: &str, status: TaskStatus) -> Result<()> {
        self.postgres.update_task_status(task_id, status).await
    }

    async fn update_session_stats(&self, session_id: &str, stats: &SessionStats) -> Result<()> {
        self.postgres.update_session_stats(session_id, stats).await
    }

    async fn get_crawl_sessions(&self) -> Result<Vec<CrawlSession>> {
        self.postgres.get_crawl_sessions().await
    }

    async fn get_crawl_results(&self, session_id: &str, limit: i64) -> Result<Vec<CrawlResult>> {
        self.mongo.get_crawl_results(session_id, limit).await
    }

    async fn stop_session(&self, session_id: &str) -> Result<()> {
        self.postgres.stop_session(session_id).await
    }

    async fn close(&self) -> Result<()> {
        self.postgres.close().await
    }
}
