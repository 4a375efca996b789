use std::sync::Arc;

use anyhow::{Context, Result};
use redis::aio::MultiplexedConnection;
use redis::Client;
use tokio::sync::Mutex;
use tracing::debug;

use crate::config::RedisSettings;
use crate::models::CrawlResult;

/// Cached results expire after one hour.
const RESULT_TTL_SECS: u64 = 3600;

/// Key-value cache for hot result lookups.
pub struct RedisStorage {
    conn: Arc<Mutex<MultiplexedConnection>>,
}

impl RedisStorage {
    pub async fn new(settings: &RedisSettings) -> Result<Self> {
        let url = settings.connection_string();
        let client = Client::open(url.clone())
            .context(format!("Failed to open Redis connection to {}", url))?;

        let conn = client
            .get_multiplexed_async_connection()
            .await
            .context("Failed to connect to Redis")?;

        debug!("Connected to Redis at {}:{}", settings.host, settings.port);

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub async fn cache_crawl_result(&self, result: &CrawlResult) -> Result<()> {
        let key = format!("result:{}", result.task_id);
        let payload = serde_json::to_string(result).context("Failed to serialize crawl result")?;

        let mut conn = self.conn.lock().await;
        redis::cmd("SET")
            .arg(&key)
            .arg(&payload)
            .arg("EX")
            .arg(RESULT_TTL_SECS)
            .query_async::<_, ()>(&mut *conn)
            .await
            .context("Failed to cache crawl result in Redis")?;

        debug!("Cached result under {}", key);

        Ok(())
    }
}
