use std::collections::HashMap;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::types::Json;
use sqlx::{Pool, Postgres, Row};
use tracing::debug;

use crate::config::PostgresSettings;
use crate::models::{CrawlRules, CrawlSession, CrawlTask, SessionStats, TaskStatus};

/// Relational store for sessions and tasks.
pub struct PostgresStorage {
    pool: Pool<Postgres>,
}

impl PostgresStorage {
    pub async fn new(settings: &PostgresSettings) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(&settings.connection_string())
            .await
            .context(format!(
                "Failed to connect to PostgreSQL at {}:{}",
                settings.host, settings.port
            ))?;

        let storage = Self { pool };
        storage.create_tables().await?;

        debug!("Connected to PostgreSQL database {}", settings.database);

        Ok(storage)
    }

    async fn create_tables(&self) -> Result<()> {
        let statements = [
            "CREATE TABLE IF NOT EXISTS crawl_sessions (
                id VARCHAR(255) PRIMARY KEY,
                name VARCHAR(255) NOT NULL,
                description TEXT NOT NULL DEFAULT '',
                start_urls TEXT[] NOT NULL DEFAULT '{}',
                rules JSONB NOT NULL DEFAULT '{}',
                status VARCHAR(50) NOT NULL,
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                started_at TIMESTAMPTZ,
                completed_at TIMESTAMPTZ,
                stats JSONB NOT NULL DEFAULT '{}'
            )",
            "CREATE TABLE IF NOT EXISTS crawl_tasks (
                id VARCHAR(255) PRIMARY KEY,
                session_id VARCHAR(255) REFERENCES crawl_sessions(id),
                url TEXT NOT NULL,
                method VARCHAR(10) NOT NULL DEFAULT 'GET',
                headers JSONB NOT NULL DEFAULT '{}',
                priority INTEGER NOT NULL DEFAULT 0,
                max_depth INTEGER NOT NULL DEFAULT 0,
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                scheduled_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                status VARCHAR(50) NOT NULL DEFAULT 'pending'
            )",
            "CREATE INDEX IF NOT EXISTS idx_crawl_tasks_status ON crawl_tasks(status)",
            "CREATE INDEX IF NOT EXISTS idx_crawl_tasks_session ON crawl_tasks(session_id)",
        ];

        for statement in statements {
            sqlx::query(statement)
                .execute(&self.pool)
                .await
                .context("Failed to create storage tables")?;
        }

        Ok(())
    }

    pub async fn get_pending_tasks(&self, limit: i64) -> Result<Vec<CrawlTask>> {
        let rows = sqlx::query(
            "SELECT id, session_id, url, method, headers, priority, max_depth,
                    created_at, scheduled_at, status
             FROM crawl_tasks
             WHERE status = 'pending'
             ORDER BY priority DESC, created_at ASC
             LIMIT $1",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .context("Failed to query pending tasks")?;

        let mut tasks = Vec::with_capacity(rows.len());
        for row in rows {
            tasks.push(task_from_row(&row)?);
        }

        Ok(tasks)
    }

    pub async fn create_crawl_session(&self, session: &CrawlSession) -> Result<()> {
        sqlx::query(
            "INSERT INTO crawl_sessions
                (id, name, description, start_urls, rules, status, created_at, stats)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
        )
        .bind(&session.id)
        .bind(&session.name)
        .bind(&session.description)
        .bind(&session.start_urls)
        .bind(Json(&session.rules))
        .bind(&session.status)
        .bind(session.created_at)
        .bind(Json(&session.stats))
        .execute(&self.pool)
        .await
        .context("Failed to create crawl session")?;

        debug!("Created crawl session {}", session.id);

        Ok(())
    }

    pub async fn create_crawl_tasks(&self, tasks: &[CrawlTask]) -> Result<()> {
        let mut tx = self.pool.begin().await.context("Failed to begin transaction")?;

        for task in tasks {
            sqlx::query(
                "INSERT INTO crawl_tasks
                    (id, session_id, url, method, headers, priority, max_depth,
                     created_at, scheduled_at, status)
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)",
            )
            .bind(&task.id)
            .bind(&task.session_id)
            .bind(&task.url)
            .bind(&task.method)
            .bind(Json(&task.headers))
            .bind(task.priority)
            .bind(task.max_depth)
            .bind(task.created_at)
            .bind(task.scheduled_at)
            .bind(task.status.as_str())
            .execute(&mut *tx)
            .await
            .context(format!("Failed to insert task for {}", task.url))?;
        }

        tx.commit().await.context("Failed to commit tasks")?;

        debug!("Persisted {} task(s)", tasks.len());

        Ok(())
    }

    /// The in-flight flip only applies to still-pending rows, so a worker
    /// finishing quickly can never have its terminal status regressed by a
    /// late scheduler write.
    pub async fn update_task_status(&self, task_id: &str, status: TaskStatus) -> Result<()> {
        let query = if status == TaskStatus::InFlight {
            "UPDATE crawl_tasks SET status = $1 WHERE id = $2 AND status = 'pending'"
        } else {
            "UPDATE crawl_tasks SET status = $1 WHERE id = $2"
        };

        sqlx::query(query)
            .bind(status.as_str())
            .bind(task_id)
            .execute(&self.pool)
            .await
            .context(format!("Failed to update status of task {}", task_id))?;

        Ok(())
    }

    pub async fn update_session_stats(&self, session_id: &str, stats: &SessionStats) -> Result<()> {
        sqlx::query("UPDATE crawl_sessions SET stats = $1 WHERE id = $2")
            .bind(Json(stats))
            .bind(session_id)
            .execute(&self.pool)
            .await
            .context(format!("Failed to update stats of session {}", session_id))?;

        Ok(())
    }

    pub async fn get_crawl_sessions(&self) -> Result<Vec<CrawlSession>> {
        let rows = sqlx::query(
            "SELECT id, name, description, start_urls, rules, status,
                    created_at, started_at, completed_at, stats
             FROM crawl_sessions
             ORDER BY created_at DESC",
        )
        .fetch_all(&self.pool)
        .await
        .context("Failed to query crawl sessions")?;

        let mut sessions = Vec::with_capacity(rows.len());
        for row in rows {
            sessions.push(session_from_row(&row)?);
        }

        Ok(sessions)
    }

    pub async fn stop_session(&self, session_id: &str) -> Result<()> {
        sqlx::query(
            "UPDATE crawl_sessions SET status = 'stopped', completed_at = NOW() WHERE id = $1",
        )
        .bind(session_id)
        .execute(&self.pool)
        .await
        .context(format!("Failed to stop session {}", session_id))?;

        sqlx::query(
            "UPDATE crawl_tasks SET status = 'failed'
             WHERE session_id = $1 AND status = 'pending'",
        )
        .bind(session_id)
        .execute(&self.pool)
        .await
        .context(format!("Failed to fail pending tasks of session {}", session_id))?;

        Ok(())
    }

    pub async fn close(&self) -> Result<()> {
        self.pool.close().await;
        Ok(())
    }
}

fn task_from_row(row: &sqlx::postgres::PgRow) -> Result<CrawlTask> {
    let status: String = row.try_get("status")?;
    let status = TaskStatus::from_str(&status)
        .ok_or_else(|| anyhow::anyhow!("Unknown task status: {}", status))?;
    let headers: Json<HashMap<String, String>> = row.try_get("headers")?;

    Ok(CrawlTask {
        id: row.try_get("id")?,
        session_id: row.try_get("session_id")?,
        url: row.try_get("url")?,
        method: row.try_get("method")?,
        headers: headers.0,
        priority: row.try_get("priority")?,
        max_depth: row.try_get("max_depth")?,
        created_at: row.try_get::<DateTime<Utc>, _>("created_at")?,
        scheduled_at: row.try_get::<DateTime<Utc>, _>("scheduled_at")?,
        status,
    })
}

fn session_from_row(row: &sqlx::postgres::PgRow) -> Result<CrawlSession> {
    let rules: Json<CrawlRules> = row.try_get("rules")?;
    let stats: Json<SessionStats> = row.try_get("stats")?;

    Ok(CrawlSession {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        description: row.try_get("description")?,
        start_urls: row.try_get("start_urls")?,
        rules: rules.0,
        status: row.try_get("status")?,
        created_at: row.try_get::<DateTime<Utc>, _>("created_at")?,
        started_at: row.try_get::<Option<DateTime<Utc>>, _>("started_at")?,
        completed_at: row.try_get::<Option<DateTime<Utc>>, _>("completed_at")?,
        stats: stats.0,
    })
}
