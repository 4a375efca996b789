use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Lifecycle of a crawl task. A task never returns to `Pending` once it
/// reaches a terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    InFlight,
    Done,
    Failed,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::InFlight => "in_flight",
            TaskStatus::Done => "done",
            TaskStatus::Failed => "failed",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(TaskStatus::Pending),
            "in_flight" => Some(TaskStatus::InFlight),
            "done" => Some(TaskStatus::Done),
            "failed" => Some(TaskStatus::Failed),
            _ => None,
        }
    }
}

/// One URL to fetch, owned by the scheduler while pending and by a single
/// worker while in flight.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrawlTask {
    pub id: String,
    pub session_id: String,
    pub url: String,
    pub method: String,
    pub headers: HashMap<String, String>,
    /// Higher values are scheduled first.
    pub priority: i32,
    pub max_depth: i32,
    pub created_at: DateTime<Utc>,
    pub scheduled_at: DateTime<Utc>,
    pub status: TaskStatus,
}

impl CrawlTask {
    /// Build a pending seed task for a session.
    pub fn seed(session_id: &str, url: &str, max_depth: i32) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            session_id: session_id.to_string(),
            url: url.to_string(),
            method: "GET".to_string(),
            headers: HashMap::new(),
            priority: 5,
            max_depth,
            created_at: now,
            scheduled_at: now,
            status: TaskStatus::Pending,
        }
    }
}

/// Outcome of one task execution. Exactly one of `data` and `error` is set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrawlResult {
    pub task_id: String,
    pub session_id: String,
    pub url: String,
    pub worker_id: String,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<CrawlData>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub duration_ms: i64,
}

impl CrawlResult {
    /// Start a result envelope for a task picked up by `worker_id`.
    pub fn begin(task: &CrawlTask, worker_id: &str) -> Self {
        let now = Utc::now();
        Self {
            task_id: task.id.clone(),
            session_id: task.session_id.clone(),
            url: task.url.clone(),
            worker_id: worker_id.to_string(),
            success: false,
            data: None,
            error: None,
            start_time: now,
            end_time: now,
            duration_ms: 0,
        }
    }

    /// Stamp the end time and duration.
    pub fn finish(&mut self) {
        self.end_time = Utc::now();
        self.duration_ms = (self.end_time - self.start_time).num_milliseconds();
    }
}

/// Captured payload of a fetch. The body is truncated to the configured cap;
/// `body_len` records how many bytes were actually kept.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrawlData {
    pub url: String,
    pub status_code: u16,
    pub headers: HashMap<String, String>,
    pub body: Vec<u8>,
    pub body_len: usize,
    pub truncated: bool,
    /// Populated by downstream extractors, not by the fetch itself.
    pub links: Vec<String>,
    pub images: Vec<String>,
    pub metadata: HashMap<String, Value>,
    pub timestamp: DateTime<Utc>,
}

/// A named set of seed URLs plus traversal rules. Opaque to the engine,
/// which only reads tasks that reference it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrawlSession {
    pub id: String,
    pub name: String,
    pub description: String,
    pub start_urls: Vec<String>,
    pub rules: CrawlRules,
    pub status: String,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    pub stats: SessionStats,
}

/// Traversal rules attached to a session. Modeled for downstream link
/// expansion; the orchestrator does not enforce them.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CrawlRules {
    pub max_depth: i32,
    pub max_pages: i32,
    pub allowed_domains: Vec<String>,
    pub blocked_domains: Vec<String>,
    pub url_patterns: Vec<String>,
    pub respect_robots_txt: bool,
    /// Extra per-task delay in milliseconds.
    pub delay: i64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionStats {
    pub total_tasks: i64,
    pub completed_tasks: i64,
    pub failed_tasks: i64,
    pub pending_tasks: i64,
    pub pages_per_minute: i64,
}

/// Serializable snapshot of a proxy for the control API.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProxyInfo {
    pub id: String,
    pub host: String,
    pub port: u16,
    pub pool_type: String,
    pub country: Option<String>,
    pub provider: String,
    pub healthy: bool,
    pub fail_count: u32,
}
