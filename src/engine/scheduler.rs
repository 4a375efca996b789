use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{mpsc, RwLock};
use tokio::time::{interval, Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};
use url::Url;

use crate::config::CrawlerSettings;
use crate::models::{CrawlTask, TaskStatus};
use crate::storage::Storage;

/// Tasks pulled from the store per tick.
const BATCH_SIZE: i64 = 100;

/// Scheduler wakeup period.
const TICK: Duration = Duration::from_secs(1);

/// Per-domain pacing record. Created lazily on first admission, never
/// removed during a run.
#[derive(Debug, Clone, Default)]
pub struct DomainState {
    pub last_request: Option<Instant>,
    pub request_count: u64,
    pub blocked: bool,
    /// Preferred proxy pool; reserved for per-domain routing.
    pub proxy_pool: Option<String>,
}

/// Extract the lowercased host of a URL. Admission decisions refuse URLs
/// this cannot parse.
pub fn extract_domain(url: &str) -> Option<String> {
    let parsed = Url::parse(url).ok()?;
    parsed.host_str().map(|host| host.to_lowercase())
}

/// Shared table gating admission on per-domain pacing and block state.
/// Admission decisions are point reads under one reader-writer lock.
pub struct DomainTable {
    domains: RwLock<HashMap<String, DomainState>>,
}

impl DomainTable {
    pub fn new() -> Self {
        Self {
            domains: RwLock::new(HashMap::new()),
        }
    }

    /// True when a task for this URL may be admitted now. The rate limit is
    /// a lower bound on the inter-request interval; bursts do not
    /// accumulate credit.
    pub async fn can_schedule(&self, url: &str, rate_limit: Duration) -> bool {
        let Some(domain) = extract_domain(url) else {
            return false;
        };

        let domains = self.domains.read().await;
        match domains.get(&domain) {
            None => true,
            Some(state) => {
                if state.blocked {
                    return false;
                }
                match state.last_request {
                    Some(last) => last.elapsed() >= rate_limit,
                    None => true,
                }
            }
        }
    }

    /// Record an admission for the URL's domain.
    pub async fn observe(&self, url: &str) {
        let Some(domain) = extract_domain(url) else {
            return;
        };

        let mut domains = self.domains.write().await;
        let state = domains.entry(domain).or_default();
        state.last_request = Some(Instant::now());
        state.request_count += 1;
    }

    /// Sticky operator-level block for a domain.
    pub async fn set_blocked(&self, domain: &str, blocked: bool) {
        let mut domains = self.domains.write().await;
        domains.entry(domain.to_lowercase()).or_default().blocked = blocked;
    }

    pub async fn request_count(&self, domain: &str) -> u64 {
        let domains = self.domains.read().await;
        domains.get(domain).map(|s| s.request_count).unwrap_or(0)
    }

    pub async fn len(&self) -> usize {
        self.domains.read().await.len()
    }
}

impl Default for DomainTable {
    fn default() -> Self {
        Self::new()
    }
}

/// Feeds the bounded task queue from the durable store, one tick per
/// second, deferring whatever the queue or the domain gates refuse.
pub struct Scheduler {
    storage: Arc<dyn Storage>,
    domains: Arc<DomainTable>,
    task_tx: mpsc::Sender<CrawlTask>,
    rate_limit: Duration,
}

impl Scheduler {
    pub fn new(
        storage: Arc<dyn Storage>,
        domains: Arc<DomainTable>,
        task_tx: mpsc::Sender<CrawlTask>,
        settings: &CrawlerSettings,
    ) -> Self {
        Self {
            storage,
            domains,
            task_tx,
            rate_limit: Duration::from_millis(settings.rate_limit),
        }
    }

    pub async fn run(self, token: CancellationToken) {
        let mut ticker = interval(TICK);

        loop {
            tokio::select! {
                _ = token.cancelled() => {
                    debug!("Scheduler stopped");
                    break;
                }
                _ = ticker.tick() => {
                    self.schedule_next_tasks().await;
                }
            }
        }
    }

    /// One scheduling tick. A store read error skips the tick without
    /// touching the domain table; a full queue ends it early and leaves the
    /// remaining tasks pending for the next tick.
    pub(crate) async fn schedule_next_tasks(&self) {
        let tasks = match self.storage.get_pending_tasks(BATCH_SIZE).await {
            Ok(tasks) => tasks,
            Err(e) => {
                error!("Failed to get pending tasks: {:#}", e);
                return;
            }
        };

        for task in tasks {
            if extract_domain(&task.url).is_none() {
                warn!("Task {} has an unparsable URL, failing it: {}", task.id, task.url);
                if let Err(e) = self.storage.update_task_status(&task.id, TaskStatus::Failed).await
                {
                    warn!("Failed to mark task {} failed: {:#}", task.id, e);
                }
                continue;
            }

            if !self.domains.can_schedule(&task.url, self.rate_limit).await {
                continue;
            }

            let task_id = task.id.clone();
            let url = task.url.clone();

            match self.task_tx.try_send(task) {
                Ok(()) => {
                    self.domains.observe(&url).await;
                    if let Err(e) =
                        self.storage.update_task_status(&task_id, TaskStatus::InFlight).await
                    {
                        warn!("Failed to mark task {} in flight: {:#}", task_id, e);
                    }
                }
                Err(mpsc::error::TrySendError::Full(_)) => {
                    debug!("Task queue full, deferring remaining tasks to next tick");
                    break;
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    debug!("Task queue closed, scheduler idle");
                    return;
                }
            }
        }
    }
}
