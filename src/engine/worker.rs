use std::sync::Arc;

use tokio::sync::{mpsc, Mutex};
use tokio::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::CrawlerSettings;
use crate::engine::stats::EngineStats;
use crate::models::{CrawlResult, CrawlTask};
use crate::proxy::ProxyManager;
use crate::stealth::{build_client, fetch, StealthEngine};

/// Everything a worker needs to execute tasks. Workers share one context;
/// the engine owns it, so there is no ownership cycle back to the engine.
pub struct WorkerContext {
    pub task_rx: Arc<Mutex<mpsc::Receiver<CrawlTask>>>,
    pub result_tx: mpsc::Sender<CrawlResult>,
    pub proxy_manager: Arc<ProxyManager>,
    pub stealth: Arc<StealthEngine>,
    pub stats: Arc<EngineStats>,
    pub settings: CrawlerSettings,
}

/// One member of the worker pool. Consumes tasks until cancelled or the
/// task queue closes, emitting exactly one result per task.
pub struct Worker {
    id: String,
    context: Arc<WorkerContext>,
    token: CancellationToken,
}

impl Worker {
    pub fn new(index: usize, context: Arc<WorkerContext>, token: CancellationToken) -> Self {
        Self {
            id: format!("worker-{}", index),
            context,
            token,
        }
    }

    pub async fn run(self) {
        debug!("Worker {} started", self.id);
        self.context.stats.worker_started();

        loop {
            let task = tokio::select! {
                _ = self.token.cancelled() => break,
                task = Self::next_task(&self.context.task_rx) => match task {
                    Some(task) => task,
                    None => break,
                },
            };

            let result = self.process_task(task).await;
            if self.context.result_tx.send(result).await.is_err() {
                warn!("Worker {} result channel closed, stopping", self.id);
                break;
            }
        }

        self.context.stats.worker_stopped();
        debug!("Worker {} stopped", self.id);
    }

    async fn next_task(task_rx: &Arc<Mutex<mpsc::Receiver<CrawlTask>>>) -> Option<CrawlTask> {
        task_rx.lock().await.recv().await
    }

    /// Execute one task. Every exit path increments exactly one outcome
    /// counter and produces a result carrying either data or an error.
    async fn process_task(&self, task: CrawlTask) -> CrawlResult {
        let stats = &self.context.stats;
        stats.record_request();

        let mut result = CrawlResult::begin(&task, &self.id);

        let proxy = match self.context.proxy_manager.get_proxy(&task.url) {
            Ok(proxy) => proxy,
            Err(e) => {
                result.error = Some(format!("Failed to get proxy: {}", e));
                stats.record_proxy_error();
                result.finish();
                return result;
            }
        };

        let profile = match self.context.stealth.generate_profile(&task.url) {
            Ok(profile) => profile,
            Err(e) => {
                result.error = Some(format!("Failed to generate profile: {}", e));
                stats.record_profile_error();
                result.finish();
                return result;
            }
        };

        let timeout = Duration::from_secs(self.context.settings.timeout);
        let fetched = match build_client(proxy.as_deref(), &profile, timeout) {
            Ok(client) => {
                fetch(&client, &task.url, self.context.settings.max_body_bytes).await
            }
            Err(e) => Err(e),
        };

        match fetched {
            Ok(data) => {
                result.data = Some(data);
                result.success = true;
                stats.record_success();
            }
            Err(e) => {
                result.error = Some(format!("{:#}", e));
                stats.record_failure();
            }
        }

        result.finish();
        result
    }
}
