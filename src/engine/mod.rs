pub mod scheduler;
pub mod sink;
pub mod stats;
pub mod worker;

// Re-export common types
pub use scheduler::{DomainTable, Scheduler};
pub use sink::ResultSink;
pub use stats::{EngineStats, StatsSnapshot};
pub use worker::{Worker, WorkerContext};

use std::sync::{Arc, Mutex as StdMutex};

use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{timeout, Duration};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::CrawlerSettings;
use crate::models::{CrawlResult, CrawlTask};
use crate::proxy::ProxyManager;
use crate::stealth::StealthEngine;
use crate::storage::Storage;

/// Workers get this long to finish their current task at shutdown; the
/// HTTP client timeout bounds whatever is still in flight.
const DRAIN_DEADLINE: Duration = Duration::from_secs(10);

struct Runtime {
    workers: Vec<JoinHandle<()>>,
    scheduler: JoinHandle<()>,
    sink: JoinHandle<()>,
}

/// Orchestrates the scheduler, the worker pool and the result sink around
/// two bounded queues. Starts once per process; counters survive `stop` for
/// the final stats read.
pub struct CrawlerEngine {
    settings: CrawlerSettings,
    storage: Arc<dyn Storage>,
    proxy_manager: Arc<ProxyManager>,
    stealth: Arc<StealthEngine>,
    stats: Arc<EngineStats>,
    domains: Arc<DomainTable>,
    task_tx: mpsc::Sender<CrawlTask>,
    task_rx: Arc<Mutex<mpsc::Receiver<CrawlTask>>>,
    result_tx: StdMutex<Option<mpsc::Sender<CrawlResult>>>,
    result_rx: StdMutex<Option<mpsc::Receiver<CrawlResult>>>,
    token: CancellationToken,
    runtime: Mutex<Option<Runtime>>,
}

impl CrawlerEngine {
    pub fn new(
        settings: CrawlerSettings,
        storage: Arc<dyn Storage>,
        proxy_manager: Arc<ProxyManager>,
        stealth: Arc<StealthEngine>,
    ) -> Self {
        let capacity = settings.queue_size.max(1);
        let (task_tx, task_rx) = mpsc::channel(capacity);
        let (result_tx, result_rx) = mpsc::channel(capacity);

        Self {
            settings,
            storage,
            proxy_manager,
            stealth,
            stats: Arc::new(EngineStats::new()),
            domains: Arc::new(DomainTable::new()),
            task_tx,
            task_rx: Arc::new(Mutex::new(task_rx)),
            result_tx: StdMutex::new(Some(result_tx)),
            result_rx: StdMutex::new(Some(result_rx)),
            token: CancellationToken::new(),
            runtime: Mutex::new(None),
        }
    }

    /// Bring up the result sink, the scheduler loop and the worker pool, in
    /// that order.
    pub async fn start(&self) {
        let mut runtime = self.runtime.lock().await;
        if runtime.is_some() {
            warn!("Crawler engine is already running");
            return;
        }

        let result_rx = match self.result_rx.lock().unwrap().take() {
            Some(rx) => rx,
            None => {
                warn!("Crawler engine cannot be restarted after stop");
                return;
            }
        };
        let result_tx = match self.result_tx.lock().unwrap().as_ref() {
            Some(tx) => tx.clone(),
            None => return,
        };

        let sink = ResultSink::new(self.storage.clone());
        let sink_handle = tokio::spawn(sink.run(result_rx));

        let scheduler = Scheduler::new(
            self.storage.clone(),
            self.domains.clone(),
            self.task_tx.clone(),
            &self.settings,
        );
        let scheduler_handle = tokio::spawn(scheduler.run(self.token.child_token()));

        let context = Arc::new(WorkerContext {
            task_rx: self.task_rx.clone(),
            result_tx,
            proxy_manager: self.proxy_manager.clone(),
            stealth: self.stealth.clone(),
            stats: self.stats.clone(),
            settings: self.settings.clone(),
        });

        let mut workers = Vec::with_capacity(self.settings.max_workers);
        for index in 0..self.settings.max_workers {
            let worker = Worker::new(index, context.clone(), self.token.child_token());
            workers.push(tokio::spawn(worker.run()));
        }

        info!("Started {} crawler workers", workers.len());

        *runtime = Some(Runtime {
            workers,
            scheduler: scheduler_handle,
            sink: sink_handle,
        });
    }

    /// Cancel workers and the scheduler, then let the sink drain. Tasks
    /// left on the queue are discarded; in-flight fetches are bounded by
    /// the client timeout.
    pub async fn stop(&self) {
        let runtime = self.runtime.lock().await.take();
        let Some(runtime) = runtime else {
            return;
        };

        info!("Stopping crawler engine");
        self.token.cancel();

        // Dropping our result sender lets the sink observe channel close
        // once the last worker exits.
        self.result_tx.lock().unwrap().take();

        let drain = async {
            for handle in runtime.workers {
                let _ = handle.await;
            }
            let _ = runtime.scheduler.await;
        };
        if timeout(DRAIN_DEADLINE, drain).await.is_err() {
            warn!("Workers did not stop within the drain deadline");
        }

        if timeout(DRAIN_DEADLINE, runtime.sink).await.is_err() {
            warn!("Result sink did not drain within the deadline");
        }

        info!("Crawler engine stopped");
    }

    /// Counters plus the live queue gauge, returned by value.
    pub fn snapshot(&self) -> StatsSnapshot {
        let queue_size = self.task_tx.max_capacity() - self.task_tx.capacity();
        self.stats.snapshot(queue_size)
    }
}

#[cfg(test)]
pub(crate) mod testutil {
    use std::net::SocketAddr;
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
    use std::sync::{Arc, Mutex};

    use anyhow::Result;
    use async_trait::async_trait;
    use axum::extract::State;
    use axum::routing::get;
    use axum::Router;
    use chrono::Utc;
    use tokio::time::Instant;

    use crate::models::{CrawlResult, CrawlSession, CrawlTask, SessionStats, TaskStatus};
    use crate::storage::Storage;

    /// In-memory stand-in for the multi-store collaborator.
    #[derive(Default)]
    pub struct MemStorage {
        tasks: Mutex<Vec<CrawlTask>>,
        results: Mutex<Vec<CrawlResult>>,
        sessions: Mutex<Vec<CrawlSession>>,
        reads_failing: AtomicBool,
        result_writes_to_fail: AtomicU32,
    }

    impl MemStorage {
        /// Seed pending tasks with strictly increasing creation times so
        /// age tie-breaks are deterministic.
        pub fn seed_tasks(&self, entries: Vec<(&str, i32)>) {
            let base = Utc::now();
            let mut tasks = self.tasks.lock().unwrap();
            for (index, (url, priority)) in entries.into_iter().enumerate() {
                let mut task = CrawlTask::seed("session-test", url, 0);
                task.priority = priority;
                task.created_at = base + chrono::Duration::milliseconds(index as i64);
                tasks.push(task);
            }
        }

        pub fn insert_tasks(&self, new: Vec<CrawlTask>) {
            self.tasks.lock().unwrap().extend(new);
        }

        pub fn status_of(&self, task_id: &str) -> Option<TaskStatus> {
            self.tasks.lock().unwrap().iter().find(|t| t.id == task_id).map(|t| t.status)
        }

        pub fn task_by_url(&self, url: &str) -> Option<CrawlTask> {
            self.tasks.lock().unwrap().iter().find(|t| t.url == url).cloned()
        }

        pub fn pending_count(&self) -> usize {
            self.tasks
                .lock()
                .unwrap()
                .iter()
                .filter(|t| t.status == TaskStatus::Pending)
                .count()
        }

        pub fn tasks(&self) -> Vec<CrawlTask> {
            self.tasks.lock().unwrap().clone()
        }

        pub fn results(&self) -> Vec<CrawlResult> {
            self.results.lock().unwrap().clone()
        }

        pub fn results_len(&self) -> usize {
            self.results.lock().unwrap().len()
        }

        pub fn sessions(&self) -> Vec<CrawlSession> {
            self.sessions.lock().unwrap().clone()
        }

        pub fn fail_reads(&self, failing: bool) {
            self.reads_failing.store(failing, Ordering::SeqCst);
        }

        pub fn fail_next_result_writes(&self, count: u32) {
            self.result_writes_to_fail.store(count, Ordering::SeqCst);
        }
    }

    #[async_trait]
    impl Storage for MemStorage {
        async fn store_crawl_result(&self, result: &CrawlResult) -> Result<()> {
            let pending = self.result_writes_to_fail.load(Ordering::SeqCst);
            if pending > 0 {
                self.result_writes_to_fail.store(pending - 1, Ordering::SeqCst);
                anyhow::bail!("simulated result-store outage");
            }
            self.results.lock().unwrap().push(result.clone());
            Ok(())
        }

        async fn get_pending_tasks(&self, limit: i64) -> Result<Vec<CrawlTask>> {
            if self.reads_failing.load(Ordering::SeqCst) {
                anyhow::bail!("simulated store outage");
            }
            let mut pending: Vec<CrawlTask> = self
                .tasks
                .lock()
                .unwrap()
                .iter()
                .filter(|t| t.status == TaskStatus::Pending)
                .cloned()
                .collect();
            pending.sort_by(|a, b| {
                b.priority.cmp(&a.priority).then(a.created_at.cmp(&b.created_at))
            });
            pending.truncate(limit as usize);
            Ok(pending)
        }

        async fn create_crawl_session(&self, session: &CrawlSession) -> Result<()> {
            self.sessions.lock().unwrap().push(session.clone());
            Ok(())
        }

        async fn create_crawl_tasks(&self, tasks: &[CrawlTask]) -> Result<()> {
            self.tasks.lock().unwrap().extend(tasks.iter().cloned());
            Ok(())
        }

        async fn update_task_status(&self, task_id: &str, status: TaskStatus) -> Result<()> {
            if let Some(task) =
                self.tasks.lock().unwrap().iter_mut().find(|t| t.id == task_id)
            {
                // The in-flight flip never regresses a terminal status.
                if status == TaskStatus::InFlight && task.status != TaskStatus::Pending {
                    return Ok(());
                }
                task.status = status;
            }
            Ok(())
        }

        async fn update_session_stats(
            &self,
            session_id: &str,
            stats: &SessionStats,
        ) -> Result<()> {
            if let Some(session) =
                self.sessions.lock().unwrap().iter_mut().find(|s| s.id == session_id)
            {
                session.stats = stats.clone();
            }
            Ok(())
        }

        async fn get_crawl_sessions(&self) -> Result<Vec<CrawlSession>> {
            Ok(self.sessions.lock().unwrap().clone())
        }

        async fn get_crawl_results(
            &self,
            session_id: &str,
            limit: i64,
        ) -> Result<Vec<CrawlResult>> {
            let mut results: Vec<CrawlResult> = self
                .results
                .lock()
                .unwrap()
                .iter()
                .filter(|r| session_id.is_empty() || r.session_id == session_id)
                .cloned()
                .collect();
            results.sort_by(|a, b| b.start_time.cmp(&a.start_time));
            results.truncate(limit as usize);
            Ok(results)
        }

        async fn stop_session(&self, session_id: &str) -> Result<()> {
            if let Some(session) =
                self.sessions.lock().unwrap().iter_mut().find(|s| s.id == session_id)
            {
                session.status = "stopped".to_string();
                session.completed_at = Some(Utc::now());
            }
            for task in self.tasks.lock().unwrap().iter_mut() {
                if task.session_id == session_id && task.status == TaskStatus::Pending {
                    task.status = TaskStatus::Failed;
                }
            }
            Ok(())
        }

        async fn close(&self) -> Result<()> {
            Ok(())
        }
    }

    struct Fixture {
        body: Vec<u8>,
        hits: Arc<Mutex<Vec<Instant>>>,
    }

    async fn respond(State(fixture): State<Arc<Fixture>>) -> Vec<u8> {
        fixture.hits.lock().unwrap().push(Instant::now());
        fixture.body.clone()
    }

    /// Serve a fixed body on an ephemeral port, recording the arrival time
    /// of every request.
    pub async fn serve_recording(body: Vec<u8>) -> (SocketAddr, Arc<Mutex<Vec<Instant>>>) {
        let hits = Arc::new(Mutex::new(Vec::new()));
        let fixture = Arc::new(Fixture { body, hits: hits.clone() });

        let app = Router::new()
            .route("/", get(respond))
            .route("/*path", get(respond))
            .with_state(fixture);

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        (addr, hits)
    }
}
