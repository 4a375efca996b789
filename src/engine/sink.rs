use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::models::{CrawlResult, TaskStatus};
use crate::storage::Storage;

/// Single consumer of the result channel. Persists each result and flips
/// the task to its terminal status; store errors are logged and absorbed so
/// one bad write never stalls the drain.
pub struct ResultSink {
    storage: Arc<dyn Storage>,
}

impl ResultSink {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self { storage }
    }

    /// Runs until every result sender is gone, so in-flight results drain
    /// at shutdown.
    pub async fn run(self, mut results: mpsc::Receiver<CrawlResult>) {
        while let Some(result) = results.recv().await {
            let status = if result.success { TaskStatus::Done } else { TaskStatus::Failed };
            if let Err(e) = self.storage.update_task_status(&result.task_id, status).await {
                warn!("Failed to update status of task {}: {:#}", result.task_id, e);
            }

            if let Err(e) = self.storage.store_crawl_result(&result).await {
                warn!("Failed to store crawl result for {}: {:#}", result.url, e);
            }

            match &result.error {
                Some(error) => warn!("Crawl failed for {}: {}", result.url, error),
                None => debug!("Successfully crawled {}", result.url),
            }
        }

        debug!("Result sink drained");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::testutil::MemStorage;
    use crate::models::CrawlTask;

    fn result_for(task: &CrawlTask, success: bool) -> CrawlResult {
        let mut result = CrawlResult::begin(task, "worker-0");
        if success {
            result.success = true;
        } else {
            result.error = Some("boom".to_string());
        }
        result.finish();
        result
    }

    #[tokio::test]
    async fn drains_the_channel_and_flips_task_statuses() {
        let storage = Arc::new(MemStorage::default());
        let ok_task = CrawlTask::seed("s1", "http://a.com/", 0);
        let bad_task = CrawlTask::seed("s1", "http://b.com/", 0);
        storage.insert_tasks(vec![ok_task.clone(), bad_task.clone()]);

        let (tx, rx) = mpsc::channel(8);
        let sink = ResultSink::new(storage.clone());
        let handle = tokio::spawn(sink.run(rx));

        tx.send(result_for(&ok_task, true)).await.unwrap();
        tx.send(result_for(&bad_task, false)).await.unwrap();
        drop(tx);

        handle.await.unwrap();

        assert_eq!(storage.results_len(), 2);
        assert_eq!(storage.status_of(&ok_task.id), Some(TaskStatus::Done));
        assert_eq!(storage.status_of(&bad_task.id), Some(TaskStatus::Failed));
    }

    #[tokio::test]
    async fn store_errors_do_not_stop_the_sink() {
        let storage = Arc::new(MemStorage::default());
        let first = CrawlTask::seed("s1", "http://a.com/", 0);
        let second = CrawlTask::seed("s1", "http://b.com/", 0);
        storage.insert_tasks(vec![first.clone(), second.clone()]);

        let (tx, rx) = mpsc::channel(8);
        let handle = tokio::spawn(ResultSink::new(storage.clone()).run(rx));

        storage.fail_next_result_writes(1);
        tx.send(result_for(&first, true)).await.unwrap();
        tx.send(result_for(&second, true)).await.unwrap();
        drop(tx);

        handle.await.unwrap();

        // The first result was lost from the durable store, the second landed.
        assert_eq!(storage.results_len(), 1);
    }
}
