use anyhow::{Context, Result};
use futures::StreamExt;
use mongodb::bson::{doc, Document};
use mongodb::options::{ClientOptions, FindOptions};
use mongodb::{Client, Collection, Database};
use tracing::debug;

use crate::config::MongoSettings;
use crate::models::CrawlResult;

const RESULTS_COLLECTION: &str = "crawl_results";

/// Document store for fetched payloads.
pub struct MongoStorage {
    database: Database,
}

impl MongoStorage {
    pub async fn new(settings: &MongoSettings) -> Result<Self> {
        let options = ClientOptions::parse(&settings.uri)
            .await
            .context(format!("Failed to parse MongoDB URI: {}", settings.uri))?;

        let client = Client::with_options(options).context("Failed to create MongoDB client")?;
        let database = client.database(&settings.database);

        // Fail fast at startup rather than on the first result write.
        database
            .list_collection_names(None)
            .await
            .context("Failed to connect to MongoDB")?;

        debug!("Connected to MongoDB database {}", settings.database);

        Ok(Self { database })
    }

    fn results(&self) -> Collection<Document> {
        self.database.collection(RESULTS_COLLECTION)
    }

    pub async fn store_crawl_result(&self, result: &CrawlResult) -> Result<()> {
        let document = mongodb::bson::to_document(result)
            .context("Failed to convert crawl result to BSON")?;

        self.results()
            .insert_one(document, None)
            .await
            .context("Failed to store crawl result in MongoDB")?;

        debug!("Stored result for task {}", result.task_id);

        Ok(())
    }

    /// Results for a session, newest first. An empty session id matches
    /// everything, mirroring the unfiltered export.
    pub async fn get_crawl_results(
        &self,
        session_id: &str,
        limit: i64,
    ) -> Result<Vec<CrawlResult>> {
        let filter = if session_id.is_empty() {
            doc! {}
        } else {
            doc! { "session_id": session_id }
        };

        let options = FindOptions::builder()
            .sort(doc! { "start_time": -1 })
            .limit(limit)
            .build();

        let mut cursor = self
            .results()
            .find(filter, options)
            .await
            .context("Failed to query crawl results")?;

        let mut results = Vec::new();
        while let Some(document) = cursor.next().await {
            let document = document.context("Failed to read result document")?;
            let result: CrawlResult = mongodb::bson::from_document(document)
                .context("Failed to decode crawl result")?;
            results.push(result);
        }

        Ok(results)
    }
}
