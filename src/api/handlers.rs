use axum::extract::{Path, Query, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::Utc;
use serde::Deserialize;
use serde_json::json;
use tracing::error;
use uuid::Uuid;

use crate::api::AppState;
use crate::models::{CrawlRules, CrawlSession, CrawlTask, SessionStats};

fn internal_error(message: &str) -> Response {
    (StatusCode::INTERNAL_SERVER_ERROR, Json(json!({ "error": message }))).into_response()
}

#[derive(Debug, Deserialize)]
pub struct CreateSessionRequest {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub start_urls: Vec<String>,
    #[serde(default)]
    pub rules: CrawlRules,
}

/// Create a session and durably persist its seed tasks. The scheduler picks
/// them up on its next tick; nothing is pushed onto the worker queue here.
pub async fn create_session(
    State(state): State<AppState>,
    Json(request): Json<CreateSessionRequest>,
) -> Response {
    if request.start_urls.is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": "start_urls must not be empty" })),
        )
            .into_response();
    }

    let session = CrawlSession {
        id: Uuid::new_v4().to_string(),
        name: request.name,
        description: request.description,
        start_urls: request.start_urls,
        rules: request.rules,
        status: "active".to_string(),
        created_at: Utc::now(),
        started_at: None,
        completed_at: None,
        stats: SessionStats::default(),
    };

    if let Err(e) = state.storage.create_crawl_session(&session).await {
        error!("Failed to create session: {:#}", e);
        return internal_error("Failed to create session");
    }

    let tasks: Vec<CrawlTask> = session
        .start_urls
        .iter()
        .map(|url| CrawlTask::seed(&session.id, url, session.rules.max_depth))
        .collect();

    if let Err(e) = state.storage.create_crawl_tasks(&tasks).await {
        error!("Failed to persist seed tasks: {:#}", e);
        return internal_error("Failed to persist seed tasks");
    }

    (StatusCode::CREATED, Json(session)).into_response()
}

pub async fn list_sessions(State(state): State<AppState>) -> Response {
    match state.storage.get_crawl_sessions().await {
        Ok(sessions) => Json(sessions).into_response(),
        Err(e) => {
            error!("Failed to list sessions: {:#}", e);
            internal_error("Failed to list sessions")
        }
    }
}

pub async fn get_session(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    let sessions = match state.storage.get_crawl_sessions().await {
        Ok(sessions) => sessions,
        Err(e) => {
            error!("Failed to get sessions: {:#}", e);
            return internal_error("Failed to get sessions");
        }
    };

    match sessions.into_iter().find(|s| s.id == id) {
        Some(session) => Json(session).into_response(),
        None => (StatusCode::NOT_FOUND, Json(json!({ "error": "Session not found" })))
            .into_response(),
    }
}

pub async fn stop_session(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    if let Err(e) = state.storage.stop_session(&id).await {
        error!("Failed to stop session {}: {:#}", id, e);
        return internal_error("Failed to stop session");
    }

    Json(json!({ "message": "Session stopped", "session_id": id })).into_response()
}

pub async fn stats(State(state): State<AppState>) -> Response {
    Json(json!({
        "crawler": state.engine.snapshot(),
        "proxies": state.proxy_manager.stats(),
        "timestamp": Utc::now(),
    }))
    .into_response()
}

pub async fn health() -> Response {
    Json(json!({
        "status": "healthy",
        "version": env!("CARGO_PKG_VERSION"),
        "timestamp": Utc::now(),
    }))
    .into_response()
}

pub async fn list_proxies(State(state): State<AppState>) -> Response {
    Json(json!({
        "proxies": state.proxy_manager.list_proxies(),
        "pools": state.proxy_manager.stats(),
    }))
    .into_response()
}

#[derive(Debug, Deserialize)]
pub struct TestProxyRequest {
    pub host: String,
    pub port: u16,
}

pub async fn test_proxy(
    State(state): State<AppState>,
    Json(request): Json<TestProxyRequest>,
) -> Response {
    let probe = state.proxy_manager.test_endpoint(&request.host, request.port).await;
    Json(probe).into_response()
}

#[derive(Debug, Deserialize)]
pub struct ExportQuery {
    #[serde(default = "default_export_limit")]
    pub limit: i64,
}

fn default_export_limit() -> i64 {
    1000
}

pub async fn export_results(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<ExportQuery>,
) -> Response {
    match state.storage.get_crawl_results(&id, query.limit).await {
        Ok(results) => (
            [(
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=crawl_{}.json", id),
            )],
            Json(results),
        )
            .into_response(),
        Err(e) => {
            error!("Failed to export results for {}: {:#}", id, e);
            internal_error("Failed to get results")
        }
    }
}

#[cfg(test)]
mod tests {
    use std::net::SocketAddr;
    use std::sync::Arc;

    use crate::api::{create_routes, AppState};
    use crate::config::{CrawlerSettings, ProxySettings, StealthSettings};
    use crate::engine::testutil::MemStorage;
    use crate::engine::CrawlerEngine;
    use crate::models::{CrawlResult, TaskStatus};
    use crate::proxy::ProxyManager;
    use crate::stealth::StealthEngine;
    use crate::storage::Storage;

    async fn spawn_api() -> (SocketAddr, Arc<MemStorage>) {
        let storage = Arc::new(MemStorage::default());
        let proxy_manager = Arc::new(ProxyManager::new(ProxySettings::default()).unwrap());
        let settings = CrawlerSettings { max_workers: 1, ..Default::default() };
        let stealth = Arc::new(StealthEngine::new(
            StealthSettings::default(),
            settings.user_agent.clone(),
        ));
        let engine = Arc::new(CrawlerEngine::new(
            settings,
            storage.clone(),
            proxy_manager.clone(),
            stealth,
        ));

        let app = create_routes(AppState {
            engine,
            storage: storage.clone(),
            proxy_manager,
        });

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        (addr, storage)
    }

    async fn post_json(
        client: &reqwest::Client,
        url: String,
        body: serde_json::Value,
    ) -> reqwest::Response {
        client
            .post(url)
            .header("content-type", "application/json")
            .body(body.to_string())
            .send()
            .await
            .unwrap()
    }

    async fn json_body(response: reqwest::Response) -> serde_json::Value {
        serde_json::from_str(&response.text().await.unwrap()).unwrap()
    }

    #[tokio::test]
    async fn create_session_persists_session_and_seed_tasks() {
        let (addr, storage) = spawn_api().await;
        let client = reqwest::Client::new();

        let response = post_json(
            &client,
            format!("http://{}/api/v1/sessions", addr),
            serde_json::json!({
                "name": "news",
                "start_urls": ["http://a.example/1", "http://a.example/2"],
                "rules": { "max_depth": 2 },
            }),
        )
        .await;

        assert_eq!(response.status(), 201);
        let session = json_body(response).await;
        assert_eq!(session["name"], "news");
        assert_eq!(session["status"], "active");

        assert_eq!(storage.sessions().len(), 1);
        let tasks = storage.tasks();
        assert_eq!(tasks.len(), 2);
        for task in &tasks {
            assert_eq!(task.status, TaskStatus::Pending);
            assert_eq!(task.priority, 5);
            assert_eq!(task.max_depth, 2);
            assert_eq!(task.session_id, session["id"].as_str().unwrap());
        }
    }

    #[tokio::test]
    async fn create_session_rejects_empty_seed_list() {
        let (addr, _storage) = spawn_api().await;
        let client = reqwest::Client::new();

        let response = post_json(
            &client,
            format!("http://{}/api/v1/sessions", addr),
            serde_json::json!({ "name": "empty", "start_urls": [] }),
        )
        .await;

        assert_eq!(response.status(), 400);
    }

    #[tokio::test]
    async fn session_lookup_and_stop() {
        let (addr, storage) = spawn_api().await;
        let client = reqwest::Client::new();

        let response = post_json(
            &client,
            format!("http://{}/api/v1/sessions", addr),
            serde_json::json!({ "name": "s", "start_urls": ["http://a.example/"] }),
        )
        .await;
        let session = json_body(response).await;
        let id = session["id"].as_str().unwrap();

        let found = client
            .get(format!("http://{}/api/v1/sessions/{}", addr, id))
            .send()
            .await
            .unwrap();
        assert_eq!(found.status(), 200);

        let missing = client
            .get(format!("http://{}/api/v1/sessions/nope", addr))
            .send()
            .await
            .unwrap();
        assert_eq!(missing.status(), 404);

        let stopped = client
            .delete(format!("http://{}/api/v1/sessions/{}", addr, id))
            .send()
            .await
            .unwrap();
        assert_eq!(stopped.status(), 200);
        assert_eq!(storage.sessions()[0].status, "stopped");
        assert_eq!(storage.tasks()[0].status, TaskStatus::Failed);
    }

    #[tokio::test]
    async fn stats_and_health_respond() {
        let (addr, _storage) = spawn_api().await;
        let client = reqwest::Client::new();

        let response = client
            .get(format!("http://{}/api/v1/stats", addr))
            .send()
            .await
            .unwrap();
        let stats = json_body(response).await;
        assert_eq!(stats["crawler"]["total_requests"], 0);
        assert!(stats["proxies"].is_object());

        let health = client
            .get(format!("http://{}/api/v1/health", addr))
            .send()
            .await
            .unwrap();
        assert_eq!(health.status(), 200);
    }

    #[tokio::test]
    async fn export_returns_session_results_as_attachment() {
        let (addr, storage) = spawn_api().await;

        let task = crate::models::CrawlTask::seed("session-x", "http://a.example/", 0);
        let mut result = CrawlResult::begin(&task, "worker-0");
        result.success = true;
        result.finish();
        storage.store_crawl_result(&result).await.unwrap();

        let client = reqwest::Client::new();
        let response = client
            .get(format!("http://{}/api/v1/export/session-x?limit=10", addr))
            .send()
            .await
            .unwrap();

        assert_eq!(response.status(), 200);
        assert!(response
            .headers()
            .get("content-disposition")
            .unwrap()
            .to_str()
            .unwrap()
            .contains("crawl_session-x.json"));
        let results = json_body(response).await;
        let results = results.as_array().unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0]["task_id"], task.id);

        // Results for other sessions are not included.
        let other = client
            .get(format!("http://{}/api/v1/export/other", addr))
            .send()
            .await
            .unwrap();
        let other = json_body(other).await;
        assert!(other.as_array().unwrap().is_empty());
    }
}
