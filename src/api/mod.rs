pub mod handlers;

use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;

use crate::engine::CrawlerEngine;
use crate::proxy::ProxyManager;
use crate::storage::Storage;

/// Shared handler state. All fields are thin handles into the core.
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<CrawlerEngine>,
    pub storage: Arc<dyn Storage>,
    pub proxy_manager: Arc<ProxyManager>,
}

pub fn create_routes(state: AppState) -> Router {
    Router::new()
        // Session management
        .route(
            "/api/v1/sessions",
            post(handlers::create_session).get(handlers::list_sessions),
        )
        .route(
            "/api/v1/sessions/:id",
            get(handlers::get_session).delete(handlers::stop_session),
        )
        // Monitoring
        .route("/api/v1/stats", get(handlers::stats))
        .route("/api/v1/health", get(handlers::health))
        // Proxy management
        .route("/api/v1/proxies", get(handlers::list_proxies))
        .route("/api/v1/proxies/test", post(handlers::test_proxy))
        // Data export
        .route("/api/v1/export/:id", get(handlers::export_results))
        .with_state(state)
}
