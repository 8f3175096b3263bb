use crate::cache::CacheStats;
use crate::AppState;
use axum::{extract::State, Json};
use serde_json::{json, Value};
use std::sync::Arc;

/// GET /debug/health - Check if services are working
pub async fn health_check(State(state): State<Arc<AppState>>) -> Json<Value> {
    let mut status = json!({
        "status": "ok",
        "checks": {}
    });

    // The coordinator answers as long as its task is alive
    match state.coordinator.session().await {
        Ok(session) => {
            status["checks"]["coordinator"] = json!("ok");
            status["checks"]["session_active"] = json!(session.snapshot.active);
        }
        Err(e) => {
            status["checks"]["coordinator"] = json!({"error": e.to_string()});
            status["status"] = json!("error");
        }
    }

    // A missing persisted tier degrades caching but is not an error
    match state.cache.persisted_backend() {
        Some(backend) => status["checks"]["cache"] = json!(backend),
        None => status["checks"]["cache"] = json!("memory-only"),
    }

    Json(status)
}

/// GET /debug/cache - Hit/miss counters and storage use
pub async fn cache_stats(State(state): State<Arc<AppState>>) -> Json<CacheStats> {
    Json(state.cache.stats().await)
}
