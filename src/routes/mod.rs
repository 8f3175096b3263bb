pub mod debug;
pub mod session;
pub mod tours;

use axum::{
    routing::{get, post, put},
    Router,
};
use std::sync::Arc;

use crate::AppState;

pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/tours", post(tours::create_tour))
        .route("/tours/{id}/validate", post(tours::validate_tour))
        .route("/tours/{id}/stops", post(tours::insert_stop))
        .route(
            "/tours/{id}/stops/{index}",
            put(tours::replace_stop).delete(tours::delete_stop),
        )
        .route(
            "/tours/{id}/stops/{index}/alternatives",
            get(tours::stop_alternatives),
        )
        .route(
            "/session",
            post(session::start_session)
                .get(session::session_status)
                .delete(session::end_session),
        )
        .route("/session/location", post(session::submit_location))
        .route("/session/events", get(session::session_events))
        .route("/debug/health", get(debug::health_check))
        .route("/debug/cache", get(debug::cache_stats))
        .with_state(state)
}
