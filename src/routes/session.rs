use crate::coordinator::SessionStatus;
use crate::error::{AppError, Result};
use crate::models::{Coordinates, LocationSample};
use crate::services::proximity::{ProximityEvent, SampleOutcome};
use crate::AppState;
use axum::{
    extract::State,
    response::sse::{Event, KeepAlive, Sse},
    Json,
};
use futures::stream::{self, Stream};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use uuid::Uuid;

#[derive(Debug, Deserialize)]
pub struct StartSessionRequest {
    pub route_id: Uuid,
}

#[derive(Debug, Serialize)]
pub struct EndSessionResponse {
    pub deactivated: Option<Uuid>,
}

/// POST /session
/// Make a generated route the active one and start proximity tracking
pub async fn start_session(
    State(state): State<Arc<AppState>>,
    Json(request): Json<StartSessionRequest>,
) -> Result<Json<SessionStatus>> {
    state.coordinator.activate(request.route_id).await?;
    let status = state.coordinator.session().await?;
    Ok(Json(status))
}

/// GET /session
pub async fn session_status(State(state): State<Arc<AppState>>) -> Result<Json<SessionStatus>> {
    Ok(Json(state.coordinator.session().await?))
}

/// DELETE /session
pub async fn end_session(State(state): State<Arc<AppState>>) -> Result<Json<EndSessionResponse>> {
    let deactivated = state.coordinator.deactivate().await?;
    Ok(Json(EndSessionResponse { deactivated }))
}

/// POST /session/location
pub async fn submit_location(
    State(state): State<Arc<AppState>>,
    Json(sample): Json<LocationSample>,
) -> Result<Json<SampleOutcome>> {
    Coordinates::new(sample.coordinates.lat, sample.coordinates.lng)
        .map_err(AppError::InvalidRequest)?;

    let outcome = state.coordinator.submit_location(sample).await?;
    Ok(Json(outcome))
}

fn event_name(event: &ProximityEvent) -> &'static str {
    match event {
        ProximityEvent::Visited { .. } => "visited",
        ProximityEvent::RouteCompleted { .. } => "route_completed",
    }
}

/// GET /session/events
/// Server-sent stream of visit and completion notifications
pub async fn session_events(
    State(state): State<Arc<AppState>>,
) -> Sse<impl Stream<Item = std::result::Result<Event, axum::Error>>> {
    let rx = state.coordinator.subscribe();

    let events = stream::unfold(rx, |mut rx| async move {
        loop {
            match rx.recv().await {
                Ok(event) => {
                    let sse = Event::default().event(event_name(&event)).json_data(&event);
                    return Some((sse, rx));
                }
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "SSE subscriber lagged, {} events dropped", skipped);
                }
                Err(RecvError::Closed) => return None,
            }
        }
    });

    Sse::new(events).keep_alive(KeepAlive::default())
}
