use crate::constants::DEFAULT_ALTERNATIVE_COUNT;
use crate::coordinator::EditOp;
use crate::error::{AppError, Result};
use crate::models::{Coordinates, GeneratedRoute, Place, PlanRequest, RouteConstraints, Waypoint};
use crate::services::route_editor::EditOutcome;
use crate::services::route_validator::ValidationReport;
use crate::services::tour_planner::PlannedTour;
use crate::AppState;
use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

#[derive(Debug, Default, Deserialize)]
pub struct ValidateTourRequest {
    /// Falls back to the configured defaults
    #[serde(default)]
    pub constraints: Option<RouteConstraints>,
}

#[derive(Debug, Deserialize)]
pub struct InsertStopRequest {
    pub waypoint: Waypoint,
    /// Position of the new stop; defaults to just before the final node
    #[serde(default)]
    pub index: Option<usize>,
}

#[derive(Debug, Deserialize)]
pub struct ReplaceStopRequest {
    pub waypoint: Waypoint,
}

#[derive(Debug, Deserialize)]
pub struct AlternativesParams {
    #[serde(default)]
    pub count: Option<usize>,
}

#[derive(Debug, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum EditResponse {
    Updated { route: GeneratedRoute },
    Collapsed,
}

impl From<EditOutcome> for EditResponse {
    fn from(outcome: EditOutcome) -> Self {
        match outcome {
            EditOutcome::Updated(route) => EditResponse::Updated { route },
            EditOutcome::Collapsed => EditResponse::Collapsed,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct AlternativesResponse {
    pub index: usize,
    pub places: Vec<Place>,
}

fn check_waypoint(waypoint: &Waypoint) -> Result<()> {
    Coordinates::new(waypoint.coordinates.lat, waypoint.coordinates.lng)
        .map(|_| ())
        .map_err(AppError::InvalidRequest)?;
    if waypoint.name.trim().is_empty() {
        return Err(AppError::InvalidRequest(
            "waypoint name must not be empty".to_string(),
        ));
    }
    Ok(())
}

/// POST /tours
/// Discover places around the start point and build an ordered walking tour
pub async fn create_tour(
    State(state): State<Arc<AppState>>,
    Json(request): Json<PlanRequest>,
) -> Result<Json<PlannedTour>> {
    request.validate().map_err(AppError::InvalidRequest)?;

    tracing::info!(
        lat = request.start_point.lat,
        lng = request.start_point.lng,
        stops = request.stop_count,
        mode = %request.endpoint_mode,
        "Tour request: ({:.4}, {:.4}), {} stops, mode={}",
        request.start_point.lat,
        request.start_point.lng,
        request.stop_count,
        request.endpoint_mode
    );

    let planned = state.coordinator.generate(request).await?;
    Ok(Json(planned))
}

/// POST /tours/{id}/validate
pub async fn validate_tour(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(request): Json<ValidateTourRequest>,
) -> Result<Json<ValidationReport>> {
    let report = state.coordinator.validate(id, request.constraints).await?;
    Ok(Json(report))
}

/// POST /tours/{id}/stops
pub async fn insert_stop(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(request): Json<InsertStopRequest>,
) -> Result<Json<EditResponse>> {
    check_waypoint(&request.waypoint)?;
    let outcome = state
        .coordinator
        .edit(
            id,
            EditOp::Insert {
                index: request.index,
                waypoint: request.waypoint,
            },
        )
        .await?;
    Ok(Json(outcome.into()))
}

/// PUT /tours/{id}/stops/{index}
pub async fn replace_stop(
    State(state): State<Arc<AppState>>,
    Path((id, index)): Path<(Uuid, usize)>,
    Json(request): Json<ReplaceStopRequest>,
) -> Result<Json<EditResponse>> {
    check_waypoint(&request.waypoint)?;
    let outcome = state
        .coordinator
        .edit(
            id,
            EditOp::Replace {
                index,
                waypoint: request.waypoint,
            },
        )
        .await?;
    Ok(Json(outcome.into()))
}

/// DELETE /tours/{id}/stops/{index}
pub async fn delete_stop(
    State(state): State<Arc<AppState>>,
    Path((id, index)): Path<(Uuid, usize)>,
) -> Result<Json<EditResponse>> {
    let outcome = state.coordinator.edit(id, EditOp::Delete { index }).await?;
    Ok(Json(outcome.into()))
}

/// GET /tours/{id}/stops/{index}/alternatives
/// Nearby replacements for one stop, least-recently-swapped-out first
pub async fn stop_alternatives(
    State(state): State<Arc<AppState>>,
    Path((id, index)): Path<(Uuid, usize)>,
    Query(params): Query<AlternativesParams>,
) -> Result<Json<AlternativesResponse>> {
    let count = params.count.unwrap_or(DEFAULT_ALTERNATIVE_COUNT);
    if count == 0 || count > 20 {
        return Err(AppError::InvalidRequest(
            "count must be between 1 and 20".to_string(),
        ));
    }

    let places = state.coordinator.alternatives(id, index, count).await?;
    Ok(Json(AlternativesResponse { index, places }))
}
