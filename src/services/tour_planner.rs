use crate::config::TourConfig;
use crate::constants::ALTERNATIVE_SEARCH_RADIUS_M;
use crate::error::{AppError, Result};
use crate::models::{GeneratedRoute, Place, PlanRequest, RouteConstraints, Waypoint};
use crate::services::place_discovery::{DiscoveryQuery, PlaceDiscovery};
use crate::services::route_optimizer::RouteOptimizer;
use crate::services::route_validator::{RouteValidator, ValidationReport};
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// A generated route together with its validation against the budgets
#[derive(Debug, Clone, Serialize)]
pub struct PlannedTour {
    pub route: GeneratedRoute,
    pub report: ValidationReport,
    /// Stops dropped to fit the budgets
    pub trimmed_stops: Vec<String>,
}

/// Discovery → optimization → validation, with bounded stop trimming when a
/// route breaks its distance or time budget.
pub struct TourPlanner {
    discovery: Arc<PlaceDiscovery>,
    optimizer: Arc<RouteOptimizer>,
    config: Arc<TourConfig>,
}

async fn cancellable<T>(cancel: &CancellationToken, work: impl Future<Output = Result<T>>) -> Result<T> {
    tokio::select! {
        _ = cancel.cancelled() => Err(AppError::Cancelled("Tour generation was superseded".to_string())),
        result = work => result,
    }
}

impl TourPlanner {
    pub fn new(
        discovery: Arc<PlaceDiscovery>,
        optimizer: Arc<RouteOptimizer>,
        config: Arc<TourConfig>,
    ) -> Self {
        TourPlanner {
            discovery,
            optimizer,
            config,
        }
    }

    pub fn constraints_for(&self, request: &PlanRequest) -> RouteConstraints {
        request
            .constraints
            .clone()
            .unwrap_or_else(|| self.default_constraints())
    }

    pub fn default_constraints(&self) -> RouteConstraints {
        self.config.default_constraints()
    }

    pub async fn plan(&self, request: &PlanRequest, cancel: &CancellationToken) -> Result<PlannedTour> {
        request.validate().map_err(AppError::InvalidRequest)?;

        let query = DiscoveryQuery {
            origin: request.start_point,
            radius_m: request.radius_m.unwrap_or(self.config.search_radius_m),
            categories: request.categories.clone(),
            count: request.stop_count,
        };

        tracing::info!(
            stops = request.stop_count,
            mode = %request.endpoint_mode,
            "Planning {} tour with {} stops around {:.5},{:.5}",
            request.endpoint_mode,
            request.stop_count,
            query.origin.lat,
            query.origin.lng
        );

        let places = cancellable(cancel, self.discovery.discover(&query)).await?;
        if places.is_empty() {
            return Err(AppError::InsufficientCandidates {
                found: 0,
                required: 1,
            });
        }

        let start = Waypoint::point(
            request.start_name.clone().unwrap_or_else(|| "Start".to_string()),
            request.start_point,
        );
        let custom_end = request
            .custom_endpoint
            .map(|c| Waypoint::point("Destination", c));
        let mut candidates: Vec<Waypoint> = places.iter().map(Waypoint::from_place).collect();
        let constraints = self.constraints_for(request);
        let mut trimmed_stops = Vec::new();

        loop {
            let route = cancellable(
                cancel,
                self.optimizer.optimize(
                    &start,
                    &candidates,
                    request.endpoint_mode,
                    custom_end.as_ref(),
                ),
            )
            .await?;

            let report = RouteValidator::validate(&route, &constraints);

            let can_trim = report.exceeds_budget()
                && trimmed_stops.len() < self.config.max_trim_attempts
                && route.stops().len() > 1;

            if !can_trim {
                if !report.is_ok() {
                    tracing::warn!(
                        route_id = %route.id(),
                        violations = report.violations.len(),
                        "Returning route with {} unresolved violations",
                        report.violations.len()
                    );
                }
                return Ok(PlannedTour {
                    route,
                    report,
                    trimmed_stops,
                });
            }

            let Some(index) = largest_detour(&route) else {
                return Ok(PlannedTour {
                    route,
                    report,
                    trimmed_stops,
                });
            };
            let dropped = route.waypoints()[index].clone();
            tracing::info!(
                "Route over budget, dropping '{}' (attempt {}/{})",
                dropped.name,
                trimmed_stops.len() + 1,
                self.config.max_trim_attempts
            );
            candidates.retain(|c| *c != dropped);
            trimmed_stops.push(dropped.name);
        }
    }

    /// Candidate replacements around stop `index` of `route`
    pub async fn alternatives(
        &self,
        route: &GeneratedRoute,
        index: usize,
        count: usize,
    ) -> Result<Vec<Place>> {
        let waypoint = route.waypoints().get(index).ok_or_else(|| {
            AppError::InvalidRequest(format!("Route has no waypoint at index {}", index))
        })?;
        let categories: Vec<_> = waypoint.category.into_iter().collect();

        self.discovery
            .alternatives(
                &waypoint.coordinates,
                ALTERNATIVE_SEARCH_RADIUS_M,
                &categories,
                route.waypoints(),
                count,
            )
            .await
    }
}

/// Stop whose removal saves the most walking: its two legs minus the
/// straight line that would replace them
fn largest_detour(route: &GeneratedRoute) -> Option<usize> {
    let waypoints = route.waypoints();
    let legs = route.legs();

    route
        .stop_range()
        .map(|i| {
            let inbound = legs[i - 1].distance_m;
            let detour = match legs.get(i) {
                Some(outbound) => {
                    inbound + outbound.distance_m
                        - waypoints[i - 1]
                            .coordinates
                            .distance_m(&waypoints[i + 1].coordinates)
                }
                None => inbound,
            };
            (i, detour)
        })
        .max_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal))
        .map(|(i, _)| i)
}
