use crate::constants::{LEG_ENDPOINT_TOLERANCE_M, ROUNDTRIP_CLOSURE_TOLERANCE_M};
use crate::error::{AppError, Result};
use crate::models::{Coordinates, PlaceCategory, Waypoint};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::Range;
use std::str::FromStr;
use uuid::Uuid;

/// How a route's final node is determined.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "camelCase")]
pub enum EndpointMode {
    /// Return to the start point
    #[default]
    Roundtrip,
    /// Finish at the last discovered stop
    LastStop,
    /// Finish at a user-chosen point
    Custom,
}

impl fmt::Display for EndpointMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EndpointMode::Roundtrip => write!(f, "roundtrip"),
            EndpointMode::LastStop => write!(f, "lastStop"),
            EndpointMode::Custom => write!(f, "custom"),
        }
    }
}

impl FromStr for EndpointMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "roundtrip" | "round_trip" => Ok(EndpointMode::Roundtrip),
            "laststop" | "last_stop" => Ok(EndpointMode::LastStop),
            "custom" => Ok(EndpointMode::Custom),
            _ => Err(format!("Invalid endpoint mode: '{}'", s)),
        }
    }
}

/// Walking path between two consecutive waypoints.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RouteLeg {
    pub from: Coordinates,
    pub to: Coordinates,
    pub distance_m: f64,
    pub travel_time_s: f64,
    /// Polyline for rendering, `from` to `to`
    #[serde(default)]
    pub path: Vec<Coordinates>,
}

impl RouteLeg {
    pub fn new(from: Coordinates, to: Coordinates, distance_m: f64, travel_time_s: f64) -> Self {
        RouteLeg {
            from,
            to,
            distance_m,
            travel_time_s,
            path: vec![from, to],
        }
    }

    pub fn with_path(mut self, path: Vec<Coordinates>) -> Self {
        self.path = path;
        self
    }

    /// Same leg walked in the opposite direction
    pub fn reversed(&self) -> Self {
        let mut path = self.path.clone();
        path.reverse();
        RouteLeg {
            from: self.to,
            to: self.from,
            distance_m: self.distance_m,
            travel_time_s: self.travel_time_s,
            path,
        }
    }

    fn joins(&self, from: &Coordinates, to: &Coordinates) -> bool {
        self.from.approx_eq(from, LEG_ENDPOINT_TOLERANCE_M)
            && self.to.approx_eq(to, LEG_ENDPOINT_TOLERANCE_M)
    }
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Default)]
pub struct RouteTotals {
    pub distance_m: f64,
    pub travel_time_s: f64,
    pub visit_time_s: f64,
    pub experience_time_s: f64,
}

/// An ordered, validated walking tour. Immutable: edits build a new instance
/// through [`GeneratedRoute::assemble`].
#[derive(Debug, Clone, Serialize)]
pub struct GeneratedRoute {
    id: Uuid,
    endpoint_mode: EndpointMode,
    waypoints: Vec<Waypoint>,
    legs: Vec<RouteLeg>,
    visit_time_per_stop_s: f64,
    totals: RouteTotals,
}

impl GeneratedRoute {
    /// Build a route, checking the structural invariants and summing totals.
    pub fn assemble(
        waypoints: Vec<Waypoint>,
        legs: Vec<RouteLeg>,
        endpoint_mode: EndpointMode,
        visit_time_per_stop_s: f64,
    ) -> Result<Self> {
        if waypoints.len() < 2 {
            return Err(AppError::InsufficientCandidates {
                found: waypoints.len(),
                required: 2,
            });
        }

        if legs.len() != waypoints.len() - 1 {
            return Err(AppError::Internal(format!(
                "Route has {} waypoints but {} legs",
                waypoints.len(),
                legs.len()
            )));
        }

        for (i, (pair, leg)) in waypoints.windows(2).zip(&legs).enumerate() {
            if !leg.joins(&pair[0].coordinates, &pair[1].coordinates) {
                return Err(AppError::Internal(format!(
                    "Leg {} does not connect '{}' and '{}'",
                    i, pair[0].name, pair[1].name
                )));
            }
        }

        if endpoint_mode == EndpointMode::Roundtrip {
            let first = &waypoints[0].coordinates;
            let last = &waypoints[waypoints.len() - 1].coordinates;
            if !first.approx_eq(last, ROUNDTRIP_CLOSURE_TOLERANCE_M) {
                return Err(AppError::Internal(format!(
                    "Roundtrip does not close: start and end are {:.1}m apart",
                    first.distance_m(last)
                )));
            }
        }

        let distance_m: f64 = legs.iter().map(|l| l.distance_m).sum();
        let travel_time_s: f64 = legs.iter().map(|l| l.travel_time_s).sum();
        let stop_count = Self::stop_range_for(endpoint_mode, waypoints.len()).len();
        let visit_time_s = stop_count as f64 * visit_time_per_stop_s;

        Ok(GeneratedRoute {
            id: Uuid::new_v4(),
            endpoint_mode,
            waypoints,
            legs,
            visit_time_per_stop_s,
            totals: RouteTotals {
                distance_m,
                travel_time_s,
                visit_time_s,
                experience_time_s: travel_time_s + visit_time_s,
            },
        })
    }

    fn stop_range_for(mode: EndpointMode, len: usize) -> Range<usize> {
        match mode {
            EndpointMode::LastStop => 1..len,
            EndpointMode::Roundtrip | EndpointMode::Custom => 1..len.saturating_sub(1).max(1),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn endpoint_mode(&self) -> EndpointMode {
        self.endpoint_mode
    }

    pub fn waypoints(&self) -> &[Waypoint] {
        &self.waypoints
    }

    pub fn legs(&self) -> &[RouteLeg] {
        &self.legs
    }

    pub fn totals(&self) -> &RouteTotals {
        &self.totals
    }

    pub fn visit_time_per_stop_s(&self) -> f64 {
        self.visit_time_per_stop_s
    }

    pub fn start(&self) -> &Waypoint {
        &self.waypoints[0]
    }

    pub fn last(&self) -> &Waypoint {
        &self.waypoints[self.waypoints.len() - 1]
    }

    /// Indices of the waypoints a user is expected to visit
    pub fn stop_range(&self) -> Range<usize> {
        Self::stop_range_for(self.endpoint_mode, self.waypoints.len())
    }

    pub fn stops(&self) -> &[Waypoint] {
        &self.waypoints[self.stop_range()]
    }
}

// Request/Response types for API endpoints

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case", tag = "type")]
pub enum ExperienceLimit {
    /// No time budget
    #[default]
    OpenEnd,
    Max { minutes: u32 },
}

/// Budgets a route is validated against
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RouteConstraints {
    #[serde(default)]
    pub max_distance_m: Option<f64>,
    #[serde(default)]
    pub max_experience: ExperienceLimit,
    #[serde(default)]
    pub min_spacing_m: Option<f64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PlanRequest {
    pub start_point: Coordinates,
    #[serde(default)]
    pub start_name: Option<String>,
    pub stop_count: usize,
    #[serde(default)]
    pub categories: Vec<PlaceCategory>,
    #[serde(default)]
    pub radius_m: Option<f64>,
    #[serde(default)]
    pub endpoint_mode: EndpointMode,
    #[serde(default)]
    pub custom_endpoint: Option<Coordinates>,
    #[serde(default)]
    pub constraints: Option<RouteConstraints>,
}

impl PlanRequest {
    pub fn validate(&self) -> std::result::Result<(), String> {
        Coordinates::new(self.start_point.lat, self.start_point.lng)
            .map_err(|e| format!("start_point: {}", e))?;
        if let Some(end) = &self.custom_endpoint {
            Coordinates::new(end.lat, end.lng).map_err(|e| format!("custom_endpoint: {}", e))?;
        }
        if !(1..=20).contains(&self.stop_count) {
            return Err("stop_count must be between 1 and 20".to_string());
        }
        if let Some(radius) = self.radius_m {
            if !(100.0..=50_000.0).contains(&radius) {
                return Err("radius_m must be between 100 and 50000".to_string());
            }
        }
        match (self.endpoint_mode, &self.custom_endpoint) {
            (EndpointMode::Custom, None) => {
                Err("custom_endpoint is required for endpoint_mode 'custom'".to_string())
            }
            (EndpointMode::Roundtrip | EndpointMode::LastStop, Some(_)) => Err(
                "custom_endpoint is only allowed with endpoint_mode 'custom'".to_string(),
            ),
            _ => Ok(()),
        }
    }
}
