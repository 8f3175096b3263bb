use crate::error::{AppError, Result};
use crate::models::{Coordinates, RouteLeg};
use crate::services::providers::RoutingEngine;
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::Deserialize;

const MAPBOX_DIRECTIONS_BASE_URL: &str = "https://api.mapbox.com/directions/v5/mapbox";
const WALKING_PROFILE: &str = "walking";

/// Where the key goes on each request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Credentials {
    /// `access_token` query parameter, as Mapbox itself expects.
    QueryToken(String),
    /// `Authorization: Bearer` header for a directions proxy.
    Bearer(String),
}

impl Credentials {
    fn apply(&self, request: RequestBuilder) -> RequestBuilder {
        match self {
            Credentials::QueryToken(token) => request.query(&[("access_token", token)]),
            Credentials::Bearer(token) => request.bearer_auth(token),
        }
    }
}

/// Walking legs from the Mapbox Directions API.
#[derive(Clone)]
pub struct MapboxClient {
    client: Client,
    base_url: String,
    credentials: Credentials,
}

impl MapboxClient {
    pub fn new(api_key: String) -> Self {
        Self::with_base_url(MAPBOX_DIRECTIONS_BASE_URL.to_string(), Credentials::QueryToken(api_key))
    }

    /// Talk to a proxy that mirrors the directions API and takes a bearer key.
    pub fn proxied(api_key: String, base_url: String) -> Self {
        Self::with_base_url(base_url, Credentials::Bearer(api_key))
    }

    pub fn with_base_url(base_url: String, credentials: Credentials) -> Self {
        MapboxClient {
            client: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            credentials,
        }
    }

    fn walk_url(&self, from: &Coordinates, to: &Coordinates) -> String {
        format!(
            "{}/{}/{},{};{},{}",
            self.base_url, WALKING_PROFILE, from.lng, from.lat, to.lng, to.lat
        )
    }

    async fn fetch_walk(&self, from: &Coordinates, to: &Coordinates) -> Result<Option<RouteLeg>> {
        let request = self.client.get(self.walk_url(from, to)).query(&[
            ("geometries", "geojson"),
            ("overview", "full"),
            ("steps", "false"),
        ]);

        let response = self.credentials.apply(request).send().await.map_err(|e| {
            if e.is_timeout() {
                AppError::Timeout(format!("Mapbox request timed out: {}", e))
            } else {
                AppError::ProviderUnavailable(format!("Mapbox request failed: {}", e))
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return match classify_status(status) {
                None => {
                    tracing::debug!(%status, "Mapbox cannot route between points: {}", body);
                    Ok(None)
                }
                Some(err) => {
                    tracing::warn!(%status, "Mapbox directions failed: {}", body);
                    Err(err)
                }
            };
        }

        let directions: WalkingDirections = response.json().await.map_err(|e| {
            AppError::ProviderUnavailable(format!("Unreadable Mapbox response: {}", e))
        })?;

        let leg = directions.into_leg(*from, *to);
        match &leg {
            Some(leg) => tracing::debug!(
                distance_m = %format!("{:.0}", leg.distance_m),
                path_points = leg.path.len(),
                "Mapbox walking leg"
            ),
            None => tracing::debug!("Mapbox returned no walking route"),
        }
        Ok(leg)
    }
}

/// `None` for statuses that mean "no route here" rather than an outage.
fn classify_status(status: StatusCode) -> Option<AppError> {
    match status {
        // Points that cannot be snapped to the walking network
        StatusCode::UNPROCESSABLE_ENTITY => None,
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Some(AppError::ProviderUnavailable(
            format!("Mapbox rejected credentials ({})", status),
        )),
        StatusCode::TOO_MANY_REQUESTS => {
            Some(AppError::ProviderUnavailable("Mapbox rate limit hit".to_string()))
        }
        other => Some(AppError::ProviderUnavailable(format!("Mapbox HTTP {}", other))),
    }
}

#[async_trait]
impl RoutingEngine for MapboxClient {
    async fn walking_leg(&self, from: &Coordinates, to: &Coordinates) -> Result<Option<RouteLeg>> {
        self.fetch_walk(from, to).await
    }

    fn name(&self) -> &'static str {
        "mapbox"
    }
}

#[derive(Debug, Deserialize)]
struct WalkingDirections {
    #[serde(default)]
    routes: Vec<WalkingRoute>,
}

#[derive(Debug, Deserialize)]
struct WalkingRoute {
    distance: f64,
    duration: f64,
    geometry: LineString,
}

#[derive(Debug, Deserialize)]
struct LineString {
    /// `[lng, lat]` pairs
    coordinates: Vec<[f64; 2]>,
}

impl WalkingDirections {
    fn into_leg(self, from: Coordinates, to: Coordinates) -> Option<RouteLeg> {
        let route = self.routes.into_iter().next()?;
        let path = route
            .geometry
            .coordinates
            .iter()
            .filter_map(|[lng, lat]| Coordinates::new(*lat, *lng).ok())
            .collect();
        Some(RouteLeg::new(from, to, route.distance, route.duration).with_path(path))
    }
}
