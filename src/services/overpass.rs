use crate::constants::*;
use crate::error::{AppError, Result};
use crate::models::{Accessibility, Coordinates, Place, PlaceCategory, PlaceMetadata};
use crate::services::providers::{PlaceProvider, PlaceQuery};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Primary Overpass API endpoints with automatic fallback
const OVERPASS_ENDPOINTS: &[&str] = &[
    "https://overpass-api.de/api/interpreter", // Official main endpoint
    "https://overpass.private.coffee/api/interpreter", // Community mirror
    "https://maps.mail.ru/osm/tools/overpass/api/interpreter", // Mail.ru mirror
];

#[derive(Clone)]
pub struct OverpassClient {
    client: Client,
    endpoints: Vec<String>,
    current_endpoint_idx: Arc<AtomicUsize>,
}

impl OverpassClient {
    pub fn new() -> Self {
        Self::with_endpoints(Vec::new())
    }

    /// Use the given mirrors; an empty list falls back to the built-in ones
    pub fn with_endpoints(endpoints: Vec<String>) -> Self {
        let endpoints = if endpoints.is_empty() {
            OVERPASS_ENDPOINTS.iter().map(|s| s.to_string()).collect()
        } else {
            endpoints
        };

        OverpassClient {
            client: Client::new(),
            endpoints,
            current_endpoint_idx: Arc::new(AtomicUsize::new(0)),
        }
    }

    fn next_endpoint(&self) -> &str {
        let idx = self.current_endpoint_idx.fetch_add(1, Ordering::Relaxed);
        &self.endpoints[idx % self.endpoints.len()]
    }

    async fn post_once(&self, endpoint: &str, form: &str) -> std::result::Result<Vec<OverpassElement>, Attempt> {
        let response = self
            .client
            .post(endpoint)
            .header("Content-Type", "application/x-www-form-urlencoded")
            .body(form.to_string())
            .timeout(Duration::from_secs(OVERPASS_QUERY_TIMEOUT_SECONDS + 5))
            .send()
            .await
            .map_err(|e| {
                Attempt::Retry(if e.is_timeout() {
                    AppError::Timeout(format!("Overpass mirror {} timed out", endpoint))
                } else {
                    AppError::ProviderUnavailable(format!("Overpass mirror {} unreachable: {}", endpoint, e))
                })
            })?;

        let status = response.status();
        if status.is_success() {
            let body: OverpassResponse = response.json().await.map_err(|e| {
                Attempt::Fatal(AppError::ProviderUnavailable(format!(
                    "Unreadable Overpass response: {}",
                    e
                )))
            })?;
            return Ok(body.elements);
        }

        let detail = response.text().await.unwrap_or_default();
        let err = AppError::ProviderUnavailable(format!("Overpass HTTP {}: {}", status, detail));
        match status.as_u16() {
            OVERPASS_HTTP_TOO_MANY_REQUESTS | OVERPASS_HTTP_GATEWAY_TIMEOUT => Err(Attempt::Retry(err)),
            _ => Err(Attempt::Fatal(err)),
        }
    }

    /// Run a query against the mirrors in turn, doubling the pause after
    /// every transient failure (timeouts, 429, 504).
    async fn run_query(&self, query: String) -> Result<Vec<OverpassElement>> {
        let form = format!("data={}", urlencoding::encode(&query));
        let attempts = OVERPASS_RETRY_MAX_ATTEMPTS + 1;
        let mut attempt = 1;

        loop {
            let endpoint = self.next_endpoint();
            match self.post_once(endpoint, &form).await {
                Ok(elements) => return Ok(elements),
                Err(Attempt::Fatal(err)) => return Err(err),
                Err(Attempt::Retry(err)) if attempt >= attempts => {
                    tracing::warn!(attempts, "Overpass gave up: {}", err);
                    return Err(err);
                }
                Err(Attempt::Retry(err)) => {
                    let pause = Duration::from_millis(OVERPASS_RETRY_BACKOFF_BASE_MS << attempt);
                    tracing::warn!(
                        endpoint,
                        attempt,
                        pause_ms = pause.as_millis() as u64,
                        "Overpass attempt failed, trying next mirror: {}",
                        err
                    );
                    tokio::time::sleep(pause).await;
                    attempt += 1;
                }
            }
        }
    }

    fn build_query(&self, query: &PlaceQuery) -> String {
        let categories: &[PlaceCategory] = if query.categories.is_empty() {
            &PlaceCategory::ALL
        } else {
            &query.categories
        };

        let mut query_parts = vec![format!(
            "[out:json][timeout:{}][maxsize:536870912];(",
            OVERPASS_QUERY_TIMEOUT_SECONDS
        )];

        for category in categories {
            for (key, value) in category_to_osm_tags(category) {
                let tag_query = if *value == "*" {
                    format!(
                        r#"nwr["{}"]["name"](around:{},{},{});"#,
                        key, query.radius_m, query.origin.lat, query.origin.lng
                    )
                } else {
                    format!(
                        r#"nwr["{}"="{}"]["name"](around:{},{},{});"#,
                        key, value, query.radius_m, query.origin.lat, query.origin.lng
                    )
                };
                query_parts.push(tag_query);
            }
        }

        let limit = query.limit.clamp(1, OVERPASS_MAX_RESULTS);
        query_parts.push(format!(");out center {};", limit));
        query_parts.join("\n")
    }

    fn convert_elements_to_places(&self, elements: Vec<OverpassElement>) -> Vec<Place> {
        elements
            .into_iter()
            .filter_map(|elem| {
                // Nodes carry lat/lon, ways and relations a center
                let (lat, lon) = match (elem.lat, elem.lon, &elem.center) {
                    (Some(lat), Some(lon), _) => (lat, lon),
                    (_, _, Some(center)) => (center.lat, center.lon),
                    _ => return None,
                };

                let coords = Coordinates::new(lat, lon).ok()?;
                let name = elem.tags.get("name")?.trim().to_string();
                if name.is_empty() {
                    return None;
                }
                let category = infer_category(&elem.tags)?;
                let id = format!("osm:{}/{}", elem.element_type, elem.id);

                Some(Place::new(id, name, category, coords).with_metadata(extract_metadata(&elem.tags)))
            })
            .collect()
    }
}

impl Default for OverpassClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PlaceProvider for OverpassClient {
    async fn search(&self, query: &PlaceQuery) -> Result<Vec<Place>> {
        let ql = self.build_query(query);
        tracing::debug!("Overpass query: {}", ql);

        let elements = self.run_query(ql).await?;
        let element_count = elements.len();

        let mut places = self.convert_elements_to_places(elements);
        places.truncate(query.limit);

        tracing::debug!(
            elements = element_count,
            places = places.len(),
            "Overpass returned {} elements, {} usable places",
            element_count,
            places.len()
        );
        Ok(places)
    }

    fn name(&self) -> &'static str {
        "overpass"
    }
}

fn category_to_osm_tags(category: &PlaceCategory) -> &'static [(&'static str, &'static str)] {
    match category {
        PlaceCategory::Attraction => &[("tourism", "attraction")],
        PlaceCategory::Museum => &[("tourism", "museum"), ("tourism", "gallery")],
        PlaceCategory::Monument => &[("historic", "monument"), ("historic", "memorial")],
        PlaceCategory::Historic => &[("historic", "*")],
        PlaceCategory::Castle => &[("historic", "castle")],
        PlaceCategory::Church => &[("amenity", "place_of_worship"), ("building", "cathedral")],
        PlaceCategory::Viewpoint => &[("tourism", "viewpoint")],
        PlaceCategory::Park => &[("leisure", "park"), ("leisure", "garden")],
        PlaceCategory::NatureReserve => {
            &[("leisure", "nature_reserve"), ("boundary", "protected_area")]
        }
        PlaceCategory::Waterfront => &[("natural", "beach"), ("leisure", "marina")],
        PlaceCategory::Plaza => &[("place", "square")],
        PlaceCategory::Fountain => &[("amenity", "fountain")],
        PlaceCategory::Artwork => &[("tourism", "artwork")],
        PlaceCategory::Theatre => &[("amenity", "theatre")],
        PlaceCategory::Library => &[("amenity", "library")],
        PlaceCategory::Market => &[("amenity", "marketplace")],
        PlaceCategory::Cafe => &[("amenity", "cafe")],
        PlaceCategory::Restaurant => &[("amenity", "restaurant")],
        PlaceCategory::Shopping => &[("shop", "mall"), ("shop", "department_store")],
    }
}

/// Order matters: more specific tags first, then generic fallbacks
fn infer_category(tags: &HashMap<String, String>) -> Option<PlaceCategory> {
    check_tourism_tags(tags)
        .or_else(|| check_historic_tags(tags))
        .or_else(|| check_amenity_tags(tags))
        .or_else(|| check_leisure_tags(tags))
        .or_else(|| check_natural_tags(tags))
        .or_else(|| check_place_tags(tags))
        .or_else(|| check_shop_tags(tags))
        .or_else(|| check_boundary_tags(tags))
        .or_else(|| check_building_tags(tags))
}

fn check_tourism_tags(tags: &HashMap<String, String>) -> Option<PlaceCategory> {
    tags.get("tourism").and_then(|t| match t.as_str() {
        "attraction" => Some(PlaceCategory::Attraction),
        "museum" | "gallery" => Some(PlaceCategory::Museum),
        "viewpoint" => Some(PlaceCategory::Viewpoint),
        "artwork" => Some(PlaceCategory::Artwork),
        _ => None,
    })
}

fn check_historic_tags(tags: &HashMap<String, String>) -> Option<PlaceCategory> {
    tags.get("historic").map(|h| match h.as_str() {
        "castle" | "fort" | "fortress" => PlaceCategory::Castle,
        "monument" | "memorial" => PlaceCategory::Monument,
        _ => PlaceCategory::Historic,
    })
}

fn check_amenity_tags(tags: &HashMap<String, String>) -> Option<PlaceCategory> {
    tags.get("amenity").and_then(|a| match a.as_str() {
        "place_of_worship" => Some(PlaceCategory::Church),
        "fountain" => Some(PlaceCategory::Fountain),
        "marketplace" => Some(PlaceCategory::Market),
        "theatre" => Some(PlaceCategory::Theatre),
        "library" => Some(PlaceCategory::Library),
        "cafe" => Some(PlaceCategory::Cafe),
        "restaurant" => Some(PlaceCategory::Restaurant),
        _ => None,
    })
}

fn check_leisure_tags(tags: &HashMap<String, String>) -> Option<PlaceCategory> {
    tags.get("leisure").and_then(|l| match l.as_str() {
        "park" | "garden" => Some(PlaceCategory::Park),
        "nature_reserve" => Some(PlaceCategory::NatureReserve),
        "marina" | "beach_resort" => Some(PlaceCategory::Waterfront),
        _ => None,
    })
}

fn check_natural_tags(tags: &HashMap<String, String>) -> Option<PlaceCategory> {
    tags.get("natural").and_then(|n| match n.as_str() {
        "beach" => Some(PlaceCategory::Waterfront),
        _ => None,
    })
}

fn check_place_tags(tags: &HashMap<String, String>) -> Option<PlaceCategory> {
    tags.get("place").and_then(|p| match p.as_str() {
        "square" => Some(PlaceCategory::Plaza),
        _ => None,
    })
}

fn check_shop_tags(tags: &HashMap<String, String>) -> Option<PlaceCategory> {
    tags.get("shop").and_then(|s| match s.as_str() {
        "mall" | "department_store" => Some(PlaceCategory::Shopping),
        _ => None,
    })
}

fn check_boundary_tags(tags: &HashMap<String, String>) -> Option<PlaceCategory> {
    tags.get("boundary").and_then(|b| match b.as_str() {
        "protected_area" => Some(PlaceCategory::NatureReserve),
        _ => None,
    })
}

fn check_building_tags(tags: &HashMap<String, String>) -> Option<PlaceCategory> {
    tags.get("building").and_then(|b| match b.as_str() {
        "church" | "cathedral" => Some(PlaceCategory::Church),
        _ => None,
    })
}

fn extract_metadata(tags: &HashMap<String, String>) -> PlaceMetadata {
    let tag = |keys: &[&str]| keys.iter().find_map(|k| tags.get(*k)).cloned();

    let address = match (tags.get("addr:street"), tags.get("addr:housenumber")) {
        (Some(street), Some(number)) => Some(format!("{} {}", street, number)),
        (Some(street), None) => Some(street.clone()),
        _ => None,
    };

    let wheelchair = tags.get("wheelchair").and_then(|w| match w.as_str() {
        "yes" | "designated" => Some(Accessibility::Yes),
        "limited" => Some(Accessibility::Limited),
        "no" => Some(Accessibility::No),
        _ => None,
    });

    PlaceMetadata {
        description: tag(&["description", "description:en"]),
        opening_hours: tag(&["opening_hours"]),
        phone: tag(&["phone", "contact:phone"]),
        email: tag(&["email", "contact:email"]),
        website: tag(&["website", "contact:website", "url"]),
        address,
        wheelchair,
    }
}

// Overpass API response types

/// Outcome of a failed single request.
enum Attempt {
    Retry(AppError),
    Fatal(AppError),
}

#[derive(Debug, Deserialize)]
struct OverpassResponse {
    elements: Vec<OverpassElement>,
}

#[derive(Debug, Deserialize)]
struct OverpassElement {
    #[serde(rename = "type")]
    element_type: String,
    id: i64,
    #[serde(default)]
    lat: Option<f64>,
    #[serde(default)]
    lon: Option<f64>,
    #[serde(default)]
    center: Option<OverpassCenter>,
    #[serde(default)]
    tags: HashMap<String, String>,
}

#[derive(Debug, Deserialize)]
struct OverpassCenter {
    lat: f64,
    lon: f64,
}
