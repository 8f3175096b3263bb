use async_trait::async_trait;
use citywalk::cache::CacheManager;
use citywalk::config::{CacheConfig, TourConfig};
use citywalk::coordinator::{Coordinator, Services};
use citywalk::error::{AppError, Result};
use citywalk::models::{Coordinates, Place, PlaceCategory, RouteLeg};
use citywalk::services::providers::{PlaceProvider, PlaceQuery, RoutingEngine};
use citywalk::AppState;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Berlin, Alexanderplatz
#[allow(dead_code)]
pub fn origin() -> Coordinates {
    Coordinates::new(52.5219, 13.4132).unwrap()
}

/// Point `east_m` / `north_m` meters away from `from`
#[allow(dead_code)]
pub fn offset(from: &Coordinates, east_m: f64, north_m: f64) -> Coordinates {
    let lat = from.lat + north_m / 111_195.0;
    let lng = from.lng + east_m / (111_195.0 * from.lat.to_radians().cos());
    Coordinates::new(lat, lng).unwrap()
}

#[allow(dead_code)]
pub fn place(id: &str, name: &str, category: PlaceCategory, east_m: f64, north_m: f64) -> Place {
    Place::new(
        format!("osm:node/{}", id),
        name,
        category,
        offset(&origin(), east_m, north_m),
    )
}

/// A dozen well-spaced places of mixed categories around [`origin`]
#[allow(dead_code)]
pub fn sample_places() -> Vec<Place> {
    vec![
        place("1", "Marienkirche", PlaceCategory::Church, -300.0, -150.0),
        place("2", "Neptunbrunnen", PlaceCategory::Fountain, -500.0, -350.0),
        place("3", "Fernsehturm", PlaceCategory::Attraction, -200.0, 50.0),
        place("4", "Rotes Rathaus", PlaceCategory::Historic, -250.0, -500.0),
        place("5", "Nikolaiviertel", PlaceCategory::Historic, -450.0, -750.0),
        place("6", "Altes Museum", PlaceCategory::Museum, -1100.0, -100.0),
        place("7", "Berliner Dom", PlaceCategory::Church, -900.0, -250.0),
        place("8", "Lustgarten", PlaceCategory::Park, -1000.0, 100.0),
        place("9", "Monbijoupark", PlaceCategory::Park, -800.0, 500.0),
        place("10", "Hackescher Markt", PlaceCategory::Market, -600.0, 350.0),
        place("11", "Volksbühne", PlaceCategory::Theatre, 300.0, 700.0),
        place("12", "Café Moskau", PlaceCategory::Cafe, 700.0, -200.0),
    ]
}

/// In-memory place provider
#[allow(dead_code)]
pub struct FakePlaces {
    pub places: Vec<Place>,
    pub calls: AtomicUsize,
    pub delay: Option<Duration>,
    pub fail: bool,
}

#[allow(dead_code)]
impl FakePlaces {
    pub fn new(places: Vec<Place>) -> Self {
        FakePlaces {
            places,
            calls: AtomicUsize::new(0),
            delay: None,
            fail: false,
        }
    }

    pub fn failing() -> Self {
        FakePlaces {
            fail: true,
            ..FakePlaces::new(Vec::new())
        }
    }

    pub fn slow(places: Vec<Place>, delay: Duration) -> Self {
        FakePlaces {
            delay: Some(delay),
            ..FakePlaces::new(places)
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PlaceProvider for FakePlaces {
    async fn search(&self, query: &PlaceQuery) -> Result<Vec<Place>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail {
            return Err(AppError::ProviderUnavailable("HTTP 503".to_string()));
        }

        Ok(self
            .places
            .iter()
            .filter(|p| query.categories.is_empty() || query.categories.contains(&p.category))
            .filter(|p| p.coordinates.distance_m(&query.origin) <= query.radius_m)
            .take(query.limit)
            .cloned()
            .collect())
    }

    fn name(&self) -> &'static str {
        "fake-places"
    }
}

/// Routing engine that walks in straight lines at 1.4 m/s
#[allow(dead_code)]
#[derive(Default)]
pub struct StraightLine {
    pub calls: AtomicUsize,
}

#[allow(dead_code)]
impl StraightLine {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RoutingEngine for StraightLine {
    async fn walking_leg(&self, from: &Coordinates, to: &Coordinates) -> Result<Option<RouteLeg>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let d = from.distance_m(to);
        Ok(Some(RouteLeg::new(*from, *to, d, d / 1.4).with_path(vec![*from, *to])))
    }

    fn name(&self) -> &'static str {
        "straight-line"
    }
}

/// Tour settings with pacing disabled so tests do not wait on wall time
#[allow(dead_code)]
pub fn test_tour_config() -> TourConfig {
    TourConfig {
        leg_call_interval_ms: 0,
        leg_max_retries: 0,
        provider_timeout_secs: 2,
        ..TourConfig::default()
    }
}

#[allow(dead_code)]
pub fn memory_cache() -> Arc<CacheManager> {
    Arc::new(CacheManager::memory_only(&CacheConfig::default()))
}

#[allow(dead_code)]
pub fn spawn_coordinator(
    places: Arc<dyn PlaceProvider>,
    engine: Arc<dyn RoutingEngine>,
) -> (Coordinator, Arc<CacheManager>) {
    let cache = memory_cache();
    let services = Services::new(Arc::new(test_tour_config()), places, engine, cache.clone());
    let coordinator = Coordinator::spawn(services, CancellationToken::new());
    (coordinator, cache)
}

/// Router over fake providers, as mounted under `/api/v1` in production
#[allow(dead_code)]
pub fn setup_test_app(places: Arc<dyn PlaceProvider>, engine: Arc<dyn RoutingEngine>) -> axum::Router {
    let (coordinator, cache) = spawn_coordinator(places, engine);
    let state = Arc::new(AppState { coordinator, cache });
    citywalk::routes::create_router(state)
}

/// Live provider tests only run when explicitly requested
#[allow(dead_code)]
pub fn should_skip_real_api_tests() -> bool {
    std::env::var("RUN_REAL_API_TESTS").is_err()
}
