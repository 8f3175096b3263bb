use crate::constants::*;
use crate::models::{ExperienceLimit, PlaceCategory, RouteConstraints};
use std::collections::HashMap;
use std::env;
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub mapbox_api_key: String,
    /// When set, directions go through a proxy using bearer auth
    pub mapbox_base_url: Option<String>,
    /// Overpass mirrors; empty means the built-in list
    pub overpass_endpoints: Vec<String>,
    pub cache: CacheConfig,
    pub tour: TourConfig,
}

#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Directory of the file-backed persisted tier
    pub cache_dir: String,
    /// When set, the persisted tier lives in Redis instead of on disk
    pub redis_url: Option<String>,
    pub place_ttl_secs: u64,
    pub leg_ttl_secs: u64,
    pub memory_capacity: u64,
    pub disk_budget_bytes: u64,
    pub maintenance_interval_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            cache_dir: DEFAULT_CACHE_DIR.to_string(),
            redis_url: None,
            place_ttl_secs: DEFAULT_PLACE_CACHE_TTL_SECONDS,
            leg_ttl_secs: DEFAULT_LEG_CACHE_TTL_SECONDS,
            memory_capacity: DEFAULT_MEMORY_CACHE_MAX_ENTRIES,
            disk_budget_bytes: DEFAULT_CACHE_DISK_BUDGET_BYTES,
            maintenance_interval_secs: DEFAULT_CACHE_MAINTENANCE_INTERVAL_SECONDS,
        }
    }
}

impl CacheConfig {
    pub fn from_env() -> Result<Self, String> {
        let defaults = Self::default();

        Ok(Self {
            cache_dir: env::var("CACHE_DIR").unwrap_or(defaults.cache_dir),
            redis_url: env::var("REDIS_URL").ok(),
            place_ttl_secs: parse_env("PLACE_CACHE_TTL", defaults.place_ttl_secs)?,
            leg_ttl_secs: parse_env("LEG_CACHE_TTL", defaults.leg_ttl_secs)?,
            memory_capacity: parse_env("CACHE_MEMORY_CAPACITY", defaults.memory_capacity)?,
            disk_budget_bytes: parse_env("CACHE_DISK_BUDGET_BYTES", defaults.disk_budget_bytes)?,
            maintenance_interval_secs: parse_env(
                "CACHE_MAINTENANCE_INTERVAL",
                defaults.maintenance_interval_secs,
            )?,
        })
    }
}

/// Tunable knobs for discovery, routing and live tracking.
///
/// Spacing and category shares are product parameters, not algorithm
/// structure, so every one of them can be overridden from the environment.
#[derive(Debug, Clone)]
pub struct TourConfig {
    /// Provider results requested per desired stop (clamped 3-5)
    pub pool_multiplier: usize,

    /// Minimum distance between two selected places; `None` = no minimum
    pub min_spacing_m: Option<f64>,

    /// Same-name places closer than this are merged
    pub dedupe_radius_m: f64,

    /// Search radius used when a request does not specify one
    pub search_radius_m: f64,

    /// Target share per category; categories absent here fall back to
    /// [`PlaceCategory::importance`]
    pub category_weights: HashMap<PlaceCategory, f32>,

    /// Minimum spacing between outbound routing calls
    pub leg_call_interval_ms: u64,

    /// Routing calls allowed in flight at once (clamped 1-3)
    pub leg_max_in_flight: usize,

    /// Timeout applied to every external provider call
    pub provider_timeout_secs: u64,

    /// Retries for retryable routing failures
    pub leg_max_retries: usize,

    /// Upper bound on 2-opt improvement passes
    pub max_two_opt_passes: usize,

    /// Fixed visit time per stop
    pub visit_minutes_per_stop: u32,

    /// Distance within which a waypoint counts as reached
    pub proximity_threshold_m: f64,

    /// Default distance ceiling; `None` = unconstrained
    pub max_distance_m: Option<f64>,

    /// Default experience time budget
    pub max_experience: ExperienceLimit,

    /// How many times the planner may drop a stop to meet a budget
    pub max_trim_attempts: usize,
}

impl Default for TourConfig {
    fn default() -> Self {
        Self {
            pool_multiplier: DEFAULT_POOL_MULTIPLIER,
            min_spacing_m: Some(DEFAULT_MIN_SPACING_M),
            dedupe_radius_m: DEFAULT_DEDUPE_RADIUS_M,
            search_radius_m: DEFAULT_SEARCH_RADIUS_M,
            category_weights: HashMap::new(),
            leg_call_interval_ms: DEFAULT_LEG_CALL_INTERVAL_MS,
            leg_max_in_flight: DEFAULT_LEG_MAX_IN_FLIGHT,
            provider_timeout_secs: DEFAULT_PROVIDER_TIMEOUT_SECONDS,
            leg_max_retries: DEFAULT_LEG_MAX_RETRIES,
            max_two_opt_passes: DEFAULT_MAX_TWO_OPT_PASSES,
            visit_minutes_per_stop: DEFAULT_VISIT_MINUTES_PER_STOP,
            proximity_threshold_m: DEFAULT_PROXIMITY_THRESHOLD_M,
            max_distance_m: Some(DEFAULT_MAX_DISTANCE_M),
            max_experience: ExperienceLimit::OpenEnd,
            max_trim_attempts: DEFAULT_MAX_TRIM_ATTEMPTS,
        }
    }
}

impl TourConfig {
    pub fn from_env() -> Result<Self, String> {
        let defaults = Self::default();

        let min_spacing_m = match env::var("TOUR_MIN_SPACING_M") {
            Ok(v) => parse_optional_meters(&v, "TOUR_MIN_SPACING_M")?,
            Err(_) => defaults.min_spacing_m,
        };

        let max_distance_m = match env::var("TOUR_MAX_DISTANCE_M") {
            Ok(v) => parse_optional_meters(&v, "TOUR_MAX_DISTANCE_M")?,
            Err(_) => defaults.max_distance_m,
        };

        let max_experience = match env::var("TOUR_MAX_EXPERIENCE_MINUTES") {
            Ok(v) if v.eq_ignore_ascii_case("open") => ExperienceLimit::OpenEnd,
            Ok(v) => ExperienceLimit::Max {
                minutes: v
                    .parse()
                    .map_err(|_| "Invalid TOUR_MAX_EXPERIENCE_MINUTES")?,
            },
            Err(_) => defaults.max_experience,
        };

        let category_weights = match env::var("TOUR_CATEGORY_WEIGHTS") {
            Ok(v) => parse_category_weights(&v)?,
            Err(_) => defaults.category_weights,
        };

        let config = Self {
            pool_multiplier: parse_env("TOUR_POOL_MULTIPLIER", defaults.pool_multiplier)?,
            min_spacing_m,
            dedupe_radius_m: parse_env("TOUR_DEDUPE_RADIUS_M", defaults.dedupe_radius_m)?,
            search_radius_m: parse_env("TOUR_SEARCH_RADIUS_M", defaults.search_radius_m)?,
            category_weights,
            leg_call_interval_ms: parse_env(
                "TOUR_LEG_CALL_INTERVAL_MS",
                defaults.leg_call_interval_ms,
            )?,
            leg_max_in_flight: parse_env("TOUR_LEG_MAX_IN_FLIGHT", defaults.leg_max_in_flight)?,
            provider_timeout_secs: parse_env(
                "TOUR_PROVIDER_TIMEOUT_SECONDS",
                defaults.provider_timeout_secs,
            )?,
            leg_max_retries: parse_env("TOUR_LEG_MAX_RETRIES", defaults.leg_max_retries)?,
            max_two_opt_passes: parse_env("TOUR_MAX_TWO_OPT_PASSES", defaults.max_two_opt_passes)?,
            visit_minutes_per_stop: parse_env(
                "TOUR_VISIT_MINUTES_PER_STOP",
                defaults.visit_minutes_per_stop,
            )?,
            proximity_threshold_m: parse_env(
                "TOUR_PROXIMITY_THRESHOLD_M",
                defaults.proximity_threshold_m,
            )?,
            max_distance_m,
            max_experience,
            max_trim_attempts: parse_env("TOUR_MAX_TRIM_ATTEMPTS", defaults.max_trim_attempts)?,
        };

        if config.proximity_threshold_m <= 0.0 || config.proximity_threshold_m > 500.0 {
            return Err("TOUR_PROXIMITY_THRESHOLD_M must be between 0 and 500 meters".to_string());
        }

        Ok(config)
    }

    /// Target share weight for a category
    pub fn category_weight(&self, category: PlaceCategory) -> f32 {
        self.category_weights
            .get(&category)
            .copied()
            .unwrap_or_else(|| category.importance())
    }

    pub fn pool_multiplier(&self) -> usize {
        self.pool_multiplier
            .clamp(MIN_POOL_MULTIPLIER, MAX_POOL_MULTIPLIER)
    }

    pub fn leg_max_in_flight(&self) -> usize {
        self.leg_max_in_flight.clamp(1, MAX_LEG_IN_FLIGHT)
    }

    pub fn leg_call_interval(&self) -> Duration {
        Duration::from_millis(self.leg_call_interval_ms)
    }

    pub fn provider_timeout(&self) -> Duration {
        Duration::from_secs(self.provider_timeout_secs)
    }

    pub fn visit_time_per_stop_s(&self) -> f64 {
        self.visit_minutes_per_stop as f64 * 60.0
    }

    /// Constraints applied when a request brings none of its own
    pub fn default_constraints(&self) -> RouteConstraints {
        RouteConstraints {
            max_distance_m: self.max_distance_m,
            max_experience: self.max_experience.clone(),
            min_spacing_m: self.min_spacing_m,
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, String> {
        dotenv::dotenv().ok();

        let overpass_endpoints = env::var("OVERPASS_ENDPOINTS")
            .map(|v| {
                v.split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect()
            })
            .unwrap_or_default();

        Ok(Config {
            host: env::var("HOST").unwrap_or_else(|_| DEFAULT_HOST.to_string()),
            port: env::var("PORT")
                .unwrap_or_else(|_| DEFAULT_PORT.to_string())
                .parse()
                .map_err(|_| "Invalid PORT")?,
            mapbox_api_key: env::var("MAPBOX_API_KEY").map_err(|_| "MAPBOX_API_KEY must be set")?,
            mapbox_base_url: env::var("MAPBOX_BASE_URL").ok(),
            overpass_endpoints,
            cache: CacheConfig::from_env()?,
            tour: TourConfig::from_env()?,
        })
    }

    pub fn server_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn parse_env<T>(key: &str, default: T) -> Result<T, String>
where
    T: FromStr + ToString,
{
    env::var(key)
        .unwrap_or_else(|_| default.to_string())
        .parse()
        .map_err(|_| format!("Invalid {}", key))
}

/// `none`/`off` disables the limit, anything else must be a positive number
fn parse_optional_meters(value: &str, key: &str) -> Result<Option<f64>, String> {
    match value.trim().to_lowercase().as_str() {
        "none" | "off" | "" => Ok(None),
        v => {
            let meters: f64 = v.parse().map_err(|_| format!("Invalid {}", key))?;
            if meters <= 0.0 {
                return Err(format!("{} must be positive or 'none'", key));
            }
            Ok(Some(meters))
        }
    }
}

/// Parses `attraction:0.4,museum:0.25,shopping:0.05`
fn parse_category_weights(value: &str) -> Result<HashMap<PlaceCategory, f32>, String> {
    value
        .split(',')
        .filter(|part| !part.trim().is_empty())
        .map(|part| {
            let (name, weight) = part
                .split_once(':')
                .ok_or_else(|| format!("Invalid TOUR_CATEGORY_WEIGHTS entry: {}", part))?;
            let category: PlaceCategory = name.parse()?;
            let weight: f32 = weight
                .trim()
                .parse()
                .map_err(|_| format!("Invalid weight for {}", category))?;
            if weight < 0.0 {
                return Err(format!("Weight for {} must not be negative", category));
            }
            Ok((category, weight))
        })
        .collect()
}
