//! Stable application-wide constants.
//!
//! Values here are structural invariants and default fallbacks for
//! env-var-based configuration. Tunable product knobs (spacing, category
//! shares, budgets) are surfaced through [`TourConfig`](crate::config::TourConfig).

// --- Server defaults (used when HOST / PORT env vars are absent) ---

/// Default bind address for the HTTP server.
pub const DEFAULT_HOST: &str = "0.0.0.0";
/// Default port for the HTTP server.
pub const DEFAULT_PORT: &str = "3000";

// --- Cache defaults ---

/// Place-query cache TTL: 24 hours. Overridden by `PLACE_CACHE_TTL`.
pub const DEFAULT_PLACE_CACHE_TTL_SECONDS: u64 = 86_400;
/// Leg cache TTL: 30 days. Street geometry is effectively static.
/// Overridden by `LEG_CACHE_TTL`.
pub const DEFAULT_LEG_CACHE_TTL_SECONDS: u64 = 2_592_000;
/// Maximum entries per namespace in the in-process tier.
pub const DEFAULT_MEMORY_CACHE_MAX_ENTRIES: u64 = 10_000;
/// Disk budget for the persisted tier before LRU pruning kicks in (50 MiB).
pub const DEFAULT_CACHE_DISK_BUDGET_BYTES: u64 = 50 * 1024 * 1024;
/// Interval between cache maintenance runs: 1 hour.
pub const DEFAULT_CACHE_MAINTENANCE_INTERVAL_SECONDS: u64 = 3_600;
/// Default directory of the file-backed persisted tier.
pub const DEFAULT_CACHE_DIR: &str = ".citywalk-cache";

/// Decimal places kept when keying place queries (~100m).
pub const PLACE_QUERY_KEY_PRECISION: u32 = 3;
/// Radius bucket (meters) used when keying place queries.
pub const PLACE_QUERY_RADIUS_BUCKET_M: f64 = 100.0;
/// Decimal places kept when keying legs (~1m).
pub const LEG_KEY_PRECISION: u32 = 5;

// --- Place discovery ---

/// How many provider results to request per desired stop.
pub const DEFAULT_POOL_MULTIPLIER: usize = 4;
/// Bounds for the pool multiplier.
pub const MIN_POOL_MULTIPLIER: usize = 3;
pub const MAX_POOL_MULTIPLIER: usize = 5;
/// Default minimum spacing between accepted places.
pub const DEFAULT_MIN_SPACING_M: f64 = 100.0;
/// Places with the same name closer than this are the same place.
pub const DEFAULT_DEDUPE_RADIUS_M: f64 = 15.0;
/// Default search radius around the start point.
pub const DEFAULT_SEARCH_RADIUS_M: f64 = 2_000.0;
/// Bonus added to a place's quality score when it has contact info.
pub const QUALITY_CONTACT_BONUS: f32 = 0.15;
/// Bonus added to a place's quality score when it has a description.
pub const QUALITY_DESCRIPTION_BONUS: f32 = 0.1;
/// Bonus added when opening hours are known.
pub const QUALITY_HOURS_BONUS: f32 = 0.05;

// --- Overpass ---

/// Server-side timeout passed in the query header.
pub const OVERPASS_QUERY_TIMEOUT_SECONDS: u64 = 25;
/// Retries after the first attempt (3 attempts total).
pub const OVERPASS_RETRY_MAX_ATTEMPTS: usize = 2;
/// Base of the exponential backoff between Overpass retries.
pub const OVERPASS_RETRY_BACKOFF_BASE_MS: u64 = 1_000;
pub const OVERPASS_HTTP_TOO_MANY_REQUESTS: u16 = 429;
pub const OVERPASS_HTTP_GATEWAY_TIMEOUT: u16 = 504;
/// Hard cap on elements returned by one query.
pub const OVERPASS_MAX_RESULTS: usize = 200;

// --- Leg distance service ---

/// Minimum delay between two outbound routing calls.
pub const DEFAULT_LEG_CALL_INTERVAL_MS: u64 = 200;
/// Maximum routing calls in flight at once.
pub const DEFAULT_LEG_MAX_IN_FLIGHT: usize = 2;
/// Hard upper bound for in-flight routing calls regardless of configuration.
pub const MAX_LEG_IN_FLIGHT: usize = 3;
/// Per-call timeout for external providers.
pub const DEFAULT_PROVIDER_TIMEOUT_SECONDS: u64 = 10;
/// Retries for retryable routing failures (timeouts, 5xx).
pub const DEFAULT_LEG_MAX_RETRIES: usize = 2;
/// Base delay of the exponential backoff between retries.
pub const LEG_RETRY_BACKOFF_BASE_MS: u64 = 250;

// --- Route shape ---

/// Maximum 2-opt passes before accepting the current local optimum.
pub const DEFAULT_MAX_TWO_OPT_PASSES: usize = 100;
/// Distances closer than this are considered equal by 2-opt.
pub const TWO_OPT_EPSILON_M: f64 = 1e-6;
/// Heading change (degrees) counted as a direction change.
pub const DIRECTION_CHANGE_THRESHOLD_DEG: f64 = 45.0;
/// Roundtrip routes must start and end within this distance.
pub const ROUNDTRIP_CLOSURE_TOLERANCE_M: f64 = 10.0;
/// Waypoints without identifiers are equal within this distance.
pub const WAYPOINT_EQUALITY_TOLERANCE_M: f64 = 1.0;
/// Legs must start/end within this distance of their waypoints.
pub const LEG_ENDPOINT_TOLERANCE_M: f64 = 5.0;
/// Fixed visit time per stop.
pub const DEFAULT_VISIT_MINUTES_PER_STOP: u32 = 30;
/// Default ceiling on total walking distance.
pub const DEFAULT_MAX_DISTANCE_M: f64 = 15_000.0;
/// Default number of stop-trimming retries when a route breaks its budget.
pub const DEFAULT_MAX_TRIM_ATTEMPTS: usize = 2;
/// Search radius around a stop when suggesting replacements.
pub const ALTERNATIVE_SEARCH_RADIUS_M: f64 = 750.0;
/// Replacement suggestions returned when the caller does not ask for a count.
pub const DEFAULT_ALTERNATIVE_COUNT: usize = 5;

// --- Proximity ---

/// Distance within which a user has reached a waypoint.
pub const DEFAULT_PROXIMITY_THRESHOLD_M: f64 = 25.0;
/// Buffered proximity events per subscriber.
pub const PROXIMITY_EVENT_CAPACITY: usize = 64;

// --- Coordinator ---

/// Pending commands the coordinator will buffer.
pub const COORDINATOR_MAILBOX_CAPACITY: usize = 64;
