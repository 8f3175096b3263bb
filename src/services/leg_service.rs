use crate::cache::{leg_cache_key, CacheManager, CacheNamespace};
use crate::config::TourConfig;
use crate::constants::{LEG_ENDPOINT_TOLERANCE_M, LEG_RETRY_BACKOFF_BASE_MS};
use crate::error::{AppError, Result};
use crate::models::{Coordinates, RouteLeg, Waypoint};
use crate::services::providers::RoutingEngine;
use futures::stream::{self, StreamExt, TryStreamExt};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, Semaphore};
use tokio::time::Instant;

/// Rate limits and timeouts for outbound routing calls
#[derive(Debug, Clone)]
pub struct LegServiceSettings {
    pub min_call_interval: Duration,
    pub max_in_flight: usize,
    pub call_timeout: Duration,
    pub max_retries: usize,
}

impl From<&TourConfig> for LegServiceSettings {
    fn from(config: &TourConfig) -> Self {
        LegServiceSettings {
            min_call_interval: config.leg_call_interval(),
            max_in_flight: config.leg_max_in_flight(),
            call_timeout: config.provider_timeout(),
            max_retries: config.leg_max_retries,
        }
    }
}

/// Symmetric matrix of walking distances in meters.
/// Unreachable pairs hold `f64::INFINITY`.
#[derive(Debug, Clone)]
pub struct DistanceMatrix {
    size: usize,
    values: Vec<f64>,
}

impl DistanceMatrix {
    fn new(size: usize) -> Self {
        DistanceMatrix {
            size,
            values: vec![0.0; size * size],
        }
    }

    /// Build from a distance function evaluated once per unordered pair
    pub fn from_fn(size: usize, f: impl Fn(usize, usize) -> f64) -> Self {
        let mut matrix = Self::new(size);
        for i in 0..size {
            for j in (i + 1)..size {
                matrix.set(i, j, f(i, j));
            }
        }
        matrix
    }

    fn set(&mut self, i: usize, j: usize, value: f64) {
        self.values[i * self.size + j] = value;
        self.values[j * self.size + i] = value;
    }

    pub fn get(&self, i: usize, j: usize) -> f64 {
        self.values[i * self.size + j]
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Total length of a path visiting the given indices in order
    pub fn path_length(&self, order: &[usize]) -> f64 {
        order.windows(2).map(|w| self.get(w[0], w[1])).sum()
    }
}

/// Walking legs between waypoints, served from the leg cache when possible.
///
/// Outbound calls are bounded by a semaphore and spaced by a pacing gate;
/// retryable failures back off exponentially. An engine answer of "no route"
/// surfaces as [`AppError::UnreachableLeg`] and is never retried.
pub struct LegDistanceService {
    engine: Arc<dyn RoutingEngine>,
    cache: Arc<CacheManager>,
    permits: Semaphore,
    last_call: Mutex<Option<Instant>>,
    settings: LegServiceSettings,
    outbound_calls: AtomicU64,
}

impl LegDistanceService {
    pub fn new(
        engine: Arc<dyn RoutingEngine>,
        cache: Arc<CacheManager>,
        settings: LegServiceSettings,
    ) -> Self {
        let max_in_flight = settings.max_in_flight.max(1);
        LegDistanceService {
            engine,
            cache,
            permits: Semaphore::new(max_in_flight),
            last_call: Mutex::new(None),
            settings: LegServiceSettings {
                max_in_flight,
                ..settings
            },
            outbound_calls: AtomicU64::new(0),
        }
    }

    /// Routing engine calls made so far (cache hits excluded)
    pub fn outbound_calls(&self) -> u64 {
        self.outbound_calls.load(Ordering::Relaxed)
    }

    pub async fn leg(&self, from: &Waypoint, to: &Waypoint) -> Result<RouteLeg> {
        self.leg_between(&from.coordinates, &to.coordinates)
            .await?
            .ok_or_else(|| AppError::UnreachableLeg {
                from: from.name.clone(),
                to: to.name.clone(),
            })
    }

    /// Legs for each adjacent pair, in route order
    pub async fn legs(&self, waypoints: &[Waypoint]) -> Result<Vec<RouteLeg>> {
        stream::iter(0..waypoints.len().saturating_sub(1))
            .map(|i| self.leg(&waypoints[i], &waypoints[i + 1]))
            .buffered(self.settings.max_in_flight)
            .try_collect()
            .await
    }

    /// Walking distance between every pair of points
    pub async fn distance_matrix(&self, points: &[Coordinates]) -> Result<DistanceMatrix> {
        let n = points.len();
        let mut matrix = DistanceMatrix::new(n);

        let pairs: Vec<(usize, usize)> = (0..n)
            .flat_map(|i| ((i + 1)..n).map(move |j| (i, j)))
            .collect();

        tracing::debug!(
            points = n,
            pairs = pairs.len(),
            "Computing distance matrix for {} points ({} pairs)",
            n,
            pairs.len()
        );

        let results: Vec<(usize, usize, Option<RouteLeg>)> = stream::iter(pairs)
            .map(|(i, j)| async move {
                let leg = self.leg_between(&points[i], &points[j]).await?;
                Ok::<_, AppError>((i, j, leg))
            })
            .buffered(self.settings.max_in_flight)
            .try_collect()
            .await?;

        for (i, j, leg) in results {
            let distance = leg.map(|l| l.distance_m).unwrap_or(f64::INFINITY);
            matrix.set(i, j, distance);
        }

        Ok(matrix)
    }

    async fn leg_between(&self, from: &Coordinates, to: &Coordinates) -> Result<Option<RouteLeg>> {
        if from.approx_eq(to, LEG_ENDPOINT_TOLERANCE_M) {
            return Ok(Some(RouteLeg::new(*from, *to, 0.0, 0.0)));
        }

        let key = leg_cache_key(from, to);
        if let Some(cached) = self
            .cache
            .get_json::<RouteLeg>(CacheNamespace::Leg, &key)
            .await
        {
            if let Some(leg) = orient(cached, from, to) {
                return Ok(Some(leg));
            }
        }

        let leg = self.fetch_with_retry(from, to).await?;
        if let Some(ref leg) = leg {
            self.cache.put_json(CacheNamespace::Leg, &key, leg).await;
        }
        Ok(leg)
    }

    async fn fetch_with_retry(&self, from: &Coordinates, to: &Coordinates) -> Result<Option<RouteLeg>> {
        let mut retry_count = 0;

        loop {
            match self.fetch_once(from, to).await {
                Ok(leg) => return Ok(leg),
                Err(e) if e.is_retryable() && retry_count < self.settings.max_retries => {
                    retry_count += 1;
                    let backoff_ms = LEG_RETRY_BACKOFF_BASE_MS * 2_u64.pow(retry_count as u32 - 1);
                    tracing::warn!(
                        "Routing call failed ({}), retrying in {}ms (attempt {}/{})",
                        e,
                        backoff_ms,
                        retry_count + 1,
                        self.settings.max_retries + 1
                    );
                    tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// One bounded, paced, timed engine call
    async fn fetch_once(&self, from: &Coordinates, to: &Coordinates) -> Result<Option<RouteLeg>> {
        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|_| AppError::Internal("Routing semaphore closed".to_string()))?;

        {
            let mut last_call = self.last_call.lock().await;
            if let Some(previous) = *last_call {
                tokio::time::sleep_until(previous + self.settings.min_call_interval).await;
            }
            *last_call = Some(Instant::now());
        }

        self.outbound_calls.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(
            engine = self.engine.name(),
            "Routing call {:.5},{:.5} -> {:.5},{:.5}",
            from.lat,
            from.lng,
            to.lat,
            to.lng
        );

        match tokio::time::timeout(self.settings.call_timeout, self.engine.walking_leg(from, to)).await {
            Ok(result) => result,
            Err(_) => Err(AppError::Timeout(format!(
                "{} did not answer within {}s",
                self.engine.name(),
                self.settings.call_timeout.as_secs()
            ))),
        }
    }
}

/// Fit a cached leg onto the requested endpoints, flipping it if it was
/// stored in the other direction.
fn orient(cached: RouteLeg, from: &Coordinates, to: &Coordinates) -> Option<RouteLeg> {
    let mut leg = if cached.from.approx_eq(from, LEG_ENDPOINT_TOLERANCE_M)
        && cached.to.approx_eq(to, LEG_ENDPOINT_TOLERANCE_M)
    {
        cached
    } else if cached.from.approx_eq(to, LEG_ENDPOINT_TOLERANCE_M)
        && cached.to.approx_eq(from, LEG_ENDPOINT_TOLERANCE_M)
    {
        cached.reversed()
    } else {
        return None;
    };
    leg.from = *from;
    leg.to = *to;
    Some(leg)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CacheConfig;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Mutex as StdMutex;

    /// Straight-line engine that records call start times and concurrency
    #[derive(Default)]
    struct RecordingEngine {
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
        starts: StdMutex<Vec<Instant>>,
        failures_left: AtomicUsize,
        unreachable: bool,
    }

    #[async_trait]
    impl RoutingEngine for RecordingEngine {
        async fn walking_leg(&self, from: &Coordinates, to: &Coordinates) -> Result<Option<RouteLeg>> {
            self.starts.lock().unwrap().push(Instant::now());
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(500)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            if self
                .failures_left
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
            {
                return Err(AppError::ProviderUnavailable("HTTP 503".to_string()));
            }
            if self.unreachable {
                return Ok(None);
            }
            let d = from.distance_m(to);
            Ok(Some(RouteLeg::new(*from, *to, d, d / 1.4)))
        }

        fn name(&self) -> &'static str {
            "recording"
        }
    }

    fn settings() -> LegServiceSettings {
        LegServiceSettings {
            min_call_interval: Duration::from_millis(200),
            max_in_flight: 2,
            call_timeout: Duration::from_secs(10),
            max_retries: 2,
        }
    }

    fn service(engine: Arc<RecordingEngine>) -> LegDistanceService {
        let cache = Arc::new(CacheManager::memory_only(&CacheConfig::default()));
        LegDistanceService::new(engine, cache, settings())
    }

    fn points(n: usize) -> Vec<Coordinates> {
        (0..n)
            .map(|i| Coordinates::new(52.50 + i as f64 * 0.002, 13.40).unwrap())
            .collect()
    }

    #[tokio::test(start_paused = true)]
    async fn test_matrix_respects_concurrency_and_pacing() {
        let engine = Arc::new(RecordingEngine::default());
        let svc = service(engine.clone());

        let matrix = svc.distance_matrix(&points(4)).await.unwrap();

        assert_eq!(svc.outbound_calls(), 6);
        assert!(engine.max_in_flight.load(Ordering::SeqCst) <= 2);

        let starts = engine.starts.lock().unwrap().clone();
        for pair in starts.windows(2) {
            assert!(pair[1] - pair[0] >= Duration::from_millis(200));
        }

        assert_eq!(matrix.get(0, 0), 0.0);
        assert_eq!(matrix.get(1, 2), matrix.get(2, 1));
        assert!(matrix.get(0, 3) > matrix.get(0, 1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_reverse_direction_served_from_cache() {
        let engine = Arc::new(RecordingEngine::default());
        let svc = service(engine);
        let p = points(2);
        let a = Waypoint::point("A", p[0]);
        let b = Waypoint::point("B", p[1]);

        let forward = svc.leg(&a, &b).await.unwrap();
        let backward = svc.leg(&b, &a).await.unwrap();

        assert_eq!(svc.outbound_calls(), 1);
        assert_eq!(backward.from, b.coordinates);
        assert_eq!(backward.to, a.coordinates);
        assert_eq!(backward.distance_m, forward.distance_m);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retryable_failures_are_retried() {
        let engine = Arc::new(RecordingEngine {
            failures_left: AtomicUsize::new(2),
            ..Default::default()
        });
        let svc = service(engine);
        let p = points(2);

        let leg = svc
            .leg(&Waypoint::point("A", p[0]), &Waypoint::point("B", p[1]))
            .await
            .unwrap();
        assert!(leg.distance_m > 0.0);
        assert_eq!(svc.outbound_calls(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unreachable_is_not_retried() {
        let engine = Arc::new(RecordingEngine {
            unreachable: true,
            ..Default::default()
        });
        let svc = service(engine);
        let p = points(2);

        let err = svc
            .leg(&Waypoint::point("A", p[0]), &Waypoint::point("B", p[1]))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::UnreachableLeg { .. }));
        assert_eq!(svc.outbound_calls(), 1);

        // Unreachable pairs become infinite distances in a matrix
        let matrix = svc.distance_matrix(&p).await.unwrap();
        assert!(matrix.get(0, 1).is_infinite());
    }

    #[test]
    fn test_path_length() {
        let mut m = DistanceMatrix::new(3);
        m.set(0, 1, 10.0);
        m.set(1, 2, 5.0);
        m.set(0, 2, 12.0);
        assert_eq!(m.path_length(&[0, 1, 2]), 15.0);
        assert_eq!(m.path_length(&[0, 2, 1]), 17.0);
    }
}
