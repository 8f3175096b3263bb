use crate::constants::PROXIMITY_EVENT_CAPACITY;
use crate::models::{EndpointMode, GeneratedRoute, LocationSample, Waypoint};
use serde::Serialize;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::broadcast;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProximityEvent {
    Visited {
        route_id: Uuid,
        index: usize,
        waypoint: Waypoint,
        distance_m: f64,
    },
    RouteCompleted {
        stats: CompletionStats,
    },
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct CompletionStats {
    pub route_id: Uuid,
    pub stops_visited: usize,
    pub distance_m: f64,
    /// Wall time between activation and the completing sample
    pub elapsed_s: f64,
    pub completed_at_ms: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SampleOutcome {
    /// No active route
    Idle,
    /// Another evaluation was in progress
    Skipped,
    Evaluated {
        newly_visited: Vec<usize>,
        completed: bool,
    },
}

#[derive(Debug, Clone, Serialize)]
pub struct MonitorSnapshot {
    pub active: bool,
    pub route_id: Option<Uuid>,
    pub visited_indices: Vec<usize>,
    pub total_stops: usize,
}

struct Session {
    /// Activation number, unique per monitor
    number: u64,
    route: Arc<GeneratedRoute>,
    visited: HashSet<String>,
    completion_signaled: bool,
    activated_at_ms: i64,
}

impl Session {
    fn new(number: u64, route: Arc<GeneratedRoute>) -> Self {
        Session {
            number,
            route,
            visited: HashSet::new(),
            completion_signaled: false,
            activated_at_ms: now_ms(),
        }
    }

    fn all_stops_visited(&self) -> bool {
        self.route
            .stops()
            .iter()
            .all(|w| self.visited.contains(&w.key()))
    }
}

struct Inner {
    session: Mutex<Option<Session>>,
    evaluating: AtomicBool,
    activations: AtomicU64,
    events: broadcast::Sender<ProximityEvent>,
    threshold_m: f64,
}

/// Releases the evaluation flag when dropped
struct EvaluationGuard<'a>(&'a AtomicBool);

impl Drop for EvaluationGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Tracks progress along the active route from location samples.
///
/// A stop is marked visited before its event is emitted, and completion is
/// signalled at most once per activation. Overlapping evaluations are
/// skipped, not queued. Cheap to clone.
#[derive(Clone)]
pub struct ProximityMonitor {
    inner: Arc<Inner>,
}

impl ProximityMonitor {
    pub fn new(threshold_m: f64) -> Self {
        let (events, _) = broadcast::channel(PROXIMITY_EVENT_CAPACITY);
        ProximityMonitor {
            inner: Arc::new(Inner {
                session: Mutex::new(None),
                evaluating: AtomicBool::new(false),
                activations: AtomicU64::new(0),
                events,
                threshold_m,
            }),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ProximityEvent> {
        self.inner.events.subscribe()
    }

    fn with_session<T>(&self, f: impl FnOnce(&mut Option<Session>) -> T) -> T {
        let mut session = match self.inner.session.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        f(&mut session)
    }

    /// Start tracking `route`, dropping any previous session. Returns the
    /// activation number, which completions report back.
    pub fn activate(&self, route: Arc<GeneratedRoute>) -> u64 {
        let route_id = route.id();
        let number = self.inner.activations.fetch_add(1, Ordering::Relaxed) + 1;
        self.with_session(|s| *s = Some(Session::new(number, route)));
        tracing::info!(
            route_id = %route_id,
            session = number,
            "Proximity tracking activated for route {}",
            route_id
        );
        number
    }

    pub fn deactivate(&self) -> Option<Uuid> {
        let previous = self.with_session(|s| s.take().map(|p| p.route.id()));
        if let Some(id) = previous {
            tracing::info!(route_id = %id, "Proximity tracking deactivated for route {}", id);
        }
        previous
    }

    /// Swap in an edited version of the active route, keeping visits to
    /// stops that are still on it. Returns false when nothing is active.
    pub fn replace_route(&self, route: Arc<GeneratedRoute>) -> bool {
        self.with_session(|s| match s {
            Some(session) => {
                let keys: HashSet<String> = route.stops().iter().map(|w| w.key()).collect();
                session.visited.retain(|k| keys.contains(k));
                tracing::debug!(
                    from = %session.route.id(),
                    to = %route.id(),
                    kept_visits = session.visited.len(),
                    "Active route replaced after edit"
                );
                session.route = route;
                true
            }
            None => false,
        })
    }

    pub fn snapshot(&self) -> MonitorSnapshot {
        self.with_session(|s| match s {
            Some(session) => {
                let range = session.route.stop_range();
                let visited_indices = range
                    .clone()
                    .filter(|i| session.visited.contains(&session.route.waypoints()[*i].key()))
                    .collect();
                MonitorSnapshot {
                    active: true,
                    route_id: Some(session.route.id()),
                    visited_indices,
                    total_stops: range.len(),
                }
            }
            None => MonitorSnapshot {
                active: false,
                route_id: None,
                visited_indices: Vec::new(),
                total_stops: 0,
            },
        })
    }

    /// Process one location sample. Never fails.
    pub fn evaluate(&self, sample: &LocationSample) -> SampleOutcome {
        self.evaluate_session(sample).0
    }

    /// Like [`evaluate`](Self::evaluate), also returning the activation
    /// number of the session this sample completed, if any.
    pub fn evaluate_session(&self, sample: &LocationSample) -> (SampleOutcome, Option<u64>) {
        if self
            .inner
            .evaluating
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            tracing::debug!("Location sample skipped, evaluation already running");
            return (SampleOutcome::Skipped, None);
        }
        let _guard = EvaluationGuard(&self.inner.evaluating);

        let threshold = self.inner.threshold_m;
        let mut events = Vec::new();
        let mut completed_session = None;

        let outcome = self.with_session(|slot| {
            let Some(session) = slot.as_mut() else {
                return SampleOutcome::Idle;
            };
            let route = Arc::clone(&session.route);
            let mut newly_visited = Vec::new();

            for index in route.stop_range() {
                let waypoint = &route.waypoints()[index];
                let key = waypoint.key();
                if session.visited.contains(&key) {
                    continue;
                }
                let distance_m = sample.coordinates.distance_m(&waypoint.coordinates);
                if distance_m <= threshold {
                    session.visited.insert(key);
                    newly_visited.push(index);
                    events.push(ProximityEvent::Visited {
                        route_id: route.id(),
                        index,
                        waypoint: waypoint.clone(),
                        distance_m,
                    });
                }
            }

            let finished = session.all_stops_visited()
                && match route.endpoint_mode() {
                    EndpointMode::LastStop => true,
                    EndpointMode::Roundtrip => sample
                        .coordinates
                        .approx_eq(&route.start().coordinates, threshold),
                    EndpointMode::Custom => sample
                        .coordinates
                        .approx_eq(&route.last().coordinates, threshold),
                };

            let completed = finished && !session.completion_signaled;
            if completed {
                session.completion_signaled = true;
                events.push(ProximityEvent::RouteCompleted {
                    stats: CompletionStats {
                        route_id: route.id(),
                        stops_visited: session.visited.len(),
                        distance_m: route.totals().distance_m,
                        elapsed_s: ((sample.timestamp_ms - session.activated_at_ms).max(0)) as f64
                            / 1000.0,
                        completed_at_ms: sample.timestamp_ms,
                    },
                });
                completed_session = Some(session.number);
                *slot = None;
            }

            SampleOutcome::Evaluated {
                newly_visited,
                completed,
            }
        });

        for event in events {
            if let ProximityEvent::RouteCompleted { ref stats } = event {
                tracing::info!(
                    route_id = %stats.route_id,
                    stops = stats.stops_visited,
                    "Route {} completed",
                    stats.route_id
                );
            }
            // No subscribers is fine
            let _ = self.inner.events.send(event);
        }

        (outcome, completed_session)
    }
}

fn now_ms() -> i64 {
    (time::OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000) as i64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Coordinates, RouteLeg};

    fn point(north_m: f64) -> Coordinates {
        Coordinates::new(52.52 + north_m / 111_195.0, 13.40).unwrap()
    }

    fn route(names_and_offsets: &[(&str, f64)], mode: EndpointMode) -> Arc<GeneratedRoute> {
        let waypoints: Vec<Waypoint> = names_and_offsets
            .iter()
            .map(|(n, m)| Waypoint::point(*n, point(*m)))
            .collect();
        let legs = waypoints
            .windows(2)
            .map(|w| {
                let d = w[0].coordinates.distance_m(&w[1].coordinates);
                RouteLeg::new(w[0].coordinates, w[1].coordinates, d, d / 1.4)
            })
            .collect();
        Arc::new(GeneratedRoute::assemble(waypoints, legs, mode, 0.0).unwrap())
    }

    fn at(north_m: f64) -> LocationSample {
        LocationSample::new(point(north_m), now_ms())
    }

    #[test]
    fn test_idle_without_route() {
        let monitor = ProximityMonitor::new(25.0);
        assert_eq!(monitor.evaluate(&at(0.0)), SampleOutcome::Idle);
        assert!(!monitor.snapshot().active);
    }

    #[test]
    fn test_roundtrip_needs_return_to_start() {
        let monitor = ProximityMonitor::new(25.0);
        let mut rx = monitor.subscribe();
        monitor.activate(route(
            &[("Start", 0.0), ("A", 500.0), ("B", 1000.0), ("Start", 0.0)],
            EndpointMode::Roundtrip,
        ));

        monitor.evaluate(&at(500.0));
        let outcome = monitor.evaluate(&at(1000.0));
        assert_eq!(
            outcome,
            SampleOutcome::Evaluated {
                newly_visited: vec![2],
                completed: false
            }
        );
        assert_eq!(monitor.snapshot().visited_indices, vec![1, 2]);

        let outcome = monitor.evaluate(&at(10.0));
        assert!(matches!(outcome, SampleOutcome::Evaluated { completed: true, .. }));
        assert_eq!(monitor.evaluate(&at(10.0)), SampleOutcome::Idle);

        let mut visited = 0;
        let mut completed = 0;
        while let Ok(event) = rx.try_recv() {
            match event {
                ProximityEvent::Visited { .. } => visited += 1,
                ProximityEvent::RouteCompleted { .. } => completed += 1,
            }
        }
        assert_eq!((visited, completed), (2, 1));
    }

    #[test]
    fn test_last_stop_completes_on_final_visit() {
        let monitor = ProximityMonitor::new(25.0);
        monitor.activate(route(
            &[("Start", 0.0), ("A", 300.0), ("B", 600.0), ("C", 900.0)],
            EndpointMode::LastStop,
        ));

        monitor.evaluate(&at(300.0));
        monitor.evaluate(&at(600.0));
        let outcome = monitor.evaluate(&at(905.0));
        assert_eq!(
            outcome,
            SampleOutcome::Evaluated {
                newly_visited: vec![3],
                completed: true
            }
        );
    }

    #[test]
    fn test_replace_route_keeps_surviving_visits() {
        let monitor = ProximityMonitor::new(25.0);
        monitor.activate(route(
            &[("Start", 0.0), ("A", 300.0), ("B", 600.0), ("Start", 0.0)],
            EndpointMode::Roundtrip,
        ));
        monitor.evaluate(&at(300.0));

        let edited = route(
            &[("Start", 0.0), ("A", 300.0), ("C", 800.0), ("Start", 0.0)],
            EndpointMode::Roundtrip,
        );
        assert!(monitor.replace_route(edited.clone()));

        let snapshot = monitor.snapshot();
        assert_eq!(snapshot.route_id, Some(edited.id()));
        assert_eq!(snapshot.visited_indices, vec![1]);

        monitor.deactivate();
        assert!(!monitor.replace_route(edited));
    }

    #[test]
    fn test_overlapping_evaluation_is_skipped() {
        let monitor = ProximityMonitor::new(25.0);
        monitor.inner.evaluating.store(true, Ordering::SeqCst);
        assert_eq!(monitor.evaluate(&at(0.0)), SampleOutcome::Skipped);
        monitor.inner.evaluating.store(false, Ordering::SeqCst);
        assert_eq!(monitor.evaluate(&at(0.0)), SampleOutcome::Idle);
    }

    #[test]
    fn test_completion_reports_its_activation() {
        let monitor = ProximityMonitor::new(25.0);
        let stops = [("Start", 0.0), ("A", 300.0), ("End", 600.0)];

        let first = monitor.activate(route(&stops, EndpointMode::LastStop));
        monitor.evaluate(&at(300.0));
        let (_, completed) = monitor.evaluate_session(&at(600.0));
        assert_eq!(completed, Some(first));

        let second = monitor.activate(route(&stops, EndpointMode::LastStop));
        assert_ne!(first, second);
        let (outcome, completed) = monitor.evaluate_session(&at(300.0));
        assert!(matches!(outcome, SampleOutcome::Evaluated { completed: false, .. }));
        assert_eq!(completed, None);
    }
}
