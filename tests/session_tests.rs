use citywalk::coordinator::Coordinator;
use citywalk::error::AppError;
use citywalk::models::{EndpointMode, GeneratedRoute, LocationSample, PlanRequest};
use citywalk::services::proximity::{ProximityEvent, SampleOutcome};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

mod common;

use common::{FakePlaces, StraightLine};

async fn active_route(stop_count: usize, endpoint_mode: EndpointMode) -> (Coordinator, GeneratedRoute) {
    let (coordinator, _) = common::spawn_coordinator(
        Arc::new(FakePlaces::new(common::sample_places())),
        Arc::new(StraightLine::default()),
    );
    let request = PlanRequest {
        start_point: common::origin(),
        start_name: None,
        stop_count,
        categories: Vec::new(),
        radius_m: None,
        endpoint_mode,
        custom_endpoint: None,
        constraints: None,
    };
    let route = coordinator.generate(request).await.unwrap().route;
    coordinator.activate(route.id()).await.unwrap();
    (coordinator, route)
}

fn sample_at(route: &GeneratedRoute, index: usize) -> LocationSample {
    LocationSample::new(route.waypoints()[index].coordinates, 1_700_000_000_000 + index as i64)
}

fn drain(rx: &mut tokio::sync::broadcast::Receiver<ProximityEvent>) -> (usize, usize) {
    let mut visited = 0;
    let mut completed = 0;
    while let Ok(event) = rx.try_recv() {
        match event {
            ProximityEvent::Visited { .. } => visited += 1,
            ProximityEvent::RouteCompleted { .. } => completed += 1,
        }
    }
    (visited, completed)
}

#[tokio::test]
async fn test_sample_without_session_is_idle() {
    let (coordinator, _) = common::spawn_coordinator(
        Arc::new(FakePlaces::new(common::sample_places())),
        Arc::new(StraightLine::default()),
    );

    let outcome = coordinator
        .submit_location(LocationSample::new(common::origin(), 0))
        .await
        .unwrap();
    assert_eq!(outcome, SampleOutcome::Idle);
}

#[tokio::test]
async fn test_activating_unknown_route_fails() {
    let (coordinator, _) = common::spawn_coordinator(
        Arc::new(FakePlaces::new(common::sample_places())),
        Arc::new(StraightLine::default()),
    );

    let err = coordinator.activate(uuid::Uuid::new_v4()).await.unwrap_err();
    assert!(matches!(err, AppError::NotFound(_)));
}

#[tokio::test]
async fn test_roundtrip_walk_completes_once() {
    let (coordinator, route) = active_route(3, EndpointMode::Roundtrip).await;
    let mut rx = coordinator.subscribe();

    for index in route.stop_range() {
        let outcome = coordinator.submit_location(sample_at(&route, index)).await.unwrap();
        assert_eq!(
            outcome,
            SampleOutcome::Evaluated {
                newly_visited: vec![index],
                completed: false
            }
        );
    }

    let status = coordinator.session().await.unwrap();
    assert_eq!(status.snapshot.visited_indices, vec![1, 2, 3]);

    // Back at the start closes the loop
    let outcome = coordinator.submit_location(sample_at(&route, 0)).await.unwrap();
    assert!(matches!(outcome, SampleOutcome::Evaluated { completed: true, .. }));

    let status = coordinator.session().await.unwrap();
    assert!(!status.snapshot.active);
    assert!(status.route.is_none());

    assert_eq!(drain(&mut rx), (3, 1));
}

#[tokio::test]
async fn test_revisiting_a_stop_emits_nothing() {
    let (coordinator, route) = active_route(3, EndpointMode::Roundtrip).await;
    let mut rx = coordinator.subscribe();

    coordinator.submit_location(sample_at(&route, 1)).await.unwrap();
    let outcome = coordinator.submit_location(sample_at(&route, 1)).await.unwrap();
    assert_eq!(
        outcome,
        SampleOutcome::Evaluated {
            newly_visited: vec![],
            completed: false
        }
    );
    assert_eq!(drain(&mut rx), (1, 0));
}

#[tokio::test]
async fn test_burst_of_samples_completes_once() {
    let (coordinator, route) = active_route(2, EndpointMode::LastStop).await;
    let mut rx = coordinator.subscribe();

    coordinator.submit_location(sample_at(&route, 1)).await.unwrap();

    let last = route.waypoints().len() - 1;
    let burst: Vec<_> = (0..8)
        .map(|_| {
            let coordinator = coordinator.clone();
            let sample = sample_at(&route, last);
            tokio::spawn(async move { coordinator.submit_location(sample).await })
        })
        .collect();
    for handle in burst {
        handle.await.unwrap().unwrap();
    }

    let (_, completed) = drain(&mut rx);
    assert_eq!(completed, 1);
    assert!(!coordinator.session().await.unwrap().snapshot.active);
}

#[tokio::test]
async fn test_deactivate_stops_tracking() {
    let (coordinator, route) = active_route(3, EndpointMode::Roundtrip).await;

    assert_eq!(coordinator.deactivate().await.unwrap(), Some(route.id()));
    assert_eq!(coordinator.deactivate().await.unwrap(), None);

    let outcome = coordinator.submit_location(sample_at(&route, 1)).await.unwrap();
    assert_eq!(outcome, SampleOutcome::Idle);
}

#[tokio::test]
async fn test_watch_locations_drives_the_session() {
    let (coordinator, route) = active_route(2, EndpointMode::Roundtrip).await;
    let mut rx = coordinator.subscribe();

    let samples: Vec<LocationSample> = route
        .stop_range()
        .chain(std::iter::once(0))
        .map(|i| sample_at(&route, i))
        .collect();
    let handle = coordinator.watch_locations(futures::stream::iter(samples), CancellationToken::new());

    tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .expect("stream should be consumed")
        .unwrap();

    assert_eq!(drain(&mut rx), (2, 1));
}

#[tokio::test]
async fn test_watch_locations_stops_on_cancel() {
    let (coordinator, _) = active_route(2, EndpointMode::Roundtrip).await;
    let cancel = CancellationToken::new();

    let handle = coordinator.watch_locations(futures::stream::pending(), cancel.clone());
    cancel.cancel();

    tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .expect("watcher should stop")
        .unwrap();
}

#[tokio::test]
async fn test_reactivating_a_completed_route_starts_fresh() {
    let (coordinator, route) = active_route(2, EndpointMode::LastStop).await;

    coordinator.submit_location(sample_at(&route, 1)).await.unwrap();
    let last = route.waypoints().len() - 1;
    let outcome = coordinator.submit_location(sample_at(&route, last)).await.unwrap();
    assert!(matches!(outcome, SampleOutcome::Evaluated { completed: true, .. }));

    coordinator.activate(route.id()).await.unwrap();
    // Let any completion bookkeeping for the first run drain through the actor
    tokio::task::yield_now().await;

    let status = coordinator.session().await.unwrap();
    assert!(status.snapshot.active);
    assert_eq!(status.snapshot.route_id, Some(route.id()));
    assert!(status.snapshot.visited_indices.is_empty());
    assert_eq!(status.route.map(|r| r.id()), Some(route.id()));
}
