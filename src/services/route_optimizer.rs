use crate::constants::{DIRECTION_CHANGE_THRESHOLD_DEG, LEG_ENDPOINT_TOLERANCE_M, TWO_OPT_EPSILON_M};
use crate::error::{AppError, Result};
use crate::models::coordinates::heading_delta;
use crate::models::{Coordinates, EndpointMode, GeneratedRoute, Waypoint};
use crate::services::leg_service::{DistanceMatrix, LegDistanceService};
use std::sync::Arc;

/// Orders waypoints into a short walking route.
///
/// Nearest-neighbour over straight-line distance seeds the order, then a
/// best-improvement 2-opt over real walking distances refines it. The start
/// and the final node never move.
pub struct RouteOptimizer {
    legs: Arc<LegDistanceService>,
    max_two_opt_passes: usize,
    visit_time_per_stop_s: f64,
}

impl RouteOptimizer {
    pub fn new(legs: Arc<LegDistanceService>, max_two_opt_passes: usize, visit_time_per_stop_s: f64) -> Self {
        RouteOptimizer {
            legs,
            max_two_opt_passes,
            visit_time_per_stop_s,
        }
    }

    pub async fn optimize(
        &self,
        start: &Waypoint,
        candidates: &[Waypoint],
        endpoint_mode: EndpointMode,
        custom_endpoint: Option<&Waypoint>,
    ) -> Result<GeneratedRoute> {
        let custom_end = match (endpoint_mode, custom_endpoint) {
            (EndpointMode::Custom, Some(end)) => Some(end.clone()),
            (EndpointMode::Custom, None) => {
                return Err(AppError::InvalidRequest(
                    "Custom endpoint mode requires an endpoint".to_string(),
                ))
            }
            _ => None,
        };

        let mut usable = usable_candidates(start, candidates, custom_end.as_ref());
        if usable.is_empty() {
            return Err(AppError::InsufficientCandidates {
                found: 1,
                required: 2,
            });
        }

        let end = match endpoint_mode {
            EndpointMode::Roundtrip => start.clone(),
            EndpointMode::LastStop => {
                let idx = farthest_from(&start.coordinates, &usable);
                usable.remove(idx)
            }
            EndpointMode::Custom => custom_end.unwrap_or_else(|| start.clone()),
        };

        // Node 0 is the start, the last node the fixed end
        let mut nodes: Vec<Waypoint> = Vec::with_capacity(usable.len() + 2);
        nodes.push(start.clone());
        nodes.extend(usable);
        nodes.push(end);
        let last = nodes.len() - 1;
        let points: Vec<Coordinates> = nodes.iter().map(|w| w.coordinates).collect();

        let given: Vec<usize> = (0..=last).collect();
        let seed = nearest_neighbour_order(&points);

        let order = if last >= 3 {
            let matrix = self.legs.distance_matrix(&points).await?;
            // Prefer the given order on ties so re-optimizing a result is stable
            let seed = if score(&matrix, &points, &given) <= score(&matrix, &points, &seed) {
                given
            } else {
                seed
            };
            two_opt(seed, &matrix, &points, self.max_two_opt_passes)
        } else {
            seed
        };

        let ordered: Vec<Waypoint> = order.into_iter().map(|i| nodes[i].clone()).collect();
        let legs = self.legs.legs(&ordered).await?;
        let route = GeneratedRoute::assemble(ordered, legs, endpoint_mode, self.visit_time_per_stop_s)?;

        tracing::info!(
            route_id = %route.id(),
            waypoints = route.waypoints().len(),
            distance_m = %format!("{:.0}", route.totals().distance_m),
            "Optimized {} route over {} waypoints: {:.0}m",
            endpoint_mode,
            route.waypoints().len(),
            route.totals().distance_m
        );

        Ok(route)
    }
}

/// Candidates minus duplicates and anything sitting on the start or the
/// custom endpoint
fn usable_candidates(start: &Waypoint, candidates: &[Waypoint], end: Option<&Waypoint>) -> Vec<Waypoint> {
    let mut usable: Vec<Waypoint> = Vec::with_capacity(candidates.len());
    for candidate in candidates {
        let coincident = |w: &Waypoint| {
            w.coordinates
                .approx_eq(&candidate.coordinates, LEG_ENDPOINT_TOLERANCE_M)
        };
        if coincident(start) || end.map_or(false, coincident) || usable.contains(candidate) {
            continue;
        }
        usable.push(candidate.clone());
    }
    usable
}

fn farthest_from(origin: &Coordinates, waypoints: &[Waypoint]) -> usize {
    let mut best = 0;
    let mut best_distance = f64::NEG_INFINITY;
    for (idx, w) in waypoints.iter().enumerate() {
        let d = origin.distance_m(&w.coordinates);
        if d > best_distance {
            best = idx;
            best_distance = d;
        }
    }
    best
}

/// Greedy order over straight-line distance. First and last index stay put.
fn nearest_neighbour_order(points: &[Coordinates]) -> Vec<usize> {
    let last = points.len() - 1;
    let mut order = vec![0];
    let mut remaining: Vec<usize> = (1..last).collect();
    let mut current = 0;

    while !remaining.is_empty() {
        let mut best_pos = 0;
        let mut best_distance = f64::INFINITY;
        for (pos, &idx) in remaining.iter().enumerate() {
            let d = points[current].distance_m(&points[idx]);
            if d < best_distance {
                best_distance = d;
                best_pos = pos;
            }
        }
        current = remaining.remove(best_pos);
        order.push(current);
    }

    if last > 0 {
        order.push(last);
    }
    order
}

/// Heading changes sharper than the threshold along the path
pub fn direction_changes(points: &[Coordinates], order: &[usize]) -> usize {
    order
        .windows(3)
        .filter(|w| {
            let a = &points[w[0]];
            let b = &points[w[1]];
            let c = &points[w[2]];
            if a.approx_eq(b, LEG_ENDPOINT_TOLERANCE_M) || b.approx_eq(c, LEG_ENDPOINT_TOLERANCE_M) {
                return false;
            }
            heading_delta(a.bearing_to(b), b.bearing_to(c)) > DIRECTION_CHANGE_THRESHOLD_DEG
        })
        .count()
}

fn score(matrix: &DistanceMatrix, points: &[Coordinates], order: &[usize]) -> (f64, usize) {
    (matrix.path_length(order), direction_changes(points, order))
}

/// `a` beats `b` when strictly shorter, or equally long with fewer turns
fn improves(a: (f64, usize), b: (f64, usize)) -> bool {
    if a.0 < b.0 - TWO_OPT_EPSILON_M {
        return true;
    }
    (a.0 - b.0).abs() <= TWO_OPT_EPSILON_M && a.1 < b.1
}

/// Best-improvement 2-opt reversing interior segments `[i..=j]`.
/// Never returns an order worse than `order`.
pub fn two_opt(
    mut order: Vec<usize>,
    matrix: &DistanceMatrix,
    points: &[Coordinates],
    max_passes: usize,
) -> Vec<usize> {
    let n = order.len();
    if n < 4 {
        return order;
    }

    let mut current = score(matrix, points, &order);

    for pass in 0..max_passes {
        let mut best: Option<((f64, usize), usize, usize)> = None;

        for i in 1..(n - 2) {
            for j in (i + 1)..(n - 1) {
                let mut candidate = order.clone();
                candidate[i..=j].reverse();
                let candidate_score = score(matrix, points, &candidate);

                let reference = best.map(|(s, _, _)| s).unwrap_or(current);
                if improves(candidate_score, reference) {
                    best = Some((candidate_score, i, j));
                }
            }
        }

        match best {
            Some((new_score, i, j)) => {
                order[i..=j].reverse();
                current = new_score;
            }
            None => {
                tracing::debug!(passes = pass, "2-opt converged after {} passes", pass);
                return order;
            }
        }
    }

    tracing::debug!(
        max_passes,
        "2-opt stopped at the pass cap ({}), keeping current order",
        max_passes
    );
    order
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grid_point(x_m: f64, y_m: f64) -> Coordinates {
        // ~111km per degree latitude; longitude scaled at 52°N
        Coordinates::new(52.0 + y_m / 111_195.0, 13.0 + x_m / 68_460.0).unwrap()
    }

    fn geodesic(points: &[Coordinates]) -> DistanceMatrix {
        DistanceMatrix::from_fn(points.len(), |i, j| points[i].distance_m(&points[j]))
    }

    #[test]
    fn test_nearest_neighbour_keeps_ends() {
        let points = vec![
            grid_point(0.0, 0.0),
            grid_point(300.0, 0.0),
            grid_point(100.0, 0.0),
            grid_point(200.0, 0.0),
            grid_point(0.0, 0.0),
        ];
        assert_eq!(nearest_neighbour_order(&points), vec![0, 2, 3, 1, 4]);
    }

    #[test]
    fn test_two_opt_untangles_crossing() {
        // Square walked corner to corner crosses itself
        let points = vec![
            grid_point(0.0, 0.0),
            grid_point(0.0, 500.0),
            grid_point(500.0, 0.0),
            grid_point(500.0, 500.0),
            grid_point(1000.0, 500.0),
        ];
        let matrix = geodesic(&points);
        let crossed = vec![0, 3, 1, 2, 4];
        let before = matrix.path_length(&crossed);

        let improved = two_opt(crossed, &matrix, &points, 100);

        assert_eq!(improved[0], 0);
        assert_eq!(*improved.last().unwrap(), 4);
        assert!(matrix.path_length(&improved) < before);
    }

    #[test]
    fn test_two_opt_is_idempotent() {
        let points: Vec<Coordinates> = [
            (0.0, 0.0),
            (400.0, 300.0),
            (100.0, 600.0),
            (700.0, 100.0),
            (300.0, 200.0),
            (0.0, 0.0),
        ]
        .iter()
        .map(|(x, y)| grid_point(*x, *y))
        .collect();
        let matrix = geodesic(&points);

        let once = two_opt(nearest_neighbour_order(&points), &matrix, &points, 100);
        let twice = two_opt(once.clone(), &matrix, &points, 100);
        assert_eq!(once, twice);
    }

    #[test]
    fn test_tie_prefers_fewer_turns() {
        // Identical lengths everywhere: only turns decide
        let points = vec![
            grid_point(0.0, 0.0),
            grid_point(200.0, 0.0),
            grid_point(100.0, 0.0),
            grid_point(300.0, 0.0),
            grid_point(400.0, 0.0),
        ];
        let matrix = DistanceMatrix::from_fn(points.len(), |_, _| 100.0);
        let zigzag = vec![0, 1, 2, 3, 4];
        assert!(direction_changes(&points, &zigzag) > 0);

        let straightened = two_opt(zigzag, &matrix, &points, 100);
        assert_eq!(straightened, vec![0, 2, 1, 3, 4]);
        assert_eq!(direction_changes(&points, &straightened), 0);
    }

    #[test]
    fn test_pass_cap_returns_no_worse_order() {
        let points: Vec<Coordinates> = (0..8)
            .map(|i| grid_point(((i * 37) % 8) as f64 * 100.0, ((i * 53) % 8) as f64 * 100.0))
            .collect();
        let matrix = geodesic(&points);
        let seed: Vec<usize> = (0..8).collect();
        let before = matrix.path_length(&seed);

        let capped = two_opt(seed, &matrix, &points, 1);
        assert!(matrix.path_length(&capped) <= before);
    }

    #[test]
    fn test_usable_candidates_filtering() {
        let start = Waypoint::point("Start", grid_point(0.0, 0.0));
        let a = Waypoint::point("A", grid_point(100.0, 0.0));
        let on_start = Waypoint::point("Here", grid_point(1.0, 0.0));
        let usable = usable_candidates(&start, &[a.clone(), on_start, a.clone()], None);
        assert_eq!(usable, vec![a]);
    }
}
