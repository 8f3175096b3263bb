use crate::cache::{place_query_cache_key, CacheManager, CacheNamespace};
use crate::config::TourConfig;
use crate::error::{AppError, Result};
use crate::models::{Coordinates, Place, PlaceCategory, Waypoint};
use crate::services::providers::{PlaceProvider, PlaceQuery};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct DiscoveryQuery {
    pub origin: Coordinates,
    pub radius_m: f64,
    /// Empty means any category
    pub categories: Vec<PlaceCategory>,
    pub count: usize,
}

#[derive(Debug, Clone)]
pub struct DiscoverySettings {
    pub pool_multiplier: usize,
    pub min_spacing_m: Option<f64>,
    pub dedupe_radius_m: f64,
    pub provider_timeout: Duration,
    pub category_weights: HashMap<PlaceCategory, f32>,
}

impl From<&TourConfig> for DiscoverySettings {
    fn from(config: &TourConfig) -> Self {
        let category_weights = PlaceCategory::ALL
            .iter()
            .map(|c| (*c, config.category_weight(*c)))
            .collect();

        DiscoverySettings {
            pool_multiplier: config.pool_multiplier(),
            min_spacing_m: config.min_spacing_m,
            dedupe_radius_m: config.dedupe_radius_m,
            provider_timeout: config.provider_timeout(),
            category_weights,
        }
    }
}

impl DiscoverySettings {
    fn weight(&self, category: PlaceCategory) -> f32 {
        self.category_weights
            .get(&category)
            .copied()
            .unwrap_or_else(|| category.importance())
    }
}

/// Finds and selects candidate places around a point.
pub struct PlaceDiscovery {
    provider: Arc<dyn PlaceProvider>,
    cache: Arc<CacheManager>,
    settings: DiscoverySettings,
}

impl PlaceDiscovery {
    pub fn new(
        provider: Arc<dyn PlaceProvider>,
        cache: Arc<CacheManager>,
        settings: DiscoverySettings,
    ) -> Self {
        PlaceDiscovery {
            provider,
            cache,
            settings,
        }
    }

    /// Up to `count` well-spaced, category-balanced places. A short pool
    /// yields a short result rather than an error.
    pub async fn discover(&self, query: &DiscoveryQuery) -> Result<Vec<Place>> {
        if query.count == 0 {
            return Ok(Vec::new());
        }

        let limit = query.count * self.settings.pool_multiplier;
        let pool = self
            .fetch_pool(&query.origin, query.radius_m, &query.categories, limit)
            .await?;
        let pool_size = pool.len();

        let selected = select_places(pool, query, &self.settings);

        tracing::info!(
            pool = pool_size,
            requested = query.count,
            selected = selected.len(),
            "Discovery selected {}/{} places from a pool of {}",
            selected.len(),
            query.count,
            pool_size
        );
        Ok(selected)
    }

    /// Replacement candidates near an existing waypoint, excluding places
    /// already on the route. Ranked by quality then proximity.
    pub async fn alternatives(
        &self,
        near: &Coordinates,
        radius_m: f64,
        categories: &[PlaceCategory],
        exclude: &[Waypoint],
        count: usize,
    ) -> Result<Vec<Place>> {
        if count == 0 {
            return Ok(Vec::new());
        }

        let limit = count * self.settings.pool_multiplier;
        let pool = self.fetch_pool(near, radius_m, categories, limit).await?;

        let mut candidates: Vec<Place> = dedupe(pool, self.settings.dedupe_radius_m)
            .into_iter()
            .filter(|p| categories.is_empty() || categories.contains(&p.category))
            .filter(|p| !exclude.iter().any(|w| is_same_place(w, p)))
            .filter(|p| p.coordinates.distance_m(near) > self.settings.dedupe_radius_m)
            .collect();

        sort_by_score(&mut candidates, near);
        candidates.truncate(count);
        Ok(candidates)
    }

    /// Raw provider pool, served from the place-query cache when possible
    async fn fetch_pool(
        &self,
        origin: &Coordinates,
        radius_m: f64,
        categories: &[PlaceCategory],
        limit: usize,
    ) -> Result<Vec<Place>> {
        let key = place_query_cache_key(origin, radius_m, categories);

        if let Some(cached) = self
            .cache
            .get_json::<CachedPool>(CacheNamespace::PlaceQuery, &key)
            .await
        {
            if cached.covers(limit) {
                tracing::debug!("Place pool cache hit: {} places", cached.places.len());
                return Ok(cached.places);
            }
            tracing::debug!(
                cached_limit = cached.limit,
                limit,
                "Cached place pool was cut at a smaller limit, querying again"
            );
        }

        let query = PlaceQuery {
            origin: *origin,
            radius_m,
            categories: categories.to_vec(),
            limit,
        };

        tracing::debug!(
            provider = self.provider.name(),
            limit,
            "Querying {} for up to {} places within {:.0}m",
            self.provider.name(),
            limit,
            radius_m
        );

        let pool = tokio::time::timeout(self.settings.provider_timeout, self.provider.search(&query))
            .await
            .map_err(|_| {
                AppError::Timeout(format!(
                    "{} did not answer within {}s",
                    self.provider.name(),
                    self.settings.provider_timeout.as_secs()
                ))
            })??;

        let cached = CachedPool { limit, places: pool };
        self.cache
            .put_json(CacheNamespace::PlaceQuery, &key, &cached)
            .await;
        Ok(cached.places)
    }
}

/// A provider answer together with the limit it was asked for.
#[derive(Debug, Serialize, Deserialize)]
struct CachedPool {
    limit: usize,
    places: Vec<Place>,
}

impl CachedPool {
    /// A pool serves any limit up to the one it was fetched with, and any
    /// limit at all once the provider ran out of places below it.
    fn covers(&self, limit: usize) -> bool {
        limit <= self.limit || self.places.len() < self.limit
    }
}

fn is_same_place(waypoint: &Waypoint, place: &Place) -> bool {
    match &waypoint.place_id {
        Some(id) => *id == place.id,
        None => *waypoint == Waypoint::from_place(place),
    }
}

/// Drop repeated ids, then same-name places within `radius_m` of a kept one.
/// The first occurrence wins.
fn dedupe(pool: Vec<Place>, radius_m: f64) -> Vec<Place> {
    let mut seen_ids = HashSet::new();
    let mut kept: Vec<Place> = Vec::with_capacity(pool.len());

    for place in pool {
        if !seen_ids.insert(place.id.clone()) {
            continue;
        }
        let name = place.normalized_name();
        let duplicate = kept.iter().any(|k| {
            k.normalized_name() == name && k.coordinates.distance_m(&place.coordinates) <= radius_m
        });
        if !duplicate {
            kept.push(place);
        }
    }
    kept
}

/// Quality descending; ties by distance to `origin`, then id
fn sort_by_score(places: &mut [Place], origin: &Coordinates) {
    places.sort_by(|a, b| {
        b.quality_score()
            .partial_cmp(&a.quality_score())
            .unwrap_or(Ordering::Equal)
            .then_with(|| {
                a.coordinates
                    .distance_m(origin)
                    .partial_cmp(&b.coordinates.distance_m(origin))
                    .unwrap_or(Ordering::Equal)
            })
            .then_with(|| a.id.cmp(&b.id))
    });
}

/// Per-category caps: `ceil(count × share)` with shares being the weights
/// normalised over the categories in play.
fn category_quotas(
    categories: &[PlaceCategory],
    count: usize,
    settings: &DiscoverySettings,
) -> HashMap<PlaceCategory, usize> {
    let total: f32 = categories.iter().map(|c| settings.weight(*c)).sum();
    if total <= 0.0 {
        return categories.iter().map(|c| (*c, count)).collect();
    }

    categories
        .iter()
        .map(|c| {
            let share = settings.weight(*c) / total;
            (*c, (count as f32 * share).ceil() as usize)
        })
        .collect()
}

/// Deterministic selection from a raw provider pool.
pub fn select_places(
    pool: Vec<Place>,
    query: &DiscoveryQuery,
    settings: &DiscoverySettings,
) -> Vec<Place> {
    let mut candidates: Vec<Place> = dedupe(pool, settings.dedupe_radius_m)
        .into_iter()
        .filter(|p| query.categories.is_empty() || query.categories.contains(&p.category))
        .filter(|p| p.coordinates.distance_m(&query.origin) > settings.dedupe_radius_m)
        .collect();

    sort_by_score(&mut candidates, &query.origin);

    let categories_in_play: Vec<PlaceCategory> = if query.categories.is_empty() {
        let mut present: Vec<PlaceCategory> = candidates.iter().map(|p| p.category).collect();
        present.sort();
        present.dedup();
        present
    } else {
        query.categories.clone()
    };
    let quotas = category_quotas(&categories_in_play, query.count, settings);

    let spaced = |selected: &[Place], place: &Place| match settings.min_spacing_m {
        Some(min) => selected
            .iter()
            .all(|s| s.coordinates.distance_m(&place.coordinates) >= min),
        None => true,
    };

    let mut selected: Vec<Place> = Vec::with_capacity(query.count);
    let mut taken = vec![false; candidates.len()];
    let mut per_category: HashMap<PlaceCategory, usize> = HashMap::new();

    // First pass honours quotas and spacing
    for (idx, place) in candidates.iter().enumerate() {
        if selected.len() >= query.count {
            break;
        }
        let used = per_category.get(&place.category).copied().unwrap_or(0);
        let quota = quotas.get(&place.category).copied().unwrap_or(0);
        if used >= quota || !spaced(&selected, place) {
            continue;
        }
        *per_category.entry(place.category).or_insert(0) += 1;
        taken[idx] = true;
        selected.push(place.clone());
    }

    // Second pass fills what the quotas left open
    for (idx, place) in candidates.iter().enumerate() {
        if selected.len() >= query.count {
            break;
        }
        if taken[idx] || !spaced(&selected, place) {
            continue;
        }
        taken[idx] = true;
        selected.push(place.clone());
    }

    selected
}

#[cfg(test)]
mod tests {
    use super::*;

    fn origin() -> Coordinates {
        Coordinates::new(48.8566, 2.3522).unwrap()
    }

    #[test]
    fn test_cached_pool_coverage() {
        let full = CachedPool {
            limit: 2,
            places: vec![
                place_at("a", "A", PlaceCategory::Museum, 0.0),
                place_at("b", "B", PlaceCategory::Park, 500.0),
            ],
        };
        assert!(full.covers(1));
        assert!(full.covers(2));
        assert!(!full.covers(3), "a pool cut at its limit may hide more places");

        let exhausted = CachedPool {
            limit: 10,
            places: full.places,
        };
        assert!(exhausted.covers(50));
    }

    /// Place `north_m` meters north of the origin
    fn place_at(id: &str, name: &str, category: PlaceCategory, north_m: f64) -> Place {
        let lat = 48.8566 + north_m / 111_195.0;
        Place::new(id, name, category, Coordinates::new(lat, 2.3522).unwrap())
    }

    fn settings(min_spacing_m: Option<f64>) -> DiscoverySettings {
        DiscoverySettings {
            min_spacing_m,
            ..DiscoverySettings::from(&TourConfig::default())
        }
    }

    fn query(count: usize, categories: Vec<PlaceCategory>) -> DiscoveryQuery {
        DiscoveryQuery {
            origin: origin(),
            radius_m: 2000.0,
            categories,
            count,
        }
    }

    #[test]
    fn test_short_pool_returns_what_exists() {
        let pool: Vec<Place> = (0..6)
            .map(|i| {
                place_at(
                    &format!("p{}", i),
                    &format!("Place {}", i),
                    PlaceCategory::Museum,
                    200.0 * (i + 1) as f64,
                )
            })
            .collect();

        let selected = select_places(pool, &query(10, vec![]), &settings(Some(100.0)));
        assert_eq!(selected.len(), 6);

        let none = select_places(vec![], &query(10, vec![]), &settings(Some(100.0)));
        assert!(none.is_empty());
    }

    #[test]
    fn test_spacing_is_honoured() {
        let pool = vec![
            place_at("a", "A", PlaceCategory::Museum, 200.0),
            place_at("b", "B", PlaceCategory::Museum, 250.0),
            place_at("c", "C", PlaceCategory::Museum, 400.0),
        ];

        let selected = select_places(pool.clone(), &query(3, vec![]), &settings(Some(100.0)));
        assert_eq!(selected.len(), 2);
        for (i, a) in selected.iter().enumerate() {
            for b in &selected[i + 1..] {
                assert!(a.coordinates.distance_m(&b.coordinates) >= 100.0);
            }
        }

        let unspaced = select_places(pool, &query(3, vec![]), &settings(None));
        assert_eq!(unspaced.len(), 3);
    }

    #[test]
    fn test_duplicates_and_origin_are_dropped() {
        let pool = vec![
            place_at("a", "Old Church", PlaceCategory::Church, 300.0),
            place_at("a", "Old Church", PlaceCategory::Church, 300.0),
            place_at("b", "old  church", PlaceCategory::Church, 305.0),
            place_at("c", "At the start", PlaceCategory::Church, 5.0),
            place_at("d", "Elsewhere", PlaceCategory::Church, 600.0),
        ];

        let selected = select_places(pool, &query(5, vec![]), &settings(Some(100.0)));
        let ids: Vec<&str> = selected.iter().map(|p| p.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "d"]);
    }

    #[test]
    fn test_category_filter_and_quotas() {
        let mut pool = Vec::new();
        for i in 0..5 {
            pool.push(place_at(
                &format!("m{}", i),
                &format!("Museum {}", i),
                PlaceCategory::Museum,
                150.0 * (i + 1) as f64,
            ));
        }
        pool.push(place_at("p0", "Park", PlaceCategory::Park, 1_000.0));
        pool.push(place_at("c0", "Cafe", PlaceCategory::Cafe, 1_200.0));

        let mut s = settings(None);
        s.category_weights.insert(PlaceCategory::Museum, 0.5);
        s.category_weights.insert(PlaceCategory::Park, 0.5);

        let selected = select_places(
            pool,
            &query(4, vec![PlaceCategory::Museum, PlaceCategory::Park]),
            &s,
        );

        assert_eq!(selected.len(), 4);
        assert!(selected.iter().all(|p| p.category != PlaceCategory::Cafe));
        assert!(selected.iter().any(|p| p.category == PlaceCategory::Park));
    }

    #[test]
    fn test_selection_is_deterministic() {
        let pool: Vec<Place> = (0..8)
            .map(|i| {
                place_at(
                    &format!("id{}", 7 - i),
                    &format!("Spot {}", i),
                    PlaceCategory::Viewpoint,
                    150.0 * (i + 1) as f64,
                )
            })
            .collect();

        let first = select_places(pool.clone(), &query(4, vec![]), &settings(Some(100.0)));
        let second = select_places(pool, &query(4, vec![]), &settings(Some(100.0)));
        assert_eq!(first, second);
        // Equal scores: nearest first
        assert_eq!(first[0].name, "Spot 0");
    }

    #[test]
    fn test_quota_math() {
        let s = settings(None);
        let quotas = category_quotas(&[PlaceCategory::Attraction], 5, &s);
        assert_eq!(quotas[&PlaceCategory::Attraction], 5);

        let mut s = settings(None);
        s.category_weights.insert(PlaceCategory::Park, 1.0);
        s.category_weights.insert(PlaceCategory::Cafe, 3.0);
        let quotas = category_quotas(&[PlaceCategory::Park, PlaceCategory::Cafe], 4, &s);
        assert_eq!(quotas[&PlaceCategory::Park], 1);
        assert_eq!(quotas[&PlaceCategory::Cafe], 3);
    }
}
