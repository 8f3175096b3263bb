use crate::error::Result;
use crate::models::{Coordinates, Place, PlaceCategory, RouteLeg};
use async_trait::async_trait;
use serde::Serialize;

/// One bounded search against a place provider
#[derive(Debug, Clone, Serialize)]
pub struct PlaceQuery {
    pub origin: Coordinates,
    pub radius_m: f64,
    /// Empty means any category
    pub categories: Vec<PlaceCategory>,
    pub limit: usize,
}

/// Source of candidate places (Overpass in production, fakes in tests).
#[async_trait]
pub trait PlaceProvider: Send + Sync {
    async fn search(&self, query: &PlaceQuery) -> Result<Vec<Place>>;

    fn name(&self) -> &'static str;
}

/// Walking directions between two points.
///
/// `Ok(None)` means the engine answered but knows no walkable path; that is
/// distinct from a transport failure, which is an `Err`.
#[async_trait]
pub trait RoutingEngine: Send + Sync {
    async fn walking_leg(&self, from: &Coordinates, to: &Coordinates) -> Result<Option<RouteLeg>>;

    fn name(&self) -> &'static str;
}
