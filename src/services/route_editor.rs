use crate::error::{AppError, Result};
use crate::models::{GeneratedRoute, Place, RouteLeg, Waypoint};
use crate::services::leg_service::LegDistanceService;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use uuid::Uuid;

/// Result of an edit
#[derive(Debug, Clone)]
pub enum EditOutcome {
    Updated(GeneratedRoute),
    /// Too few waypoints would remain for a meaningful route
    Collapsed,
}

#[derive(Default)]
struct History {
    /// Edited route id → id of the first route in its edit chain
    lineage: HashMap<Uuid, Uuid>,
    /// (lineage, index) → waypoints replaced at that index, oldest first
    replaced: HashMap<(Uuid, usize), Vec<Waypoint>>,
}

impl History {
    fn root(&self, route_id: Uuid) -> Uuid {
        self.lineage.get(&route_id).copied().unwrap_or(route_id)
    }

    fn link(&mut self, parent: Uuid, child: Uuid) {
        let root = self.root(parent);
        self.lineage.insert(child, root);
    }

    fn retain(&mut self, live: &[Uuid]) {
        let roots: HashSet<Uuid> = live.iter().map(|id| self.root(*id)).collect();
        self.lineage.retain(|id, _| live.contains(id));
        self.replaced.retain(|(root, _), _| roots.contains(root));
    }
}

/// Local edits on a generated route.
///
/// Only the legs touching the edited position are recomputed; every other
/// leg is carried over as-is. Start and final node are never editable.
pub struct RouteEditor {
    legs: Arc<LegDistanceService>,
    history: Mutex<History>,
}

impl RouteEditor {
    pub fn new(legs: Arc<LegDistanceService>) -> Self {
        RouteEditor {
            legs,
            history: Mutex::new(History::default()),
        }
    }

    fn check_editable(route: &GeneratedRoute, index: usize) -> Result<()> {
        let len = route.waypoints().len();
        if index == 0 || index + 1 >= len {
            return Err(AppError::InvalidEdit(format!(
                "Waypoint {} cannot be edited; editable positions are 1..={}",
                index,
                len.saturating_sub(2)
            )));
        }
        Ok(())
    }

    fn check_not_present(route: &GeneratedRoute, waypoint: &Waypoint, skip: Option<usize>) -> Result<()> {
        let duplicate = route
            .waypoints()
            .iter()
            .enumerate()
            .any(|(i, w)| Some(i) != skip && w == waypoint);
        if duplicate {
            return Err(AppError::InvalidEdit(format!(
                "'{}' is already part of the route",
                waypoint.name
            )));
        }
        Ok(())
    }

    pub async fn replace(
        &self,
        route: &GeneratedRoute,
        index: usize,
        waypoint: Waypoint,
    ) -> Result<GeneratedRoute> {
        Self::check_editable(route, index)?;
        Self::check_not_present(route, &waypoint, Some(index))?;

        let mut waypoints = route.waypoints().to_vec();
        let (before, after) = futures::try_join!(
            self.legs.leg(&waypoints[index - 1], &waypoint),
            self.legs.leg(&waypoint, &waypoints[index + 1]),
        )?;

        let previous = std::mem::replace(&mut waypoints[index], waypoint);
        let mut legs = route.legs().to_vec();
        legs[index - 1] = before;
        legs[index] = after;

        let edited = self.rebuild(route, waypoints, legs)?;

        if let Ok(mut history) = self.history.lock() {
            let root = history.root(route.id());
            history.replaced.entry((root, index)).or_default().push(previous);
        }

        tracing::info!(
            route_id = %edited.id(),
            index,
            "Replaced waypoint {} of route {}",
            index,
            route.id()
        );
        Ok(edited)
    }

    /// Insert before `index` (default: just before the final node)
    pub async fn insert(
        &self,
        route: &GeneratedRoute,
        waypoint: Waypoint,
        index: Option<usize>,
    ) -> Result<GeneratedRoute> {
        let len = route.waypoints().len();
        let index = index.unwrap_or(len - 1);
        if index == 0 || index >= len {
            return Err(AppError::InvalidEdit(format!(
                "Cannot insert at position {}; valid positions are 1..={}",
                index,
                len - 1
            )));
        }
        Self::check_not_present(route, &waypoint, None)?;

        let mut waypoints = route.waypoints().to_vec();
        let (before, after) = futures::try_join!(
            self.legs.leg(&waypoints[index - 1], &waypoint),
            self.legs.leg(&waypoint, &waypoints[index]),
        )?;

        waypoints.insert(index, waypoint);
        let mut legs: Vec<RouteLeg> = route.legs().to_vec();
        legs.splice(index - 1..index, [before, after]);

        let edited = self.rebuild(route, waypoints, legs)?;
        tracing::info!(
            route_id = %edited.id(),
            index,
            "Inserted waypoint at {} into route {}",
            index,
            route.id()
        );
        Ok(edited)
    }

    pub async fn delete(&self, route: &GeneratedRoute, index: usize) -> Result<EditOutcome> {
        Self::check_editable(route, index)?;

        if route.waypoints().len() <= 3 {
            tracing::info!(route_id = %route.id(), "Deleting waypoint {} collapses the route", index);
            return Ok(EditOutcome::Collapsed);
        }

        let mut waypoints = route.waypoints().to_vec();
        let bridge = self
            .legs
            .leg(&waypoints[index - 1], &waypoints[index + 1])
            .await?;

        waypoints.remove(index);
        let mut legs: Vec<RouteLeg> = route.legs().to_vec();
        legs.splice(index - 1..=index, [bridge]);

        let edited = self.rebuild(route, waypoints, legs)?;
        tracing::info!(
            route_id = %edited.id(),
            index,
            "Deleted waypoint {} from route {}",
            index,
            route.id()
        );
        Ok(EditOutcome::Updated(edited))
    }

    fn rebuild(
        &self,
        base: &GeneratedRoute,
        waypoints: Vec<Waypoint>,
        legs: Vec<RouteLeg>,
    ) -> Result<GeneratedRoute> {
        let edited = GeneratedRoute::assemble(
            waypoints,
            legs,
            base.endpoint_mode(),
            base.visit_time_per_stop_s(),
        )?;
        if let Ok(mut history) = self.history.lock() {
            history.link(base.id(), edited.id());
        }
        Ok(edited)
    }

    /// Forget edit history of every route not in `live`
    pub fn retain(&self, live: &[Uuid]) {
        if let Ok(mut history) = self.history.lock() {
            history.retain(live);
        }
    }

    /// Places previously replaced at `index` come first, most recent first;
    /// the rest keep their input order.
    pub fn rank_alternatives(&self, route_id: Uuid, index: usize, places: Vec<Place>) -> Vec<Place> {
        let previous: Vec<Waypoint> = match self.history.lock() {
            Ok(history) => history
                .replaced
                .get(&(history.root(route_id), index))
                .cloned()
                .unwrap_or_default(),
            Err(_) => Vec::new(),
        };

        let mut remaining = places;
        let mut ranked = Vec::with_capacity(remaining.len());

        for old in previous.iter().rev() {
            if let Some(pos) = remaining
                .iter()
                .position(|p| Waypoint::from_place(p) == *old)
            {
                ranked.push(remaining.remove(pos));
            }
        }
        ranked.extend(remaining);
        ranked
    }
}
