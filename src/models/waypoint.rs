use crate::constants::WAYPOINT_EQUALITY_TOLERANCE_M;
use crate::models::{Coordinates, Place, PlaceCategory};
use serde::{Deserialize, Serialize};

/// A place promoted into a route's ordered stop sequence.
///
/// Equality uses `place_id` when both sides carry one; otherwise two
/// waypoints are equal when they share a name and sit within
/// [`WAYPOINT_EQUALITY_TOLERANCE_M`] of each other.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Waypoint {
    pub name: String,
    pub coordinates: Coordinates,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<PlaceCategory>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub place_id: Option<String>,
}

impl Waypoint {
    /// A free-standing point such as the user's start or a custom endpoint
    pub fn point(name: impl Into<String>, coordinates: Coordinates) -> Self {
        Waypoint {
            name: name.into(),
            coordinates,
            category: None,
            address: None,
            place_id: None,
        }
    }

    pub fn from_place(place: &Place) -> Self {
        Waypoint {
            name: place.name.clone(),
            coordinates: place.coordinates,
            category: Some(place.category),
            address: place.metadata.address.clone(),
            place_id: Some(place.id.clone()),
        }
    }

    /// Stable identifier used for visited-set membership
    pub fn key(&self) -> String {
        match &self.place_id {
            Some(id) => id.clone(),
            None => format!("{}@{}", self.name, self.coordinates.key_fragment(5)),
        }
    }
}

impl PartialEq for Waypoint {
    fn eq(&self, other: &Self) -> bool {
        match (&self.place_id, &other.place_id) {
            (Some(a), Some(b)) => a == b,
            _ => {
                self.name == other.name
                    && self
                        .coordinates
                        .approx_eq(&other.coordinates, WAYPOINT_EQUALITY_TOLERANCE_M)
            }
        }
    }
}
