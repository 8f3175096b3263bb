use crate::models::Coordinates;
use serde::{Deserialize, Serialize};

/// One fix from the location provider.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct LocationSample {
    pub coordinates: Coordinates,
    /// Unix epoch milliseconds
    pub timestamp_ms: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub accuracy_m: Option<f64>,
}

impl LocationSample {
    pub fn new(coordinates: Coordinates, timestamp_ms: i64) -> Self {
        LocationSample {
            coordinates,
            timestamp_ms,
            accuracy_m: None,
        }
    }
}
