use crate::constants::{QUALITY_CONTACT_BONUS, QUALITY_DESCRIPTION_BONUS, QUALITY_HOURS_BONUS};
use crate::models::Coordinates;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum PlaceCategory {
    // Sightseeing
    Attraction,
    Museum,
    Monument,
    Historic,
    Castle,
    Church,
    Viewpoint,

    // Natural/Scenic
    Park,
    NatureReserve,
    Waterfront,

    // Urban Interest
    Plaza,
    Fountain,
    Artwork,
    Theatre,
    Library,
    Market,

    // Food & Shopping
    Cafe,
    Restaurant,
    Shopping,
}

impl PlaceCategory {
    pub const ALL: [PlaceCategory; 19] = [
        PlaceCategory::Attraction,
        PlaceCategory::Museum,
        PlaceCategory::Monument,
        PlaceCategory::Historic,
        PlaceCategory::Castle,
        PlaceCategory::Church,
        PlaceCategory::Viewpoint,
        PlaceCategory::Park,
        PlaceCategory::NatureReserve,
        PlaceCategory::Waterfront,
        PlaceCategory::Plaza,
        PlaceCategory::Fountain,
        PlaceCategory::Artwork,
        PlaceCategory::Theatre,
        PlaceCategory::Library,
        PlaceCategory::Market,
        PlaceCategory::Cafe,
        PlaceCategory::Restaurant,
        PlaceCategory::Shopping,
    ];

    /// Relative importance for a sightseeing tour, 0.0-1.0.
    /// Doubles as the default target share when balancing categories.
    pub fn importance(&self) -> f32 {
        match self {
            PlaceCategory::Attraction => 1.0,
            PlaceCategory::Museum | PlaceCategory::Monument | PlaceCategory::Castle => 0.8,
            PlaceCategory::Historic | PlaceCategory::Viewpoint => 0.7,
            PlaceCategory::Church | PlaceCategory::Park | PlaceCategory::NatureReserve => 0.6,
            PlaceCategory::Waterfront | PlaceCategory::Plaza | PlaceCategory::Theatre => 0.5,
            PlaceCategory::Fountain | PlaceCategory::Artwork | PlaceCategory::Market => 0.4,
            PlaceCategory::Library => 0.3,
            PlaceCategory::Cafe | PlaceCategory::Restaurant => 0.25,
            PlaceCategory::Shopping => 0.2,
        }
    }
}

impl fmt::Display for PlaceCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PlaceCategory::Attraction => "attraction",
            PlaceCategory::Museum => "museum",
            PlaceCategory::Monument => "monument",
            PlaceCategory::Historic => "historic",
            PlaceCategory::Castle => "castle",
            PlaceCategory::Church => "church",
            PlaceCategory::Viewpoint => "viewpoint",
            PlaceCategory::Park => "park",
            PlaceCategory::NatureReserve => "nature_reserve",
            PlaceCategory::Waterfront => "waterfront",
            PlaceCategory::Plaza => "plaza",
            PlaceCategory::Fountain => "fountain",
            PlaceCategory::Artwork => "artwork",
            PlaceCategory::Theatre => "theatre",
            PlaceCategory::Library => "library",
            PlaceCategory::Market => "market",
            PlaceCategory::Cafe => "cafe",
            PlaceCategory::Restaurant => "restaurant",
            PlaceCategory::Shopping => "shopping",
        };
        write!(f, "{}", s)
    }
}

impl FromStr for PlaceCategory {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_lowercase();
        PlaceCategory::ALL
            .iter()
            .find(|c| c.to_string() == normalized)
            .copied()
            .ok_or_else(|| format!("Invalid place category: {}", s))
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Accessibility {
    Yes,
    Limited,
    No,
}

/// Optional details a provider may know about a place
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct PlaceMetadata {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub opening_hours: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub website: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub wheelchair: Option<Accessibility>,
}

impl PlaceMetadata {
    pub fn has_contact(&self) -> bool {
        self.phone.is_some() || self.email.is_some() || self.website.is_some()
    }
}

/// A candidate point of interest as returned by the place provider.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Place {
    /// Provider-stable identifier, e.g. `osm:node/123`
    pub id: String,
    pub name: String,
    pub coordinates: Coordinates,
    pub category: PlaceCategory,
    #[serde(default)]
    pub metadata: PlaceMetadata,
}

impl Place {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        category: PlaceCategory,
        coordinates: Coordinates,
    ) -> Self {
        Place {
            id: id.into(),
            name: name.into(),
            coordinates,
            category,
            metadata: PlaceMetadata::default(),
        }
    }

    pub fn with_metadata(mut self, metadata: PlaceMetadata) -> Self {
        self.metadata = metadata;
        self
    }

    /// Heuristic used to rank candidates: category importance plus small
    /// bonuses for places that are well documented.
    pub fn quality_score(&self) -> f32 {
        let mut score = self.category.importance();
        if self.metadata.has_contact() {
            score += QUALITY_CONTACT_BONUS;
        }
        if self.metadata.description.is_some() {
            score += QUALITY_DESCRIPTION_BONUS;
        }
        if self.metadata.opening_hours.is_some() {
            score += QUALITY_HOURS_BONUS;
        }
        score
    }

    /// Lowercased, whitespace-collapsed name used for duplicate detection
    pub fn normalized_name(&self) -> String {
        self.name
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ")
            .to_lowercase()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn place(category: PlaceCategory) -> Place {
        Place::new(
            "osm:node/1",
            "Brandenburger Tor",
            category,
            Coordinates::new(52.5163, 13.3777).unwrap(),
        )
    }

    #[test]
    fn test_place_category_parsing() {
        assert_eq!(
            "attraction".parse::<PlaceCategory>().unwrap(),
            PlaceCategory::Attraction
        );
        assert_eq!(
            "NATURE_RESERVE".parse::<PlaceCategory>().unwrap(),
            PlaceCategory::NatureReserve
        );
        assert!("invalid".parse::<PlaceCategory>().is_err());
    }

    #[test]
    fn test_category_serde_matches_display() {
        for category in PlaceCategory::ALL {
            let json = serde_json::to_string(&category).unwrap();
            assert_eq!(json, format!("\"{}\"", category));
        }
    }

    #[test]
    fn test_attractions_outrank_shopping() {
        assert!(PlaceCategory::Attraction.importance() > PlaceCategory::Shopping.importance());
    }

    #[test]
    fn test_quality_score_bonuses() {
        let bare = place(PlaceCategory::Monument);
        let documented = place(PlaceCategory::Monument).with_metadata(PlaceMetadata {
            description: Some("Neoclassical gate".to_string()),
            website: Some("https://example.org".to_string()),
            ..Default::default()
        });

        assert!((bare.quality_score() - 0.8).abs() < 1e-6);
        assert!(
            (documented.quality_score() - (0.8 + QUALITY_CONTACT_BONUS + QUALITY_DESCRIPTION_BONUS))
                .abs()
                < 1e-6
        );
    }

    #[test]
    fn test_normalized_name() {
        let mut p = place(PlaceCategory::Attraction);
        p.name = "  Brandenburger   TOR ".to_string();
        assert_eq!(p.normalized_name(), "brandenburger tor");
    }
}
