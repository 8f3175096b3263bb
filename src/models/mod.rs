pub mod coordinates;
pub mod location;
pub mod place;
pub mod route;
pub mod waypoint;

pub use coordinates::Coordinates;
pub use location::LocationSample;
pub use place::{Accessibility, Place, PlaceCategory, PlaceMetadata};
pub use route::{
    EndpointMode, ExperienceLimit, GeneratedRoute, PlanRequest, RouteConstraints, RouteLeg,
    RouteTotals,
};
pub use waypoint::Waypoint;
