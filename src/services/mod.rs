pub mod leg_service;
pub mod mapbox;
pub mod overpass;
pub mod place_discovery;
pub mod providers;
pub mod proximity;
pub mod route_editor;
pub mod route_optimizer;
pub mod route_validator;
pub mod tour_planner;
