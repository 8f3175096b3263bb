// Library exports for testing and reusability

pub mod cache;
pub mod config;
pub mod constants;
pub mod coordinator;
pub mod error;
pub mod models;
pub mod routes;
pub mod services;

// Re-export commonly used types
pub use error::{AppError, Result};

use cache::CacheManager;
use coordinator::Coordinator;
use std::sync::Arc;

// App state for sharing across the application
pub struct AppState {
    pub coordinator: Coordinator,
    pub cache: Arc<CacheManager>,
}
