use axum::Router;
use citywalk::cache::CacheManager;
use citywalk::config::Config;
use citywalk::coordinator::{Coordinator, Services};
use citywalk::services::mapbox::MapboxClient;
use citywalk::services::overpass::OverpassClient;
use citywalk::services::providers::{PlaceProvider, RoutingEngine};
use citywalk::AppState;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "citywalk=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = Config::from_env().map_err(|e| format!("Failed to load configuration: {}", e))?;

    tracing::info!("Starting citywalk API server");
    tracing::info!("Configuration loaded successfully");

    let shutdown = CancellationToken::new();

    // Two-tier cache; degrades to memory-only if the persisted tier is unusable
    let cache = Arc::new(CacheManager::open(&config.cache).await);
    let _maintenance = cache.clone().spawn_maintenance(
        Duration::from_secs(config.cache.maintenance_interval_secs),
        shutdown.child_token(),
    );

    // Initialize providers
    let places: Arc<dyn PlaceProvider> =
        Arc::new(OverpassClient::with_endpoints(config.overpass_endpoints.clone()));
    let routing: Arc<dyn RoutingEngine> = if let Some(ref base_url) = config.mapbox_base_url {
        Arc::new(MapboxClient::proxied(
            config.mapbox_api_key.clone(),
            base_url.clone(),
        ))
    } else {
        Arc::new(MapboxClient::new(config.mapbox_api_key.clone()))
    };

    let services = Services::new(Arc::new(config.tour.clone()), places, routing, cache.clone());
    let coordinator = Coordinator::spawn(services, shutdown.child_token());

    // Create application state
    let state = Arc::new(AppState { coordinator, cache });

    // Build router with CORS and tracing
    let app = Router::new()
        .nest("/api/v1", citywalk::routes::create_router(state))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http());

    // Start server
    let addr = config.server_address();
    tracing::info!("Server listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    let signal = shutdown.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("Shutdown requested");
            signal.cancel();
        })
        .await?;

    Ok(())
}
