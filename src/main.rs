// Mars Telemetry API v0.1
use axum::http::{HeaderName, Method};
use axum::routing::{get, post};
use axum::Router;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

mod config;
mod errors;
mod helpers;
mod models;
mod routes;
mod services;

use config::AppConfig;
use routes::telemetry::AppState;
use services::fetcher::Fetcher;
use services::insight::InsightClient;
use services::poller::start_poller;

/// Mars Telemetry API — OpenAPI specification.
#[derive(OpenApi)]
#[openapi(
    info(
        title = "Mars Telemetry API",
        version = "0.1.0",
        description = "Mission telemetry dashboard backend. Polls the NASA InSight \
            weather feed, fills in missing readings with documented defaults, keeps a \
            rolling per-sol history and serves overview, weather and subsystem-health \
            projections from memory.",
        license(name = "MIT"),
    ),
    tags(
        (name = "Health", description = "Service health check"),
        (name = "Telemetry", description = "Dashboard projections over cached telemetry"),
        (name = "Poller", description = "Background telemetry poller status and control"),
    ),
    paths(
        routes::health::health_check,
        routes::telemetry::get_overview,
        routes::telemetry::get_weather,
        routes::telemetry::get_systems,
        routes::poller::get_poller_status,
        routes::poller::trigger_refresh,
    ),
    components(
        schemas(
            routes::health::HealthResponse,
            routes::telemetry::DataStatus,
            routes::telemetry::OverviewResponse,
            routes::telemetry::WeatherResponse,
            routes::telemetry::SystemsResponse,
            models::CalibratedSolRecord,
            models::TemperatureReadings,
            models::RangeReadings,
            services::projections::OverviewProjection,
            services::projections::OverviewSummary,
            services::projections::TrendPoint,
            services::projections::WeatherProjection,
            services::projections::SystemsProjection,
            services::projections::BatteryPoint,
            services::metrics::DerivedSystemMetrics,
            services::metrics::PowerMetrics,
            services::metrics::SubsystemHealth,
            services::metrics::HealthStatus,
            services::poller::PollerState,
            services::poller::CyclePhase,
            errors::ErrorResponse,
        )
    )
)]
struct ApiDoc;

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "mars_telemetry_api=debug,tower_http=debug".into());

    // LOG_FORMAT=json for log shippers; human-readable otherwise
    let json = std::env::var("LOG_FORMAT").is_ok_and(|v| v.eq_ignore_ascii_case("json"));
    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}

#[tokio::main]
async fn main() {
    init_tracing();

    let config = match AppConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            tracing::error!("{}", e);
            std::process::exit(1);
        }
    };
    tracing::debug!("Loaded {:?}", config);

    // Create InSight client
    let insight_client =
        match InsightClient::new(&config.insight_api_url, &config.nasa_api_key, config.request_timeout) {
            Ok(client) => client,
            Err(e) => {
                tracing::error!("{}", e);
                std::process::exit(1);
            }
        };

    // Shared telemetry cache, kept warm by the background poller
    let fetcher = Arc::new(Fetcher::new(
        insight_client,
        config.cache_ttl,
        config.history_depth,
    ));
    let poller = start_poller(Arc::clone(&fetcher), config.poll_interval);

    let app_state = AppState {
        fetcher: Arc::clone(&fetcher),
    };

    // CORS — read-mostly API; expose X-Telemetry-Stale
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers(Any)
        .expose_headers([HeaderName::from_static(routes::telemetry::STALE_HEADER)]);

    // Build router
    // Telemetry routes use AppState; health reads the cache directly.
    let telemetry_routes = Router::new()
        .route(
            "/api/v1/telemetry/overview",
            get(routes::telemetry::get_overview),
        )
        .route(
            "/api/v1/telemetry/weather",
            get(routes::telemetry::get_weather),
        )
        .route(
            "/api/v1/telemetry/systems",
            get(routes::telemetry::get_systems),
        )
        .with_state(app_state);

    let health_routes = Router::new()
        .route("/api/v1/health", get(routes::health::health_check))
        .with_state(fetcher);

    // Poller routes use PollerControl
    let poller_routes = Router::new()
        .route(
            "/api/v1/poller/status",
            get(routes::poller::get_poller_status),
        )
        .route(
            "/api/v1/poller/refresh",
            post(routes::poller::trigger_refresh),
        )
        .with_state(poller.control());

    let app = Router::new()
        .merge(health_routes)
        .merge(telemetry_routes)
        .merge(poller_routes)
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .layer(TraceLayer::new_for_http())
        .layer(cors);

    // Start server
    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    tracing::info!("API server listening on {}", addr);
    tracing::info!(
        "Swagger UI available at http://localhost:{}/swagger-ui/",
        config.port
    );

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("Failed to bind TCP listener");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("Server terminated unexpectedly");

    poller.stop().await;
    tracing::info!("Shutdown complete");
}
