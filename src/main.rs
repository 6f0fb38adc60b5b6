use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use axum::Router;
use clap::Parser;
use fleetpulse::analytics::{self, AnalyticsState};
use fleetpulse::config::AppConfig;
use fleetpulse::telemetry::{self, TelemetryState};
use fleetpulse::{alerts, storage, vehicles};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::signal;
use tower_governor::{
    governor::GovernorConfigBuilder, key_extractor::SmartIpKeyExtractor, GovernorLayer,
};
use tower_http::cors::{AllowOrigin, CorsLayer};

#[derive(Parser)]
#[command(name = "fleetpulse", about = "Self-hosted fleet telemetry and analytics service")]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "config.toml")]
    config: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Init tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "fleetpulse=info,tower_http=info".into()),
        )
        .json()
        .init();

    let cli = Cli::parse();
    let config = AppConfig::load(Some(&cli.config))?;

    if let Err(msg) = config.validate() {
        eprintln!("Configuration error: {msg}");
        return Err(msg.into());
    }

    tracing::info!(
        host = %config.server.host,
        port = config.server.port,
        db = %config.database.path.display(),
        "starting fleetpulse"
    );

    // Setup SQLite pool
    let pool = storage::sqlite::create_pool(&config.database)?;
    storage::sqlite::init_pool(&pool).await?;
    tracing::info!("database initialized");

    // Shared state
    let crud_pool = Arc::new(pool.clone());
    let telemetry_state = Arc::new(TelemetryState {
        pool: pool.clone(),
        config: config.ingest.clone(),
    });
    let analytics_state = Arc::new(AnalyticsState::new(pool.clone(), config.analytics.clone()));

    // Rate limiter for read-heavy routes (the dashboard polls these)
    let read_governor = GovernorConfigBuilder::default()
        .key_extractor(SmartIpKeyExtractor)
        .per_second(config.rate_limit.read_per_second)
        .burst_size(config.rate_limit.read_burst_size)
        .finish()
        .expect("failed to build read rate limiter config");

    // Stricter limiters for mutating routes
    let vehicle_governor = GovernorConfigBuilder::default()
        .key_extractor(SmartIpKeyExtractor)
        .per_second(config.rate_limit.write_per_second)
        .burst_size(config.rate_limit.write_burst_size)
        .finish()
        .expect("failed to build vehicle rate limiter config");

    let alert_governor = GovernorConfigBuilder::default()
        .key_extractor(SmartIpKeyExtractor)
        .per_second(config.rate_limit.write_per_second)
        .burst_size(config.rate_limit.write_burst_size)
        .finish()
        .expect("failed to build alert rate limiter config");

    // CORS for the dashboard: configured origins with credentials
    let origins: Vec<axum::http::HeaderValue> = config
        .server
        .cors_origins
        .iter()
        .map(|origin| {
            origin
                .parse()
                .expect("cors_origins must be valid header values")
        })
        .collect();
    let cors = CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods([
            axum::http::Method::GET,
            axum::http::Method::POST,
            axum::http::Method::PUT,
            axum::http::Method::DELETE,
            axum::http::Method::OPTIONS,
        ])
        .allow_headers([
            axum::http::header::CONTENT_TYPE,
            axum::http::header::AUTHORIZATION,
        ])
        .allow_credentials(true);

    // ── Vehicle CRUD routes ──
    let vehicle_routes = Router::new()
        .route(
            "/vehicles",
            post(vehicles::create_vehicle).get(vehicles::list_vehicles),
        )
        .route(
            "/vehicles/{vin}",
            get(vehicles::get_vehicle)
                .put(vehicles::update_vehicle)
                .delete(vehicles::delete_vehicle),
        )
        .layer(GovernorLayer::new(vehicle_governor))
        .with_state(crud_pool.clone());

    // ── Telemetry ingestion + history routes ──
    let telemetry_routes = Router::new()
        .route("/telemetry", post(telemetry::ingest_telemetry))
        .route(
            "/telemetry/batch",
            post(telemetry::ingest_telemetry_batch),
        )
        .route(
            "/telemetry/{vin}/history",
            get(telemetry::telemetry_history),
        )
        .route("/telemetry/{vin}/latest", get(telemetry::latest_telemetry))
        .layer(DefaultBodyLimit::max(config.ingest.max_payload_bytes))
        .with_state(telemetry_state);

    // ── Alert routes ──
    let alert_routes = Router::new()
        .route("/alerts", post(alerts::create_alert))
        .route("/alerts/{id}", get(alerts::get_alert))
        .route("/alerts/{id}/resolve", post(alerts::resolve_alert))
        .route("/alerts/count/total", get(alerts::count_alerts))
        .layer(GovernorLayer::new(alert_governor))
        .with_state(crud_pool);

    // ── Analytics routes (read-limited; the dashboard polls them) ──
    let analytics_routes = Router::new()
        .route("/analytics/fleet", get(analytics::handler::fleet_analytics))
        .route(
            "/analytics/activity",
            get(analytics::handler::activity_status),
        )
        .route("/analytics/fuel", get(analytics::handler::fuel_analytics))
        .route(
            "/analytics/distance",
            get(analytics::handler::distance_analytics),
        )
        .route(
            "/analytics/alerts/summary",
            get(analytics::handler::alert_summary),
        )
        .route(
            "/analytics/vehicles/activity",
            get(analytics::handler::vehicle_activity),
        )
        .route(
            "/analytics/vehicles/distances",
            get(analytics::handler::vehicle_distances),
        )
        .route(
            "/analytics/vehicles/fuel",
            get(analytics::handler::vehicle_fuel),
        )
        .route(
            "/analytics/cache/refresh",
            post(analytics::handler::refresh_cache),
        )
        .layer(GovernorLayer::new(read_governor))
        .with_state(analytics_state.clone());

    // ── Health route (public) ──
    let health_route = Router::new()
        .route("/health", get(analytics::handler::health))
        .with_state(analytics_state);

    let app = Router::new()
        .merge(vehicle_routes)
        .merge(telemetry_routes)
        .merge(alert_routes)
        .merge(analytics_routes)
        .merge(health_route)
        .layer(cors);

    // Start server
    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!(addr = %addr, "listening");

    // ConnectInfo feeds the rate limiters' IP extraction when no proxy
    // headers are present
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<std::net::SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    tracing::info!("shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("received Ctrl+C"),
        _ = terminate => tracing::info!("received SIGTERM"),
    }

    tracing::info!("shutting down...");
}
