use axum::routing::{get, post};
use axum::Router;
use chrono::{DateTime, Utc};
use fleetpulse::analytics::{self, AnalyticsState};
use fleetpulse::config::{AnalyticsConfig, IngestConfig};
use fleetpulse::telemetry::{self, TelemetryState};
use fleetpulse::{alerts, vehicles};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;

/// Spawn the service against a fresh temp database and return its address.
pub async fn spawn_server() -> SocketAddr {
    let tmp = tempfile::NamedTempFile::new().unwrap();
    let db_path = tmp.path().to_path_buf();
    // Keep tmp alive by leaking it (test only)
    std::mem::forget(tmp);

    let pool = deadpool_sqlite::Config::new(&db_path)
        .create_pool(deadpool_sqlite::Runtime::Tokio1)
        .unwrap();

    {
        let conn = pool.get().await.unwrap();
        conn.interact(|conn| {
            fleetpulse::storage::sqlite::apply_pragmas(conn).unwrap();
            fleetpulse::storage::migrations::run_migrations(conn).unwrap();
        })
        .await
        .unwrap();
    }

    let crud_pool = Arc::new(pool.clone());
    let telemetry_state = Arc::new(TelemetryState {
        pool: pool.clone(),
        config: IngestConfig::default(),
    });
    let analytics_state = Arc::new(AnalyticsState::new(pool.clone(), AnalyticsConfig::default()));

    let app = Router::new()
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
        .with_state(crud_pool.clone())
        .merge(
            Router::new()
                .route("/telemetry", post(telemetry::ingest_telemetry))
                .route("/telemetry/batch", post(telemetry::ingest_telemetry_batch))
                .route("/telemetry/{vin}/history", get(telemetry::telemetry_history))
                .route("/telemetry/{vin}/latest", get(telemetry::latest_telemetry))
                .with_state(telemetry_state),
        )
        .merge(
            Router::new()
                .route("/alerts", post(alerts::create_alert))
                .route("/alerts/{id}", get(alerts::get_alert))
                .route("/alerts/{id}/resolve", post(alerts::resolve_alert))
                .route("/alerts/count/total", get(alerts::count_alerts))
                .with_state(crud_pool),
        )
        .merge(
            Router::new()
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
                .route("/health", get(analytics::handler::health))
                .with_state(analytics_state),
        );

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

pub fn vehicle_payload(vin: &str, fleet_id: &str) -> serde_json::Value {
    serde_json::json!({
        "vin": vin,
        "manufacturer": "Honda",
        "model": "Accord",
        "fleetId": fleet_id,
        "ownerOperator": {
            "name": "Pat Doyle",
            "contact": "pat.doyle@example.com",
            "department": "Logistics"
        },
        "registrationStatus": "Active"
    })
}

pub fn telemetry_payload(
    vin: &str,
    odometer: f64,
    fuel: f64,
    timestamp: DateTime<Utc>,
) -> serde_json::Value {
    serde_json::json!({
        "vehicleVin": vin,
        "latitude": 37.7749,
        "longitude": -122.4194,
        "speed": 42.0,
        "engineStatus": "On",
        "fuelBatteryLevel": fuel,
        "odometerReading": odometer,
        "timestamp": timestamp.to_rfc3339(),
    })
}

/// Create a vehicle and assert success.
pub async fn create_vehicle(client: &reqwest::Client, addr: SocketAddr, vin: &str, fleet: &str) {
    let resp = client
        .post(format!("http://{addr}/vehicles"))
        .json(&vehicle_payload(vin, fleet))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 201, "vehicle create failed for {vin}");
}

/// Ingest one telemetry reading and assert success.
pub async fn ingest(
    client: &reqwest::Client,
    addr: SocketAddr,
    vin: &str,
    odometer: f64,
    fuel: f64,
    timestamp: DateTime<Utc>,
) {
    let resp = client
        .post(format!("http://{addr}/telemetry"))
        .json(&telemetry_payload(vin, odometer, fuel, timestamp))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 201, "telemetry ingest failed for {vin}");
}
