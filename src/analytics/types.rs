use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Raw query parameters as received on the wire. Everything arrives as an
/// optional string and is parsed/checked once by the validation layer, which
/// reports every failing field at once instead of stopping at the first.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawAnalyticsQuery {
    pub fleet_id: Option<String>,
    pub time_window: Option<String>,
    pub inactive_threshold: Option<String>,
    pub start_time: Option<String>,
    pub end_time: Option<String>,
    pub resolved: Option<String>,
}

/// Validated parameters shared by the analytics endpoints.
#[derive(Debug, Clone, Default)]
pub struct AnalyticsQuery {
    pub fleet_id: Option<String>,
    pub time_window: Option<f64>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default)]
pub struct ActivityQuery {
    pub base: AnalyticsQuery,
    pub inactive_threshold: Option<f64>,
}

#[derive(Debug, Clone, Default)]
pub struct AlertSummaryQuery {
    pub base: AnalyticsQuery,
    pub resolved: Option<bool>,
}

// ── Derived views (computed, never persisted) ──

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FleetAnalytics {
    pub active_vehicles: i64,
    pub inactive_vehicles: i64,
    pub total_vehicles: i64,
    pub average_fuel_level: f64,
    pub total_distance_last_24h: f64,
    pub alert_summary: AlertSummary,
    pub last_updated: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityStatus {
    pub active: i64,
    pub inactive: i64,
    pub inactive_threshold: f64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FuelAnalytics {
    pub average_fuel_level: f64,
    pub low_fuel_vehicles: i64,
    pub critical_fuel_vehicles: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fleet_id: Option<String>,
    pub last_updated: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DistanceAnalytics {
    pub total_distance: f64,
    pub average_distance_per_vehicle: f64,
    pub time_window: f64,
    pub vehicle_count: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fleet_id: Option<String>,
    pub last_updated: DateTime<Utc>,
}

/// Alert counts grouped by type and by severity independently (not
/// cross-tabulated).
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AlertSummary {
    pub by_type: BTreeMap<String, i64>,
    pub by_severity: BTreeMap<String, i64>,
    pub total: i64,
    pub time_window: f64,
    pub last_updated: DateTime<Utc>,
}

/// Per-vehicle activity. A vehicle that has never reported telemetry has
/// `last_telemetry_time` and `hours_inactive` both null and is inactive.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VehicleActivity {
    pub vehicle_vin: String,
    pub is_active: bool,
    pub last_telemetry_time: Option<DateTime<Utc>>,
    pub hours_inactive: Option<f64>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VehicleDistance {
    pub vehicle_vin: String,
    pub start_odometer: f64,
    pub end_odometer: f64,
    pub distance_traveled: f64,
    pub time_window: f64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VehicleFuelStatus {
    pub vehicle_vin: String,
    pub current_fuel_level: f64,
    pub last_updated: DateTime<Utc>,
    pub is_low_fuel: bool,
    pub is_critical_fuel: bool,
}

/// Round to 2 decimal places, half away from zero. Applied at the final step
/// only; internal accumulation keeps full precision.
pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
