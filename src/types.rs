use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
pub enum RegistrationStatus {
    Active,
    Maintenance,
    Decommissioned,
}

impl RegistrationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RegistrationStatus::Active => "Active",
            RegistrationStatus::Maintenance => "Maintenance",
            RegistrationStatus::Decommissioned => "Decommissioned",
        }
    }
}

impl std::fmt::Display for RegistrationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for RegistrationStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Active" => Ok(RegistrationStatus::Active),
            "Maintenance" => Ok(RegistrationStatus::Maintenance),
            "Decommissioned" => Ok(RegistrationStatus::Decommissioned),
            other => Err(format!("invalid registration status: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
pub enum EngineStatus {
    On,
    Off,
    Idle,
}

impl EngineStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EngineStatus::On => "On",
            EngineStatus::Off => "Off",
            EngineStatus::Idle => "Idle",
        }
    }
}

impl std::str::FromStr for EngineStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "On" => Ok(EngineStatus::On),
            "Off" => Ok(EngineStatus::Off),
            "Idle" => Ok(EngineStatus::Idle),
            other => Err(format!("invalid engine status: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub const ALL: [&'static str; 4] = ["Low", "Medium", "High", "Critical"];

    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Low => "Low",
            Severity::Medium => "Medium",
            Severity::High => "High",
            Severity::Critical => "Critical",
        }
    }
}

impl std::str::FromStr for Severity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Low" => Ok(Severity::Low),
            "Medium" => Ok(Severity::Medium),
            "High" => Ok(Severity::High),
            "Critical" => Ok(Severity::Critical),
            other => Err(format!("invalid severity: {other}")),
        }
    }
}

/// Owner/operator sub-record stored as JSON on the vehicle row.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct OwnerOperator {
    pub name: String,
    pub contact: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub department: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Vehicle {
    pub id: i64,
    pub vin: String,
    pub manufacturer: String,
    pub model: String,
    pub fleet_id: String,
    pub owner_operator: OwnerOperator,
    pub registration_status: RegistrationStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateVehicle {
    pub vin: String,
    pub manufacturer: String,
    pub model: String,
    pub fleet_id: String,
    pub owner_operator: OwnerOperator,
    pub registration_status: RegistrationStatus,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateVehicle {
    pub manufacturer: Option<String>,
    pub model: Option<String>,
    pub fleet_id: Option<String>,
    pub owner_operator: Option<OwnerOperator>,
    pub registration_status: Option<RegistrationStatus>,
}

/// One telemetry reading. Immutable once written; created only by ingestion.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TelemetryRecord {
    pub id: i64,
    pub vehicle_vin: String,
    pub latitude: f64,
    pub longitude: f64,
    pub speed: f64,
    pub engine_status: EngineStatus,
    pub fuel_battery_level: f64,
    pub odometer_reading: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub diagnostic_codes: Option<Vec<String>>,
    pub timestamp: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewTelemetry {
    pub vehicle_vin: String,
    pub latitude: f64,
    pub longitude: f64,
    pub speed: f64,
    pub engine_status: EngineStatus,
    pub fuel_battery_level: f64,
    pub odometer_reading: f64,
    pub diagnostic_codes: Option<Vec<String>>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Alert {
    pub id: i64,
    pub vehicle_vin: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub telemetry_id: Option<i64>,
    pub alert_type: String,
    pub severity: Severity,
    pub message: String,
    pub resolved: bool,
    pub created_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateAlert {
    pub vehicle_vin: String,
    pub telemetry_id: Option<i64>,
    pub alert_type: String,
    pub severity: Severity,
    pub message: String,
    #[serde(default)]
    pub resolved: bool,
}

/// Convert a stored epoch-milliseconds value back to a UTC timestamp.
pub fn millis_to_datetime(ms: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms).unwrap_or_default()
}
