use crate::config::IngestConfig;
use crate::error::{AppError, AppResult, LoggedJson};
use crate::types::{millis_to_datetime, NewTelemetry, TelemetryRecord};
use crate::vehicles::vin_exists;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use chrono::{DateTime, Utc};
use deadpool_sqlite::Pool;
use rusqlite::params;
use serde::Deserialize;
use std::collections::HashSet;
use std::sync::Arc;

pub struct TelemetryState {
    pub pool: Pool,
    pub config: IngestConfig,
}

const TELEMETRY_COLUMNS: &str = "id, vehicle_vin, latitude, longitude, speed, engine_status, \
                                 fuel_battery_level, odometer_reading, diagnostic_codes, \
                                 timestamp, created_at";

fn telemetry_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<TelemetryRecord> {
    let engine: String = row.get(5)?;
    let engine_status = engine.parse().map_err(|e: String| {
        rusqlite::Error::FromSqlConversionFailure(5, rusqlite::types::Type::Text, e.into())
    })?;
    let codes_json: Option<String> = row.get(8)?;
    let diagnostic_codes = codes_json.and_then(|s| serde_json::from_str(&s).ok());
    Ok(TelemetryRecord {
        id: row.get(0)?,
        vehicle_vin: row.get(1)?,
        latitude: row.get(2)?,
        longitude: row.get(3)?,
        speed: row.get(4)?,
        engine_status,
        fuel_battery_level: row.get(6)?,
        odometer_reading: row.get(7)?,
        diagnostic_codes,
        timestamp: millis_to_datetime(row.get(9)?),
        created_at: millis_to_datetime(row.get(10)?),
    })
}

/// Range checks on a single reading. Engine status is already typed by serde.
fn validate_record(record: &NewTelemetry) -> AppResult<()> {
    if record.vehicle_vin.trim().is_empty() {
        return Err(AppError::Validation("vehicle VIN is required".to_string()));
    }
    if !(-90.0..=90.0).contains(&record.latitude) {
        return Err(AppError::Validation(
            "latitude must be between -90 and 90 degrees".to_string(),
        ));
    }
    if !(-180.0..=180.0).contains(&record.longitude) {
        return Err(AppError::Validation(
            "longitude must be between -180 and 180 degrees".to_string(),
        ));
    }
    if !record.speed.is_finite() || record.speed < 0.0 {
        return Err(AppError::Validation(
            "speed must be a non-negative number".to_string(),
        ));
    }
    if record.speed > 300.0 {
        return Err(AppError::Validation(
            "speed value seems unrealistic".to_string(),
        ));
    }
    if !(0.0..=100.0).contains(&record.fuel_battery_level) {
        return Err(AppError::Validation(
            "fuel/battery level must be between 0 and 100".to_string(),
        ));
    }
    if !record.odometer_reading.is_finite() || record.odometer_reading < 0.0 {
        return Err(AppError::Validation(
            "odometer reading must be a non-negative number".to_string(),
        ));
    }
    Ok(())
}

fn insert_record(
    conn: &rusqlite::Connection,
    record: &NewTelemetry,
    codes_json: Option<&str>,
    now_ms: i64,
) -> rusqlite::Result<i64> {
    conn.execute(
        "INSERT INTO telemetry (vehicle_vin, latitude, longitude, speed, engine_status,
                                fuel_battery_level, odometer_reading, diagnostic_codes,
                                timestamp, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
        params![
            record.vehicle_vin,
            record.latitude,
            record.longitude,
            record.speed,
            record.engine_status.as_str(),
            record.fuel_battery_level,
            record.odometer_reading,
            codes_json,
            record.timestamp.timestamp_millis(),
            now_ms,
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

/// POST /telemetry - Ingest a single telemetry reading.
pub async fn ingest_telemetry(
    State(state): State<Arc<TelemetryState>>,
    LoggedJson(record): LoggedJson<NewTelemetry>,
) -> AppResult<(StatusCode, Json<TelemetryRecord>)> {
    validate_record(&record)?;
    if !vin_exists(&state.pool, &record.vehicle_vin).await? {
        return Err(AppError::NotFound("vehicle not found".to_string()));
    }

    let now = Utc::now();
    let now_ms = now.timestamp_millis();
    let codes_json = match &record.diagnostic_codes {
        Some(codes) => Some(
            serde_json::to_string(codes)
                .map_err(|e| AppError::Internal(format!("serialize diagnostic_codes: {e}")))?,
        ),
        None => None,
    };

    let conn = state
        .pool
        .get()
        .await
        .map_err(|e| AppError::Internal(format!("pool error: {e}")))?;

    let insert = record.clone();
    let id = conn
        .interact(move |conn| insert_record(conn, &insert, codes_json.as_deref(), now_ms))
        .await
        .map_err(|e| AppError::Internal(format!("interact error: {e}")))??;

    let stored = TelemetryRecord {
        id,
        vehicle_vin: record.vehicle_vin,
        latitude: record.latitude,
        longitude: record.longitude,
        speed: record.speed,
        engine_status: record.engine_status,
        fuel_battery_level: record.fuel_battery_level,
        odometer_reading: record.odometer_reading,
        diagnostic_codes: record.diagnostic_codes,
        timestamp: record.timestamp,
        created_at: now,
    };
    Ok((StatusCode::CREATED, Json(stored)))
}

#[derive(Debug, Deserialize)]
pub struct BatchPayload {
    pub records: Vec<NewTelemetry>,
}

/// POST /telemetry/batch - Ingest a bounded batch of readings.
/// Invalid entries are reported per index; valid ones are still stored.
pub async fn ingest_telemetry_batch(
    State(state): State<Arc<TelemetryState>>,
    LoggedJson(payload): LoggedJson<BatchPayload>,
) -> AppResult<Json<serde_json::Value>> {
    if payload.records.len() > state.config.max_batch_size {
        return Err(AppError::Validation(format!(
            "batch exceeds max size of {}",
            state.config.max_batch_size
        )));
    }

    // Resolve which of the batch's VINs are known in one query.
    let vins: Vec<String> = payload
        .records
        .iter()
        .map(|r| r.vehicle_vin.clone())
        .collect::<HashSet<_>>()
        .into_iter()
        .collect();
    let conn = state
        .pool
        .get()
        .await
        .map_err(|e| AppError::Internal(format!("pool error: {e}")))?;
    let known_vins: HashSet<String> = conn
        .interact(move |conn| {
            let mut known = HashSet::new();
            let mut stmt = conn.prepare("SELECT COUNT(*) > 0 FROM vehicles WHERE vin = ?1")?;
            for vin in vins {
                if stmt.query_row(params![vin], |row| row.get::<_, bool>(0))? {
                    known.insert(vin);
                }
            }
            Ok::<_, rusqlite::Error>(known)
        })
        .await
        .map_err(|e| AppError::Internal(format!("interact error: {e}")))??;

    let now_ms = Utc::now().timestamp_millis();
    let mut accepted = 0u64;
    let mut errors = Vec::new();
    let mut to_insert = Vec::new();

    for (i, record) in payload.records.into_iter().enumerate() {
        if let Err(e) = validate_record(&record) {
            errors.push(serde_json::json!({ "index": i, "error": e.to_string() }));
            continue;
        }
        if !known_vins.contains(&record.vehicle_vin) {
            errors.push(serde_json::json!({ "index": i, "error": "vehicle not found" }));
            continue;
        }
        let codes_json = record
            .diagnostic_codes
            .as_ref()
            .and_then(|codes| serde_json::to_string(codes).ok());
        to_insert.push((record, codes_json));
        accepted += 1;
    }

    let conn = state
        .pool
        .get()
        .await
        .map_err(|e| AppError::Internal(format!("pool error: {e}")))?;
    conn.interact(move |conn| {
        let tx = conn.transaction()?;
        for (record, codes_json) in &to_insert {
            insert_record(&tx, record, codes_json.as_deref(), now_ms)?;
        }
        tx.commit()
    })
    .await
    .map_err(|e| AppError::Internal(format!("interact error: {e}")))??;

    Ok(Json(serde_json::json!({
        "accepted": accepted,
        "errors": errors,
    })))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryParams {
    pub start_time: Option<String>,
    pub end_time: Option<String>,
}

/// GET /telemetry/:vin/history - Readings for a vehicle, newest first.
pub async fn telemetry_history(
    State(state): State<Arc<TelemetryState>>,
    Path(vin): Path<String>,
    Query(params): Query<HistoryParams>,
) -> AppResult<Json<serde_json::Value>> {
    if vin.trim().is_empty() {
        return Err(AppError::Validation("vehicle VIN is required".to_string()));
    }

    let start = parse_time(params.start_time.as_deref(), "startTime")?;
    let end = parse_time(params.end_time.as_deref(), "endTime")?;
    if let (Some(start), Some(end)) = (start, end) {
        if start >= end {
            return Err(AppError::Validation(
                "start time must be before end time".to_string(),
            ));
        }
    }

    let conn = state
        .pool
        .get()
        .await
        .map_err(|e| AppError::Internal(format!("pool error: {e}")))?;

    let query_vin = vin.clone();
    let records = conn
        .interact(move |conn| {
            let mut sql =
                format!("SELECT {TELEMETRY_COLUMNS} FROM telemetry WHERE vehicle_vin = ?1");
            let mut bind_values: Vec<Box<dyn rusqlite::types::ToSql>> =
                vec![Box::new(query_vin)];

            if let Some(start) = start {
                sql.push_str(&format!(" AND timestamp >= ?{}", bind_values.len() + 1));
                bind_values.push(Box::new(start.timestamp_millis()));
            }
            if let Some(end) = end {
                sql.push_str(&format!(" AND timestamp <= ?{}", bind_values.len() + 1));
                bind_values.push(Box::new(end.timestamp_millis()));
            }
            sql.push_str(" ORDER BY timestamp DESC");

            let params_ref: Vec<&dyn rusqlite::types::ToSql> =
                bind_values.iter().map(|b| b.as_ref()).collect();
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map(params_ref.as_slice(), telemetry_from_row)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok::<_, rusqlite::Error>(rows)
        })
        .await
        .map_err(|e| AppError::Internal(format!("interact error: {e}")))??;

    Ok(Json(serde_json::json!({
        "vehicleVin": vin,
        "recordCount": records.len(),
        "data": records,
    })))
}

/// GET /telemetry/:vin/latest - Most recent reading for a vehicle.
pub async fn latest_telemetry(
    State(state): State<Arc<TelemetryState>>,
    Path(vin): Path<String>,
) -> AppResult<Json<TelemetryRecord>> {
    if vin.trim().is_empty() {
        return Err(AppError::Validation("vehicle VIN is required".to_string()));
    }

    let conn = state
        .pool
        .get()
        .await
        .map_err(|e| AppError::Internal(format!("pool error: {e}")))?;

    let record = conn
        .interact(move |conn| {
            conn.query_row(
                &format!(
                    "SELECT {TELEMETRY_COLUMNS} FROM telemetry WHERE vehicle_vin = ?1
                     ORDER BY timestamp DESC, id DESC LIMIT 1"
                ),
                params![vin],
                telemetry_from_row,
            )
        })
        .await
        .map_err(|e| AppError::Internal(format!("interact error: {e}")))?
        .map_err(|e| match e {
            rusqlite::Error::QueryReturnedNoRows => {
                AppError::NotFound("no telemetry data found for vehicle".to_string())
            }
            _ => AppError::Database(e),
        })?;

    Ok(Json(record))
}

fn parse_time(value: Option<&str>, field: &str) -> AppResult<Option<DateTime<Utc>>> {
    match value {
        None => Ok(None),
        Some(s) => DateTime::parse_from_rfc3339(s)
            .map(|dt| Some(dt.with_timezone(&Utc)))
            .map_err(|_| AppError::Validation(format!("invalid {field} format"))),
    }
}
