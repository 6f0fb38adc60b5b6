use crate::error::{AppError, AppResult, FieldError, LoggedJson};
use crate::types::{millis_to_datetime, Alert, CreateAlert, Severity};
use crate::vehicles::vin_exists;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use chrono::{DateTime, Utc};
use deadpool_sqlite::Pool;
use rusqlite::params;
use serde::Deserialize;
use std::sync::Arc;

const ALERT_COLUMNS: &str =
    "id, vehicle_vin, telemetry_id, alert_type, severity, message, resolved, created_at, \
     resolved_at";

fn alert_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Alert> {
    let severity: String = row.get(4)?;
    let severity = severity.parse().map_err(|e: String| {
        rusqlite::Error::FromSqlConversionFailure(4, rusqlite::types::Type::Text, e.into())
    })?;
    let resolved_at: Option<i64> = row.get(8)?;
    Ok(Alert {
        id: row.get(0)?,
        vehicle_vin: row.get(1)?,
        telemetry_id: row.get(2)?,
        alert_type: row.get(3)?,
        severity,
        message: row.get(5)?,
        resolved: row.get(6)?,
        created_at: millis_to_datetime(row.get(7)?),
        resolved_at: resolved_at.map(millis_to_datetime),
    })
}

/// POST /alerts - Raise an alert for a vehicle.
pub async fn create_alert(
    State(pool): State<Arc<Pool>>,
    LoggedJson(input): LoggedJson<CreateAlert>,
) -> AppResult<(StatusCode, Json<Alert>)> {
    if input.alert_type.trim().is_empty() || input.message.trim().is_empty() {
        return Err(AppError::Validation(
            "alert type and message are required".to_string(),
        ));
    }
    if !vin_exists(&pool, &input.vehicle_vin).await? {
        return Err(AppError::NotFound("vehicle not found".to_string()));
    }

    let now = Utc::now();
    let now_ms = now.timestamp_millis();

    let conn = pool
        .get()
        .await
        .map_err(|e| AppError::Internal(format!("pool error: {e}")))?;

    let insert = input.clone();
    let id = conn
        .interact(move |conn| {
            conn.execute(
                "INSERT INTO alerts (vehicle_vin, telemetry_id, alert_type, severity, message,
                                     resolved, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    insert.vehicle_vin,
                    insert.telemetry_id,
                    insert.alert_type,
                    insert.severity.as_str(),
                    insert.message,
                    insert.resolved,
                    now_ms,
                ],
            )?;
            Ok::<_, rusqlite::Error>(conn.last_insert_rowid())
        })
        .await
        .map_err(|e| AppError::Internal(format!("interact error: {e}")))??;

    let alert = Alert {
        id,
        vehicle_vin: input.vehicle_vin,
        telemetry_id: input.telemetry_id,
        alert_type: input.alert_type,
        severity: input.severity,
        message: input.message,
        resolved: input.resolved,
        created_at: now,
        resolved_at: None,
    };
    Ok((StatusCode::CREATED, Json(alert)))
}

/// GET /alerts/:id - Fetch a single alert.
pub async fn get_alert(
    State(pool): State<Arc<Pool>>,
    Path(id): Path<i64>,
) -> AppResult<Json<Alert>> {
    if id <= 0 {
        return Err(AppError::Validation("invalid alert ID".to_string()));
    }

    let conn = pool
        .get()
        .await
        .map_err(|e| AppError::Internal(format!("pool error: {e}")))?;

    let alert = conn
        .interact(move |conn| {
            conn.query_row(
                &format!("SELECT {ALERT_COLUMNS} FROM alerts WHERE id = ?1"),
                params![id],
                alert_from_row,
            )
        })
        .await
        .map_err(|e| AppError::Internal(format!("interact error: {e}")))?
        .map_err(|e| match e {
            rusqlite::Error::QueryReturnedNoRows => {
                AppError::NotFound("alert not found".to_string())
            }
            _ => AppError::Database(e),
        })?;

    Ok(Json(alert))
}

/// POST /alerts/:id/resolve - Mark an alert resolved and stamp the time.
pub async fn resolve_alert(
    State(pool): State<Arc<Pool>>,
    Path(id): Path<i64>,
) -> AppResult<Json<Alert>> {
    if id <= 0 {
        return Err(AppError::Validation("invalid alert ID".to_string()));
    }

    let now_ms = Utc::now().timestamp_millis();
    let conn = pool
        .get()
        .await
        .map_err(|e| AppError::Internal(format!("pool error: {e}")))?;

    let alert = conn
        .interact(move |conn| {
            let updated = conn.execute(
                "UPDATE alerts SET resolved = 1, resolved_at = ?1 WHERE id = ?2",
                params![now_ms, id],
            )?;
            if updated == 0 {
                return Err(rusqlite::Error::QueryReturnedNoRows);
            }
            conn.query_row(
                &format!("SELECT {ALERT_COLUMNS} FROM alerts WHERE id = ?1"),
                params![id],
                alert_from_row,
            )
        })
        .await
        .map_err(|e| AppError::Internal(format!("interact error: {e}")))?
        .map_err(|e| match e {
            rusqlite::Error::QueryReturnedNoRows => {
                AppError::NotFound("alert not found".to_string())
            }
            _ => AppError::Database(e),
        })?;

    Ok(Json(alert))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlertCountFilters {
    pub vehicle_vin: Option<String>,
    pub alert_type: Option<String>,
    pub severity: Option<String>,
    pub resolved: Option<String>,
    pub start_time: Option<String>,
    pub end_time: Option<String>,
}

/// GET /alerts/count/total - Count alerts matching the given filters.
/// Filter problems are reported per field, all at once.
pub async fn count_alerts(
    State(pool): State<Arc<Pool>>,
    Query(filters): Query<AlertCountFilters>,
) -> AppResult<Json<serde_json::Value>> {
    let mut errors = Vec::new();

    let mut severity = None;
    if let Some(ref value) = filters.severity {
        match value.parse::<Severity>() {
            Ok(parsed) => severity = Some(parsed),
            Err(_) => errors.push(FieldError::new(
                "severity",
                &format!("Severity must be one of: {}", Severity::ALL.join(", ")),
                Some(value.as_str().into()),
            )),
        }
    }

    let mut resolved = None;
    match filters.resolved.as_deref() {
        None => {}
        Some("true") => resolved = Some(true),
        Some("false") => resolved = Some(false),
        Some(other) => errors.push(FieldError::new(
            "resolved",
            "Resolved must be a boolean value",
            Some(other.into()),
        )),
    }

    let start = parse_filter_time(filters.start_time.as_deref(), "startTime", &mut errors);
    let end = parse_filter_time(filters.end_time.as_deref(), "endTime", &mut errors);
    if let (Some(start), Some(end)) = (start, end) {
        if start >= end {
            errors.push(FieldError::new(
                "timeRange",
                "Start time must be before end time",
                None,
            ));
        }
    }

    if !errors.is_empty() {
        return Err(AppError::ValidationFields(errors));
    }

    if let Some(ref vin) = filters.vehicle_vin {
        if !vin_exists(&pool, vin).await? {
            return Err(AppError::NotFound("vehicle not found".to_string()));
        }
    }

    let conn = pool
        .get()
        .await
        .map_err(|e| AppError::Internal(format!("pool error: {e}")))?;

    let count = conn
        .interact(move |conn| {
            let mut sql = String::from("SELECT COUNT(*) FROM alerts WHERE 1=1");
            let mut bind_values: Vec<Box<dyn rusqlite::types::ToSql>> = Vec::new();

            if let Some(vin) = filters.vehicle_vin {
                sql.push_str(&format!(" AND vehicle_vin = ?{}", bind_values.len() + 1));
                bind_values.push(Box::new(vin));
            }
            if let Some(alert_type) = filters.alert_type {
                sql.push_str(&format!(" AND alert_type = ?{}", bind_values.len() + 1));
                bind_values.push(Box::new(alert_type));
            }
            if let Some(severity) = severity {
                sql.push_str(&format!(" AND severity = ?{}", bind_values.len() + 1));
                bind_values.push(Box::new(severity.as_str().to_string()));
            }
            if let Some(resolved) = resolved {
                sql.push_str(&format!(" AND resolved = ?{}", bind_values.len() + 1));
                bind_values.push(Box::new(resolved));
            }
            if let Some(start) = start {
                sql.push_str(&format!(" AND created_at >= ?{}", bind_values.len() + 1));
                bind_values.push(Box::new(start.timestamp_millis()));
            }
            if let Some(end) = end {
                sql.push_str(&format!(" AND created_at <= ?{}", bind_values.len() + 1));
                bind_values.push(Box::new(end.timestamp_millis()));
            }

            let params_ref: Vec<&dyn rusqlite::types::ToSql> =
                bind_values.iter().map(|b| b.as_ref()).collect();
            conn.query_row(&sql, params_ref.as_slice(), |row| row.get::<_, i64>(0))
        })
        .await
        .map_err(|e| AppError::Internal(format!("interact error: {e}")))??;

    Ok(Json(serde_json::json!({ "count": count })))
}

fn parse_filter_time(
    value: Option<&str>,
    field: &str,
    errors: &mut Vec<FieldError>,
) -> Option<DateTime<Utc>> {
    let value = value?;
    match DateTime::parse_from_rfc3339(value) {
        Ok(dt) => Some(dt.with_timezone(&Utc)),
        Err(_) => {
            errors.push(FieldError::new(
                field,
                &format!("invalid {field} format"),
                Some(value.into()),
            ));
            None
        }
    }
}
