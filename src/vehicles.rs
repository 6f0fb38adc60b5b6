use crate::error::{AppError, AppResult, LoggedJson};
use crate::types::{millis_to_datetime, CreateVehicle, UpdateVehicle, Vehicle};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use deadpool_sqlite::Pool;
use rusqlite::params;
use serde::Deserialize;
use std::sync::Arc;

const VEHICLE_COLUMNS: &str = "id, vin, manufacturer, model, fleet_id, owner_operator, \
                               registration_status, created_at, updated_at";

fn vehicle_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Vehicle> {
    let owner_json: String = row.get(5)?;
    let owner_operator = serde_json::from_str(&owner_json).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(5, rusqlite::types::Type::Text, Box::new(e))
    })?;
    let status: String = row.get(6)?;
    let registration_status = status.parse().map_err(|e: String| {
        rusqlite::Error::FromSqlConversionFailure(6, rusqlite::types::Type::Text, e.into())
    })?;
    Ok(Vehicle {
        id: row.get(0)?,
        vin: row.get(1)?,
        manufacturer: row.get(2)?,
        model: row.get(3)?,
        fleet_id: row.get(4)?,
        owner_operator,
        registration_status,
        created_at: millis_to_datetime(row.get(7)?),
        updated_at: millis_to_datetime(row.get(8)?),
    })
}

/// Check whether a VIN exists. Shared with telemetry and alert handlers.
pub(crate) async fn vin_exists(pool: &Pool, vin: &str) -> AppResult<bool> {
    let vin = vin.to_string();
    let conn = pool
        .get()
        .await
        .map_err(|e| AppError::Internal(format!("pool error: {e}")))?;
    let exists = conn
        .interact(move |conn| {
            conn.query_row(
                "SELECT COUNT(*) > 0 FROM vehicles WHERE vin = ?1",
                params![vin],
                |row| row.get::<_, bool>(0),
            )
        })
        .await
        .map_err(|e| AppError::Internal(format!("interact error: {e}")))??;
    Ok(exists)
}

/// POST /vehicles - Register a new vehicle.
pub async fn create_vehicle(
    State(pool): State<Arc<Pool>>,
    LoggedJson(input): LoggedJson<CreateVehicle>,
) -> AppResult<(StatusCode, Json<Vehicle>)> {
    let vin = input.vin.trim().to_string();
    if vin.is_empty() {
        return Err(AppError::Validation("VIN is required".to_string()));
    }
    if vin_exists(&pool, &vin).await? {
        return Err(AppError::Conflict("vehicle VIN already exists".to_string()));
    }

    let now = chrono::Utc::now();
    let now_ms = now.timestamp_millis();
    let owner_json = serde_json::to_string(&input.owner_operator)
        .map_err(|e| AppError::Internal(format!("serialize owner_operator: {e}")))?;

    let conn = pool
        .get()
        .await
        .map_err(|e| AppError::Internal(format!("pool error: {e}")))?;

    let insert_vin = vin.clone();
    let input_clone = input.clone();
    let id = conn
        .interact(move |conn| {
            conn.execute(
                "INSERT INTO vehicles (vin, manufacturer, model, fleet_id, owner_operator,
                                       registration_status, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    insert_vin,
                    input_clone.manufacturer,
                    input_clone.model,
                    input_clone.fleet_id,
                    owner_json,
                    input_clone.registration_status.as_str(),
                    now_ms,
                    now_ms,
                ],
            )?;
            Ok::<_, rusqlite::Error>(conn.last_insert_rowid())
        })
        .await
        .map_err(|e| AppError::Internal(format!("interact error: {e}")))?
        .map_err(|e| {
            // Race between the existence check and the insert
            if e.to_string().contains("UNIQUE constraint failed") {
                AppError::Conflict("vehicle VIN already exists".to_string())
            } else {
                AppError::Database(e)
            }
        })?;

    let vehicle = Vehicle {
        id,
        vin,
        manufacturer: input.manufacturer,
        model: input.model,
        fleet_id: input.fleet_id,
        owner_operator: input.owner_operator,
        registration_status: input.registration_status,
        created_at: now,
        updated_at: now,
    };
    Ok((StatusCode::CREATED, Json(vehicle)))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VehicleFilters {
    pub manufacturer: Option<String>,
    pub fleet_id: Option<String>,
    pub registration_status: Option<String>,
}

/// GET /vehicles - List vehicles with optional filters.
pub async fn list_vehicles(
    State(pool): State<Arc<Pool>>,
    Query(filters): Query<VehicleFilters>,
) -> AppResult<Json<Vec<Vehicle>>> {
    let conn = pool
        .get()
        .await
        .map_err(|e| AppError::Internal(format!("pool error: {e}")))?;

    let vehicles = conn
        .interact(move |conn| {
            let mut sql = format!("SELECT {VEHICLE_COLUMNS} FROM vehicles WHERE 1=1");
            let mut bind_values: Vec<Box<dyn rusqlite::types::ToSql>> = Vec::new();

            if let Some(ref manufacturer) = filters.manufacturer {
                sql.push_str(&format!(" AND manufacturer = ?{}", bind_values.len() + 1));
                bind_values.push(Box::new(manufacturer.clone()));
            }
            if let Some(ref fleet_id) = filters.fleet_id {
                sql.push_str(&format!(" AND fleet_id = ?{}", bind_values.len() + 1));
                bind_values.push(Box::new(fleet_id.clone()));
            }
            if let Some(ref status) = filters.registration_status {
                sql.push_str(&format!(
                    " AND registration_status = ?{}",
                    bind_values.len() + 1
                ));
                bind_values.push(Box::new(status.clone()));
            }
            sql.push_str(" ORDER BY created_at");

            let params_ref: Vec<&dyn rusqlite::types::ToSql> =
                bind_values.iter().map(|b| b.as_ref()).collect();

            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map(params_ref.as_slice(), vehicle_from_row)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok::<_, rusqlite::Error>(rows)
        })
        .await
        .map_err(|e| AppError::Internal(format!("interact error: {e}")))??;

    Ok(Json(vehicles))
}

/// GET /vehicles/:vin - Fetch a single vehicle.
pub async fn get_vehicle(
    State(pool): State<Arc<Pool>>,
    Path(vin): Path<String>,
) -> AppResult<Json<Vehicle>> {
    let conn = pool
        .get()
        .await
        .map_err(|e| AppError::Internal(format!("pool error: {e}")))?;

    let vehicle = conn
        .interact(move |conn| {
            conn.query_row(
                &format!("SELECT {VEHICLE_COLUMNS} FROM vehicles WHERE vin = ?1"),
                params![vin],
                vehicle_from_row,
            )
        })
        .await
        .map_err(|e| AppError::Internal(format!("interact error: {e}")))?
        .map_err(|e| match e {
            rusqlite::Error::QueryReturnedNoRows => {
                AppError::NotFound("vehicle not found".to_string())
            }
            _ => AppError::Database(e),
        })?;

    Ok(Json(vehicle))
}

/// PUT /vehicles/:vin - Partially update a vehicle.
pub async fn update_vehicle(
    State(pool): State<Arc<Pool>>,
    Path(vin): Path<String>,
    LoggedJson(updates): LoggedJson<UpdateVehicle>,
) -> AppResult<Json<Vehicle>> {
    if !vin_exists(&pool, &vin).await? {
        return Err(AppError::NotFound("vehicle not found".to_string()));
    }

    let owner_json = match &updates.owner_operator {
        Some(oo) => Some(
            serde_json::to_string(oo)
                .map_err(|e| AppError::Internal(format!("serialize owner_operator: {e}")))?,
        ),
        None => None,
    };
    let now_ms = chrono::Utc::now().timestamp_millis();

    let conn = pool
        .get()
        .await
        .map_err(|e| AppError::Internal(format!("pool error: {e}")))?;

    let vehicle = conn
        .interact(move |conn| {
            let mut sql = String::from("UPDATE vehicles SET updated_at = ?1");
            let mut bind_values: Vec<Box<dyn rusqlite::types::ToSql>> = vec![Box::new(now_ms)];

            if let Some(ref manufacturer) = updates.manufacturer {
                sql.push_str(&format!(", manufacturer = ?{}", bind_values.len() + 1));
                bind_values.push(Box::new(manufacturer.clone()));
            }
            if let Some(ref model) = updates.model {
                sql.push_str(&format!(", model = ?{}", bind_values.len() + 1));
                bind_values.push(Box::new(model.clone()));
            }
            if let Some(ref fleet_id) = updates.fleet_id {
                sql.push_str(&format!(", fleet_id = ?{}", bind_values.len() + 1));
                bind_values.push(Box::new(fleet_id.clone()));
            }
            if let Some(owner_json) = owner_json {
                sql.push_str(&format!(", owner_operator = ?{}", bind_values.len() + 1));
                bind_values.push(Box::new(owner_json));
            }
            if let Some(status) = updates.registration_status {
                sql.push_str(&format!(
                    ", registration_status = ?{}",
                    bind_values.len() + 1
                ));
                bind_values.push(Box::new(status.as_str().to_string()));
            }

            sql.push_str(&format!(" WHERE vin = ?{}", bind_values.len() + 1));
            bind_values.push(Box::new(vin.clone()));

            let params_ref: Vec<&dyn rusqlite::types::ToSql> =
                bind_values.iter().map(|b| b.as_ref()).collect();
            conn.execute(&sql, params_ref.as_slice())?;

            conn.query_row(
                &format!("SELECT {VEHICLE_COLUMNS} FROM vehicles WHERE vin = ?1"),
                params![vin],
                vehicle_from_row,
            )
        })
        .await
        .map_err(|e| AppError::Internal(format!("interact error: {e}")))??;

    Ok(Json(vehicle))
}

/// DELETE /vehicles/:vin - Remove a vehicle and its telemetry/alerts.
pub async fn delete_vehicle(
    State(pool): State<Arc<Pool>>,
    Path(vin): Path<String>,
) -> AppResult<StatusCode> {
    let conn = pool
        .get()
        .await
        .map_err(|e| AppError::Internal(format!("pool error: {e}")))?;

    let deleted = conn
        .interact(move |conn| conn.execute("DELETE FROM vehicles WHERE vin = ?1", params![vin]))
        .await
        .map_err(|e| AppError::Internal(format!("interact error: {e}")))??;

    if deleted == 0 {
        return Err(AppError::NotFound("vehicle not found".to_string()));
    }
    Ok(StatusCode::NO_CONTENT)
}
