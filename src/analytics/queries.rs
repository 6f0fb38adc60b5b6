use crate::analytics::types::{round2, VehicleActivity, VehicleDistance, VehicleFuelStatus};
use crate::error::{AppError, AppResult};
use crate::types::millis_to_datetime;
use deadpool_sqlite::Pool;
use rusqlite::params;
use std::collections::BTreeMap;
use std::time::Duration;

/// Run a closure against a pooled connection under a bounded deadline, so a
/// wedged store cannot hold a request open indefinitely.
pub(crate) async fn with_conn<F, T>(pool: &Pool, timeout_secs: u64, f: F) -> AppResult<T>
where
    F: FnOnce(&mut rusqlite::Connection) -> rusqlite::Result<T> + Send + 'static,
    T: Send + 'static,
{
    let conn = pool
        .get()
        .await
        .map_err(|e| AppError::Internal(format!("pool error: {e}")))?;
    let result = tokio::time::timeout(Duration::from_secs(timeout_secs), conn.interact(f))
        .await
        .map_err(|_| {
            AppError::Internal(format!("analytics query timed out after {timeout_secs}s"))
        })?
        .map_err(|e| AppError::Internal(format!("interact error: {e}")))??;
    Ok(result)
}

/// Total vehicle count, optionally restricted to a fleet.
pub async fn total_vehicle_count(
    pool: &Pool,
    timeout_secs: u64,
    fleet_id: Option<String>,
) -> AppResult<i64> {
    with_conn(pool, timeout_secs, move |conn| {
        conn.query_row(
            "SELECT COUNT(*) FROM vehicles WHERE (?1 IS NULL OR fleet_id = ?1)",
            params![fleet_id],
            |row| row.get(0),
        )
    })
    .await
}

/// Vehicles with at least one reading at or after the cutoff.
pub async fn active_vehicle_count(
    pool: &Pool,
    timeout_secs: u64,
    fleet_id: Option<String>,
    cutoff_ms: i64,
) -> AppResult<i64> {
    with_conn(pool, timeout_secs, move |conn| {
        conn.query_row(
            "SELECT COUNT(DISTINCT t.vehicle_vin)
             FROM telemetry t
             JOIN vehicles v ON v.vin = t.vehicle_vin
             WHERE t.timestamp >= ?1
               AND (?2 IS NULL OR v.fleet_id = ?2)",
            params![cutoff_ms, fleet_id],
            |row| row.get(0),
        )
    })
    .await
}

/// Average of each vehicle's latest fuel/battery reading. "Latest" ranks by
/// (timestamp, id) descending; the id breaks equal-timestamp ties by
/// insertion order.
pub async fn average_fuel_level(
    pool: &Pool,
    timeout_secs: u64,
    fleet_id: Option<String>,
) -> AppResult<f64> {
    with_conn(pool, timeout_secs, move |conn| {
        conn.query_row(
            "WITH latest AS (
                 SELECT t.fuel_battery_level,
                        ROW_NUMBER() OVER (
                            PARTITION BY t.vehicle_vin
                            ORDER BY t.timestamp DESC, t.id DESC
                        ) AS rn
                 FROM telemetry t
                 JOIN vehicles v ON v.vin = t.vehicle_vin
                 WHERE (?1 IS NULL OR v.fleet_id = ?1)
             )
             SELECT COALESCE(AVG(fuel_battery_level), 0)
             FROM latest WHERE rn = 1",
            params![fleet_id],
            |row| row.get(0),
        )
    })
    .await
}

/// Per-vehicle odometer span within the window. Shared by the fleet total and
/// the per-vehicle detail listing; rows outside the window never contribute,
/// and a negative span (odometer rollback or noise) floors at zero.
async fn distance_rows(
    pool: &Pool,
    timeout_secs: u64,
    cutoff_ms: i64,
) -> AppResult<Vec<(String, f64, f64)>> {
    with_conn(pool, timeout_secs, move |conn| {
        let mut stmt = conn.prepare(
            "SELECT vehicle_vin, MIN(odometer_reading), MAX(odometer_reading)
             FROM telemetry
             WHERE timestamp >= ?1
             GROUP BY vehicle_vin
             ORDER BY vehicle_vin",
        )?;
        let rows = stmt
            .query_map(params![cutoff_ms], |row| {
                Ok((row.get(0)?, row.get(1)?, row.get(2)?))
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })
    .await
}

/// Sum of per-vehicle distances over the window, rounded to 2 decimal places.
pub async fn total_fleet_distance(
    pool: &Pool,
    timeout_secs: u64,
    cutoff_ms: i64,
) -> AppResult<f64> {
    let rows = distance_rows(pool, timeout_secs, cutoff_ms).await?;
    let total: f64 = rows
        .iter()
        .map(|(_, min_odo, max_odo)| (max_odo - min_odo).max(0.0))
        .sum();
    Ok(round2(total))
}

pub async fn vehicle_distance_details(
    pool: &Pool,
    timeout_secs: u64,
    cutoff_ms: i64,
    time_window: f64,
) -> AppResult<Vec<VehicleDistance>> {
    let rows = distance_rows(pool, timeout_secs, cutoff_ms).await?;
    Ok(rows
        .into_iter()
        .map(|(vehicle_vin, start_odometer, end_odometer)| VehicleDistance {
            vehicle_vin,
            start_odometer,
            end_odometer,
            distance_traveled: (end_odometer - start_odometer).max(0.0),
            time_window,
        })
        .collect())
}

/// Activity for every known vehicle, including ones that have never reported.
pub async fn vehicle_activity_details(
    pool: &Pool,
    timeout_secs: u64,
    now_ms: i64,
    time_window: f64,
) -> AppResult<Vec<VehicleActivity>> {
    let rows: Vec<(String, Option<i64>)> = with_conn(pool, timeout_secs, move |conn| {
        let mut stmt = conn.prepare(
            "SELECT v.vin, MAX(t.timestamp)
             FROM vehicles v
             LEFT JOIN telemetry t ON t.vehicle_vin = v.vin
             GROUP BY v.vin
             ORDER BY v.vin",
        )?;
        let rows = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })
    .await?;

    Ok(rows
        .into_iter()
        .map(|(vehicle_vin, last_ms)| match last_ms {
            Some(last_ms) => {
                let hours_inactive = (now_ms - last_ms) as f64 / 3_600_000.0;
                VehicleActivity {
                    vehicle_vin,
                    is_active: hours_inactive < time_window,
                    last_telemetry_time: Some(millis_to_datetime(last_ms)),
                    hours_inactive: Some(round2(hours_inactive)),
                }
            }
            // Never reported: inactive, with null sentinels for "never"
            None => VehicleActivity {
                vehicle_vin,
                is_active: false,
                last_telemetry_time: None,
                hours_inactive: None,
            },
        })
        .collect())
}

/// Latest reading per vehicle compared against the fuel thresholds. Both
/// checks are inclusive (`<=`). The fleet filter is intentionally not applied
/// here; see DESIGN.md.
pub async fn vehicle_fuel_status(
    pool: &Pool,
    timeout_secs: u64,
    low_threshold: f64,
    critical_threshold: f64,
) -> AppResult<Vec<VehicleFuelStatus>> {
    let rows: Vec<(String, f64, i64)> = with_conn(pool, timeout_secs, move |conn| {
        let mut stmt = conn.prepare(
            "WITH latest AS (
                 SELECT vehicle_vin, fuel_battery_level, timestamp,
                        ROW_NUMBER() OVER (
                            PARTITION BY vehicle_vin
                            ORDER BY timestamp DESC, id DESC
                        ) AS rn
                 FROM telemetry
             )
             SELECT vehicle_vin, fuel_battery_level, timestamp
             FROM latest WHERE rn = 1
             ORDER BY vehicle_vin",
        )?;
        let rows = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })
    .await?;

    Ok(rows
        .into_iter()
        .map(|(vehicle_vin, fuel_level, last_ms)| VehicleFuelStatus {
            vehicle_vin,
            current_fuel_level: fuel_level,
            last_updated: millis_to_datetime(last_ms),
            is_low_fuel: fuel_level <= low_threshold,
            is_critical_fuel: fuel_level <= critical_threshold,
        })
        .collect())
}

/// Alert counts created within the window, grouped by type and by severity
/// independently, plus the total.
pub async fn alert_counts(
    pool: &Pool,
    timeout_secs: u64,
    cutoff_ms: i64,
) -> AppResult<(BTreeMap<String, i64>, BTreeMap<String, i64>, i64)> {
    with_conn(pool, timeout_secs, move |conn| {
        let mut by_type = BTreeMap::new();
        let mut stmt = conn.prepare(
            "SELECT alert_type, COUNT(*) FROM alerts
             WHERE created_at >= ?1 GROUP BY alert_type",
        )?;
        let rows = stmt.query_map(params![cutoff_ms], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
        })?;
        for row in rows {
            let (alert_type, count) = row?;
            by_type.insert(alert_type, count);
        }

        let mut by_severity = BTreeMap::new();
        let mut stmt = conn.prepare(
            "SELECT severity, COUNT(*) FROM alerts
             WHERE created_at >= ?1 GROUP BY severity",
        )?;
        let rows = stmt.query_map(params![cutoff_ms], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
        })?;
        for row in rows {
            let (severity, count) = row?;
            by_severity.insert(severity, count);
        }

        let total: i64 = conn.query_row(
            "SELECT COUNT(*) FROM alerts WHERE created_at >= ?1",
            params![cutoff_ms],
            |row| row.get(0),
        )?;

        Ok((by_type, by_severity, total))
    })
    .await
}
