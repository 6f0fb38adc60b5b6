use crate::analytics::cache::AnalyticsCache;
use crate::analytics::queries;
use crate::analytics::types::*;
use crate::analytics::validate;
use crate::analytics::AnalyticsState;
use crate::error::{AppError, AppResult};
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::Json;
use chrono::Utc;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Instant;

fn fmt_hours(hours: f64) -> String {
    format!("{hours}")
}

// Canonical cache keys, shared by the endpoints and the warm-up path so a
// refresh repopulates exactly the entries the handlers will read.
fn fleet_key(fleet_id: Option<&str>, time_window: f64) -> String {
    AnalyticsCache::cache_key("fleet_analytics", fleet_id, &[&fmt_hours(time_window)])
}

fn activity_key(fleet_id: Option<&str>, time_window: f64, threshold: f64) -> String {
    AnalyticsCache::cache_key(
        "activity_status",
        fleet_id,
        &[&fmt_hours(time_window), &fmt_hours(threshold)],
    )
}

fn fuel_key(fleet_id: Option<&str>) -> String {
    AnalyticsCache::cache_key("fuel_analytics", fleet_id, &[])
}

fn distance_key(fleet_id: Option<&str>, time_window: f64) -> String {
    AnalyticsCache::cache_key("distance_analytics", fleet_id, &[&fmt_hours(time_window)])
}

fn alert_summary_key(fleet_id: Option<&str>, time_window: f64, resolved: Option<bool>) -> String {
    let resolved = match resolved {
        None => "all",
        Some(true) => "true",
        Some(false) => "false",
    };
    AnalyticsCache::cache_key(
        "alert_summary",
        fleet_id,
        &[&fmt_hours(time_window), resolved],
    )
}

fn respond_value(
    data: serde_json::Value,
    started: Instant,
    cached: bool,
    count: Option<usize>,
) -> Json<serde_json::Value> {
    let mut metadata = serde_json::json!({
        "responseTime": started.elapsed().as_millis() as u64,
        "cached": cached,
        "timestamp": Utc::now(),
    });
    if let Some(count) = count {
        metadata["count"] = count.into();
    }
    Json(serde_json::json!({
        "success": true,
        "data": data,
        "timestamp": Utc::now(),
        "metadata": metadata,
    }))
}

/// Cache hit/miss pattern shared by the cached endpoints.
macro_rules! cached_or_compute {
    ($state:expr, $key:expr, $started:expr, $compute:expr) => {{
        if let Some(cached) = $state.cache.get(&$key) {
            return Ok(respond_value(cached, $started, true, None));
        }
        let result = $compute;
        let value = serde_json::to_value(&result)
            .map_err(|e| AppError::Internal(format!("serialize: {e}")))?;
        $state.cache.set($key, value.clone(), $state.ttl());
        Ok(respond_value(value, $started, false, None))
    }};
}

// ── View computation (shared between request handlers and cache warm-up) ──

fn cutoff_ms(now_ms: i64, hours: f64) -> i64 {
    now_ms - (hours * 3_600_000.0) as i64
}

pub(crate) async fn compute_fleet_analytics(
    state: &AnalyticsState,
    fleet_id: Option<String>,
    time_window: f64,
) -> AppResult<FleetAnalytics> {
    let timeout = state.config.query_timeout_secs;
    let cutoff = cutoff_ms(Utc::now().timestamp_millis(), time_window);

    let total =
        queries::total_vehicle_count(&state.pool, timeout, fleet_id.clone()).await?;
    let active =
        queries::active_vehicle_count(&state.pool, timeout, fleet_id.clone(), cutoff).await?;
    // The two counts come from separate queries; floor the difference
    let inactive = (total - active).max(0);

    let average_fuel = queries::average_fuel_level(&state.pool, timeout, fleet_id).await?;
    let total_distance = queries::total_fleet_distance(&state.pool, timeout, cutoff).await?;
    let alert_summary = compute_alert_summary(state, time_window).await?;

    Ok(FleetAnalytics {
        active_vehicles: active,
        inactive_vehicles: inactive,
        total_vehicles: total,
        average_fuel_level: round2(average_fuel),
        total_distance_last_24h: total_distance,
        alert_summary,
        last_updated: Utc::now(),
    })
}

pub(crate) async fn compute_activity_status(
    state: &AnalyticsState,
    fleet_id: Option<String>,
    inactive_threshold: f64,
) -> AppResult<ActivityStatus> {
    let timeout = state.config.query_timeout_secs;
    let cutoff = cutoff_ms(Utc::now().timestamp_millis(), inactive_threshold);

    let total =
        queries::total_vehicle_count(&state.pool, timeout, fleet_id.clone()).await?;
    let active =
        queries::active_vehicle_count(&state.pool, timeout, fleet_id, cutoff).await?;

    Ok(ActivityStatus {
        active,
        inactive: (total - active).max(0),
        inactive_threshold,
    })
}

pub(crate) async fn compute_fuel_analytics(
    state: &AnalyticsState,
    fleet_id: Option<String>,
) -> AppResult<FuelAnalytics> {
    let timeout = state.config.query_timeout_secs;
    let average_fuel =
        queries::average_fuel_level(&state.pool, timeout, fleet_id.clone()).await?;
    // Low/critical counts run over the whole fleet regardless of the filter;
    // see DESIGN.md.
    let statuses = queries::vehicle_fuel_status(
        &state.pool,
        timeout,
        state.config.low_fuel_threshold,
        state.config.critical_fuel_threshold,
    )
    .await?;

    Ok(FuelAnalytics {
        average_fuel_level: round2(average_fuel),
        low_fuel_vehicles: statuses.iter().filter(|s| s.is_low_fuel).count() as i64,
        critical_fuel_vehicles: statuses.iter().filter(|s| s.is_critical_fuel).count() as i64,
        fleet_id,
        last_updated: Utc::now(),
    })
}

pub(crate) async fn compute_distance_analytics(
    state: &AnalyticsState,
    fleet_id: Option<String>,
    time_window: f64,
) -> AppResult<DistanceAnalytics> {
    let timeout = state.config.query_timeout_secs;
    let cutoff = cutoff_ms(Utc::now().timestamp_millis(), time_window);

    let total_distance = queries::total_fleet_distance(&state.pool, timeout, cutoff).await?;
    let details =
        queries::vehicle_distance_details(&state.pool, timeout, cutoff, time_window).await?;
    let vehicle_count = details.len() as i64;
    let average = if vehicle_count > 0 {
        round2(total_distance / vehicle_count as f64)
    } else {
        0.0
    };

    Ok(DistanceAnalytics {
        total_distance,
        average_distance_per_vehicle: average,
        time_window,
        vehicle_count,
        fleet_id,
        last_updated: Utc::now(),
    })
}

pub(crate) async fn compute_alert_summary(
    state: &AnalyticsState,
    time_window: f64,
) -> AppResult<AlertSummary> {
    let timeout = state.config.query_timeout_secs;
    let cutoff = cutoff_ms(Utc::now().timestamp_millis(), time_window);
    let (by_type, by_severity, total) =
        queries::alert_counts(&state.pool, timeout, cutoff).await?;

    Ok(AlertSummary {
        by_type,
        by_severity,
        total,
        time_window,
        last_updated: Utc::now(),
    })
}

// ── Endpoints ──

/// GET /analytics/fleet
pub async fn fleet_analytics(
    State(state): State<Arc<AnalyticsState>>,
    Query(raw): Query<RawAnalyticsQuery>,
) -> AppResult<Json<serde_json::Value>> {
    let started = Instant::now();
    let params = validate::analytics_query(&raw, &state.config)?;
    let time_window = params
        .time_window
        .unwrap_or(state.config.default_time_window_hours);
    let key = fleet_key(params.fleet_id.as_deref(), time_window);

    cached_or_compute!(state, key, started, {
        compute_fleet_analytics(&state, params.fleet_id.clone(), time_window).await?
    })
}

/// GET /analytics/activity
pub async fn activity_status(
    State(state): State<Arc<AnalyticsState>>,
    Query(raw): Query<RawAnalyticsQuery>,
) -> AppResult<Json<serde_json::Value>> {
    let started = Instant::now();
    let params = validate::activity_query(&raw, &state.config)?;
    let time_window = params
        .base
        .time_window
        .unwrap_or(state.config.default_time_window_hours);
    let threshold = params
        .inactive_threshold
        .unwrap_or(state.config.default_inactive_threshold_hours);
    let key = activity_key(params.base.fleet_id.as_deref(), time_window, threshold);

    cached_or_compute!(state, key, started, {
        compute_activity_status(&state, params.base.fleet_id.clone(), threshold).await?
    })
}

/// GET /analytics/fuel
pub async fn fuel_analytics(
    State(state): State<Arc<AnalyticsState>>,
    Query(raw): Query<RawAnalyticsQuery>,
) -> AppResult<Json<serde_json::Value>> {
    let started = Instant::now();
    let params = validate::analytics_query(&raw, &state.config)?;
    let key = fuel_key(params.fleet_id.as_deref());

    cached_or_compute!(state, key, started, {
        compute_fuel_analytics(&state, params.fleet_id.clone()).await?
    })
}

/// GET /analytics/distance
pub async fn distance_analytics(
    State(state): State<Arc<AnalyticsState>>,
    Query(raw): Query<RawAnalyticsQuery>,
) -> AppResult<Json<serde_json::Value>> {
    let started = Instant::now();
    let params = validate::analytics_query(&raw, &state.config)?;
    let time_window = params
        .time_window
        .unwrap_or(state.config.default_time_window_hours);
    let key = distance_key(params.fleet_id.as_deref(), time_window);

    cached_or_compute!(state, key, started, {
        compute_distance_analytics(&state, params.fleet_id.clone(), time_window).await?
    })
}

/// GET /analytics/alerts/summary
pub async fn alert_summary(
    State(state): State<Arc<AnalyticsState>>,
    Query(raw): Query<RawAnalyticsQuery>,
) -> AppResult<Json<serde_json::Value>> {
    let started = Instant::now();
    let params = validate::alert_summary_query(&raw, &state.config)?;
    let time_window = params
        .base
        .time_window
        .unwrap_or(state.config.default_time_window_hours);
    let key = alert_summary_key(
        params.base.fleet_id.as_deref(),
        time_window,
        params.resolved,
    );

    cached_or_compute!(state, key, started, {
        compute_alert_summary(&state, time_window).await?
    })
}

/// GET /analytics/vehicles/activity - per-vehicle detail, uncached.
pub async fn vehicle_activity(
    State(state): State<Arc<AnalyticsState>>,
    Query(raw): Query<RawAnalyticsQuery>,
) -> AppResult<Json<serde_json::Value>> {
    let started = Instant::now();
    let params = validate::activity_query(&raw, &state.config)?;
    let time_window = params
        .base
        .time_window
        .unwrap_or(state.config.default_time_window_hours);

    let activities = queries::vehicle_activity_details(
        &state.pool,
        state.config.query_timeout_secs,
        Utc::now().timestamp_millis(),
        time_window,
    )
    .await?;

    let count = activities.len();
    let value = serde_json::to_value(&activities)
        .map_err(|e| AppError::Internal(format!("serialize: {e}")))?;
    Ok(respond_value(value, started, false, Some(count)))
}

/// GET /analytics/vehicles/distances - per-vehicle detail, uncached.
pub async fn vehicle_distances(
    State(state): State<Arc<AnalyticsState>>,
    Query(raw): Query<RawAnalyticsQuery>,
) -> AppResult<Json<serde_json::Value>> {
    let started = Instant::now();
    let params = validate::analytics_query(&raw, &state.config)?;
    let time_window = params
        .time_window
        .unwrap_or(state.config.default_time_window_hours);
    let cutoff = cutoff_ms(Utc::now().timestamp_millis(), time_window);

    let distances = queries::vehicle_distance_details(
        &state.pool,
        state.config.query_timeout_secs,
        cutoff,
        time_window,
    )
    .await?;

    let count = distances.len();
    let value = serde_json::to_value(&distances)
        .map_err(|e| AppError::Internal(format!("serialize: {e}")))?;
    Ok(respond_value(value, started, false, Some(count)))
}

/// GET /analytics/vehicles/fuel - per-vehicle detail, uncached.
/// Takes no parameters; the listing always covers the whole fleet.
pub async fn vehicle_fuel(
    State(state): State<Arc<AnalyticsState>>,
) -> AppResult<Json<serde_json::Value>> {
    let started = Instant::now();

    let statuses = queries::vehicle_fuel_status(
        &state.pool,
        state.config.query_timeout_secs,
        state.config.low_fuel_threshold,
        state.config.critical_fuel_threshold,
    )
    .await?;

    let count = statuses.len();
    let value = serde_json::to_value(&statuses)
        .map_err(|e| AppError::Internal(format!("serialize: {e}")))?;
    Ok(respond_value(value, started, false, Some(count)))
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshRequest {
    pub fleet_id: Option<String>,
}

/// POST /analytics/cache/refresh - Drop entries for the given scope, then warm
/// the primary views in the background. Warm-up failures are logged and
/// swallowed; the caller always gets an immediate success.
pub async fn refresh_cache(
    State(state): State<Arc<AnalyticsState>>,
    body: axum::body::Bytes,
) -> AppResult<Json<serde_json::Value>> {
    let started = Instant::now();
    // The body is optional; an empty POST refreshes every fleet
    let payload: RefreshRequest = if body.is_empty() {
        RefreshRequest::default()
    } else {
        serde_json::from_slice(&body)
            .map_err(|e| AppError::Validation(format!("invalid JSON body: {e}")))?
    };
    let fleet_id = payload.fleet_id;
    if let Some(ref fleet_id) = fleet_id {
        if fleet_id.trim().is_empty() {
            return Err(AppError::Validation(
                "Fleet ID must be a non-empty string".to_string(),
            ));
        }
    }
    let fleet_id = fleet_id.map(|f| f.trim().to_string());

    let scope = fleet_id.clone();
    let removed = state.cache.invalidate(move |key| match &scope {
        // Fleet-scoped: drop that fleet's entries and every "all" entry
        Some(fleet) => key
            .split(':')
            .any(|segment| segment == fleet || segment == "all"),
        None => true,
    });
    tracing::debug!(removed, fleet_id = ?fleet_id, "analytics cache invalidated");

    let warm_state = state.clone();
    let warm_fleet = fleet_id.clone();
    tokio::spawn(async move {
        if let Err(e) = warm_cache(&warm_state, warm_fleet.clone()).await {
            tracing::warn!(error = %e, fleet_id = ?warm_fleet, "analytics cache warm-up failed");
        }
    });

    let message = match fleet_id {
        Some(fleet) => format!("Cache refreshed for fleet {fleet}"),
        None => "Cache refreshed for all fleets".to_string(),
    };
    Ok(Json(serde_json::json!({
        "success": true,
        "message": message,
        "timestamp": Utc::now(),
        "metadata": {
            "responseTime": started.elapsed().as_millis() as u64,
            "timestamp": Utc::now(),
        },
    })))
}

/// Recompute and store the five primary views for a scope with default
/// parameters.
async fn warm_cache(state: &Arc<AnalyticsState>, fleet_id: Option<String>) -> AppResult<()> {
    let time_window = state.config.default_time_window_hours;
    let threshold = state.config.default_inactive_threshold_hours;
    let ttl = state.ttl();
    let fleet = fleet_id.as_deref();

    let view = compute_fleet_analytics(state, fleet_id.clone(), time_window).await?;
    state.cache.set(fleet_key(fleet, time_window), to_value(&view)?, ttl);

    let view = compute_activity_status(state, fleet_id.clone(), threshold).await?;
    state.cache.set(
        activity_key(fleet, time_window, threshold),
        to_value(&view)?,
        ttl,
    );

    let view = compute_fuel_analytics(state, fleet_id.clone()).await?;
    state.cache.set(fuel_key(fleet), to_value(&view)?, ttl);

    let view = compute_distance_analytics(state, fleet_id.clone(), time_window).await?;
    state
        .cache
        .set(distance_key(fleet, time_window), to_value(&view)?, ttl);

    let view = compute_alert_summary(state, time_window).await?;
    state.cache.set(
        alert_summary_key(fleet, time_window, None),
        to_value(&view)?,
        ttl,
    );

    Ok(())
}

fn to_value<T: serde::Serialize>(view: &T) -> AppResult<serde_json::Value> {
    serde_json::to_value(view).map_err(|e| AppError::Internal(format!("serialize: {e}")))
}

/// GET /health - Liveness, store connectivity and cache stats.
pub async fn health(
    State(state): State<Arc<AnalyticsState>>,
) -> (StatusCode, Json<serde_json::Value>) {
    let started = Instant::now();
    let db_ok = queries::with_conn(&state.pool, state.config.query_timeout_secs, |conn| {
        conn.execute_batch("SELECT 1")
    })
    .await
    .is_ok();

    let response_time = started.elapsed().as_millis() as u64;
    let status = if !db_ok {
        "unhealthy"
    } else if response_time < 500 {
        "healthy"
    } else {
        "degraded"
    };
    let http_status = if db_ok {
        StatusCode::OK
    } else {
        StatusCode::INTERNAL_SERVER_ERROR
    };

    (
        http_status,
        Json(serde_json::json!({
            "status": status,
            "database": if db_ok { "connected" } else { "disconnected" },
            "cache": state.cache.stats(),
            "responseTime": response_time,
            "timestamp": Utc::now(),
        })),
    )
}
