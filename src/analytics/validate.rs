use crate::analytics::types::{
    ActivityQuery, AlertSummaryQuery, AnalyticsQuery, RawAnalyticsQuery,
};
use crate::config::AnalyticsConfig;
use crate::error::{AppError, AppResult, FieldError};
use chrono::{DateTime, Utc};

/// Parse an hours value: positive, bounded by the configured maximum.
fn parse_hours(
    raw: &str,
    field: &str,
    max_hours: f64,
    errors: &mut Vec<FieldError>,
) -> Option<f64> {
    match raw.trim().parse::<f64>() {
        Ok(hours) if hours > 0.0 && hours <= max_hours && hours.is_finite() => Some(hours),
        _ => {
            errors.push(FieldError::new(
                field,
                &format!("{field} must be a positive number of hours (max {max_hours})"),
                Some(raw.into()),
            ));
            None
        }
    }
}

fn parse_timestamp(raw: &str, field: &str, errors: &mut Vec<FieldError>) -> Option<DateTime<Utc>> {
    match DateTime::parse_from_rfc3339(raw.trim()) {
        Ok(dt) => Some(dt.with_timezone(&Utc)),
        Err(_) => {
            errors.push(FieldError::new(
                field,
                &format!("{field} must be a valid ISO date string"),
                Some(raw.into()),
            ));
            None
        }
    }
}

fn validate_base(
    raw: &RawAnalyticsQuery,
    config: &AnalyticsConfig,
    errors: &mut Vec<FieldError>,
) -> AnalyticsQuery {
    let mut query = AnalyticsQuery::default();

    if let Some(ref fleet_id) = raw.fleet_id {
        let trimmed = fleet_id.trim();
        if trimmed.is_empty() {
            errors.push(FieldError::new(
                "fleetId",
                "Fleet ID must be a non-empty string",
                Some(fleet_id.as_str().into()),
            ));
        } else {
            query.fleet_id = Some(trimmed.to_string());
        }
    }

    if let Some(ref tw) = raw.time_window {
        query.time_window = parse_hours(tw, "timeWindow", config.max_time_window_hours, errors);
    }

    if let Some(ref start) = raw.start_time {
        query.start_time = parse_timestamp(start, "startTime", errors);
    }
    if let Some(ref end) = raw.end_time {
        query.end_time = parse_timestamp(end, "endTime", errors);
    }
    if let (Some(start), Some(end)) = (query.start_time, query.end_time) {
        if start >= end {
            errors.push(FieldError::new(
                "timeRange",
                "Start time must be before end time",
                Some(serde_json::json!({
                    "startTime": raw.start_time,
                    "endTime": raw.end_time,
                })),
            ));
        }
    }

    query
}

/// Validate the shared analytics parameters, collecting every field error.
pub fn analytics_query(
    raw: &RawAnalyticsQuery,
    config: &AnalyticsConfig,
) -> AppResult<AnalyticsQuery> {
    let mut errors = Vec::new();
    let query = validate_base(raw, config, &mut errors);
    if errors.is_empty() {
        Ok(query)
    } else {
        Err(AppError::ValidationFields(errors))
    }
}

/// Activity parameters: the shared set plus the inactivity threshold.
pub fn activity_query(
    raw: &RawAnalyticsQuery,
    config: &AnalyticsConfig,
) -> AppResult<ActivityQuery> {
    let mut errors = Vec::new();
    let base = validate_base(raw, config, &mut errors);

    let mut inactive_threshold = None;
    if let Some(ref threshold) = raw.inactive_threshold {
        inactive_threshold = parse_hours(
            threshold,
            "inactiveThreshold",
            config.max_time_window_hours,
            &mut errors,
        );
    }

    if errors.is_empty() {
        Ok(ActivityQuery {
            base,
            inactive_threshold,
        })
    } else {
        Err(AppError::ValidationFields(errors))
    }
}

/// Alert summary parameters: the shared set plus a bool-like `resolved`.
pub fn alert_summary_query(
    raw: &RawAnalyticsQuery,
    config: &AnalyticsConfig,
) -> AppResult<AlertSummaryQuery> {
    let mut errors = Vec::new();
    let base = validate_base(raw, config, &mut errors);

    let mut resolved = None;
    if let Some(ref value) = raw.resolved {
        match value.trim() {
            "true" => resolved = Some(true),
            "false" => resolved = Some(false),
            _ => errors.push(FieldError::new(
                "resolved",
                "Resolved must be a boolean value",
                Some(value.as_str().into()),
            )),
        }
    }

    if errors.is_empty() {
        Ok(AlertSummaryQuery { base, resolved })
    } else {
        Err(AppError::ValidationFields(errors))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> AnalyticsConfig {
        AnalyticsConfig::default()
    }

    fn fields(err: AppError) -> Vec<String> {
        match err {
            AppError::ValidationFields(errors) => {
                errors.into_iter().map(|e| e.field).collect()
            }
            other => panic!("expected field errors, got {other:?}"),
        }
    }

    #[test]
    fn accepts_defaults_and_normalizes_fleet_id() {
        let raw = RawAnalyticsQuery {
            fleet_id: Some("  F1  ".to_string()),
            time_window: Some("24".to_string()),
            ..Default::default()
        };
        let query = analytics_query(&raw, &config()).unwrap();
        assert_eq!(query.fleet_id.as_deref(), Some("F1"));
        assert_eq!(query.time_window, Some(24.0));
    }

    #[test]
    fn rejects_zero_time_window() {
        let raw = RawAnalyticsQuery {
            time_window: Some("0".to_string()),
            ..Default::default()
        };
        let err = analytics_query(&raw, &config()).unwrap_err();
        assert_eq!(fields(err), vec!["timeWindow"]);
    }

    #[test]
    fn rejects_time_window_over_one_year() {
        let raw = RawAnalyticsQuery {
            time_window: Some("9000".to_string()),
            ..Default::default()
        };
        let err = analytics_query(&raw, &config()).unwrap_err();
        assert_eq!(fields(err), vec!["timeWindow"]);
    }

    #[test]
    fn rejects_inverted_time_range() {
        let raw = RawAnalyticsQuery {
            start_time: Some("2025-06-02T00:00:00Z".to_string()),
            end_time: Some("2025-06-01T00:00:00Z".to_string()),
            ..Default::default()
        };
        let err = analytics_query(&raw, &config()).unwrap_err();
        assert_eq!(fields(err), vec!["timeRange"]);
    }

    #[test]
    fn rejects_unparseable_timestamps() {
        let raw = RawAnalyticsQuery {
            start_time: Some("yesterday".to_string()),
            ..Default::default()
        };
        let err = analytics_query(&raw, &config()).unwrap_err();
        assert_eq!(fields(err), vec!["startTime"]);
    }

    #[test]
    fn collects_every_field_error_at_once() {
        let raw = RawAnalyticsQuery {
            fleet_id: Some("   ".to_string()),
            time_window: Some("-5".to_string()),
            inactive_threshold: Some("never".to_string()),
            ..Default::default()
        };
        let err = activity_query(&raw, &config()).unwrap_err();
        let mut names = fields(err);
        names.sort();
        assert_eq!(names, vec!["fleetId", "inactiveThreshold", "timeWindow"]);
    }

    #[test]
    fn resolved_accepts_only_bool_strings() {
        let mut raw = RawAnalyticsQuery {
            resolved: Some("true".to_string()),
            ..Default::default()
        };
        assert_eq!(
            alert_summary_query(&raw, &config()).unwrap().resolved,
            Some(true)
        );

        raw.resolved = Some("maybe".to_string());
        let err = alert_summary_query(&raw, &config()).unwrap_err();
        assert_eq!(fields(err), vec!["resolved"]);
    }
}
