use config::{Config, Environment, File};
use serde::Deserialize;
use std::path::PathBuf;

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    #[serde(default)]
    pub ingest: IngestConfig,
    #[serde(default)]
    pub analytics: AnalyticsConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Origins allowed to call the API with credentials (the dashboard).
    #[serde(default = "default_cors_origins")]
    pub cors_origins: Vec<String>,
}

fn default_cors_origins() -> Vec<String> {
    vec![
        "http://localhost:5173".to_string(),
        "http://localhost:3000".to_string(),
    ]
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    pub path: PathBuf,
    #[allow(dead_code)]
    #[serde(default = "default_pool_size")]
    pub pool_size: usize,
}

fn default_pool_size() -> usize {
    8
}

#[derive(Debug, Deserialize, Clone)]
pub struct RateLimitConfig {
    #[serde(default = "default_read_per_second")]
    pub read_per_second: u64,
    #[serde(default = "default_read_burst_size")]
    pub read_burst_size: u32,
    #[serde(default = "default_write_per_second")]
    pub write_per_second: u64,
    #[serde(default = "default_write_burst_size")]
    pub write_burst_size: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            read_per_second: default_read_per_second(),
            read_burst_size: default_read_burst_size(),
            write_per_second: default_write_per_second(),
            write_burst_size: default_write_burst_size(),
        }
    }
}

fn default_read_per_second() -> u64 {
    20
}
fn default_read_burst_size() -> u32 {
    50
}
fn default_write_per_second() -> u64 {
    5
}
fn default_write_burst_size() -> u32 {
    20
}

#[derive(Debug, Deserialize, Clone)]
pub struct IngestConfig {
    #[serde(default = "default_max_payload_bytes")]
    pub max_payload_bytes: usize,
    #[serde(default = "default_max_batch_size")]
    pub max_batch_size: usize,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            max_payload_bytes: default_max_payload_bytes(),
            max_batch_size: default_max_batch_size(),
        }
    }
}

fn default_max_payload_bytes() -> usize {
    262_144
}
fn default_max_batch_size() -> usize {
    100
}

#[derive(Debug, Deserialize, Clone)]
pub struct AnalyticsConfig {
    #[serde(default = "default_cache_ttl")]
    pub cache_ttl_secs: u64,
    /// Trailing window (hours) applied when a query does not specify one.
    #[serde(default = "default_time_window")]
    pub default_time_window_hours: f64,
    #[serde(default = "default_inactive_threshold")]
    pub default_inactive_threshold_hours: f64,
    /// Upper bound on any requested window (one year).
    #[serde(default = "default_max_time_window")]
    pub max_time_window_hours: f64,
    #[serde(default = "default_low_fuel_threshold")]
    pub low_fuel_threshold: f64,
    #[serde(default = "default_critical_fuel_threshold")]
    pub critical_fuel_threshold: f64,
    #[serde(default = "default_query_timeout")]
    pub query_timeout_secs: u64,
}

impl Default for AnalyticsConfig {
    fn default() -> Self {
        Self {
            cache_ttl_secs: default_cache_ttl(),
            default_time_window_hours: default_time_window(),
            default_inactive_threshold_hours: default_inactive_threshold(),
            max_time_window_hours: default_max_time_window(),
            low_fuel_threshold: default_low_fuel_threshold(),
            critical_fuel_threshold: default_critical_fuel_threshold(),
            query_timeout_secs: default_query_timeout(),
        }
    }
}

fn default_cache_ttl() -> u64 {
    300
}
fn default_time_window() -> f64 {
    24.0
}
fn default_inactive_threshold() -> f64 {
    24.0
}
fn default_max_time_window() -> f64 {
    8760.0
}
fn default_low_fuel_threshold() -> f64 {
    15.0
}
fn default_critical_fuel_threshold() -> f64 {
    5.0
}
fn default_query_timeout() -> u64 {
    10
}

impl AppConfig {
    /// Validate cross-field configuration rules.
    pub fn validate(&self) -> Result<(), String> {
        let a = &self.analytics;
        if !(0.0..=100.0).contains(&a.low_fuel_threshold)
            || !(0.0..=100.0).contains(&a.critical_fuel_threshold)
        {
            return Err("analytics fuel thresholds must be between 0 and 100".to_string());
        }
        if a.critical_fuel_threshold > a.low_fuel_threshold {
            return Err(
                "analytics.critical_fuel_threshold must not exceed low_fuel_threshold".to_string(),
            );
        }
        if a.max_time_window_hours <= 0.0 || a.default_time_window_hours <= 0.0 {
            return Err("analytics time windows must be positive".to_string());
        }
        if a.default_time_window_hours > a.max_time_window_hours {
            return Err(
                "analytics.default_time_window_hours must not exceed max_time_window_hours"
                    .to_string(),
            );
        }
        if a.cache_ttl_secs == 0 {
            return Err("analytics.cache_ttl_secs must be positive".to_string());
        }
        Ok(())
    }

    pub fn load(config_path: Option<&str>) -> Result<Self, config::ConfigError> {
        let mut builder = Config::builder();

        // Load from config file
        let path = config_path.unwrap_or("config.toml");
        builder = builder.add_source(File::with_name(path).required(false));

        // Overlay with environment variables (FLEETPULSE__SERVER__PORT=3001, etc.)
        builder = builder.add_source(
            Environment::with_prefix("FLEETPULSE")
                .separator("__")
                .try_parsing(true),
        );

        builder.build()?.try_deserialize()
    }
}
