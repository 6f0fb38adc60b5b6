pub mod alerts;
pub mod analytics;
pub mod config;
pub mod error;
pub mod storage;
pub mod telemetry;
pub mod types;
pub mod vehicles;
