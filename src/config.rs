//! Process configuration, sourced from the environment (`.env` + real env).
//!
//! Mirrors the teacher's own `env::var`-driven setup in `main.rs` and
//! `DataSourceKillSwitch::new`: read with a sane default, never panic on a
//! missing optional value.

use std::env;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub influx_url: String,
    pub influx_org: String,
    pub influx_token: String,
    pub influx_bucket_market_data: String,
    pub influx_bucket_symbol_management: String,
    pub redis_url: String,
    pub log_filter: String,
    pub metrics_port: Option<u16>,
}

impl AppConfig {
    /// Load from `.env` (if present) and the process environment.
    pub fn from_env() -> Self {
        dotenv::dotenv().ok();

        Self {
            influx_url: env_or("INFLUX_URL", "http://localhost:8086"),
            influx_org: env_or("INFLUX_ORG", "market-data"),
            influx_token: env::var("INFLUX_TOKEN").unwrap_or_default(),
            influx_bucket_market_data: env_or("INFLUX_BUCKET", "market_data"),
            influx_bucket_symbol_management: env_or(
                "INFLUX_SYMBOL_BUCKET",
                "symbol_management",
            ),
            redis_url: env_or("REDIS_URL", "redis://127.0.0.1:6379"),
            log_filter: env_or("RUST_LOG", "info"),
            metrics_port: env::var("METRICS_PORT")
                .ok()
                .and_then(|v| v.parse::<u16>().ok()),
        }
    }
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}
