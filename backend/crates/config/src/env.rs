use coach_common::error::{CoachError, CoachResult};
use serde::Deserialize;
use std::env;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub database_url: String,
    pub host: String,
    pub port: u16,
    pub log_level: String,
    /// Run script analysis inside the sync request rather than detached.
    pub sync_inline: bool,
    pub analysis_timeout_secs: u64,
    pub sync_stale_after_secs: u64,
    pub auto_migrate: bool,
}

impl AppConfig {
    /// Load configuration from environment variables.
    /// Loads `.env` file if present, then reads required vars.
    pub fn from_env() -> CoachResult<Self> {
        // Best-effort .env load; ignore if missing
        let _ = dotenvy::dotenv();

        Ok(Self {
            database_url: get_var("DATABASE_URL")?,
            host: get_var_or("HOST", "0.0.0.0"),
            port: parse_var("PORT", "8080")?,
            log_level: get_var_or("LOG_LEVEL", "info"),
            sync_inline: parse_bool("SYNC_INLINE", false)?,
            analysis_timeout_secs: parse_var("ANALYSIS_TIMEOUT_SECS", "90")?,
            sync_stale_after_secs: parse_var("SYNC_STALE_AFTER_SECS", "900")?,
            auto_migrate: parse_bool("AUTO_MIGRATE", true)?,
        })
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn analysis_timeout(&self) -> Duration {
        Duration::from_secs(self.analysis_timeout_secs)
    }

    pub fn sync_stale_after(&self) -> Duration {
        Duration::from_secs(self.sync_stale_after_secs)
    }
}

fn get_var(key: &str) -> CoachResult<String> {
    env::var(key).map_err(|_| CoachError::Config(format!("{key} is required but not set")))
}

fn get_var_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_owned())
}

fn parse_var<T>(key: &str, default: &str) -> CoachResult<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    get_var_or(key, default)
        .parse()
        .map_err(|e| CoachError::Config(format!("invalid {key}: {e}")))
}

fn parse_bool(key: &str, default: bool) -> CoachResult<bool> {
    match env::var(key) {
        Err(_) => Ok(default),
        Ok(raw) => match raw.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            other => Err(CoachError::Config(format!(
                "invalid {key}: expected a boolean, got '{other}'"
            ))),
        },
    }
}
