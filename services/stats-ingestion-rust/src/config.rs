//! Runtime configuration.
//!
//! Everything comes from the environment. When `DATABASE_URL` is absent the
//! URL is assembled from `DB_*` parts and the password is read from
//! `DB_PASSWORD` or the `/run/secrets/db_password` file.

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::pipeline::{PipelineOptions, WatermarkPolicy};

pub const DEFAULT_API_BASE_URL: &str = "https://statsapi.web.nhl.com/api/v1";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{0} is set but empty")]
    Empty(&'static str),

    #[error("{key} has invalid value '{value}': {reason}")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },

    #[error("database password missing: set DATABASE_URL, DB_PASSWORD or mount {path}")]
    MissingPassword { path: String },
}

/// Configuration
#[derive(Clone, Debug)]
pub struct Config {
    pub database_url: String,
    pub db_connect_retries: u32,
    pub api_base_url: String,
    pub watermark_path: PathBuf,
    /// `None` means requests may block indefinitely
    pub request_timeout: Option<Duration>,
    pub requests_per_minute: u32,
    pub watermark_policy: WatermarkPolicy,
    pub load_games: bool,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok(), "/run/secrets/db_password")
    }

    /// Builds a config from an arbitrary variable source. `from_env` is the
    /// only production caller; tests pass a map.
    pub fn from_lookup<F>(lookup: F, password_secret_path: &str) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let database_url = match lookup("DATABASE_URL") {
            Some(v) if !v.trim().is_empty() => v,
            Some(_) => return Err(ConfigError::Empty("DATABASE_URL")),
            None => {
                let db_user = lookup("DB_USER").unwrap_or_else(|| "stats".to_string());
                let db_name = lookup("DB_NAME").unwrap_or_else(|| "stats".to_string());
                let db_host = lookup("DB_HOST").unwrap_or_else(|| "postgres".to_string());
                let db_port = lookup("DB_PORT").unwrap_or_else(|| "5432".to_string());

                let db_password = match lookup("DB_PASSWORD") {
                    Some(v) if !v.trim().is_empty() => v,
                    Some(_) => return Err(ConfigError::Empty("DB_PASSWORD")),
                    None => read_secret_file(password_secret_path)?,
                };

                format!(
                    "postgresql://{}:{}@{}:{}/{}",
                    db_user, db_password, db_host, db_port, db_name
                )
            }
        };

        let api_base_url = match lookup("STATS_API_BASE_URL") {
            Some(v) if !v.trim().is_empty() => v.trim().trim_end_matches('/').to_string(),
            Some(_) => return Err(ConfigError::Empty("STATS_API_BASE_URL")),
            None => DEFAULT_API_BASE_URL.to_string(),
        };

        let request_timeout = match lookup("REQUEST_TIMEOUT_SECONDS") {
            Some(v) => Some(Duration::from_secs(parse_number(
                "REQUEST_TIMEOUT_SECONDS",
                &v,
            )?)),
            None => None,
        };

        let requests_per_minute = match lookup("REQUESTS_PER_MINUTE") {
            Some(v) => {
                let n: u32 = parse_number("REQUESTS_PER_MINUTE", &v)?;
                if n == 0 {
                    return Err(ConfigError::Invalid {
                        key: "REQUESTS_PER_MINUTE",
                        value: v,
                        reason: "must be greater than zero".to_string(),
                    });
                }
                n
            }
            None => 120,
        };

        let watermark_policy = match lookup("WATERMARK_ADVANCE") {
            Some(v) => v.parse().map_err(|reason| ConfigError::Invalid {
                key: "WATERMARK_ADVANCE",
                value: v.clone(),
                reason,
            })?,
            None => WatermarkPolicy::AfterCommit,
        };

        let load_games = match lookup("LOAD_GAMES") {
            Some(v) => parse_bool("LOAD_GAMES", &v)?,
            None => true,
        };

        Ok(Self {
            database_url,
            db_connect_retries: match lookup("DB_CONNECT_RETRIES") {
                Some(v) => parse_number("DB_CONNECT_RETRIES", &v)?,
                None => 3,
            },
            api_base_url,
            watermark_path: lookup("WATERMARK_PATH")
                .filter(|v| !v.trim().is_empty())
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("last_update.txt")),
            request_timeout,
            requests_per_minute,
            watermark_policy,
            load_games,
        })
    }

    pub fn pipeline_options(&self) -> PipelineOptions {
        PipelineOptions {
            watermark_policy: self.watermark_policy,
            load_games: self.load_games,
        }
    }
}

fn read_secret_file(file_path: &str) -> Result<String, ConfigError> {
    std::fs::read_to_string(file_path)
        .map(|s| s.trim().to_string())
        .ok()
        .filter(|s| !s.is_empty())
        .ok_or_else(|| ConfigError::MissingPassword {
            path: file_path.to_string(),
        })
}

fn parse_number<T>(key: &'static str, value: &str) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    value.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
        key,
        value: value.to_string(),
        reason: e.to_string(),
    })
}

fn parse_bool(key: &'static str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_lowercase().as_str() {
        "true" | "1" | "yes" => Ok(true),
        "false" | "0" | "no" => Ok(false),
        _ => Err(ConfigError::Invalid {
            key,
            value: value.to_string(),
            reason: "expected true or false".to_string(),
        }),
    }
}
