use std::path::PathBuf;

use crate::{Error, Result};

/// Process-level configuration loaded from environment variables at startup.
/// Tuning for the scorer, cache and lifecycle lives in the settings file this
/// points at.
#[derive(Debug, Clone)]
pub struct Config {
    /// TOML settings file (`[scorer]`, `[cache]`, `[lifecycle]`, `[[symbol]]`).
    pub settings_path: PathBuf,
    /// JSON-lines feed replayed by the binary.
    pub feed_path: Option<PathBuf>,
    /// Tag attached to log lines so replicas can be told apart.
    pub instance: String,
}

impl Config {
    /// Load configuration from the environment, reading `.env` if present.
    pub fn from_env() -> Result<Self> {
        // A missing .env is normal outside development.
        if let Err(e) = dotenvy::dotenv() {
            if !e.not_found() {
                return Err(Error::Config(format!("failed to read .env: {e}")));
            }
        }

        let instance = optional_env("SENTINEL_INSTANCE").unwrap_or_else(|| "sentinel-0".to_string());
        if instance.trim().is_empty() {
            return Err(Error::Config("SENTINEL_INSTANCE must not be blank".into()));
        }

        Ok(Config {
            settings_path: optional_env("SENTINEL_SETTINGS_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("config/sentinel.toml")),
            feed_path: optional_env("SENTINEL_FEED_PATH").map(PathBuf::from),
            instance,
        })
    }

    /// The feed path, or a configuration error naming the missing variable.
    pub fn require_feed_path(&self) -> Result<&PathBuf> {
        self.feed_path
            .as_ref()
            .ok_or_else(|| Error::Config("Required environment variable 'SENTINEL_FEED_PATH' is not set".into()))
    }
}

fn optional_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.is_empty())
}
