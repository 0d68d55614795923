//! Runtime configuration: an optional file found by the `prefer` crate,
//! then environment variables layered on top, then command-line flags
//! (applied by the caller after `load()` returns).

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::constants::{
    DAEMON_SLEEP_TIME_SECONDS, DOWNLOAD_CONNECT_TIMEOUT_SECONDS, MIN_TIMEOUT_SECONDS,
};

/// Default catalog database filename, relative to the current directory.
pub const DEFAULT_DATABASE_FILENAME: &str = "fetchqueue.sqlite3";

/// Configuration file structure. Every field is optional so a missing file,
/// or a file that only sets one knob, both work; [`Settings::default`]
/// supplies the rest.
#[derive(Debug, Clone, Default, Serialize, Deserialize, prefer::FromValue)]
pub struct Config {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_root: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub concurrency: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connect_timeout_seconds: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub daemon_sleep_seconds: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_timeout_seconds: Option<i64>,
}

/// Resolved runtime settings: [`Config`] with defaults and environment
/// overrides applied. This is what the rest of the crate reads from.
#[derive(Debug, Clone)]
pub struct Settings {
    pub database_path: PathBuf,
    pub output_root: PathBuf,
    pub concurrency: usize,
    pub connect_timeout_seconds: u64,
    pub daemon_sleep_seconds: u64,
    pub min_timeout_seconds: i64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            database_path: PathBuf::from(DEFAULT_DATABASE_FILENAME),
            output_root: PathBuf::from("output"),
            concurrency: 8,
            connect_timeout_seconds: DOWNLOAD_CONNECT_TIMEOUT_SECONDS,
            daemon_sleep_seconds: DAEMON_SLEEP_TIME_SECONDS,
            min_timeout_seconds: MIN_TIMEOUT_SECONDS,
        }
    }
}

impl Config {
    /// Discover a config file via `prefer` (checks `./fetchqueue.{toml,json,...}`
    /// and the usual XDG locations under the `fetchqueue` app name). Returns
    /// an empty config if nothing is found or the file fails to parse;
    /// callers fall back to [`Settings::default`] plus environment overrides.
    pub async fn load() -> Self {
        match prefer::load("fetchqueue").await {
            Ok(pref_config) => match pref_config.source_path() {
                Some(path) => Self::load_from_path(path).await.unwrap_or_default(),
                None => Self::default(),
            },
            Err(_) => Self::default(),
        }
    }

    pub async fn load_from_path(path: &std::path::Path) -> Result<Self, String> {
        let contents = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| format!("failed to read config file: {e}"))?;
        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("toml");
        match ext {
            "toml" => toml::from_str(&contents).map_err(|e| format!("invalid TOML config: {e}")),
            _ => serde_json::from_str(&contents).map_err(|e| format!("invalid JSON config: {e}")),
        }
    }

    fn apply_to(&self, settings: &mut Settings) {
        if let Some(ref path) = self.database_path {
            settings.database_path = PathBuf::from(path);
        }
        if let Some(ref root) = self.output_root {
            settings.output_root = PathBuf::from(root);
        }
        if let Some(n) = self.concurrency {
            settings.concurrency = n;
        }
        if let Some(t) = self.connect_timeout_seconds {
            settings.connect_timeout_seconds = t;
        }
        if let Some(s) = self.daemon_sleep_seconds {
            settings.daemon_sleep_seconds = s;
        }
        if let Some(t) = self.min_timeout_seconds {
            settings.min_timeout_seconds = t;
        }
    }
}

/// Load settings: defaults, overridden by a discovered config file,
/// overridden by `DOWNLOADER_DB_DSN` / `FETCHQUEUE_OUTPUT_ROOT` environment
/// variables, in that priority order.
pub async fn load_settings() -> Settings {
    let mut settings = Settings::default();
    Config::load().await.apply_to(&mut settings);

    if let Ok(dsn) = std::env::var("DOWNLOADER_DB_DSN") {
        if !dsn.is_empty() {
            settings.database_path = PathBuf::from(dsn);
        }
    }
    if let Ok(root) = std::env::var("FETCHQUEUE_OUTPUT_ROOT") {
        if !root.is_empty() {
            settings.output_root = PathBuf::from(root);
        }
    }

    settings
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let settings = Settings::default();
        assert_eq!(settings.concurrency, 8);
        assert_eq!(settings.min_timeout_seconds, MIN_TIMEOUT_SECONDS);
    }

    #[test]
    fn config_overrides_apply_over_defaults() {
        let mut settings = Settings::default();
        let config = Config {
            concurrency: Some(16),
            output_root: Some("/data/blobs".into()),
            ..Default::default()
        };
        config.apply_to(&mut settings);
        assert_eq!(settings.concurrency, 16);
        assert_eq!(settings.output_root, PathBuf::from("/data/blobs"));
    }
}
