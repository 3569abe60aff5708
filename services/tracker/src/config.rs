//! Configuration types for the tracker service

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub realtime: RealtimeConfig,
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub sync: SyncConfig,
    #[serde(default)]
    pub control: ControlConfig,
}

/// Realtime database connection
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RealtimeConfig {
    #[serde(default = "default_realtime_url")]
    pub base_url: String,
    #[serde(default)]
    pub auth_token: Option<String>,
    /// Environment variable holding `auth_token`
    #[serde(default)]
    pub auth_token_env: Option<String>,
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self {
            base_url: default_realtime_url(),
            auth_token: None,
            auth_token_env: None,
        }
    }
}

/// Backend REST API connection
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_api_url")]
    pub base_url: String,
    /// Bearer token for mutating calls
    #[serde(default)]
    pub token: Option<String>,
    /// Environment variable holding `token`
    #[serde(default)]
    pub token_env: Option<String>,
    /// Customer that newly registered devices belong to
    #[serde(default)]
    pub customer_id: Option<String>,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: default_api_url(),
            token: None,
            token_env: None,
            customer_id: None,
        }
    }
}

/// Refresh scheduling and preference persistence
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    #[serde(default = "default_polling_interval")]
    pub polling_interval_seconds: u64,
    /// JSON file for per-device source preferences; in-memory when unset
    #[serde(default)]
    pub preferences_path: Option<PathBuf>,
}

impl SyncConfig {
    pub fn polling_interval(&self) -> Duration {
        Duration::from_secs(self.polling_interval_seconds)
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            polling_interval_seconds: default_polling_interval(),
            preferences_path: None,
        }
    }
}

/// Control API configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControlConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_control_port")]
    pub port: u16,
    #[serde(default = "default_history_size")]
    pub history_size: usize,
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            port: default_control_port(),
            history_size: default_history_size(),
        }
    }
}

impl Config {
    /// Fill tokens from the environment variables named in the config
    pub fn resolve_secrets(&mut self) -> crate::Result<()> {
        if let Some(var) = &self.api.token_env {
            self.api.token = Some(read_env(var)?);
        }
        if let Some(var) = &self.realtime.auth_token_env {
            self.realtime.auth_token = Some(read_env(var)?);
        }
        Ok(())
    }

    pub fn validate(&self) -> crate::Result<()> {
        if self.sync.polling_interval_seconds == 0 {
            return Err(crate::TrackerError::Config(
                "polling_interval_seconds must be greater than zero".to_string(),
            ));
        }
        for (name, url) in [
            ("realtime.base_url", &self.realtime.base_url),
            ("api.base_url", &self.api.base_url),
        ] {
            if !(url.starts_with("http://") || url.starts_with("https://")) {
                return Err(crate::TrackerError::Config(format!(
                    "{} must be an http(s) URL, got '{}'",
                    name, url
                )));
            }
        }
        Ok(())
    }
}

fn read_env(var: &str) -> crate::Result<String> {
    std::env::var(var).map_err(|_| {
        crate::TrackerError::Config(format!("Environment variable {} is not set", var))
    })
}

fn default_realtime_url() -> String {
    "http://localhost:9000".to_string()
}

fn default_api_url() -> String {
    "http://localhost:8080/api".to_string()
}

fn default_polling_interval() -> u64 {
    30
}

fn default_true() -> bool {
    true
}

fn default_control_port() -> u16 {
    11120
}

fn default_history_size() -> usize {
    100
}

/// Load configuration from a JSON file
pub fn load_config(path: &Path) -> crate::Result<Config> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        crate::TrackerError::Config(format!("Failed to read config file {:?}: {}", path, e))
    })?;
    let config: Config = serde_json::from_str(&content)?;
    config.validate()?;
    Ok(config)
}
