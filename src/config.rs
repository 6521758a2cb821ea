//! Runtime configuration for the Mission Control server.
//!
//! Settings load from an optional YAML file and are overridden by
//! `MISSION_CONTROL_*` environment variables, so the same binary runs in dev
//! (file-based) and under a process manager (env-based) without edits.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Default HTTP bind port.
pub const DEFAULT_PORT: u16 = 8000;

/// Typed runtime configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Deployment environment name ("dev", "staging", "prod").
    #[serde(default = "default_environment")]
    pub environment: String,

    /// Path to the SQLite database file.
    #[serde(default = "default_database_path")]
    pub database_path: PathBuf,

    /// Host interface to bind.
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to bind (default: 8000).
    #[serde(default = "default_port")]
    pub port: u16,

    /// Externally reachable base URL, embedded in onboarding prompts.
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// JWKS endpoint of the identity provider. Empty disables user auth.
    #[serde(default)]
    pub jwks_url: String,

    /// Comma-separated CORS origins; empty allows any origin (dev).
    #[serde(default)]
    pub cors_origins: String,

    /// Timeout in seconds for outbound gateway calls.
    #[serde(default = "default_gateway_timeout_secs")]
    pub gateway_timeout_secs: u64,

    /// Log filter directive (tracing env-filter syntax).
    #[serde(default = "default_log_filter")]
    pub log_filter: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            environment: default_environment(),
            database_path: default_database_path(),
            host: default_host(),
            port: default_port(),
            base_url: default_base_url(),
            jwks_url: String::new(),
            cors_origins: String::new(),
            gateway_timeout_secs: default_gateway_timeout_secs(),
            log_filter: default_log_filter(),
        }
    }
}

fn default_environment() -> String {
    "dev".to_string()
}

fn default_database_path() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("mission-control")
        .join("mission_control.db")
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_base_url() -> String {
    format!("http://localhost:{DEFAULT_PORT}")
}

fn default_gateway_timeout_secs() -> u64 {
    20
}

fn default_log_filter() -> String {
    "info".to_string()
}

impl Settings {
    /// Load settings from a YAML file (if present), then apply env overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut settings = match path {
            Some(path) => {
                let raw = std::fs::read_to_string(path)
                    .with_context(|| format!("reading config file {}", path.display()))?;
                serde_yaml::from_str(&raw)
                    .with_context(|| format!("parsing config file {}", path.display()))?
            }
            None => Self::default(),
        };
        settings.apply_env_overrides();
        Ok(settings)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("MISSION_CONTROL_ENVIRONMENT") {
            self.environment = v;
        }
        if let Ok(v) = std::env::var("MISSION_CONTROL_DATABASE_PATH") {
            self.database_path = PathBuf::from(v);
        }
        if let Ok(v) = std::env::var("MISSION_CONTROL_HOST") {
            self.host = v;
        }
        if let Ok(v) = std::env::var("MISSION_CONTROL_PORT")
            && let Ok(port) = v.parse()
        {
            self.port = port;
        }
        if let Ok(v) = std::env::var("MISSION_CONTROL_BASE_URL") {
            self.base_url = v;
        }
        if let Ok(v) = std::env::var("MISSION_CONTROL_JWKS_URL") {
            self.jwks_url = v;
        }
        if let Ok(v) = std::env::var("MISSION_CONTROL_CORS_ORIGINS") {
            self.cors_origins = v;
        }
        if let Ok(v) = std::env::var("MISSION_CONTROL_GATEWAY_TIMEOUT_SECS")
            && let Ok(secs) = v.parse()
        {
            self.gateway_timeout_secs = secs;
        }
        if let Ok(v) = std::env::var("MISSION_CONTROL_LOG_FILTER") {
            self.log_filter = v;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let settings = Settings::default();
        assert_eq!(settings.port, DEFAULT_PORT);
        assert_eq!(settings.environment, "dev");
        assert!(settings.jwks_url.is_empty());
    }

    #[test]
    fn yaml_partial_config_fills_defaults() {
        let settings: Settings = serde_yaml::from_str("port: 9100\nenvironment: prod\n").unwrap();
        assert_eq!(settings.port, 9100);
        assert_eq!(settings.environment, "prod");
        assert_eq!(settings.gateway_timeout_secs, 20);
    }
}
