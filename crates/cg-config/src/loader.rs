//! Configuration loader with file and environment variable support

use crate::{AppConfig, ConfigError};
use std::env;
use std::path::PathBuf;
use tracing::info;

/// Standard config file search paths
const CONFIG_PATHS: &[&str] = &[
    "coursegate.toml",
    "config.toml",
    "./config/coursegate.toml",
    "/etc/coursegate/config.toml",
];

/// Configuration loader
pub struct ConfigLoader {
    config_path: Option<PathBuf>,
}

impl ConfigLoader {
    pub fn new() -> Self {
        Self { config_path: None }
    }

    /// Create a loader with a specific config file path
    pub fn with_path<P: Into<PathBuf>>(path: P) -> Self {
        Self {
            config_path: Some(path.into()),
        }
    }

    /// Load configuration from file (if found), apply environment overrides, validate
    pub fn load(&self) -> Result<AppConfig, ConfigError> {
        let mut config = AppConfig::default();

        if let Some(path) = self.find_config_file() {
            info!(?path, "Loading configuration from file");
            config = AppConfig::from_file(&path)?;
        }

        self.apply_env_overrides(&mut config);
        config.validate()?;

        Ok(config)
    }

    fn find_config_file(&self) -> Option<PathBuf> {
        if let Some(path) = &self.config_path {
            if path.exists() {
                return Some(path.clone());
            }
        }

        if let Ok(path) = env::var("COURSEGATE_CONFIG") {
            let path = PathBuf::from(path);
            if path.exists() {
                return Some(path);
            }
        }

        CONFIG_PATHS
            .iter()
            .map(PathBuf::from)
            .find(|path| path.exists())
    }

    fn apply_env_overrides(&self, config: &mut AppConfig) {
        // Store
        if let Ok(val) = env::var("COURSEGATE_DATA_DIR") {
            config.store.data_dir = val;
        }
        if let Ok(val) = env::var("COURSEGATE_PRODUCTION") {
            config.store.production = val.parse().unwrap_or(true);
        }
        if let Ok(val) = env::var("COURSEGATE_STORE_TIMEOUT_MS") {
            if let Ok(timeout) = val.parse() {
                config.store.access_timeout_ms = timeout;
            }
        }
        if let Ok(val) = env::var("COURSEGATE_COURSES_DIR") {
            config.store.courses_dir = val;
        }

        // Admission
        if let Ok(val) = env::var("COURSEGATE_COOLDOWN_MS") {
            if let Ok(ms) = val.parse() {
                config.admission.cooldown_ms = ms;
            }
        }
        if let Ok(val) = env::var("COURSEGATE_CHURN_WINDOW_MS") {
            if let Ok(ms) = val.parse() {
                config.admission.churn_window_ms = ms;
            }
        }
        if let Ok(val) = env::var("COURSEGATE_IP_CHURN_THRESHOLD") {
            if let Ok(threshold) = val.parse() {
                config.admission.ip_churn_threshold = threshold;
            }
        }

        // Audit
        if let Ok(val) = env::var("COURSEGATE_AUDIT_LOG_PATH") {
            config.audit.log_path = val;
        }
        if let Ok(val) = env::var("COURSEGATE_WEBHOOK_URL") {
            config.audit.webhook_url = val;
        }

        // Eviction
        if let Ok(val) = env::var("COURSEGATE_EVICTION_ENABLED") {
            config.eviction.enabled = val.parse().unwrap_or(true);
        }
        if let Ok(val) = env::var("COURSEGATE_EVICTION_INTERVAL_SECS") {
            if let Ok(secs) = val.parse() {
                config.eviction.sweep_interval_secs = secs;
            }
        }
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_explicit_path_is_used() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[store]\nproduction = false\ndata_dir = \"/srv/coursegate\"").unwrap();

        let config = ConfigLoader::with_path(file.path()).load().unwrap();
        assert!(!config.store.production);
        assert_eq!(config.store.data_dir, "/srv/coursegate");
    }

    #[test]
    fn test_invalid_file_is_rejected() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[admission]\nkey_length = 0").unwrap();

        let result = ConfigLoader::with_path(file.path()).load();
        assert!(matches!(result, Err(ConfigError::ValidationError(_))));
    }
}
