//! CourseGate Configuration System
//!
//! TOML-based configuration with environment variable overrides.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

mod loader;

pub use loader::ConfigLoader;

/// Configuration error types
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

/// Root application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub store: StoreConfig,
    pub admission: AdmissionConfig,
    pub audit: AuditConfig,
    pub eviction: EvictionConfig,
}

/// Document store and artifact storage
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Directory holding the JSON database files
    pub data_dir: String,
    /// Use the production database file instead of the test one
    pub production: bool,
    /// Upper bound on a single document store call
    pub access_timeout_ms: u64,
    /// Directory holding uploaded course artifacts
    pub courses_dir: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            data_dir: "./data".to_string(),
            production: true,
            access_timeout_ms: 5000,
            courses_dir: "./public/courses".to_string(),
        }
    }
}

impl StoreConfig {
    /// Path of the JSON database file for the selected environment
    pub fn database_file(&self) -> PathBuf {
        let name = if self.production { "main_db.json" } else { "test_db.json" };
        Path::new(&self.data_dir).join(name)
    }

    pub fn access_timeout(&self) -> Duration {
        Duration::from_millis(self.access_timeout_ms)
    }
}

/// Rate limiting, multi-account detection and token generation
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AdmissionConfig {
    /// Minimum gap between two accepted requests from one IP
    pub cooldown_ms: u64,
    /// Window over which distinct IPs per identity are counted
    pub churn_window_ms: u64,
    /// Distinct IPs allowed per window; one more locks the identity
    pub ip_churn_threshold: usize,
    pub key_length: usize,
    pub code_group_length: usize,
    pub code_groups: usize,
    pub key_retry_limit: u32,
    pub code_retry_limit: u32,
    /// Accounts younger than this many 30-day months get no key
    pub min_account_age_months: i64,
}

impl Default for AdmissionConfig {
    fn default() -> Self {
        Self {
            cooldown_ms: 5_000,              // 5 seconds
            churn_window_ms: 3 * 60 * 60 * 1000, // 3 hours
            ip_churn_threshold: 3,
            key_length: 32,
            code_group_length: 4,
            code_groups: 3,
            key_retry_limit: 100,
            code_retry_limit: 50,
            min_account_age_months: 3,
        }
    }
}

impl AdmissionConfig {
    pub fn cooldown(&self) -> Duration {
        Duration::from_millis(self.cooldown_ms)
    }

    pub fn churn_window(&self) -> Duration {
        Duration::from_millis(self.churn_window_ms)
    }
}

/// Audit log file and optional webhook mirror
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuditConfig {
    pub log_path: String,
    /// Webhook receiving audit messages; empty disables remote dispatch
    pub webhook_url: String,
    pub webhook_username: String,
    pub webhook_timeout_ms: u64,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            log_path: "./data/logs.log".to_string(),
            webhook_url: String::new(),
            webhook_username: "Courses Logger".to_string(),
            webhook_timeout_ms: 5000,
        }
    }
}

impl AuditConfig {
    pub fn webhook(&self) -> Option<&str> {
        let url = self.webhook_url.trim();
        (!url.is_empty()).then_some(url)
    }
}

/// Background pruning of stale rate-limit and IP-history entries
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EvictionConfig {
    pub enabled: bool,
    pub sweep_interval_secs: u64,
    /// Entries older than this many windows are dropped
    pub retention_multiplier: u32,
}

impl Default for EvictionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            sweep_interval_secs: 3600,
            retention_multiplier: 4,
        }
    }
}

impl EvictionConfig {
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

impl AppConfig {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: AppConfig = toml::from_str(&content)?;
        Ok(config)
    }

    /// Load configuration with environment variable override
    pub fn load() -> Result<Self, ConfigError> {
        ConfigLoader::new().load()
    }

    /// Reject settings the admission core cannot run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        let admission = &self.admission;
        if admission.key_length == 0 {
            return Err(ConfigError::ValidationError("admission.key_length must be positive".into()));
        }
        if admission.code_group_length == 0 || admission.code_groups == 0 {
            return Err(ConfigError::ValidationError(
                "admission.code_group_length and admission.code_groups must be positive".into(),
            ));
        }
        if admission.key_retry_limit == 0 || admission.code_retry_limit == 0 {
            return Err(ConfigError::ValidationError("retry limits must be at least 1".into()));
        }
        if self.store.access_timeout_ms == 0 {
            return Err(ConfigError::ValidationError("store.access_timeout_ms must be positive".into()));
        }
        if self.eviction.enabled && self.eviction.sweep_interval_secs == 0 {
            return Err(ConfigError::ValidationError("eviction.sweep_interval_secs must be positive".into()));
        }
        Ok(())
    }

    /// Generate an example TOML configuration
    pub fn example_toml() -> String {
        r#"# CourseGate Configuration
# Environment variables (COURSEGATE_*) override these settings

[store]
data_dir = "./data"
production = true
access_timeout_ms = 5000
courses_dir = "./public/courses"

[admission]
cooldown_ms = 5000
churn_window_ms = 10800000
ip_churn_threshold = 3
key_length = 32
code_group_length = 4
code_groups = 3
key_retry_limit = 100
code_retry_limit = 50
min_account_age_months = 3

[audit]
log_path = "./data/logs.log"
webhook_url = ""  # leave empty to disable
webhook_username = "Courses Logger"
webhook_timeout_ms = 5000

[eviction]
enabled = true
sweep_interval_secs = 3600
retention_multiplier = 4
"#
        .to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_example_parses_to_defaults() {
        let parsed: AppConfig = toml::from_str(&AppConfig::example_toml()).unwrap();
        let defaults = AppConfig::default();

        assert_eq!(parsed.admission.cooldown_ms, defaults.admission.cooldown_ms);
        assert_eq!(parsed.admission.churn_window_ms, defaults.admission.churn_window_ms);
        assert_eq!(parsed.admission.ip_churn_threshold, 3);
        assert_eq!(parsed.audit.webhook(), None);
        assert!(parsed.validate().is_ok());
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[admission]\ncooldown_ms = 1000\n\n[audit]\nwebhook_url = \"https://hooks.example.com/x\"").unwrap();

        let config = AppConfig::from_file(file.path()).unwrap();
        assert_eq!(config.admission.cooldown(), Duration::from_secs(1));
        assert_eq!(config.admission.key_length, 32);
        assert_eq!(config.audit.webhook(), Some("https://hooks.example.com/x"));
    }

    #[test]
    fn test_database_file_follows_environment() {
        let mut store = StoreConfig::default();
        assert!(store.database_file().ends_with("main_db.json"));
        store.production = false;
        assert!(store.database_file().ends_with("test_db.json"));
    }

    #[test]
    fn test_validate_rejects_zero_lengths() {
        let mut config = AppConfig::default();
        config.admission.key_length = 0;
        assert!(matches!(config.validate(), Err(ConfigError::ValidationError(_))));
    }
}
