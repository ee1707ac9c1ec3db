use config::{Config, ConfigError, Environment};
use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct DigestConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Log output: "pretty" or "json"
    #[serde(default = "default_log_format")]
    pub log_format: String,

    // Store
    /// SQLite database URL
    #[serde(default = "default_database_url")]
    pub database_url: String,

    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// Run the schema migration before any pipeline command
    #[serde(default = "default_auto_migrate")]
    pub auto_migrate: bool,

    // Delivery
    /// Where the summary goes; required for run-once / watch
    #[serde(default)]
    pub recipient: String,

    #[serde(default = "default_sender")]
    pub sender: String,

    #[serde(default = "default_subject_prefix")]
    pub subject_prefix: String,

    /// Pickup directory watched by the MTA
    #[serde(default = "default_spool_dir")]
    pub spool_dir: String,

    // Scheduling
    /// Seconds between runs in watch mode
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,

    /// Upper bound on a single run; unset means no timeout
    #[serde(default)]
    pub run_timeout_secs: Option<u64>,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

fn default_database_url() -> String {
    "sqlite://feedback.db".to_string()
}

fn default_max_connections() -> u32 {
    5
}

fn default_auto_migrate() -> bool {
    true
}

fn default_sender() -> String {
    "digest@localhost".to_string()
}

fn default_subject_prefix() -> String {
    digest_core::app::report::REPORT_TITLE.to_string()
}

fn default_spool_dir() -> String {
    "./outbox".to_string()
}

fn default_interval_secs() -> u64 {
    3600
}

impl DigestConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Config::builder()
            .add_source(Environment::with_prefix("DIGEST").try_parsing(true))
            .build()?
            .try_deserialize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    // env を触るテストは直列に
    static TEST_LOCK: Mutex<()> = Mutex::new(());

    const VARS: &[&str] = &[
        "DIGEST_LOG_LEVEL",
        "DIGEST_RECIPIENT",
        "DIGEST_INTERVAL_SECS",
        "DIGEST_RUN_TIMEOUT_SECS",
        "DIGEST_AUTO_MIGRATE",
    ];

    fn clear() {
        for var in VARS {
            // SAFETY: Test runs with mutex lock to prevent concurrent env access
            unsafe {
                std::env::remove_var(var);
            }
        }
    }

    #[test]
    fn test_default_config() {
        let _lock = TEST_LOCK.lock().unwrap();
        clear();

        let config = DigestConfig::from_env().unwrap();
        assert_eq!(config.log_level, "info");
        assert_eq!(config.log_format, "pretty");
        assert_eq!(config.database_url, "sqlite://feedback.db");
        assert_eq!(config.interval_secs, 3600);
        assert_eq!(config.run_timeout_secs, None);
        assert!(config.auto_migrate);
        assert!(config.recipient.is_empty());
    }

    #[test]
    fn test_custom_config() {
        let _lock = TEST_LOCK.lock().unwrap();
        clear();

        // SAFETY: Test runs with mutex lock to prevent concurrent env access
        unsafe {
            std::env::set_var("DIGEST_LOG_LEVEL", "debug");
            std::env::set_var("DIGEST_RECIPIENT", "ops@example.com");
            std::env::set_var("DIGEST_INTERVAL_SECS", "60");
            std::env::set_var("DIGEST_RUN_TIMEOUT_SECS", "30");
            std::env::set_var("DIGEST_AUTO_MIGRATE", "false");
        }

        let config = DigestConfig::from_env().unwrap();
        assert_eq!(config.log_level, "debug");
        assert_eq!(config.recipient, "ops@example.com");
        assert_eq!(config.interval_secs, 60);
        assert_eq!(config.run_timeout_secs, Some(30));
        assert!(!config.auto_migrate);

        clear();
    }
}
