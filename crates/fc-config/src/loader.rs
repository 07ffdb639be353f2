//! Configuration loader with file and environment variable support

use crate::{AccountConfig, AppConfig, ConfigError};
use std::env;
use std::path::PathBuf;
use tracing::info;

/// Standard config file search paths.
const CONFIG_PATHS: &[&str] = &[
    "config.toml",
    "application.toml",
    "followups.toml",
    "./config/config.toml",
    "/etc/followup-engine/config.toml",
];

/// Mailboxes are numbered starting at 1; this is just a sane upper bound on
/// how many `ACCOUNT_{i}_EMAIL` variables the loader will probe for.
const MAX_ACCOUNT_SLOTS: u32 = 8;

pub struct ConfigLoader {
    config_path: Option<PathBuf>,
}

impl ConfigLoader {
    pub fn new() -> Self {
        Self { config_path: None }
    }

    pub fn with_path<P: Into<PathBuf>>(path: P) -> Self {
        Self {
            config_path: Some(path.into()),
        }
    }

    /// Load configuration from file (if found) with environment variable overrides.
    pub fn load(&self) -> Result<AppConfig, ConfigError> {
        let mut config = AppConfig::default();

        if let Some(path) = self.find_config_file() {
            info!(?path, "loading configuration from file");
            config = AppConfig::from_file(&path)?;
        }

        self.apply_env_overrides(&mut config);
        config.accounts = Self::load_accounts_from_env();

        Ok(config)
    }

    fn find_config_file(&self) -> Option<PathBuf> {
        if let Some(path) = &self.config_path {
            if path.exists() {
                return Some(path.clone());
            }
        }

        if let Ok(path) = env::var("FOLLOWUP_CONFIG") {
            let path = PathBuf::from(path);
            if path.exists() {
                return Some(path);
            }
        }

        for path in CONFIG_PATHS {
            let path = PathBuf::from(path);
            if path.exists() {
                return Some(path);
            }
        }

        None
    }

    fn apply_env_overrides(&self, config: &mut AppConfig) {
        // HTTP
        if let Ok(val) = env::var("HTTP_PORT") {
            if let Ok(port) = val.parse() {
                config.http.port = port;
            }
        }
        if let Ok(val) = env::var("HTTP_HOST") {
            config.http.host = val;
        }

        // Database
        if let Ok(val) = env::var("DATABASE_URL") {
            config.database.url = val;
        }
        if let Ok(val) = env::var("DATABASE_MAX_CONNECTIONS") {
            if let Ok(n) = val.parse() {
                config.database.max_connections = n;
            }
        }

        // Redis
        if let Ok(val) = env::var("REDIS_URL") {
            config.redis.url = val;
        }
        if let Ok(val) = env::var("REDIS_POOL_SIZE") {
            if let Ok(size) = val.parse() {
                config.redis.pool_size = size;
            }
        }

        // Transport (shared by every configured mailbox)
        if let Ok(val) = env::var("IMAP_SERVER") {
            config.transport.imap_server = val;
        }
        if let Ok(val) = env::var("IMAP_PORT") {
            if let Ok(port) = val.parse() {
                config.transport.imap_port = port;
            }
        }
        if let Ok(val) = env::var("SMTP_SERVER") {
            config.transport.smtp_server = val;
        }
        if let Ok(val) = env::var("SMTP_PORT") {
            if let Ok(port) = val.parse() {
                config.transport.smtp_port = port;
            }
        }

        // Runtime
        if let Ok(val) = env::var("POLLING_INTERVAL") {
            if let Ok(seconds) = val.parse() {
                config.runtime.polling_interval_seconds = seconds;
            }
        }
        if let Ok(val) = env::var("SCHEDULE_SYNC_INTERVAL") {
            if let Ok(seconds) = val.parse() {
                config.runtime.schedule_sync_interval_seconds = seconds;
            }
        }
        if let Ok(val) = env::var("MAX_CONCURRENT_WORKERS") {
            if let Ok(n) = val.parse() {
                config.runtime.max_concurrent_workers = n;
            }
        }
        if let Ok(val) = env::var("LOG_LEVEL") {
            config.runtime.log_level = val;
        }

        // Classifier / Analyzer
        if let Ok(val) = env::var("GROQ_API_KEY") {
            config.classifier.groq_api_key = val;
        }
        if let Ok(val) = env::var("GROQ_MODEL") {
            config.classifier.groq_model = val;
        }

        // General
        if let Ok(val) = env::var("DATA_DIR") {
            config.data_dir = val;
        }
        if let Ok(val) = env::var("DEV_MODE") {
            config.dev_mode = val.parse().unwrap_or(false);
        }
    }

    /// Build the mailbox list by probing `ACCOUNT_{i}_EMAIL` for `i` in
    /// `1..=MAX_ACCOUNT_SLOTS`. A slot with no email set is skipped, so
    /// operators can configure fewer (or, up to the bound, more) mailboxes
    /// than any particular deployment happens to use today.
    fn load_accounts_from_env() -> Vec<AccountConfig> {
        let mut accounts = Vec::new();

        for i in 1..=MAX_ACCOUNT_SLOTS {
            let email = match env::var(format!("ACCOUNT_{i}_EMAIL")) {
                Ok(val) if !val.is_empty() => val,
                _ => continue,
            };

            let password = env::var(format!("ACCOUNT_{i}_PASSWORD")).unwrap_or_default();
            let rate_limit_per_day = env::var(format!("ACCOUNT_{i}_RATE_LIMIT_PER_DAY"))
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(500);

            accounts.push(AccountConfig {
                email,
                password,
                rate_limit_per_day,
            });
        }

        accounts
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

    #[test]
    fn no_account_slots_set_yields_empty_list() {
        // Relies on the test process not having ACCOUNT_*_EMAIL set; CI and
        // local dev shells both satisfy that in practice.
        for i in 1..=MAX_ACCOUNT_SLOTS {
            assert!(env::var(format!("ACCOUNT_{i}_EMAIL")).is_err());
        }
        assert!(ConfigLoader::load_accounts_from_env().is_empty());
    }

    #[test]
    fn default_config_has_sane_polling_interval() {
        let config = AppConfig::default();
        assert_eq!(config.runtime.polling_interval_seconds, 60);
        assert_eq!(config.runtime.schedule_sync_interval_seconds, 900);
    }
}
