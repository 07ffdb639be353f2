//! Settings for the follow-up engine.
//!
//! TOML file plus environment variable overrides, the same two-layer model
//! every other FlowCatalyst process uses.

use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

mod loader;

pub use loader::ConfigLoader;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("failed to parse TOML: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("invalid configuration: {0}")]
    ValidationError(String),
}

/// Root application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub http: HttpConfig,
    pub database: DatabaseConfig,
    pub redis: RedisConfig,
    pub transport: TransportConfig,
    pub accounts: Vec<AccountConfig>,
    pub runtime: RuntimeConfig,
    pub classifier: ClassifierConfig,

    pub data_dir: String,
    pub dev_mode: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            http: HttpConfig::default(),
            database: DatabaseConfig::default(),
            redis: RedisConfig::default(),
            transport: TransportConfig::default(),
            accounts: Vec::new(),
            runtime: RuntimeConfig::default(),
            classifier: ClassifierConfig::default(),
            data_dir: "./data".to_string(),
            dev_mode: false,
        }
    }
}

/// Shared IMAP/SMTP server the fleet of mailboxes sits behind. Every
/// account logs in with its own `email`/`password`, but they all dial the
/// same host and port — the Gmail-fleet deployment this engine targets.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    pub imap_server: String,
    pub imap_port: u16,
    pub smtp_server: String,
    pub smtp_port: u16,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            imap_server: "imap.gmail.com".to_string(),
            imap_port: 993,
            smtp_server: "smtp.gmail.com".to_string(),
            smtp_port: 587,
        }
    }
}

/// Health-endpoint HTTP server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    pub port: u16,
    pub host: String,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            port: 8080,
            host: "0.0.0.0".to_string(),
        }
    }
}

/// Relational store configuration (ThreadStore).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "sqlite://./data/followups.db".to_string(),
            max_connections: 10,
        }
    }
}

/// Redis configuration for the Debouncer and ScheduleIndex.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RedisConfig {
    pub url: String,
    pub pool_size: usize,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: "redis://localhost:6379".to_string(),
            pool_size: 10,
        }
    }
}

/// One mailbox the Poller watches. `ACCOUNT_{i}_*` in the environment: the
/// same email/password authenticates both the IMAP and SMTP sides, against
/// whatever server `TransportConfig` names.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AccountConfig {
    pub email: String,
    pub password: String,
    /// Advisory cap on outbound sends per day for this mailbox; enforced by
    /// the Dispatcher, not the transport itself.
    pub rate_limit_per_day: u32,
}

impl Default for AccountConfig {
    fn default() -> Self {
        Self {
            email: String::new(),
            password: String::new(),
            rate_limit_per_day: 500,
        }
    }
}

/// Runtime/engine tuning knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Seconds between IMAP poll passes, per mailbox.
    pub polling_interval_seconds: u64,
    /// Seconds between ScheduleIndex <-> ThreadStore reconciliation passes.
    pub schedule_sync_interval_seconds: u64,
    /// Bound on concurrently-processed replies in the pipeline.
    pub max_concurrent_workers: usize,
    pub log_level: String,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            polling_interval_seconds: 60,
            schedule_sync_interval_seconds: 900,
            max_concurrent_workers: 5,
            log_level: "info".to_string(),
        }
    }
}

/// Analyzer client configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassifierConfig {
    pub groq_api_key: String,
    pub groq_model: String,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            groq_api_key: String::new(),
            groq_model: "llama-3.1-8b-instant".to_string(),
        }
    }
}

impl AppConfig {
    /// Load configuration from a TOML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: AppConfig = toml::from_str(&content)?;
        Ok(config)
    }

    /// Load configuration: defaults, then an optional TOML file, then
    /// environment variable overrides.
    pub fn load() -> Result<Self, ConfigError> {
        let loader = ConfigLoader::new();
        loader.load()
    }

    /// Generate an example TOML configuration.
    pub fn example_toml() -> String {
        r#"# Outreach follow-up engine configuration
# Environment variables override these settings

[http]
port = 8080
host = "0.0.0.0"

[database]
url = "postgres://localhost/followups"
max_connections = 10

[redis]
url = "redis://localhost:6379"
pool_size = 10

[transport]
imap_server = "imap.gmail.com"
imap_port = 993
smtp_server = "smtp.gmail.com"
smtp_port = 587

[runtime]
polling_interval_seconds = 60
schedule_sync_interval_seconds = 900
max_concurrent_workers = 5
log_level = "info"

[classifier]
groq_api_key = ""
groq_model = "llama-3.1-8b-instant"

# Mailboxes are configured via ACCOUNT_{n}_* environment variables, not TOML.

data_dir = "./data"
dev_mode = false
"#
        .to_string()
    }
}
