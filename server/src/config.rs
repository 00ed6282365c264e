use std::path::Path;
use std::time::Duration;

use anyhow::Context;
use serde::Deserialize;
use tracing::info;

use crate::engine::channel_service::ServiceLimits;
use crate::engine::connection::DEFAULT_OUTBOUND_QUEUE;
use crate::engine::storage::RetryPolicy;
use crate::engine::validation::DEFAULT_MAX_MESSAGE_LENGTH;

/// Top-level server configuration, loaded from chorus.toml.
#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct ServerConfig {
    pub server: ServerSection,
    pub database: DatabaseSection,
    pub storage: StorageSection,
    pub limits: LimitsSection,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ServerSection {
    pub web_address: String,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            web_address: "0.0.0.0:8080".into(),
        }
    }
}

/// Which storage engine backs the registry and the message store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    #[default]
    Sqlite,
    Memory,
}

impl StorageBackend {
    fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sqlite" => Some(StorageBackend::Sqlite),
            "memory" => Some(StorageBackend::Memory),
            _ => None,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct DatabaseSection {
    pub url: String,
    pub backend: StorageBackend,
}

impl Default for DatabaseSection {
    fn default() -> Self {
        Self {
            url: "sqlite:chorus.db?mode=rwc".into(),
            backend: StorageBackend::Sqlite,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct StorageSection {
    /// Total attempts for a transiently failing storage call.
    pub retry_attempts: u32,
    pub retry_backoff_ms: u64,
}

impl Default for StorageSection {
    fn default() -> Self {
        Self {
            retry_attempts: 3,
            retry_backoff_ms: 25,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct LimitsSection {
    pub max_message_length: usize,
    pub default_history_limit: usize,
    pub max_history_limit: usize,
    /// Events buffered per connection before its subscriptions are revoked.
    pub outbound_queue: usize,
}

impl Default for LimitsSection {
    fn default() -> Self {
        Self {
            max_message_length: DEFAULT_MAX_MESSAGE_LENGTH,
            default_history_limit: 50,
            max_history_limit: 200,
            outbound_queue: DEFAULT_OUTBOUND_QUEUE,
        }
    }
}

impl ServerConfig {
    /// Load config from a TOML file. Falls back to defaults if the file doesn't exist.
    /// Environment variables override TOML values.
    pub fn load(path: &str) -> anyhow::Result<Self> {
        let mut config = if Path::new(path).exists() {
            let contents = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read config file {path}"))?;
            Self::from_toml(&contents).with_context(|| format!("failed to parse config file {path}"))?
        } else {
            info!("No config file found at {}, using defaults", path);
            Self::default()
        };

        config.apply_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    pub fn from_toml(contents: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(contents)
    }

    fn apply_overrides(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(v) = var("WEB_ADDRESS") {
            self.server.web_address = v;
        }
        if let Some(v) = var("DATABASE_URL") {
            self.database.url = v;
        }
        if let Some(v) = var("STORAGE_BACKEND")
            && let Some(backend) = StorageBackend::parse(&v)
        {
            self.database.backend = backend;
        }
        if let Some(v) = var("STORAGE_RETRY_ATTEMPTS")
            && let Ok(n) = v.parse()
        {
            self.storage.retry_attempts = n;
        }
        if let Some(v) = var("STORAGE_RETRY_BACKOFF_MS")
            && let Ok(ms) = v.parse()
        {
            self.storage.retry_backoff_ms = ms;
        }
        if let Some(v) = var("MAX_MESSAGE_LENGTH")
            && let Ok(len) = v.parse()
        {
            self.limits.max_message_length = len;
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.storage.retry_attempts.max(1),
            backoff: Duration::from_millis(self.storage.retry_backoff_ms),
        }
    }

    pub fn service_limits(&self) -> ServiceLimits {
        ServiceLimits {
            max_message_length: self.limits.max_message_length,
            default_history_limit: self.limits.default_history_limit,
            max_history_limit: self.limits.max_history_limit.max(1),
        }
    }
}
