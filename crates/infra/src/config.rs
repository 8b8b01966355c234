//! Engine configuration loaded from the environment.

use std::sync::Arc;

use thiserror::Error;
use tracing::warn;

use keystone_instance::DomainPolicy;
use keystone_observability::{LogConfig, LogFormat};

use crate::commands::Commands;
use crate::crypto::{AesGcmEncryptor, EncryptionError, parse_32_byte_key};
use crate::event_store::{EventStore, EventStoreError, InMemoryEventStore, PostgresEventStore};
use crate::id::UuidIdGenerator;

pub const DATABASE_URL: &str = "KEYSTONE_DATABASE_URL";
pub const SMTP_ENCRYPTION_KEY: &str = "KEYSTONE_SMTP_ENCRYPTION_KEY";
pub const SMTP_ENCRYPTION_KEY_ID: &str = "KEYSTONE_SMTP_ENCRYPTION_KEY_ID";
pub const DEFAULT_SMTP_SENDER_MATCHES_DOMAIN: &str = "KEYSTONE_DEFAULT_SMTP_SENDER_MATCHES_DOMAIN";
pub const LOG_FILTER: &str = "KEYSTONE_LOG";
pub const LOG_FORMAT: &str = "KEYSTONE_LOG_FORMAT";

const DEFAULT_KEY_ID: &str = "smtp";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{0} is required")]
    Missing(&'static str),

    #[error("invalid {name}: {reason}")]
    Invalid { name: &'static str, reason: String },

    #[error(transparent)]
    Key(#[from] EncryptionError),

    #[error(transparent)]
    EventStore(#[from] EventStoreError),
}

#[derive(Clone)]
pub struct EngineConfig {
    /// Postgres event store when set, in-memory otherwise.
    pub database_url: Option<String>,
    pub smtp_encryption_key: [u8; 32],
    pub smtp_encryption_key_id: String,
    /// Policy applied to instances that never added one.
    pub default_domain_policy: DomainPolicy,
    pub log: LogConfig,
}

impl EngineConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build the config from an arbitrary variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let non_empty = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        let key = non_empty(SMTP_ENCRYPTION_KEY).ok_or(ConfigError::Missing(SMTP_ENCRYPTION_KEY))?;
        let smtp_encryption_key = parse_32_byte_key(&key)?;

        let smtp_encryption_key_id = non_empty(SMTP_ENCRYPTION_KEY_ID)
            .map(|v| v.trim().to_string())
            .unwrap_or_else(|| DEFAULT_KEY_ID.to_string());

        let sender_matches_domain = match non_empty(DEFAULT_SMTP_SENDER_MATCHES_DOMAIN) {
            Some(raw) => parse_bool(DEFAULT_SMTP_SENDER_MATCHES_DOMAIN, &raw)?,
            None => false,
        };

        let mut log = LogConfig::default();
        if let Some(filter) = non_empty(LOG_FILTER) {
            log.filter = filter;
        }
        if let Some(raw) = non_empty(LOG_FORMAT) {
            log.format = raw.parse::<LogFormat>().map_err(|e| ConfigError::Invalid {
                name: LOG_FORMAT,
                reason: e.to_string(),
            })?;
        }

        Ok(Self {
            database_url: non_empty(DATABASE_URL),
            smtp_encryption_key,
            smtp_encryption_key_id,
            default_domain_policy: DomainPolicy {
                smtp_sender_address_matches_instance_domain: sender_matches_domain,
                ..DomainPolicy::default()
            },
            log,
        })
    }

    /// Install the process-wide subscriber. No-op if one is already set.
    pub fn init_logging(&self) -> bool {
        keystone_observability::tracing::init(&self.log)
    }

    pub fn encryptor(&self) -> AesGcmEncryptor {
        AesGcmEncryptor::new(self.smtp_encryption_key_id.clone(), self.smtp_encryption_key)
    }

    /// Wire the command side with the configured store, the AES-GCM encryptor and
    /// UUIDv7 ids.
    pub async fn build_commands(&self) -> Result<Commands, ConfigError> {
        let store: Arc<dyn EventStore> = match &self.database_url {
            Some(url) => Arc::new(PostgresEventStore::connect(url).await?),
            None => {
                warn!("{DATABASE_URL} not set; using the in-memory event store");
                Arc::new(InMemoryEventStore::new())
            }
        };

        Ok(Commands::new(
            store,
            Arc::new(self.encryptor()),
            Arc::new(UuidIdGenerator),
            self.default_domain_policy,
        ))
    }
}

// Secrets stay out of debug output.
impl core::fmt::Debug for EngineConfig {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("EngineConfig")
            .field("database_url", &self.database_url.as_ref().map(|_| "<set>"))
            .field("smtp_encryption_key_id", &self.smtp_encryption_key_id)
            .field("default_domain_policy", &self.default_domain_policy)
            .field("log", &self.log)
            .finish_non_exhaustive()
    }
}

fn parse_bool(name: &'static str, raw: &str) -> Result<bool, ConfigError> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        other => Err(ConfigError::Invalid {
            name,
            reason: format!("'{other}' is not a boolean"),
        }),
    }
}
