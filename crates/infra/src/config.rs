//! Configuration loading and representation.
//!
//! Every setting has a default; the environment overrides it. Unparseable
//! values are errors rather than silently falling back.

use std::env;
use std::fmt;
use std::str::FromStr;

use thiserror::Error;

pub const DELETED_UPDATES_VAR: &str = "PROVISIONER_DELETED_UPDATES";
pub const CONFLICT_RETRIES_VAR: &str = "PROVISIONER_CONFLICT_RETRIES";
pub const DATABASE_URL_VAR: &str = "DATABASE_URL";
pub const DB_MAX_CONNECTIONS_VAR: &str = "PROVISIONER_DB_MAX_CONNECTIONS";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),

    #[error("invalid value '{value}' for {key}: {reason}")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
}

/// What the repository does with an *update* aimed at a deleted aggregate.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum DeletedUpdatePolicy {
    /// Record the change; the aggregate stays deleted.
    #[default]
    Permit,
    /// Refuse with `AlreadyDeleted`.
    Reject,
}

impl DeletedUpdatePolicy {
    pub fn as_str(self) -> &'static str {
        match self {
            DeletedUpdatePolicy::Permit => "permit",
            DeletedUpdatePolicy::Reject => "reject",
        }
    }
}

impl fmt::Display for DeletedUpdatePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DeletedUpdatePolicy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "permit" => Ok(DeletedUpdatePolicy::Permit),
            "reject" => Ok(DeletedUpdatePolicy::Reject),
            _ => Err(ConfigError::Invalid {
                key: DELETED_UPDATES_VAR,
                value: s.to_string(),
                reason: "expected 'permit' or 'reject'".to_string(),
            }),
        }
    }
}

/// Repository behaviour knobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RepositoryConfig {
    pub deleted_updates: DeletedUpdatePolicy,
    /// Extra attempts `apply_with_retry` makes after a `VersionConflict`.
    pub max_conflict_retries: u32,
}

impl Default for RepositoryConfig {
    fn default() -> Self {
        Self {
            deleted_updates: DeletedUpdatePolicy::Permit,
            max_conflict_retries: 3,
        }
    }
}

impl RepositoryConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build from an arbitrary key lookup (the environment in production).
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(policy) = lookup(DELETED_UPDATES_VAR) {
            config.deleted_updates = policy.parse()?;
        }

        if let Some(retries) = lookup(CONFLICT_RETRIES_VAR) {
            config.max_conflict_retries = parse_number(CONFLICT_RETRIES_VAR, &retries)?;
        }

        Ok(config)
    }

    pub fn with_deleted_updates(mut self, policy: DeletedUpdatePolicy) -> Self {
        self.deleted_updates = policy;
        self
    }

    pub fn with_max_conflict_retries(mut self, retries: u32) -> Self {
        self.max_conflict_retries = retries;
        self
    }
}

/// Connection settings for the Postgres event store.
#[derive(Clone, PartialEq, Eq)]
pub struct StoreConfig {
    pub database_url: String,
    pub max_connections: u32,
}

impl StoreConfig {
    pub fn new(database_url: impl Into<String>) -> Self {
        Self {
            database_url: database_url.into(),
            max_connections: 5,
        }
    }

    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let database_url = lookup(DATABASE_URL_VAR)
            .filter(|url| !url.trim().is_empty())
            .ok_or(ConfigError::Missing(DATABASE_URL_VAR))?;
        let mut config = Self::new(database_url);

        if let Some(max) = lookup(DB_MAX_CONNECTIONS_VAR) {
            config.max_connections = parse_number(DB_MAX_CONNECTIONS_VAR, &max)?;
            if config.max_connections == 0 {
                return Err(ConfigError::Invalid {
                    key: DB_MAX_CONNECTIONS_VAR,
                    value: max,
                    reason: "must be at least 1".to_string(),
                });
            }
        }

        Ok(config)
    }
}

// The URL may carry credentials.
impl fmt::Debug for StoreConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoreConfig")
            .field("database_url", &"<redacted>")
            .field("max_connections", &self.max_connections)
            .finish()
    }
}

fn parse_number(key: &'static str, value: &str) -> Result<u32, ConfigError> {
    value.trim().parse().map_err(|e: std::num::ParseIntError| ConfigError::Invalid {
        key,
        value: value.to_string(),
        reason: e.to_string(),
    })
}
