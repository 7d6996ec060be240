//! Configuration loading and representation.
//!
//! Values come from environment variables, with defaults for everything except
//! `DATABASE_URL` when persistent stores are selected.

use std::time::Duration;

use thiserror::Error;

use tradebook_documents::NumberingScheme;

pub const INVOICE_PREFIX_VAR: &str = "TRADEBOOK_INVOICE_PREFIX";
pub const PURCHASE_PREFIX_VAR: &str = "TRADEBOOK_PURCHASE_PREFIX";
pub const TXN_TIMEOUT_VAR: &str = "TRADEBOOK_TXN_TIMEOUT_MS";
pub const USE_PERSISTENT_VAR: &str = "USE_PERSISTENT_STORES";
pub const DATABASE_URL_VAR: &str = "DATABASE_URL";
pub const MAX_CONNECTIONS_VAR: &str = "DATABASE_MAX_CONNECTIONS";

/// Reported when the two prefixes are only invalid together.
const PREFIX_PAIR: &str = "TRADEBOOK_INVOICE_PREFIX/TRADEBOOK_PURCHASE_PREFIX";

const DEFAULT_TXN_TIMEOUT_MS: u64 = 5_000;
const DEFAULT_MAX_CONNECTIONS: u32 = 10;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("{var} is invalid: {reason}")]
    Invalid { var: &'static str, reason: String },

    #[error("{0} must be set when {USE_PERSISTENT_VAR}=true")]
    Missing(&'static str),
}

/// Which store backs posting units.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Persistence {
    InMemory,
    Postgres {
        database_url: String,
        max_connections: u32,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PostingConfig {
    pub numbering: NumberingScheme,
    /// Upper bound on staging one posting unit; exceeding it aborts the unit.
    /// Commit itself is bounded by the store (Postgres `statement_timeout`).
    pub txn_timeout: Duration,
    pub persistence: Persistence,
}

impl Default for PostingConfig {
    fn default() -> Self {
        Self {
            numbering: NumberingScheme::default(),
            txn_timeout: Duration::from_millis(DEFAULT_TXN_TIMEOUT_MS),
            persistence: Persistence::InMemory,
        }
    }
}

impl PostingConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Build from any variable source (the environment in production).
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let invoice_prefix = prefix(&lookup, INVOICE_PREFIX_VAR, "INV")?;
        let purchase_prefix = prefix(&lookup, PURCHASE_PREFIX_VAR, "PUR")?;
        let numbering = NumberingScheme::new(invoice_prefix, purchase_prefix).map_err(|e| {
            ConfigError::Invalid {
                var: PREFIX_PAIR,
                reason: e.to_string(),
            }
        })?;

        let txn_timeout_ms = match lookup(TXN_TIMEOUT_VAR) {
            Some(raw) => parse_positive::<u64>(TXN_TIMEOUT_VAR, &raw)?,
            None => DEFAULT_TXN_TIMEOUT_MS,
        };

        let use_persistent = match lookup(USE_PERSISTENT_VAR) {
            Some(raw) => raw.trim().parse::<bool>().map_err(|e| ConfigError::Invalid {
                var: USE_PERSISTENT_VAR,
                reason: e.to_string(),
            })?,
            None => false,
        };

        let persistence = if use_persistent {
            let database_url = lookup(DATABASE_URL_VAR)
                .filter(|url| !url.trim().is_empty())
                .ok_or(ConfigError::Missing(DATABASE_URL_VAR))?;
            let max_connections = match lookup(MAX_CONNECTIONS_VAR) {
                Some(raw) => parse_positive::<u32>(MAX_CONNECTIONS_VAR, &raw)?,
                None => DEFAULT_MAX_CONNECTIONS,
            };
            Persistence::Postgres {
                database_url,
                max_connections,
            }
        } else {
            tracing::warn!("{USE_PERSISTENT_VAR} not set; using in-memory stores");
            Persistence::InMemory
        };

        Ok(Self {
            numbering,
            txn_timeout: Duration::from_millis(txn_timeout_ms),
            persistence,
        })
    }
}

fn prefix<F>(lookup: &F, var: &'static str, default: &str) -> Result<String, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(var) {
        Some(raw) if raw.trim().is_empty() => Err(ConfigError::Invalid {
            var,
            reason: "cannot be empty".to_string(),
        }),
        Some(raw) => Ok(raw),
        None => Ok(default.to_string()),
    }
}

fn parse_positive<T>(var: &'static str, raw: &str) -> Result<T, ConfigError>
where
    T: std::str::FromStr + PartialOrd + Default,
    T::Err: std::fmt::Display,
{
    let value = raw.trim().parse::<T>().map_err(|e| ConfigError::Invalid {
        var,
        reason: e.to_string(),
    })?;
    if value <= T::default() {
        return Err(ConfigError::Invalid {
            var,
            reason: "must be greater than zero".to_string(),
        });
    }
    Ok(value)
}
