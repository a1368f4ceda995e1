//! Database target and pool configuration.
//!
//! The target address comes from `DATABASE_URL`. Pool tuning is optional
//! and falls back to [`PoolConfig::default`].

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use sqlx::postgres::PgConnectOptions;

use crate::error::ConnectError;

/// Environment variable holding the database connection string.
pub const DATABASE_URL_VAR: &str = "DATABASE_URL";

/// Optional override for [`PoolConfig::max_connections`].
pub const MAX_CONNECTIONS_VAR: &str = "RLSGUARD_MAX_CONNECTIONS";

/// Optional override for [`PoolConfig::acquire_timeout`], in milliseconds.
pub const ACQUIRE_TIMEOUT_VAR: &str = "RLSGUARD_ACQUIRE_TIMEOUT_MS";

/// Sizing and timeouts for the pooled engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolConfig {
    /// Upper bound on physical connections held by the pool.
    pub max_connections: u32,
    /// Maximum time to wait for a pooled connection (including connecting
    /// and scoping a new physical one).
    pub acquire_timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_connections: 5,
            acquire_timeout: Duration::from_secs(30),
        }
    }
}

/// Resolved database target plus pool settings.
///
/// `Debug` output never includes the connection string, which may carry
/// credentials.
#[derive(Clone)]
pub struct DatabaseConfig {
    url: String,
    /// Pool settings used by [`EngineHandle`](crate::EngineHandle).
    pub pool: PoolConfig,
}

impl DatabaseConfig {
    /// Creates a config for `url` with default pool settings.
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            pool: PoolConfig::default(),
        }
    }

    /// Reads the config from the process environment.
    ///
    /// # Errors
    ///
    /// See [`from_lookup`](Self::from_lookup).
    pub fn from_env() -> Result<Self, ConnectError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Reads the config through `lookup`, which maps a variable name to its
    /// value.
    ///
    /// # Errors
    ///
    /// - [`ConnectError::TargetNotConfigured`] if `DATABASE_URL` is missing
    ///   or blank.
    /// - [`ConnectError::InvalidSetting`] if a pool override does not parse
    ///   or `RLSGUARD_MAX_CONNECTIONS` is zero.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConnectError> {
        let url = lookup(DATABASE_URL_VAR)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .ok_or(ConnectError::TargetNotConfigured {
                var: DATABASE_URL_VAR,
            })?;

        let mut pool = PoolConfig::default();
        if let Some(raw) = lookup(MAX_CONNECTIONS_VAR) {
            pool.max_connections = parse_setting::<u32>(MAX_CONNECTIONS_VAR, &raw)
                .and_then(|n| {
                    if n == 0 {
                        Err(ConnectError::InvalidSetting {
                            var: MAX_CONNECTIONS_VAR,
                            value: raw.clone(),
                        })
                    } else {
                        Ok(n)
                    }
                })?;
        }
        if let Some(raw) = lookup(ACQUIRE_TIMEOUT_VAR) {
            let millis = parse_setting::<u64>(ACQUIRE_TIMEOUT_VAR, &raw)?;
            pool.acquire_timeout = Duration::from_millis(millis);
        }

        Ok(Self { url, pool })
    }

    /// The raw connection string.
    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Parses the connection string into driver options.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectError::InvalidTarget`] if the string is not a valid
    /// `PostgreSQL` URL.
    pub fn connect_options(&self) -> Result<PgConnectOptions, ConnectError> {
        PgConnectOptions::from_str(&self.url).map_err(ConnectError::InvalidTarget)
    }
}

impl fmt::Debug for DatabaseConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DatabaseConfig")
            .field("url", &"<redacted>")
            .field("pool", &self.pool)
            .finish()
    }
}

fn parse_setting<T: FromStr>(var: &'static str, raw: &str) -> Result<T, ConnectError> {
    raw.trim().parse().map_err(|_| ConnectError::InvalidSetting {
        var,
        value: raw.to_string(),
    })
}
