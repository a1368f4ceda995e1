//! Errors raised while opening tenant-scoped database connections.

use std::sync::Arc;

use rlsguard_core::ContextError;

/// Errors from resolving, opening, scoping, or querying a connection.
///
/// None of these are retried. A connection that could not be scoped to the
/// active tenant is never handed out.
#[derive(Debug, thiserror::Error)]
pub enum ConnectError {
    #[error("{var} environment variable is not set")]
    TargetNotConfigured { var: &'static str },
    #[error("invalid value for {var}: {value:?}")]
    InvalidSetting { var: &'static str, value: String },
    #[error(transparent)]
    Context(#[from] ContextError),
    #[error("invalid database target: {0}")]
    InvalidTarget(#[source] sqlx::Error),
    #[error("failed to connect to database: {0}")]
    Connect(#[source] sqlx::Error),
    /// The session directive was rejected. Shared because a pooled engine
    /// reports the same rejection to every caller after the first.
    #[error("failed to apply tenant session directive: {0}")]
    EnforcementFailed(#[source] Arc<sqlx::Error>),
    #[error("failed to acquire pooled connection: {0}")]
    Acquire(#[source] sqlx::Error),
    #[error("query failed: {0}")]
    Query(#[source] sqlx::Error),
    #[error("no value supplied for query parameter {name:?}")]
    MissingParameter { name: String },
    #[error("column {column:?} has unsupported type {type_name}")]
    UnsupportedColumn { column: String, type_name: String },
}

impl ConnectError {
    /// True if the tenant context store had no usable identifier.
    #[must_use]
    pub fn is_tenant_not_configured(&self) -> bool {
        matches!(self, Self::Context(e) if e.is_not_configured())
    }

    /// True if a connection could not be scoped to the tenant.
    #[must_use]
    pub fn is_enforcement_failure(&self) -> bool {
        matches!(self, Self::EnforcementFailed(_))
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;

    #[test]
    fn context_error_passes_through_unchanged() {
        let inner = ContextError::NotConfigured {
            path: PathBuf::from("/home/app/.agent-config/client_id"),
        };
        let expected = inner.to_string();
        let err: ConnectError = inner.into();
        assert!(err.is_tenant_not_configured());
        assert_eq!(err.to_string(), expected);
    }

    #[test]
    fn target_not_configured_names_variable() {
        let err = ConnectError::TargetNotConfigured { var: "DATABASE_URL" };
        assert_eq!(err.to_string(), "DATABASE_URL environment variable is not set");
        assert!(!err.is_tenant_not_configured());
    }

    #[test]
    fn enforcement_failure_keeps_its_source() {
        let err = ConnectError::EnforcementFailed(Arc::new(sqlx::Error::Protocol(
            "directive rejected".to_string(),
        )));
        assert!(err.is_enforcement_failure());
        assert!(err.to_string().contains("directive rejected"));
        assert!(std::error::Error::source(&err).is_some());
    }
}
