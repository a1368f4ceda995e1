//! Errors raised by the tenant context store.

use std::io;
use std::path::PathBuf;

/// Errors from reading, writing, or clearing the tenant context record.
///
/// Every variant is fatal to the operation that produced it. Callers on the
/// enforcement path must propagate these rather than fall back to a default
/// tenant.
#[derive(Debug, thiserror::Error)]
pub enum ContextError {
    #[error("client_id cannot be empty")]
    InvalidIdentifier,
    #[error("client ID not configured at {}; this is a server configuration error", path.display())]
    NotConfigured { path: PathBuf },
    #[error("could not determine the home directory for the tenant context record")]
    HomeNotFound,
    #[error("tenant context I/O failed at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl ContextError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// True for the "nothing stored yet" condition, as opposed to a
    /// malformed input or an I/O failure.
    #[must_use]
    pub fn is_not_configured(&self) -> bool {
        matches!(self, Self::NotConfigured { .. })
    }
}
