//! Durable, owner-only storage for the active tenant identifier.
//!
//! The store manages exactly one record: a UTF-8 file holding the trimmed
//! tenant identifier. Writes go through a temporary file in the same
//! directory followed by an atomic rename, so readers see either the old
//! value or the new one, never a partial write. The record is created with
//! mode `0600` and its directory (when created here) with mode `0700`.
//!
//! The location of the record is configuration. What is enforced is the
//! permission bits: only the owning user may read or write the record.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::error::ContextError;
use crate::tenant::TenantId;
use crate::{CONTEXT_DIR_NAME, CONTEXT_FILE_NAME};

/// Permission bits applied to the record file.
pub const RECORD_MODE: u32 = 0o600;

/// Permission bits applied to a context directory created by the store.
pub const DIRECTORY_MODE: u32 = 0o700;

/// Handle to the tenant context record at a fixed location.
///
/// Cheap to clone; holds only the resolved paths. Single writer (the
/// administrative `set`/`clear` caller), any number of readers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContextStore {
    dir: PathBuf,
    record: PathBuf,
}

impl ContextStore {
    /// Creates a store whose record lives at `<dir>/client_id`.
    #[must_use]
    pub fn at(dir: impl Into<PathBuf>) -> Self {
        let dir = dir.into();
        let record = dir.join(CONTEXT_FILE_NAME);
        Self { dir, record }
    }

    /// Creates a store at the default location `<home>/.agent-config/client_id`.
    ///
    /// # Errors
    ///
    /// Returns [`ContextError::HomeNotFound`] if the home directory cannot
    /// be resolved.
    pub fn default_location() -> Result<Self, ContextError> {
        let home = dirs::home_dir().ok_or(ContextError::HomeNotFound)?;
        Ok(Self::at(home.join(CONTEXT_DIR_NAME)))
    }

    /// Directory holding the record.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Full path of the record file.
    #[must_use]
    pub fn record_path(&self) -> &Path {
        &self.record
    }

    /// Stores `identifier` as the active tenant, replacing any prior value.
    ///
    /// The identifier is trimmed before it is written. On invalid input the
    /// existing record is left untouched.
    ///
    /// # Errors
    ///
    /// - [`ContextError::InvalidIdentifier`] if `identifier` is blank.
    /// - [`ContextError::Io`] if the directory, temp file, permissions, or
    ///   rename step fails.
    pub fn set(&self, identifier: &str) -> Result<TenantId, ContextError> {
        let tenant = TenantId::parse(identifier)?;

        self.ensure_dir()?;
        self.write_atomic(tenant.as_str())?;

        info!(
            tenant = %tenant.redacted(),
            path = %self.record.display(),
            "tenant context initialized"
        );
        Ok(tenant)
    }

    /// Reads the active tenant.
    ///
    /// An empty or whitespace-only record is treated exactly like a missing
    /// one.
    ///
    /// # Errors
    ///
    /// - [`ContextError::NotConfigured`] if the record is absent or blank.
    /// - [`ContextError::Io`] for any other read failure.
    pub fn get(&self) -> Result<TenantId, ContextError> {
        let raw = match fs::read_to_string(&self.record) {
            Ok(raw) => raw,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(self.not_configured());
            }
            Err(e) => return Err(ContextError::io(&self.record, e)),
        };

        self.check_permissions();

        TenantId::parse(&raw).map_err(|_| self.not_configured())
    }

    /// Non-failing variant of [`get`](Self::get) for display purposes.
    ///
    /// Must not be used to decide whether a database session is scoped; the
    /// enforcement path calls [`get`](Self::get) and fails loudly instead.
    #[must_use]
    pub fn peek(&self) -> Option<TenantId> {
        match self.get() {
            Ok(tenant) => Some(tenant),
            Err(e) => {
                debug!(error = %e, "no readable tenant context");
                None
            }
        }
    }

    /// Removes the record. Returns `true` if a record was removed and
    /// `false` if there was nothing to remove.
    ///
    /// # Errors
    ///
    /// Returns [`ContextError::Io`] if the record exists but cannot be
    /// removed.
    pub fn clear(&self) -> Result<bool, ContextError> {
        match fs::remove_file(&self.record) {
            Ok(()) => {
                info!(path = %self.record.display(), "tenant context cleared");
                Ok(true)
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(ContextError::io(&self.record, e)),
        }
    }

    fn not_configured(&self) -> ContextError {
        ContextError::NotConfigured {
            path: self.record.clone(),
        }
    }

    fn ensure_dir(&self) -> Result<(), ContextError> {
        if self.dir.is_dir() {
            return Ok(());
        }

        let mut builder = fs::DirBuilder::new();
        builder.recursive(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::DirBuilderExt;
            builder.mode(DIRECTORY_MODE);
        }
        builder
            .create(&self.dir)
            .map_err(|e| ContextError::io(&self.dir, e))
    }

    /// Writes `contents` to a sibling temp file, locks its permissions
    /// down, then renames it over the record.
    fn write_atomic(&self, contents: &str) -> Result<(), ContextError> {
        let mut temp = tempfile::NamedTempFile::new_in(&self.dir)
            .map_err(|e| ContextError::io(&self.dir, e))?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            temp.as_file()
                .set_permissions(fs::Permissions::from_mode(RECORD_MODE))
                .map_err(|e| ContextError::io(temp.path(), e))?;
        }

        temp.write_all(contents.as_bytes())
            .and_then(|()| temp.as_file().sync_all())
            .map_err(|e| ContextError::io(temp.path(), e))?;

        temp.persist(&self.record)
            .map_err(|e| ContextError::io(&self.record, e.error))?;
        Ok(())
    }

    /// Logs a warning if the record is readable or writable by anyone other
    /// than its owner. The record is still used; the bits are set by `set`.
    fn check_permissions(&self) {
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            if let Ok(meta) = fs::metadata(&self.record) {
                let mode = meta.permissions().mode() & 0o777;
                if mode & 0o077 != 0 {
                    warn!(
                        path = %self.record.display(),
                        mode = %format!("{mode:o}"),
                        "tenant context record is accessible to other users"
                    );
                }
            }
        }
    }
}
