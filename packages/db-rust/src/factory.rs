//! Connection factory: the only way to obtain a database connection.
//!
//! Every path through [`ConnectionFactory`] resolves the database target
//! and the active tenant first, and fails closed if either is missing.
//! There is no method that returns an unscoped connection.
//!
//! Lifecycle of the pooled engine (per factory):
//!
//! ```text
//! Uninitialized --engine_handle() ok--> EngineConstructed (terminal)
//! ```
//!
//! A failed first construction leaves the factory `Uninitialized`.
//! [`open_connection`](ConnectionFactory::open_connection) is stateless and
//! re-reads the tenant on every call.

use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use rlsguard_core::{ContextStore, TenantId};
use tokio::sync::OnceCell;
use tracing::info;

use crate::config::DatabaseConfig;
use crate::connection::EnforcedConnection;
use crate::engine::EngineHandle;
use crate::error::ConnectError;
use crate::query::{QueryParams, Table};

type EnvLookup = Arc<dyn Fn(&str) -> Option<String> + Send + Sync>;

/// Hands out tenant-scoped connections and owns the lazily built engine.
///
/// Share one factory per process (for example behind an `Arc`). The engine
/// is built at most once per factory even under concurrent first access.
pub struct ConnectionFactory {
    store: ContextStore,
    env: EnvLookup,
    engine: OnceCell<EngineHandle>,
    hook_registrations: AtomicUsize,
}

impl ConnectionFactory {
    /// Creates a factory reading the tenant from `store` and the database
    /// target from the process environment.
    #[must_use]
    pub fn new(store: ContextStore) -> Self {
        Self::with_env(store, |key| std::env::var(key).ok())
    }

    /// Creates a factory using the default context store location.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectError::Context`] if the home directory cannot be
    /// resolved.
    pub fn from_default_location() -> Result<Self, ConnectError> {
        Ok(Self::new(ContextStore::default_location()?))
    }

    /// Creates a factory that resolves environment variables through
    /// `lookup` instead of the process environment.
    #[must_use]
    pub fn with_env(
        store: ContextStore,
        lookup: impl Fn(&str) -> Option<String> + Send + Sync + 'static,
    ) -> Self {
        Self {
            store,
            env: Arc::new(lookup),
            engine: OnceCell::new(),
            hook_registrations: AtomicUsize::new(0),
        }
    }

    /// The context store this factory reads from.
    #[must_use]
    pub fn store(&self) -> &ContextStore {
        &self.store
    }

    /// Opens a new connection with the tenant directive applied.
    ///
    /// The target is resolved before the tenant, and both before any
    /// network activity.
    ///
    /// # Errors
    ///
    /// - [`ConnectError::TargetNotConfigured`] / [`ConnectError::InvalidSetting`]
    ///   if the environment is incomplete.
    /// - [`ConnectError::Context`] if the tenant is not configured.
    /// - [`ConnectError::InvalidTarget`] if the target does not parse.
    /// - [`ConnectError::Connect`] if the server is unreachable.
    /// - [`ConnectError::EnforcementFailed`] if the directive fails; the
    ///   connection is closed.
    pub async fn open_connection(&self) -> Result<EnforcedConnection, ConnectError> {
        let (config, tenant) = self.resolve()?;
        let options = config.connect_options()?;

        let conn = EnforcedConnection::establish(&options, tenant).await?;
        info!(tenant = %conn.tenant().redacted(), "database connected with tenant scope");
        Ok(conn)
    }

    /// Returns the pooled engine, building it on first use.
    ///
    /// Later calls return the same handle without re-reading the context
    /// store, so the engine stays bound to the tenant that was active when
    /// it was built.
    ///
    /// # Errors
    ///
    /// Same resolution errors as [`open_connection`](Self::open_connection)
    /// on first construction. Once built, never fails.
    pub async fn engine_handle(&self) -> Result<&EngineHandle, ConnectError> {
        self.engine
            .get_or_try_init(|| async {
                let (config, tenant) = self.resolve()?;
                let engine = EngineHandle::connect(&config, tenant).await?;
                self.hook_registrations.fetch_add(1, Ordering::SeqCst);
                Ok::<_, ConnectError>(engine)
            })
            .await
    }

    /// Whether the pooled engine has been built.
    #[must_use]
    pub fn is_engine_constructed(&self) -> bool {
        self.engine.initialized()
    }

    /// Number of pool creation hooks this factory has registered (0 or 1).
    #[must_use]
    pub fn hook_registrations(&self) -> usize {
        self.hook_registrations.load(Ordering::SeqCst)
    }

    /// Runs `sql` through the pooled engine and returns the rows as a
    /// [`Table`].
    ///
    /// # Errors
    ///
    /// Engine construction errors, plus those of
    /// [`EngineHandle::query_table`].
    pub async fn query_table(&self, sql: &str, params: &QueryParams) -> Result<Table, ConnectError> {
        self.engine_handle().await?.query_table(sql, params).await
    }

    fn resolve(&self) -> Result<(DatabaseConfig, TenantId), ConnectError> {
        let config = DatabaseConfig::from_lookup(|key| (self.env)(key))?;
        let tenant = self.store.get()?;
        Ok((config, tenant))
    }
}

impl fmt::Debug for ConnectionFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionFactory")
            .field("store", &self.store)
            .field("engine_constructed", &self.is_engine_constructed())
            .field("hook_registrations", &self.hook_registrations())
            .finish_non_exhaustive()
    }
}
