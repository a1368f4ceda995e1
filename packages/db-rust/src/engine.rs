//! Pooled engine whose every physical connection is tenant-scoped.
//!
//! The pool's `after_connect` hook runs the session directive once per
//! physical connection, when the pool creates it. Borrowing and returning a
//! connection does not re-run the directive: the setting belongs to the
//! physical session, not to the borrow.
//!
//! A rejected directive is terminal for the engine. The first rejection is
//! latched, every later borrow fails with
//! [`ConnectError::EnforcementFailed`] carrying that rejection, and the pool
//! is closed so it stops opening connections.
//!
//! An engine is bound to the tenant passed to [`EngineHandle::connect`] for
//! its whole lifetime. Later changes to the context store are not observed.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};

use rlsguard_core::TenantId;
use sqlx::pool::PoolConnection;
use sqlx::postgres::PgPoolOptions;
use sqlx::{Column, Executor, PgPool, Postgres};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::config::DatabaseConfig;
use crate::error::ConnectError;
use crate::query::{self, QueryParams, Table};
use crate::session;

/// First directive rejection seen by the pool, plus a signal for borrowers
/// blocked inside the pool's connect loop.
#[derive(Debug)]
struct DirectiveLatch {
    rejection: OnceLock<Arc<sqlx::Error>>,
    tripped: watch::Sender<bool>,
}

impl DirectiveLatch {
    fn new() -> Self {
        let (tripped, _) = watch::channel(false);
        Self {
            rejection: OnceLock::new(),
            tripped,
        }
    }

    fn is_tripped(&self) -> bool {
        self.rejection.get().is_some()
    }

    /// Records `e` unless an earlier rejection is already held.
    fn trip(&self, e: sqlx::Error) {
        let _ = self.rejection.set(Arc::new(e));
        self.tripped.send_replace(true);
    }

    fn error(&self) -> Option<ConnectError> {
        self.rejection
            .get()
            .map(|e| ConnectError::EnforcementFailed(Arc::clone(e)))
    }

    /// Resolves once [`trip`](Self::trip) has been called.
    async fn wait(&self) {
        let mut rx = self.tripped.subscribe();
        if rx.wait_for(|tripped| *tripped).await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

/// Owned handle to a tenant-scoped `PostgreSQL` pool.
///
/// Cheap to share by reference; clone the inner pool via [`pool`](Self::pool)
/// if an owned `PgPool` is needed. Every connection the pool hands out has
/// already had the tenant directive applied.
#[derive(Debug)]
pub struct EngineHandle {
    pool: PgPool,
    tenant: TenantId,
    enforced: Arc<AtomicU64>,
    latch: Arc<DirectiveLatch>,
}

impl EngineHandle {
    /// Builds a pool for `config` bound to `tenant`.
    ///
    /// The pool connects lazily, so this does not touch the network. Must be
    /// called from within a Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectError::InvalidTarget`] if the connection string does
    /// not parse.
    pub async fn connect(config: &DatabaseConfig, tenant: TenantId) -> Result<Self, ConnectError> {
        let options = config.connect_options()?;
        let enforced = Arc::new(AtomicU64::new(0));
        let latch = Arc::new(DirectiveLatch::new());

        let hook_tenant = tenant.clone();
        let hook_count = Arc::clone(&enforced);
        let hook_latch = Arc::clone(&latch);
        let pool = PgPoolOptions::new()
            .max_connections(config.pool.max_connections)
            .acquire_timeout(config.pool.acquire_timeout)
            .after_connect(move |conn, _meta| {
                let tenant = hook_tenant.clone();
                let count = Arc::clone(&hook_count);
                let latch = Arc::clone(&hook_latch);
                Box::pin(async move {
                    if latch.is_tripped() {
                        return Err(sqlx::Error::PoolClosed);
                    }
                    if let Err(e) = session::apply_tenant(conn, &tenant).await {
                        warn!(
                            tenant = %tenant.redacted(),
                            error = %e,
                            "tenant directive failed on new pooled connection; engine disabled"
                        );
                        let rejected = sqlx::Error::Protocol(e.to_string());
                        latch.trip(e);
                        return Err(rejected);
                    }
                    let total = count.fetch_add(1, Ordering::Relaxed) + 1;
                    debug!(tenant = %tenant.redacted(), total, "pooled connection scoped");
                    Ok(())
                })
            })
            .connect_lazy_with(options);

        info!(
            tenant = %tenant.redacted(),
            max_connections = config.pool.max_connections,
            "pooled engine created"
        );

        Ok(Self {
            pool,
            tenant,
            enforced,
            latch,
        })
    }

    /// Tenant every connection in this pool is scoped to.
    #[must_use]
    pub fn tenant(&self) -> &TenantId {
        &self.tenant
    }

    /// The underlying pool. Queries run through it are tenant-scoped.
    #[must_use]
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Number of physical connections the creation hook has scoped so far.
    #[must_use]
    pub fn enforced_connections(&self) -> u64 {
        self.enforced.load(Ordering::Relaxed)
    }

    /// Borrows a connection from the pool, opening and scoping a new
    /// physical connection if none is idle.
    ///
    /// # Errors
    ///
    /// - [`ConnectError::EnforcementFailed`] if the directive was rejected on
    ///   any connection of this pool, now or earlier. The rejection is not
    ///   retried.
    /// - [`ConnectError::Acquire`] if the pool times out or a new connection
    ///   cannot be opened.
    pub async fn acquire(&self) -> Result<PoolConnection<Postgres>, ConnectError> {
        if let Some(rejected) = self.latch.error() {
            self.shut_down();
            return Err(rejected);
        }

        // The pool would otherwise keep reconnecting until the acquire
        // timeout after the hook rejects a connection.
        let acquired = tokio::select! {
            acquired = self.pool.acquire() => acquired,
            () = self.latch.wait() => Err(sqlx::Error::PoolClosed),
        };

        acquired.map_err(|e| match self.latch.error() {
            Some(rejected) => {
                self.shut_down();
                rejected
            }
            None => ConnectError::Acquire(e),
        })
    }

    /// Whether a directive rejection has disabled this engine.
    #[must_use]
    pub fn is_disabled(&self) -> bool {
        self.latch.is_tripped()
    }

    /// Runs `sql` with `params` and collects the result into a [`Table`].
    ///
    /// When the query returns no rows, column names are taken from the
    /// statement description so the table still has its header.
    ///
    /// # Errors
    ///
    /// - [`ConnectError::MissingParameter`] for an unbound named placeholder.
    /// - Errors of [`acquire`](Self::acquire).
    /// - [`ConnectError::Query`] if execution or decoding fails.
    /// - [`ConnectError::UnsupportedColumn`] for a column type with no JSON
    ///   mapping.
    pub async fn query_table(&self, sql: &str, params: &QueryParams) -> Result<Table, ConnectError> {
        let prepared = query::prepare(sql, params)?;

        let mut statement = sqlx::query(&prepared.sql);
        for value in &prepared.values {
            statement = query::bind_value(statement, value);
        }
        let mut conn = self.acquire().await?;
        let rows = statement
            .fetch_all(&mut *conn)
            .await
            .map_err(ConnectError::Query)?;

        let columns = match rows.first() {
            Some(row) => query::column_names(row),
            None => {
                let described = (&mut *conn)
                    .describe(&prepared.sql)
                    .await
                    .map_err(ConnectError::Query)?;
                described
                    .columns()
                    .iter()
                    .map(|c| c.name().to_string())
                    .collect()
            }
        };

        Table::from_rows(columns, &rows)
    }

    /// Closes the pool, waiting for borrowed connections to be returned.
    pub async fn close(&self) {
        self.pool.close().await;
    }

    /// Closes the pool in the background; borrowed connections may still be
    /// outstanding.
    fn shut_down(&self) {
        if !self.pool.is_closed() {
            let pool = self.pool.clone();
            tokio::spawn(async move { pool.close().await });
        }
    }
}
