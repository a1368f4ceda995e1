//! Single, non-pooled connections scoped to the active tenant.

use std::ops::{Deref, DerefMut};
use std::sync::Arc;

use rlsguard_core::TenantId;
use sqlx::postgres::PgConnectOptions;
use sqlx::{Connection, PgConnection};
use tracing::{debug, warn};

use crate::error::ConnectError;
use crate::session;

/// A live `PostgreSQL` connection whose session already carries the tenant.
///
/// Only [`ConnectionFactory::open_connection`](crate::ConnectionFactory::open_connection)
/// constructs these, and only after the session directive succeeded. The
/// wrapper derefs to [`PgConnection`] so it can be passed to any `sqlx`
/// query as `&mut *conn`.
#[derive(Debug)]
pub struct EnforcedConnection {
    conn: PgConnection,
    tenant: TenantId,
}

impl EnforcedConnection {
    /// Connects to `options` and applies the tenant directive.
    ///
    /// If the directive fails the connection is closed before the error is
    /// returned.
    pub(crate) async fn establish(
        options: &PgConnectOptions,
        tenant: TenantId,
    ) -> Result<Self, ConnectError> {
        let mut conn = PgConnection::connect_with(options)
            .await
            .map_err(ConnectError::Connect)?;

        if let Err(e) = session::apply_tenant(&mut conn, &tenant).await {
            warn!(tenant = %tenant.redacted(), error = %e, "tenant directive failed; discarding connection");
            if let Err(close_err) = conn.close().await {
                debug!(error = %close_err, "error closing unscoped connection");
            }
            return Err(ConnectError::EnforcementFailed(Arc::new(e)));
        }

        Ok(Self { conn, tenant })
    }

    /// Tenant this connection was scoped to.
    #[must_use]
    pub fn tenant(&self) -> &TenantId {
        &self.tenant
    }

    /// Reads the session variable back from the server.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectError::Query`] if the lookup fails.
    pub async fn current_tenant(&mut self) -> Result<Option<String>, ConnectError> {
        session::current_tenant(&mut self.conn)
            .await
            .map_err(ConnectError::Query)
    }

    /// Closes the connection gracefully.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectError::Connect`] if the termination handshake fails.
    pub async fn close(self) -> Result<(), ConnectError> {
        self.conn.close().await.map_err(ConnectError::Connect)
    }
}

impl Deref for EnforcedConnection {
    type Target = PgConnection;

    fn deref(&self) -> &Self::Target {
        &self.conn
    }
}

impl DerefMut for EnforcedConnection {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.conn
    }
}
