//! The tenant session directive.
//!
//! `PostgreSQL`'s `SET` statement cannot take bind parameters, so the
//! directive goes through `set_config`, with both the variable name and the
//! tenant identifier bound as parameters. `is_local = false` makes the
//! setting last for the whole session rather than the current transaction.

use rlsguard_core::TenantId;
use sqlx::PgConnection;

/// Session variable read by the database's row-level security policies.
pub const SESSION_VARIABLE: &str = "app.current_client_id";

/// Session-scoped directive. `$1` is the variable name, `$2` the tenant.
pub const SET_TENANT_SQL: &str = "SELECT set_config($1, $2, false)";

/// Reads the session variable back; `NULL` if it was never set.
pub const READ_TENANT_SQL: &str = "SELECT current_setting($1, true)";

/// Applies the tenant directive to `conn`.
///
/// # Errors
///
/// Returns the driver error if the statement fails; the caller decides
/// what happens to the connection.
pub async fn apply_tenant(conn: &mut PgConnection, tenant: &TenantId) -> Result<(), sqlx::Error> {
    sqlx::query(SET_TENANT_SQL)
        .bind(SESSION_VARIABLE)
        .bind(tenant.as_str())
        .execute(conn)
        .await?;
    Ok(())
}

/// Reads the tenant currently bound to the session on `conn`.
///
/// Returns `None` if the variable is unset or empty.
///
/// # Errors
///
/// Returns the driver error if the statement fails.
pub async fn current_tenant(conn: &mut PgConnection) -> Result<Option<String>, sqlx::Error> {
    let value: Option<String> = sqlx::query_scalar(READ_TENANT_SQL)
        .bind(SESSION_VARIABLE)
        .fetch_one(conn)
        .await?;
    Ok(value.filter(|v| !v.is_empty()))
}
