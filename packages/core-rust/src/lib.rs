//! `rlsguard` core: the tenant identifier and its owner-only context store.
//!
//! An administrative caller writes the active tenant once with
//! [`ContextStore::set`]; the database layer reads it back with
//! [`ContextStore::get`] for every physical connection it opens.

pub mod error;
pub mod store;
pub mod tenant;

pub use error::ContextError;
pub use store::ContextStore;
pub use tenant::TenantId;

/// Directory under the user's home that holds the context record.
pub const CONTEXT_DIR_NAME: &str = ".agent-config";

/// File name of the context record inside [`CONTEXT_DIR_NAME`].
pub const CONTEXT_FILE_NAME: &str = "client_id";
