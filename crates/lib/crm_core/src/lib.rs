//! # crm_core
//!
//! Core access-control logic for the CRM.
//!
//! Owns the role/permission catalog, the authorization check, the user
//! lifecycle (deactivation, reactivation, archival) and the storage backends
//! that persist them.

pub mod archival;
pub mod auth;
pub mod lifecycle;
pub mod migrate;
pub mod models;
pub mod rbac;
pub mod store;

/// Returns the crate version.
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
