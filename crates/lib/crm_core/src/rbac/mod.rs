//! Role-based access control.
//!
//! Permissions are granted to roles and roles to users. `authorize` answers
//! "may this user do X", `catalog` maintains roles, permissions and the
//! mappings between them.

pub mod authorize;
pub mod catalog;

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::models::UserStatus;

/// Longest accepted role / permission name.
pub const MAX_NAME_LEN: usize = 100;

/// RBAC and user lifecycle errors.
#[derive(Debug, Error)]
pub enum RbacError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("{what} is still assigned to {dependents} role(s)")]
    InUse { what: String, dependents: i64 },

    #[error("Invalid status transition: {from} -> {to}")]
    InvalidTransition { from: UserStatus, to: UserStatus },

    #[error("Retention window has not elapsed; archivable after {until}")]
    RetentionPending { until: DateTime<Utc> },

    #[error("Database error: {0}")]
    DbError(#[from] sqlx::Error),
}

/// Convenience alias for RBAC operations.
pub type RbacResult<T> = Result<T, RbacError>;

/// Trim a catalog name and check it is non-empty and not too long.
pub fn normalize_name(field: &str, value: &str) -> RbacResult<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(RbacError::Validation(format!("{field} must not be empty")));
    }
    if trimmed.chars().count() > MAX_NAME_LEN {
        return Err(RbacError::Validation(format!(
            "{field} must be at most {MAX_NAME_LEN} characters"
        )));
    }
    Ok(trimmed.to_string())
}

/// Normalize an email address for storage and lookup.
pub fn normalize_email(email: &str) -> RbacResult<String> {
    let email = email.trim().to_lowercase();
    match email.split_once('@') {
        Some((local, domain)) if !local.is_empty() && domain.contains('.') => Ok(email),
        _ => Err(RbacError::Validation(format!("Invalid email: {email}"))),
    }
}
