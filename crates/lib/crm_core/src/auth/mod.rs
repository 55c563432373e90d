//! Authentication: password hashing, session tokens and credential checks.
//!
//! Authorization (what an authenticated user may do) lives in
//! [`crate::rbac::authorize`].

pub mod jwt;
pub mod password;

use thiserror::Error;
use tracing::{debug, info};

use crate::models::{User, UserStatus};
use crate::rbac::{RbacError, normalize_email};
use crate::store::RbacStore;

/// Authentication errors.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Invalid credentials")]
    CredentialError,

    #[error("Account is {0}")]
    AccountDisabled(UserStatus),

    #[error("Token error: {0}")]
    TokenError(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error(transparent)]
    Store(#[from] RbacError),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Check an email + password pair. Only `active` users authenticate.
///
/// Unknown emails, users without a password and wrong passwords all fail with
/// the same [`AuthError::CredentialError`].
pub async fn authenticate(
    store: &dyn RbacStore,
    email: &str,
    password: &str,
) -> Result<User, AuthError> {
    let email = normalize_email(email).map_err(|_| AuthError::CredentialError)?;
    let Some((user, hash)) = store.find_credentials(&email).await? else {
        debug!(email = %email, "login for unknown email");
        return Err(AuthError::CredentialError);
    };
    let Some(hash) = hash else {
        return Err(AuthError::CredentialError);
    };
    if !password::verify_password(password, &hash)? {
        return Err(AuthError::CredentialError);
    }
    if user.status != UserStatus::Active {
        info!(user_id = %user.id, status = %user.status, "login refused for non-active user");
        return Err(AuthError::AccountDisabled(user.status));
    }
    Ok(user)
}

/// Set (or replace) a user's password.
pub async fn set_password(
    store: &dyn RbacStore,
    email: &str,
    password: &str,
) -> Result<User, AuthError> {
    let email = normalize_email(email)?;
    let user = store
        .find_user_by_email(&email)
        .await?
        .ok_or_else(|| RbacError::NotFound(format!("User {email}")))?;
    let hash = password::hash_password(password)?;
    store.set_password_hash(user.id, &hash).await?;
    info!(user_id = %user.id, "password updated");
    Ok(user)
}
