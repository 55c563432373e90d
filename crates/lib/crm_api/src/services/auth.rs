//! Authentication service: login and session resolution, delegating to
//! `crm_core::auth`.

use crm_core::auth::jwt::{ACCESS_TOKEN_EXPIRY_SECS, generate_access_token, verify_access_token};
use crm_core::auth::{self, AuthError};
use crm_core::models::{User, UserStatus};
use crm_core::store::RbacStore;
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::models::TokenResponse;

/// Authenticate with email + password and issue a session token.
pub async fn login(
    store: &dyn RbacStore,
    email: &str,
    password: &str,
    secret: &[u8],
) -> AppResult<TokenResponse> {
    let user = auth::authenticate(store, email, password).await?;
    let access_token = generate_access_token(&user.id.to_string(), &user.email, secret)?;
    info!(user_id = %user.id, "login succeeded");
    Ok(TokenResponse {
        access_token,
        token_type: "Bearer".to_string(),
        expires_in: ACCESS_TOKEN_EXPIRY_SECS,
        user,
    })
}

/// Resolve a session token to the live user it was issued for.
///
/// Fails when the token is invalid or expired, when the user no longer
/// exists, or when the user is not `active`.
pub async fn session_user(store: &dyn RbacStore, token: &str, secret: &[u8]) -> AppResult<User> {
    let claims = verify_access_token(token, secret)
        .ok_or_else(|| AppError::Unauthorized("Invalid or expired token".into()))?;
    let user_id: Uuid = claims
        .sub
        .parse()
        .map_err(|_| AppError::from(AuthError::TokenError("Malformed subject".into())))?;
    let user = store
        .get_user(user_id)
        .await?
        .ok_or_else(|| AppError::Unauthorized("User no longer exists".into()))?;
    if user.status != UserStatus::Active {
        debug!(user_id = %user.id, status = %user.status, "session rejected for non-active user");
        return Err(AppError::Unauthorized(format!("Account is {}", user.status)));
    }
    Ok(user)
}
