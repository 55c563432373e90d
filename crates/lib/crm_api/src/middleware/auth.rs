//! Authentication and permission middleware.
//!
//! `require_auth` accepts `Authorization: Bearer <token>` or the
//! `crm_session` cookie, re-loads the user and injects [`AuthenticatedUser`].
//! `require_permission` then checks one named permission against the store.

use axum::{
    extract::{Request, State},
    http::header::AUTHORIZATION,
    middleware::Next,
    response::Response,
};
use axum_extra::extract::cookie::CookieJar;
use crm_core::models::User;
use crm_core::rbac::authorize;
use tracing::debug;

use crate::AppState;
use crate::error::AppError;
use crate::services::auth::session_user;
use crate::services::cookies::SESSION_COOKIE;

/// The caller, as loaded from the store for this request.
#[derive(Debug, Clone)]
pub struct AuthenticatedUser(pub User);

/// Bearer header first, then the session cookie.
fn session_token(request: &Request) -> Result<String, AppError> {
    if let Some(header) = request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
    {
        return header
            .strip_prefix("Bearer ")
            .map(str::to_string)
            .ok_or_else(|| AppError::Unauthorized("Invalid authorization scheme".into()));
    }
    CookieJar::from_headers(request.headers())
        .get(SESSION_COOKIE)
        .map(|c| c.value().to_string())
        .filter(|v| !v.is_empty())
        .ok_or_else(|| AppError::Unauthorized("Missing session".into()))
}

/// Axum middleware: resolves the session and injects `AuthenticatedUser`.
pub async fn require_auth(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let token = session_token(&request)?;
    let user = session_user(
        state.store.as_ref(),
        &token,
        state.config.jwt_secret.as_bytes(),
    )
    .await?;
    request.extensions_mut().insert(AuthenticatedUser(user));
    Ok(next.run(request).await)
}

/// State for [`require_permission`]: the app state plus the permission a
/// route group demands.
#[derive(Clone)]
pub struct PermissionGuard {
    state: AppState,
    permission: &'static str,
}

impl PermissionGuard {
    pub fn new(state: &AppState, permission: &'static str) -> Self {
        Self {
            state: state.clone(),
            permission,
        }
    }
}

/// Axum middleware: 403 unless the authenticated caller holds the guard's
/// permission. Must run inside [`require_auth`].
pub async fn require_permission(
    State(guard): State<PermissionGuard>,
    request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let AuthenticatedUser(user) = request
        .extensions()
        .get::<AuthenticatedUser>()
        .cloned()
        .ok_or_else(|| AppError::Unauthorized("Not authenticated".into()))?;

    let allowed =
        authorize::has_permission(guard.state.store.as_ref(), &user.email, guard.permission)
            .await?;
    if !allowed {
        debug!(user_id = %user.id, permission = guard.permission, "permission denied");
        return Err(AppError::Forbidden(format!(
            "Missing permission: {}",
            guard.permission
        )));
    }
    Ok(next.run(request).await)
}
