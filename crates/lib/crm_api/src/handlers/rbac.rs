//! Authorization query handlers.

use axum::extract::{Extension, State};
use crm_core::rbac::authorize::{self, PermissionCheck};

use crate::AppState;
use crate::error::AppResult;
use crate::extract::{Json, Path, Query};
use crate::middleware::auth::AuthenticatedUser;
use crate::models::{CheckQuery, CheckResponse, PermissionsResponse};

async fn permissions_of(state: &AppState, email: &str) -> AppResult<Json<PermissionsResponse>> {
    let permissions = authorize::get_user_permissions(state.store.as_ref(), email).await?;
    Ok(Json(PermissionsResponse {
        email: email.to_string(),
        permissions,
    }))
}

async fn run_check(state: &AppState, email: &str, query: CheckQuery) -> AppResult<Json<CheckResponse>> {
    let check = PermissionCheck::try_from(query)?;
    let allowed = authorize::check(state.store.as_ref(), email, &check).await?;
    Ok(Json(CheckResponse {
        email: email.to_string(),
        permission: check.to_string(),
        allowed,
    }))
}

/// `GET /api/rbac/me/permissions`
pub async fn my_permissions_handler(
    State(state): State<AppState>,
    Extension(AuthenticatedUser(user)): Extension<AuthenticatedUser>,
) -> AppResult<Json<PermissionsResponse>> {
    permissions_of(&state, &user.email).await
}

/// `GET /api/rbac/check?permission=NAME` or `?resource=R&action=A`
pub async fn check_handler(
    State(state): State<AppState>,
    Extension(AuthenticatedUser(user)): Extension<AuthenticatedUser>,
    Query(query): Query<CheckQuery>,
) -> AppResult<Json<CheckResponse>> {
    run_check(&state, &user.email, query).await
}

/// `GET /api/rbac/users/{email}/permissions`
pub async fn user_permissions_handler(
    State(state): State<AppState>,
    Path(email): Path<String>,
) -> AppResult<Json<PermissionsResponse>> {
    permissions_of(&state, &email.trim().to_lowercase()).await
}

/// `GET /api/rbac/users/{email}/check?permission=NAME`
pub async fn user_check_handler(
    State(state): State<AppState>,
    Path(email): Path<String>,
    Query(query): Query<CheckQuery>,
) -> AppResult<Json<CheckResponse>> {
    run_check(&state, &email.trim().to_lowercase(), query).await
}
