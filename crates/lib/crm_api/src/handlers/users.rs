//! User administration and lifecycle handlers. Guarded by `manage_users`.

use axum::extract::{Extension, State};
use axum::http::StatusCode;
use chrono::Utc;
use crm_core::auth::password::hash_password;
use crm_core::lifecycle;
use crm_core::models::{
    ArchivedUser, Deactivation, RoleHistoryEntry, User, UserRoleAssignment,
};
use crm_core::rbac::{RbacError, catalog};
use uuid::Uuid;

use crate::AppState;
use crate::error::AppResult;
use crate::extract::{Json, Path, Query};
use crate::middleware::auth::AuthenticatedUser;
use crate::models::{
    AssignRoleRequest, CreateUserRequest, ListUsersQuery, SetStatusRequest, UserDetail,
};

/// `GET /api/admin/users?status=`
pub async fn list_users_handler(
    State(state): State<AppState>,
    Query(query): Query<ListUsersQuery>,
) -> AppResult<Json<Vec<User>>> {
    Ok(Json(state.store.list_users(query.status).await?))
}

/// `POST /api/admin/users`: create an active user, optionally with a
/// password and initial roles.
pub async fn create_user_handler(
    State(state): State<AppState>,
    Extension(AuthenticatedUser(actor)): Extension<AuthenticatedUser>,
    Json(body): Json<CreateUserRequest>,
) -> AppResult<(StatusCode, Json<UserDetail>)> {
    let password_hash = body.password.as_deref().map(hash_password).transpose()?;
    let (user, roles) = lifecycle::create_user_with_roles(
        state.store.as_ref(),
        &body.email,
        body.name.as_deref(),
        password_hash,
        &body.role_ids,
        Some(actor.id),
    )
    .await?;
    Ok((StatusCode::CREATED, Json(UserDetail { user, roles })))
}

/// `GET /api/admin/users/{id}`
pub async fn get_user_handler(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> AppResult<Json<UserDetail>> {
    let user = state
        .store
        .get_user(id)
        .await?
        .ok_or_else(|| RbacError::NotFound(format!("User {id}")))?;
    let roles = state.store.user_roles(id).await?;
    Ok(Json(UserDetail { user, roles }))
}

/// `GET /api/admin/users/{id}/roles`
pub async fn list_user_roles_handler(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> AppResult<Json<Vec<UserRoleAssignment>>> {
    Ok(Json(state.store.user_roles(id).await?))
}

/// `POST /api/admin/users/{id}/roles`
pub async fn assign_role_handler(
    State(state): State<AppState>,
    Extension(AuthenticatedUser(actor)): Extension<AuthenticatedUser>,
    Path(id): Path<Uuid>,
    Json(body): Json<AssignRoleRequest>,
) -> AppResult<(StatusCode, Json<UserRoleAssignment>)> {
    let assignment =
        catalog::assign_role(state.store.as_ref(), id, body.role_id, Some(actor.id)).await?;
    Ok((StatusCode::CREATED, Json(assignment)))
}

/// `DELETE /api/admin/users/{id}/roles/{role_id}`: the removal is kept in
/// role history.
pub async fn unassign_role_handler(
    State(state): State<AppState>,
    Extension(AuthenticatedUser(actor)): Extension<AuthenticatedUser>,
    Path((id, role_id)): Path<(Uuid, Uuid)>,
) -> AppResult<Json<RoleHistoryEntry>> {
    Ok(Json(
        catalog::unassign_role(state.store.as_ref(), id, role_id, Some(actor.id)).await?,
    ))
}

/// `POST /api/admin/users/{id}/status`: toggle `active` / `inactive`.
pub async fn set_status_handler(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(body): Json<SetStatusRequest>,
) -> AppResult<Json<User>> {
    Ok(Json(
        lifecycle::set_status(state.store.as_ref(), id, body.status).await?,
    ))
}

/// `POST /api/admin/users/{id}/deactivate`
pub async fn deactivate_handler(
    State(state): State<AppState>,
    Extension(AuthenticatedUser(actor)): Extension<AuthenticatedUser>,
    Path(id): Path<Uuid>,
) -> AppResult<Json<Deactivation>> {
    Ok(Json(
        lifecycle::deactivate(state.store.as_ref(), id, Some(actor.id)).await?,
    ))
}

/// `POST /api/admin/users/{id}/reactivate`: roles are not restored.
pub async fn reactivate_handler(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> AppResult<Json<User>> {
    Ok(Json(lifecycle::reactivate(state.store.as_ref(), id).await?))
}

/// `POST /api/admin/users/{id}/archive`: archive one user once its
/// retention window has elapsed; 409 before that.
pub async fn archive_handler(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> AppResult<Json<ArchivedUser>> {
    Ok(Json(
        lifecycle::archive_user(
            state.store.as_ref(),
            id,
            state.config.retention(),
            Utc::now(),
        )
        .await?,
    ))
}

/// `GET /api/admin/users/{id}/role-history`
pub async fn role_history_handler(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> AppResult<Json<Vec<RoleHistoryEntry>>> {
    Ok(Json(state.store.role_history(id).await?))
}

/// `GET /api/admin/users/without-roles`
pub async fn users_without_roles_handler(
    State(state): State<AppState>,
) -> AppResult<Json<Vec<User>>> {
    Ok(Json(
        lifecycle::users_without_roles(state.store.as_ref()).await?,
    ))
}

/// `GET /api/admin/archived-users`
pub async fn archived_users_handler(
    State(state): State<AppState>,
) -> AppResult<Json<Vec<ArchivedUser>>> {
    Ok(Json(state.store.list_archived_users().await?))
}
