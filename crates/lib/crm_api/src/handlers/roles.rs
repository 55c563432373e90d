//! Role administration handlers. Guarded by `manage_roles`.

use axum::extract::{Extension, State};
use axum::http::StatusCode;
use crm_core::models::{NewRole, Permission, Role, RoleDeletion, RoleUpdate, RoleWithPermissions};
use crm_core::rbac::catalog;
use uuid::Uuid;

use crate::AppState;
use crate::error::AppResult;
use crate::extract::{Json, Path};
use crate::middleware::auth::AuthenticatedUser;
use crate::models::SetRolePermissionsRequest;

/// `GET /api/admin/roles`
pub async fn list_roles_handler(State(state): State<AppState>) -> AppResult<Json<Vec<Role>>> {
    Ok(Json(state.store.list_roles().await?))
}

/// `POST /api/admin/roles`
pub async fn create_role_handler(
    State(state): State<AppState>,
    Json(body): Json<NewRole>,
) -> AppResult<(StatusCode, Json<Role>)> {
    let role = catalog::create_role(state.store.as_ref(), body).await?;
    Ok((StatusCode::CREATED, Json(role)))
}

/// `GET /api/admin/roles/{id}`: the role with its permission set.
pub async fn get_role_handler(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> AppResult<Json<RoleWithPermissions>> {
    Ok(Json(
        catalog::get_role_with_permissions(state.store.as_ref(), id).await?,
    ))
}

/// `PATCH /api/admin/roles/{id}`
pub async fn update_role_handler(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(body): Json<RoleUpdate>,
) -> AppResult<Json<Role>> {
    Ok(Json(
        catalog::update_role(state.store.as_ref(), id, body).await?,
    ))
}

/// `DELETE /api/admin/roles/{id}`: cascades permission links and user
/// assignments; assignments are recorded in role history.
pub async fn delete_role_handler(
    State(state): State<AppState>,
    Extension(AuthenticatedUser(actor)): Extension<AuthenticatedUser>,
    Path(id): Path<Uuid>,
) -> AppResult<Json<RoleDeletion>> {
    Ok(Json(
        catalog::delete_role(state.store.as_ref(), id, Some(actor.id)).await?,
    ))
}

/// `PUT /api/admin/roles/{id}/permissions`: replace the permission set.
pub async fn set_role_permissions_handler(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(body): Json<SetRolePermissionsRequest>,
) -> AppResult<Json<Vec<Permission>>> {
    Ok(Json(
        catalog::set_role_permissions(state.store.as_ref(), id, &body.permission_ids).await?,
    ))
}

/// `POST /api/admin/roles/{id}/permissions/{permission_id}`
pub async fn grant_role_permission_handler(
    State(state): State<AppState>,
    Path((id, permission_id)): Path<(Uuid, Uuid)>,
) -> AppResult<StatusCode> {
    catalog::grant_role_permission(state.store.as_ref(), id, permission_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// `DELETE /api/admin/roles/{id}/permissions/{permission_id}`
pub async fn revoke_role_permission_handler(
    State(state): State<AppState>,
    Path((id, permission_id)): Path<(Uuid, Uuid)>,
) -> AppResult<StatusCode> {
    catalog::revoke_role_permission(state.store.as_ref(), id, permission_id).await?;
    Ok(StatusCode::NO_CONTENT)
}
