//! Permission administration handlers. Guarded by `manage_permissions`.

use axum::extract::State;
use axum::http::StatusCode;
use crm_core::models::{NewPermission, Permission, PermissionUpdate};
use crm_core::rbac::{RbacError, catalog};
use uuid::Uuid;

use crate::AppState;
use crate::error::AppResult;
use crate::extract::{Json, Path};

/// `GET /api/admin/permissions`
pub async fn list_permissions_handler(
    State(state): State<AppState>,
) -> AppResult<Json<Vec<Permission>>> {
    Ok(Json(state.store.list_permissions().await?))
}

/// `POST /api/admin/permissions`
pub async fn create_permission_handler(
    State(state): State<AppState>,
    Json(body): Json<NewPermission>,
) -> AppResult<(StatusCode, Json<Permission>)> {
    let permission = catalog::create_permission(state.store.as_ref(), body).await?;
    Ok((StatusCode::CREATED, Json(permission)))
}

/// `GET /api/admin/permissions/{id}`
pub async fn get_permission_handler(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> AppResult<Json<Permission>> {
    let permission = state
        .store
        .get_permission(id)
        .await?
        .ok_or_else(|| RbacError::NotFound(format!("Permission {id}")))?;
    Ok(Json(permission))
}

/// `PATCH /api/admin/permissions/{id}`
pub async fn update_permission_handler(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(body): Json<PermissionUpdate>,
) -> AppResult<Json<Permission>> {
    Ok(Json(
        catalog::update_permission(state.store.as_ref(), id, body).await?,
    ))
}

/// `DELETE /api/admin/permissions/{id}`: 400 `in_use` while any role
/// still holds the permission.
pub async fn delete_permission_handler(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> AppResult<StatusCode> {
    catalog::delete_permission(state.store.as_ref(), id).await?;
    Ok(StatusCode::NO_CONTENT)
}
