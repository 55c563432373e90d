//! Request and response bodies of the HTTP API.
//!
//! Domain types from `crm_core::models` are serialized as-is; this module only
//! holds the shapes that exist at the HTTP boundary.

use crm_core::models::{ArchivedUser, User, UserRoleAssignment, UserStatus};
use crm_core::rbac::authorize::PermissionCheck;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::AppError;

/// JSON error body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
    /// Number of rows blocking a delete (`in_use` errors only).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dependents: Option<i64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
}

// ---------------------------------------------------------------------------
// Auth
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenResponse {
    pub access_token: String,
    pub token_type: String,
    pub expires_in: i64,
    pub user: User,
}

#[derive(Debug, Clone, Serialize)]
pub struct LogoutResponse {
    pub success: bool,
}

// ---------------------------------------------------------------------------
// Authorization queries
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct PermissionsResponse {
    pub email: String,
    pub permissions: Vec<String>,
}

/// `?permission=NAME` or `?resource=R&action=A`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CheckQuery {
    pub permission: Option<String>,
    pub resource: Option<String>,
    pub action: Option<String>,
}

impl TryFrom<CheckQuery> for PermissionCheck {
    type Error = AppError;

    fn try_from(q: CheckQuery) -> Result<Self, AppError> {
        match (q.permission, q.resource, q.action) {
            (Some(name), None, None) if !name.trim().is_empty() => {
                Ok(PermissionCheck::name(name.trim()))
            }
            (None, Some(resource), Some(action))
                if !resource.trim().is_empty() && !action.trim().is_empty() =>
            {
                Ok(PermissionCheck::resource_action(
                    resource.trim(),
                    action.trim(),
                ))
            }
            _ => Err(AppError::Validation(
                "Provide either `permission` or both `resource` and `action`".into(),
            )),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CheckResponse {
    pub email: String,
    pub permission: String,
    pub allowed: bool,
}

// ---------------------------------------------------------------------------
// Admin
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetRolePermissionsRequest {
    pub permission_ids: Vec<Uuid>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateUserRequest {
    pub email: String,
    pub name: Option<String>,
    pub password: Option<String>,
    #[serde(default)]
    pub role_ids: Vec<Uuid>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssignRoleRequest {
    pub role_id: Uuid,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SetStatusRequest {
    pub status: UserStatus,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ListUsersQuery {
    pub status: Option<UserStatus>,
}

/// User plus current role assignments.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserDetail {
    #[serde(flatten)]
    pub user: User,
    pub roles: Vec<UserRoleAssignment>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ArchivalRunResponse {
    pub retention_days: i64,
    pub count: usize,
    pub archived: Vec<ArchivedUser>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn check_query_accepts_name_or_pair() {
        let by_name = CheckQuery {
            permission: Some("view_leads".into()),
            ..Default::default()
        };
        assert_eq!(
            PermissionCheck::try_from(by_name).unwrap(),
            PermissionCheck::name("view_leads")
        );

        let by_pair = CheckQuery {
            resource: Some("leads".into()),
            action: Some("read".into()),
            ..Default::default()
        };
        assert_eq!(
            PermissionCheck::try_from(by_pair).unwrap(),
            PermissionCheck::resource_action("leads", "read")
        );
    }

    #[test]
    fn check_query_rejects_mixed_or_empty() {
        assert!(PermissionCheck::try_from(CheckQuery::default()).is_err());
        let mixed = CheckQuery {
            permission: Some("view_leads".into()),
            resource: Some("leads".into()),
            action: None,
        };
        assert!(PermissionCheck::try_from(mixed).is_err());
    }

    #[test]
    fn error_body_omits_absent_dependents() {
        let body = ErrorResponse {
            error: "not_found".into(),
            message: "Role x".into(),
            dependents: None,
        };
        let json = serde_json::to_value(&body).unwrap();
        assert!(json.get("dependents").is_none());
    }
}
