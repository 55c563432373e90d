//! User lifecycle models.

use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::rbac::RbacError;

/// User status. Mirrors the `user_status` Postgres enum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserStatus {
    Active,
    /// Suspended by an admin toggle; roles are retained.
    Inactive,
    /// All roles removed; eligible for archival after the retention window.
    Deactivated,
    /// Moved out of the live table. Never stored in `users`.
    Archived,
}

impl UserStatus {
    /// Database text representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            UserStatus::Active => "active",
            UserStatus::Inactive => "inactive",
            UserStatus::Deactivated => "deactivated",
            UserStatus::Archived => "archived",
        }
    }

    /// Whether the lifecycle allows moving from `self` to `to`.
    ///
    /// ```text
    /// active <-> inactive
    /// active | inactive -> deactivated -> archived
    /// deactivated -> active
    /// ```
    pub fn can_transition_to(self, to: UserStatus) -> bool {
        use UserStatus::*;
        matches!(
            (self, to),
            (Active, Inactive)
                | (Inactive, Active)
                | (Active, Deactivated)
                | (Inactive, Deactivated)
                | (Deactivated, Archived)
                | (Deactivated, Active)
        )
    }

    /// Like [`can_transition_to`](Self::can_transition_to) but as a `Result`.
    pub fn transition_to(self, to: UserStatus) -> Result<(), RbacError> {
        if self.can_transition_to(to) {
            Ok(())
        } else {
            Err(RbacError::InvalidTransition { from: self, to })
        }
    }
}

impl std::fmt::Display for UserStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for UserStatus {
    type Err = RbacError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(UserStatus::Active),
            "inactive" => Ok(UserStatus::Inactive),
            "deactivated" => Ok(UserStatus::Deactivated),
            "archived" => Ok(UserStatus::Archived),
            other => Err(RbacError::Validation(format!("Unknown user status: {other}"))),
        }
    }
}

/// Live user row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: Uuid,
    pub email: String,
    pub name: Option<String>,
    pub status: UserStatus,
    pub deactivated_at: Option<DateTime<Utc>>,
    pub deactivated_by: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewUser {
    pub email: String,
    pub name: Option<String>,
    pub password_hash: Option<String>,
}

/// Why a user-role assignment was removed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RemovalReason {
    UserDeactivated,
    RoleUnassigned,
    RoleDeleted,
}

impl RemovalReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            RemovalReason::UserDeactivated => "user_deactivated",
            RemovalReason::RoleUnassigned => "role_unassigned",
            RemovalReason::RoleDeleted => "role_deleted",
        }
    }
}

impl std::fmt::Display for RemovalReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RemovalReason {
    type Err = RbacError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user_deactivated" => Ok(RemovalReason::UserDeactivated),
            "role_unassigned" => Ok(RemovalReason::RoleUnassigned),
            "role_deleted" => Ok(RemovalReason::RoleDeleted),
            other => Err(RbacError::Validation(format!("Unknown removal reason: {other}"))),
        }
    }
}

/// Append-only record of a removed user-role assignment.
///
/// `role_name` is captured at removal time so the entry stays readable after
/// the role itself is deleted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoleHistoryEntry {
    pub id: Uuid,
    pub user_id: Uuid,
    pub role_id: Uuid,
    pub role_name: String,
    pub removed_at: DateTime<Utc>,
    pub removed_by: Option<Uuid>,
    pub reason: RemovalReason,
}

/// Result of deactivating a user.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Deactivation {
    pub user: User,
    pub removed_roles: Vec<RoleHistoryEntry>,
}

/// User moved to cold storage after the retention window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct ArchivedUser {
    pub id: Uuid,
    pub email: String,
    pub name: Option<String>,
    pub deactivated_at: DateTime<Utc>,
    pub deactivated_by: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub archived_at: DateTime<Utc>,
}
