//! Storage backends for the RBAC tables.
//!
//! [`RbacStore`] is the seam between the domain services and persistence.
//! `postgres` is the production backend; `memory` backs tests and local
//! development. Every method that touches more than one table is atomic in
//! both backends: a single transaction in Postgres, a single write-lock
//! critical section in memory.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::models::{
    ArchivedUser, Deactivation, NewPermission, NewRole, NewUser, Permission, PermissionUpdate,
    Role, RoleDeletion, RoleHistoryEntry, RoleUpdate, User, UserRoleAssignment, UserStatus,
};
use crate::rbac::RbacResult;

pub use memory::MemoryStore;
pub use postgres::PgStore;

/// Id for a role history row. UUIDv7, so ids sort in removal order.
pub(crate) fn history_id() -> Uuid {
    Uuid::now_v7()
}

#[async_trait]
pub trait RbacStore: Send + Sync {
    // ---- users -----------------------------------------------------------

    /// Fails with `Conflict` when the email is taken.
    async fn create_user(&self, user: NewUser) -> RbacResult<User>;
    /// Create a user holding `role_ids`, atomically. An unknown role fails
    /// with `NotFound` and no user is created.
    async fn create_user_with_roles(
        &self,
        user: NewUser,
        role_ids: &[Uuid],
        actor: Option<Uuid>,
    ) -> RbacResult<(User, Vec<UserRoleAssignment>)>;
    async fn get_user(&self, id: Uuid) -> RbacResult<Option<User>>;
    async fn find_user_by_email(&self, email: &str) -> RbacResult<Option<User>>;
    /// User plus stored password hash, for login.
    async fn find_credentials(&self, email: &str) -> RbacResult<Option<(User, Option<String>)>>;
    async fn set_password_hash(&self, user_id: Uuid, password_hash: &str) -> RbacResult<()>;
    async fn list_users(&self, status: Option<UserStatus>) -> RbacResult<Vec<User>>;
    /// Active users holding no role at all.
    async fn list_users_without_roles(&self) -> RbacResult<Vec<User>>;

    // ---- lifecycle -------------------------------------------------------

    /// Move a user to `active` or `inactive`. Checks the current status under
    /// a row lock; leaving `deactivated` clears the deactivation stamp.
    async fn set_user_status(&self, user_id: Uuid, status: UserStatus) -> RbacResult<User>;
    /// Remove every role of the user into history and mark it deactivated.
    async fn deactivate_user(
        &self,
        user_id: Uuid,
        actor: Option<Uuid>,
        at: DateTime<Utc>,
    ) -> RbacResult<Deactivation>;
    /// Archive one deactivated user whose `deactivated_at` is at or before `cutoff`.
    async fn archive_user(
        &self,
        user_id: Uuid,
        cutoff: DateTime<Utc>,
        at: DateTime<Utc>,
    ) -> RbacResult<ArchivedUser>;
    /// Archive every deactivated user whose `deactivated_at` is at or before `cutoff`.
    async fn archive_deactivated(
        &self,
        cutoff: DateTime<Utc>,
        at: DateTime<Utc>,
    ) -> RbacResult<Vec<ArchivedUser>>;
    async fn list_archived_users(&self) -> RbacResult<Vec<ArchivedUser>>;
    /// History rows for a user, oldest first. Works for archived users too.
    async fn role_history(&self, user_id: Uuid) -> RbacResult<Vec<RoleHistoryEntry>>;

    // ---- roles -----------------------------------------------------------

    async fn list_roles(&self) -> RbacResult<Vec<Role>>;
    async fn get_role(&self, id: Uuid) -> RbacResult<Option<Role>>;
    async fn create_role(&self, role: NewRole) -> RbacResult<Role>;
    async fn update_role(&self, id: Uuid, update: RoleUpdate) -> RbacResult<Role>;
    /// Drop the role's permission links and user assignments, then the role.
    async fn delete_role(
        &self,
        id: Uuid,
        actor: Option<Uuid>,
        at: DateTime<Utc>,
    ) -> RbacResult<RoleDeletion>;
    async fn role_permissions(&self, role_id: Uuid) -> RbacResult<Vec<Permission>>;
    /// Replace the role's permission set.
    async fn set_role_permissions(
        &self,
        role_id: Uuid,
        permission_ids: &[Uuid],
    ) -> RbacResult<Vec<Permission>>;
    /// Idempotent.
    async fn grant_role_permission(&self, role_id: Uuid, permission_id: Uuid) -> RbacResult<()>;
    /// Returns whether a link was removed.
    async fn revoke_role_permission(&self, role_id: Uuid, permission_id: Uuid)
    -> RbacResult<bool>;

    // ---- permissions -----------------------------------------------------

    async fn list_permissions(&self) -> RbacResult<Vec<Permission>>;
    async fn get_permission(&self, id: Uuid) -> RbacResult<Option<Permission>>;
    async fn create_permission(&self, permission: NewPermission) -> RbacResult<Permission>;
    async fn update_permission(&self, id: Uuid, update: PermissionUpdate)
    -> RbacResult<Permission>;
    /// Fails with `InUse` while any role references the permission.
    async fn delete_permission(&self, id: Uuid) -> RbacResult<Permission>;

    // ---- user roles ------------------------------------------------------

    async fn user_roles(&self, user_id: Uuid) -> RbacResult<Vec<UserRoleAssignment>>;
    /// Idempotent. Rejected for users that are not active or inactive.
    async fn assign_role(
        &self,
        user_id: Uuid,
        role_id: Uuid,
        actor: Option<Uuid>,
    ) -> RbacResult<UserRoleAssignment>;
    /// Remove one assignment, recording it in history.
    async fn unassign_role(
        &self,
        user_id: Uuid,
        role_id: Uuid,
        actor: Option<Uuid>,
        at: DateTime<Utc>,
    ) -> RbacResult<RoleHistoryEntry>;

    // ---- authorization ---------------------------------------------------

    async fn has_permission(&self, email: &str, permission_name: &str) -> RbacResult<bool>;
    async fn has_resource_permission(
        &self,
        email: &str,
        resource: &str,
        action: &str,
    ) -> RbacResult<bool>;
    /// Sorted, de-duplicated permission names. Empty for unknown users.
    async fn get_user_permissions(&self, email: &str) -> RbacResult<Vec<String>>;
}
