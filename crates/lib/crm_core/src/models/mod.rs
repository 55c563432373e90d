//! Domain models.
//!
//! Rows of the RBAC tables plus the composite results returned by
//! multi-step operations (deactivation, role deletion). Serialized with
//! camelCase field names since the API layer returns them as-is.

pub mod rbac;
pub mod user;

pub use rbac::{
    NewPermission, NewRole, Permission, PermissionUpdate, Role, RoleDeletion, RoleUpdate,
    RoleWithPermissions, UserRoleAssignment,
};
pub use user::{
    ArchivedUser, Deactivation, NewUser, RemovalReason, RoleHistoryEntry, User, UserStatus,
};
