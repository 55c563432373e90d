//! Role / permission catalog maintenance.
//!
//! Thin validated layer over [`RbacStore`]: normalizes names, rejects empty
//! input, and logs every administrative mutation. Multi-table effects
//! (cascades, history rows) are performed atomically by the store.

use chrono::Utc;
use tracing::info;
use uuid::Uuid;

use super::{RbacError, RbacResult, normalize_name};
use crate::models::{
    NewPermission, NewRole, Permission, PermissionUpdate, Role, RoleDeletion, RoleHistoryEntry,
    RoleUpdate, RoleWithPermissions, UserRoleAssignment,
};
use crate::store::RbacStore;

/// CRM resources that get the standard CRUD permission set.
pub const CRM_RESOURCES: [&str; 4] = ["campaigns", "leads", "meetings", "tasks"];

/// `(name prefix, action)` pairs of the standard CRUD permission set.
pub const CRUD_ACTIONS: [(&str, &str); 4] = [
    ("view", "read"),
    ("create", "create"),
    ("edit", "edit"),
    ("delete", "delete"),
];

/// Administrative permissions guarding the admin API.
pub const MANAGE_USERS: &str = "manage_users";
pub const MANAGE_ROLES: &str = "manage_roles";
pub const MANAGE_PERMISSIONS: &str = "manage_permissions";

/// Built-in permission set. Mirrors `migrations/0004_seed_catalog.sql`.
pub fn default_permissions() -> Vec<NewPermission> {
    let mut out = Vec::new();
    for resource in CRM_RESOURCES {
        for (verb, action) in CRUD_ACTIONS {
            out.push(NewPermission {
                name: format!("{verb}_{resource}"),
                resource: resource.to_string(),
                action: action.to_string(),
                description: Some(format!("{}{} {resource}", verb[..1].to_uppercase(), &verb[1..])),
            });
        }
    }
    let extra = [
        (MANAGE_USERS, "users", "manage", "Manage users and their roles"),
        (MANAGE_ROLES, "roles", "manage", "Manage roles"),
        (MANAGE_PERMISSIONS, "permissions", "manage", "Manage permissions"),
        ("view_llm_usage", "llm_usage", "read", "View LLM usage and billing"),
        ("manage_llm_settings", "llm_settings", "manage", "Manage LLM settings"),
    ];
    for (name, resource, action, description) in extra {
        out.push(NewPermission {
            name: name.to_string(),
            resource: resource.to_string(),
            action: action.to_string(),
            description: Some(description.to_string()),
        });
    }
    out
}

/// Built-in roles with the names of the permissions each one holds.
pub fn default_role_grants() -> Vec<(NewRole, Vec<String>)> {
    let names: Vec<String> = default_permissions().into_iter().map(|p| p.name).collect();
    let pick = |pred: fn(&str) -> bool| -> Vec<String> {
        names.iter().filter(|n| pred(n.as_str())).cloned().collect()
    };

    vec![
        (role("Admin", "Full access"), pick(|_| true)),
        (
            role("Manager", "Manages CRM data, no access administration"),
            pick(|n| !n.starts_with("manage_")),
        ),
        (
            role("Agent", "Works leads, meetings and tasks"),
            pick(|n| {
                n == "view_campaigns"
                    || ["leads", "meetings", "tasks"].iter().any(|r| {
                        ["view", "create", "edit"]
                            .iter()
                            .any(|v| n == format!("{v}_{r}"))
                    })
            }),
        ),
        (
            role("Viewer", "Read-only access"),
            pick(|n| n.starts_with("view_")),
        ),
    ]
}

fn role(name: &str, description: &str) -> NewRole {
    NewRole {
        name: name.to_string(),
        description: Some(description.to_string()),
    }
}

fn clean_description(description: Option<String>) -> Option<String> {
    description
        .map(|d| d.trim().to_string())
        .filter(|d| !d.is_empty())
}

// ---------------------------------------------------------------------------
// Roles
// ---------------------------------------------------------------------------

pub async fn create_role(store: &dyn RbacStore, input: NewRole) -> RbacResult<Role> {
    let input = NewRole {
        name: normalize_name("Role name", &input.name)?,
        description: clean_description(input.description),
    };
    let role = store.create_role(input).await?;
    info!(role_id = %role.id, name = %role.name, "role created");
    Ok(role)
}

pub async fn update_role(store: &dyn RbacStore, id: Uuid, update: RoleUpdate) -> RbacResult<Role> {
    let update = RoleUpdate {
        name: update
            .name
            .map(|n| normalize_name("Role name", &n))
            .transpose()?,
        description: update.description.map(|d| d.trim().to_string()),
    };
    let role = store.update_role(id, update).await?;
    info!(role_id = %role.id, name = %role.name, "role updated");
    Ok(role)
}

/// Delete a role, cascading its permission links and user assignments.
pub async fn delete_role(
    store: &dyn RbacStore,
    id: Uuid,
    actor: Option<Uuid>,
) -> RbacResult<RoleDeletion> {
    let deletion = store.delete_role(id, actor, Utc::now()).await?;
    info!(
        role_id = %id,
        name = %deletion.role.name,
        removed_assignments = deletion.removed_assignments.len(),
        revoked_permissions = deletion.revoked_permissions,
        "role deleted"
    );
    Ok(deletion)
}

pub async fn get_role_with_permissions(
    store: &dyn RbacStore,
    id: Uuid,
) -> RbacResult<RoleWithPermissions> {
    let role = store
        .get_role(id)
        .await?
        .ok_or_else(|| RbacError::NotFound(format!("Role {id}")))?;
    let permissions = store.role_permissions(id).await?;
    Ok(RoleWithPermissions { role, permissions })
}

/// Replace a role's permission set. Duplicate ids are ignored.
pub async fn set_role_permissions(
    store: &dyn RbacStore,
    role_id: Uuid,
    permission_ids: &[Uuid],
) -> RbacResult<Vec<Permission>> {
    let mut ids = permission_ids.to_vec();
    ids.sort();
    ids.dedup();
    let permissions = store.set_role_permissions(role_id, &ids).await?;
    info!(role_id = %role_id, count = permissions.len(), "role permissions replaced");
    Ok(permissions)
}

pub async fn grant_role_permission(
    store: &dyn RbacStore,
    role_id: Uuid,
    permission_id: Uuid,
) -> RbacResult<()> {
    store.grant_role_permission(role_id, permission_id).await?;
    info!(role_id = %role_id, permission_id = %permission_id, "permission granted to role");
    Ok(())
}

pub async fn revoke_role_permission(
    store: &dyn RbacStore,
    role_id: Uuid,
    permission_id: Uuid,
) -> RbacResult<()> {
    if !store.revoke_role_permission(role_id, permission_id).await? {
        return Err(RbacError::NotFound(format!(
            "Permission {permission_id} is not granted to role {role_id}"
        )));
    }
    info!(role_id = %role_id, permission_id = %permission_id, "permission revoked from role");
    Ok(())
}

// ---------------------------------------------------------------------------
// Permissions
// ---------------------------------------------------------------------------

pub async fn create_permission(
    store: &dyn RbacStore,
    input: NewPermission,
) -> RbacResult<Permission> {
    let input = NewPermission {
        name: normalize_name("Permission name", &input.name)?,
        resource: normalize_name("Resource", &input.resource)?,
        action: normalize_name("Action", &input.action)?,
        description: clean_description(input.description),
    };
    let permission = store.create_permission(input).await?;
    info!(permission_id = %permission.id, name = %permission.name, "permission created");
    Ok(permission)
}

pub async fn update_permission(
    store: &dyn RbacStore,
    id: Uuid,
    update: PermissionUpdate,
) -> RbacResult<Permission> {
    let update = PermissionUpdate {
        resource: update
            .resource
            .map(|r| normalize_name("Resource", &r))
            .transpose()?,
        action: update
            .action
            .map(|a| normalize_name("Action", &a))
            .transpose()?,
        description: update.description.map(|d| d.trim().to_string()),
    };
    let permission = store.update_permission(id, update).await?;
    info!(permission_id = %permission.id, name = %permission.name, "permission updated");
    Ok(permission)
}

/// Delete a permission that no role references.
pub async fn delete_permission(store: &dyn RbacStore, id: Uuid) -> RbacResult<Permission> {
    let permission = store.delete_permission(id).await?;
    info!(permission_id = %id, name = %permission.name, "permission deleted");
    Ok(permission)
}

// ---------------------------------------------------------------------------
// User roles
// ---------------------------------------------------------------------------

pub async fn assign_role(
    store: &dyn RbacStore,
    user_id: Uuid,
    role_id: Uuid,
    actor: Option<Uuid>,
) -> RbacResult<UserRoleAssignment> {
    let assignment = store.assign_role(user_id, role_id, actor).await?;
    info!(user_id = %user_id, role = %assignment.role_name, "role assigned");
    Ok(assignment)
}

pub async fn unassign_role(
    store: &dyn RbacStore,
    user_id: Uuid,
    role_id: Uuid,
    actor: Option<Uuid>,
) -> RbacResult<RoleHistoryEntry> {
    let entry = store
        .unassign_role(user_id, role_id, actor, Utc::now())
        .await?;
    info!(user_id = %user_id, role = %entry.role_name, "role unassigned");
    Ok(entry)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    #[test]
    fn default_catalog_covers_crud_and_admin_permissions() {
        let perms = default_permissions();
        assert_eq!(perms.len(), 16 + 5);
        let view = perms.iter().find(|p| p.name == "view_campaigns").unwrap();
        assert_eq!(view.resource, "campaigns");
        assert_eq!(view.action, "read");
        assert_eq!(view.description.as_deref(), Some("View campaigns"));
    }

    #[test]
    fn default_roles_partition_as_documented() {
        let grants = default_role_grants();
        let get = |name: &str| {
            grants
                .iter()
                .find(|(r, _)| r.name == name)
                .map(|(_, p)| p.clone())
                .unwrap()
        };

        assert_eq!(get("Admin").len(), 21);
        assert!(!get("Manager").iter().any(|p| p.starts_with("manage_")));
        assert_eq!(get("Manager").len(), 17);

        let agent = get("Agent");
        assert_eq!(agent.len(), 10);
        assert!(agent.contains(&"view_campaigns".to_string()));
        assert!(!agent.contains(&"edit_campaigns".to_string()));
        assert!(!agent.contains(&"delete_leads".to_string()));

        let viewer = get("Viewer");
        assert!(viewer.iter().all(|p| p.starts_with("view_")));
        assert_eq!(viewer.len(), 5);
    }

    #[tokio::test]
    async fn create_role_normalizes_input() {
        let store = MemoryStore::new();
        let role = create_role(
            &store,
            NewRole {
                name: "  Support  ".into(),
                description: Some("   ".into()),
            },
        )
        .await
        .unwrap();
        assert_eq!(role.name, "Support");
        assert_eq!(role.description, None);
    }

    #[tokio::test]
    async fn create_permission_rejects_blank_resource() {
        let store = MemoryStore::new();
        let err = create_permission(
            &store,
            NewPermission {
                name: "export_leads".into(),
                resource: " ".into(),
                action: "export".into(),
                description: None,
            },
        )
        .await
        .unwrap_err();
        assert!(matches!(err, RbacError::Validation(_)));
    }

    #[tokio::test]
    async fn set_role_permissions_ignores_duplicates() {
        let store = MemoryStore::with_default_catalog().await.unwrap();
        let role = create_role(
            &store,
            NewRole {
                name: "Auditor".into(),
                description: None,
            },
        )
        .await
        .unwrap();
        let perms = store.list_permissions().await.unwrap();
        let id = perms[0].id;

        let set = set_role_permissions(&store, role.id, &[id, id]).await.unwrap();
        assert_eq!(set.len(), 1);
    }

    #[tokio::test]
    async fn revoking_missing_link_is_not_found() {
        let store = MemoryStore::with_default_catalog().await.unwrap();
        let role = create_role(
            &store,
            NewRole {
                name: "Empty".into(),
                description: None,
            },
        )
        .await
        .unwrap();
        let perm = store.list_permissions().await.unwrap()[0].id;
        let err = revoke_role_permission(&store, role.id, perm)
            .await
            .unwrap_err();
        assert!(matches!(err, RbacError::NotFound(_)));
    }
}
