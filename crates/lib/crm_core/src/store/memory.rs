//! In-memory implementation of [`RbacStore`].
//!
//! All tables live in one `State` behind a single `tokio::sync::RwLock`.
//! Mutations take the write lock for their whole duration, which gives the
//! same all-or-nothing behaviour the Postgres backend gets from transactions.
//! State is lost on restart; used for tests and local development.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use uuid::Uuid;

use super::RbacStore;
use crate::models::{
    ArchivedUser, Deactivation, NewPermission, NewRole, NewUser, Permission, PermissionUpdate,
    RemovalReason, Role, RoleDeletion, RoleHistoryEntry, RoleUpdate, User, UserRoleAssignment,
    UserStatus,
};
use crate::rbac::catalog::{default_permissions, default_role_grants};
use crate::rbac::{RbacError, RbacResult};

#[derive(Debug, Clone)]
struct UserRecord {
    user: User,
    password_hash: Option<String>,
}

#[derive(Debug, Clone)]
struct Assignment {
    assigned_at: DateTime<Utc>,
    assigned_by: Option<Uuid>,
}

#[derive(Debug, Default)]
struct State {
    users: HashMap<Uuid, UserRecord>,
    roles: HashMap<Uuid, Role>,
    permissions: HashMap<Uuid, Permission>,
    /// `(role_id, permission_id)`
    role_permissions: BTreeSet<(Uuid, Uuid)>,
    /// `(user_id, role_id)`
    user_roles: BTreeMap<(Uuid, Uuid), Assignment>,
    history: Vec<RoleHistoryEntry>,
    archived: Vec<ArchivedUser>,
}

impl State {
    fn user(&self, id: Uuid) -> RbacResult<&UserRecord> {
        self.users
            .get(&id)
            .ok_or_else(|| RbacError::NotFound(format!("User {id}")))
    }

    fn user_mut(&mut self, id: Uuid) -> RbacResult<&mut UserRecord> {
        self.users
            .get_mut(&id)
            .ok_or_else(|| RbacError::NotFound(format!("User {id}")))
    }

    fn role(&self, id: Uuid) -> RbacResult<&Role> {
        self.roles
            .get(&id)
            .ok_or_else(|| RbacError::NotFound(format!("Role {id}")))
    }

    fn permission(&self, id: Uuid) -> RbacResult<&Permission> {
        self.permissions
            .get(&id)
            .ok_or_else(|| RbacError::NotFound(format!("Permission {id}")))
    }

    fn user_by_email(&self, email: &str) -> Option<&UserRecord> {
        self.users.values().find(|r| r.user.email == email)
    }

    fn role_name_taken(&self, name: &str, except: Option<Uuid>) -> bool {
        self.roles
            .values()
            .any(|r| r.name == name && Some(r.id) != except)
    }

    /// Permissions reachable from the user's roles. May contain duplicates.
    fn permissions_of(&self, email: &str) -> Vec<&Permission> {
        let Some(record) = self.user_by_email(email) else {
            return Vec::new();
        };
        let user_id = record.user.id;
        self.user_roles
            .keys()
            .filter(|(uid, _)| *uid == user_id)
            .flat_map(|(_, role_id)| {
                self.role_permissions
                    .iter()
                    .filter(move |(rid, _)| rid == role_id)
                    .filter_map(|(_, pid)| self.permissions.get(pid))
            })
            .collect()
    }

    fn insert_user(&mut self, new: NewUser) -> RbacResult<User> {
        if self.user_by_email(&new.email).is_some() {
            return Err(RbacError::Conflict(format!(
                "Email already registered: {}",
                new.email
            )));
        }
        let now = Utc::now();
        let user = User {
            id: Uuid::new_v4(),
            email: new.email,
            name: new.name,
            status: UserStatus::Active,
            deactivated_at: None,
            deactivated_by: None,
            created_at: now,
            updated_at: now,
        };
        self.users.insert(
            user.id,
            UserRecord {
                user: user.clone(),
                password_hash: new.password_hash,
            },
        );
        Ok(user)
    }

    fn sorted_role_permissions(&self, role_id: Uuid) -> Vec<Permission> {
        let mut out: Vec<Permission> = self
            .role_permissions
            .iter()
            .filter(|(rid, _)| *rid == role_id)
            .filter_map(|(_, pid)| self.permissions.get(pid).cloned())
            .collect();
        out.sort_by(|a, b| a.name.cmp(&b.name));
        out
    }

    /// Move the given `(user, role)` assignments into history.
    fn remove_assignments(
        &mut self,
        keys: Vec<(Uuid, Uuid)>,
        actor: Option<Uuid>,
        at: DateTime<Utc>,
        reason: RemovalReason,
    ) -> Vec<RoleHistoryEntry> {
        let mut removed = Vec::with_capacity(keys.len());
        for key in keys {
            if self.user_roles.remove(&key).is_none() {
                continue;
            }
            let (user_id, role_id) = key;
            let role_name = self
                .roles
                .get(&role_id)
                .map(|r| r.name.clone())
                .unwrap_or_default();
            let entry = RoleHistoryEntry {
                id: super::history_id(),
                user_id,
                role_id,
                role_name,
                removed_at: at,
                removed_by: actor,
                reason,
            };
            self.history.push(entry.clone());
            removed.push(entry);
        }
        removed
    }

    fn archive(&mut self, id: Uuid, at: DateTime<Utc>) -> Option<ArchivedUser> {
        let record = self.users.remove(&id)?;
        let user = record.user;
        let archived = ArchivedUser {
            id: user.id,
            email: user.email,
            name: user.name,
            deactivated_at: user.deactivated_at.unwrap_or(at),
            deactivated_by: user.deactivated_by,
            created_at: user.created_at,
            archived_at: at,
        };
        self.archived.push(archived.clone());
        Some(archived)
    }
}

/// In-memory RBAC store.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: RwLock<State>,
}

impl MemoryStore {
    /// Empty store: no users, roles or permissions.
    pub fn new() -> Self {
        Self::default()
    }

    /// Store seeded with the built-in roles and permissions.
    pub async fn with_default_catalog() -> RbacResult<Self> {
        let store = Self::new();
        let mut by_name = HashMap::new();
        for permission in default_permissions() {
            let created = store.create_permission(permission).await?;
            by_name.insert(created.name.clone(), created.id);
        }
        for (role, grants) in default_role_grants() {
            let role = store.create_role(role).await?;
            for name in grants {
                if let Some(pid) = by_name.get(&name) {
                    store.grant_role_permission(role.id, *pid).await?;
                }
            }
        }
        Ok(store)
    }
}

#[async_trait]
impl RbacStore for MemoryStore {
    async fn create_user(&self, new: NewUser) -> RbacResult<User> {
        self.state.write().await.insert_user(new)
    }

    async fn create_user_with_roles(
        &self,
        new: NewUser,
        role_ids: &[Uuid],
        actor: Option<Uuid>,
    ) -> RbacResult<(User, Vec<UserRoleAssignment>)> {
        let mut state = self.state.write().await;
        let mut roles = Vec::with_capacity(role_ids.len());
        for role_id in role_ids.iter().collect::<BTreeSet<_>>() {
            roles.push(state.role(*role_id)?.clone());
        }
        let user = state.insert_user(new)?;
        let now = Utc::now();
        let mut assignments: Vec<UserRoleAssignment> = roles
            .into_iter()
            .map(|role| {
                state.user_roles.insert(
                    (user.id, role.id),
                    Assignment {
                        assigned_at: now,
                        assigned_by: actor,
                    },
                );
                UserRoleAssignment {
                    user_id: user.id,
                    role_id: role.id,
                    role_name: role.name,
                    assigned_at: now,
                    assigned_by: actor,
                }
            })
            .collect();
        assignments.sort_by(|a, b| a.role_name.cmp(&b.role_name));
        Ok((user, assignments))
    }

    async fn get_user(&self, id: Uuid) -> RbacResult<Option<User>> {
        let state = self.state.read().await;
        Ok(state.users.get(&id).map(|r| r.user.clone()))
    }

    async fn find_user_by_email(&self, email: &str) -> RbacResult<Option<User>> {
        let state = self.state.read().await;
        Ok(state.user_by_email(email).map(|r| r.user.clone()))
    }

    async fn find_credentials(&self, email: &str) -> RbacResult<Option<(User, Option<String>)>> {
        let state = self.state.read().await;
        Ok(state
            .user_by_email(email)
            .map(|r| (r.user.clone(), r.password_hash.clone())))
    }

    async fn set_password_hash(&self, user_id: Uuid, password_hash: &str) -> RbacResult<()> {
        let mut state = self.state.write().await;
        let record = state.user_mut(user_id)?;
        record.password_hash = Some(password_hash.to_string());
        record.user.updated_at = Utc::now();
        Ok(())
    }

    async fn list_users(&self, status: Option<UserStatus>) -> RbacResult<Vec<User>> {
        let state = self.state.read().await;
        let mut users: Vec<User> = state
            .users
            .values()
            .filter(|r| status.is_none_or(|s| r.user.status == s))
            .map(|r| r.user.clone())
            .collect();
        users.sort_by(|a, b| a.email.cmp(&b.email));
        Ok(users)
    }

    async fn list_users_without_roles(&self) -> RbacResult<Vec<User>> {
        let state = self.state.read().await;
        let mut users: Vec<User> = state
            .users
            .values()
            .filter(|r| r.user.status == UserStatus::Active)
            .filter(|r| !state.user_roles.keys().any(|(uid, _)| *uid == r.user.id))
            .map(|r| r.user.clone())
            .collect();
        users.sort_by(|a, b| a.email.cmp(&b.email));
        Ok(users)
    }

    async fn set_user_status(&self, user_id: Uuid, status: UserStatus) -> RbacResult<User> {
        if !matches!(status, UserStatus::Active | UserStatus::Inactive) {
            return Err(RbacError::Validation(format!(
                "Status '{status}' is set by deactivation or archival"
            )));
        }
        let mut state = self.state.write().await;
        let record = state.user_mut(user_id)?;
        record.user.status.transition_to(status)?;
        record.user.status = status;
        record.user.deactivated_at = None;
        record.user.deactivated_by = None;
        record.user.updated_at = Utc::now();
        Ok(record.user.clone())
    }

    async fn deactivate_user(
        &self,
        user_id: Uuid,
        actor: Option<Uuid>,
        at: DateTime<Utc>,
    ) -> RbacResult<Deactivation> {
        let mut state = self.state.write().await;
        state
            .user(user_id)?
            .user
            .status
            .transition_to(UserStatus::Deactivated)?;

        let keys: Vec<(Uuid, Uuid)> = state
            .user_roles
            .keys()
            .filter(|(uid, _)| *uid == user_id)
            .copied()
            .collect();
        let removed_roles =
            state.remove_assignments(keys, actor, at, RemovalReason::UserDeactivated);

        let record = state.user_mut(user_id)?;
        record.user.status = UserStatus::Deactivated;
        record.user.deactivated_at = Some(at);
        record.user.deactivated_by = actor;
        record.user.updated_at = at;
        Ok(Deactivation {
            user: record.user.clone(),
            removed_roles,
        })
    }

    async fn archive_user(
        &self,
        user_id: Uuid,
        cutoff: DateTime<Utc>,
        at: DateTime<Utc>,
    ) -> RbacResult<ArchivedUser> {
        let mut state = self.state.write().await;
        let user = &state.user(user_id)?.user;
        user.status.transition_to(UserStatus::Archived)?;
        let deactivated_at = user.deactivated_at.unwrap_or(at);
        if deactivated_at > cutoff {
            return Err(RbacError::RetentionPending {
                until: deactivated_at + (at - cutoff),
            });
        }
        state
            .archive(user_id, at)
            .ok_or_else(|| RbacError::NotFound(format!("User {user_id}")))
    }

    async fn archive_deactivated(
        &self,
        cutoff: DateTime<Utc>,
        at: DateTime<Utc>,
    ) -> RbacResult<Vec<ArchivedUser>> {
        let mut state = self.state.write().await;
        let due: Vec<Uuid> = state
            .users
            .values()
            .filter(|r| r.user.status == UserStatus::Deactivated)
            .filter(|r| r.user.deactivated_at.is_some_and(|d| d <= cutoff))
            .map(|r| r.user.id)
            .collect();
        let mut archived: Vec<ArchivedUser> =
            due.into_iter().filter_map(|id| state.archive(id, at)).collect();
        archived.sort_by(|a, b| a.email.cmp(&b.email));
        Ok(archived)
    }

    async fn list_archived_users(&self) -> RbacResult<Vec<ArchivedUser>> {
        let state = self.state.read().await;
        let mut archived = state.archived.clone();
        archived.sort_by(|a, b| b.archived_at.cmp(&a.archived_at).then(a.email.cmp(&b.email)));
        Ok(archived)
    }

    async fn role_history(&self, user_id: Uuid) -> RbacResult<Vec<RoleHistoryEntry>> {
        let state = self.state.read().await;
        let mut entries: Vec<RoleHistoryEntry> = state
            .history
            .iter()
            .filter(|e| e.user_id == user_id)
            .cloned()
            .collect();
        entries.sort_by(|a, b| a.removed_at.cmp(&b.removed_at).then(a.id.cmp(&b.id)));
        Ok(entries)
    }

    async fn list_roles(&self) -> RbacResult<Vec<Role>> {
        let state = self.state.read().await;
        let mut roles: Vec<Role> = state.roles.values().cloned().collect();
        roles.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(roles)
    }

    async fn get_role(&self, id: Uuid) -> RbacResult<Option<Role>> {
        let state = self.state.read().await;
        Ok(state.roles.get(&id).cloned())
    }

    async fn create_role(&self, new: NewRole) -> RbacResult<Role> {
        let mut state = self.state.write().await;
        if state.role_name_taken(&new.name, None) {
            return Err(RbacError::Conflict(format!(
                "Role name already exists: {}",
                new.name
            )));
        }
        let now = Utc::now();
        let role = Role {
            id: Uuid::new_v4(),
            name: new.name,
            description: new.description,
            created_at: now,
            updated_at: now,
        };
        state.roles.insert(role.id, role.clone());
        Ok(role)
    }

    async fn update_role(&self, id: Uuid, update: RoleUpdate) -> RbacResult<Role> {
        let mut state = self.state.write().await;
        state.role(id)?;
        if let Some(name) = &update.name
            && state.role_name_taken(name, Some(id))
        {
            return Err(RbacError::Conflict(format!(
                "Role name already exists: {name}"
            )));
        }
        let role = state
            .roles
            .get_mut(&id)
            .ok_or_else(|| RbacError::NotFound(format!("Role {id}")))?;
        if let Some(name) = update.name {
            role.name = name;
        }
        if let Some(description) = update.description {
            role.description = Some(description).filter(|d| !d.is_empty());
        }
        role.updated_at = Utc::now();
        Ok(role.clone())
    }

    async fn delete_role(
        &self,
        id: Uuid,
        actor: Option<Uuid>,
        at: DateTime<Utc>,
    ) -> RbacResult<RoleDeletion> {
        let mut state = self.state.write().await;
        state.role(id)?;

        let before = state.role_permissions.len();
        state.role_permissions.retain(|(rid, _)| *rid != id);
        let revoked_permissions = (before - state.role_permissions.len()) as u64;

        let keys: Vec<(Uuid, Uuid)> = state
            .user_roles
            .keys()
            .filter(|(_, rid)| *rid == id)
            .copied()
            .collect();
        let removed_assignments = state.remove_assignments(keys, actor, at, RemovalReason::RoleDeleted);

        let role = state
            .roles
            .remove(&id)
            .ok_or_else(|| RbacError::NotFound(format!("Role {id}")))?;
        Ok(RoleDeletion {
            role,
            removed_assignments,
            revoked_permissions,
        })
    }

    async fn role_permissions(&self, role_id: Uuid) -> RbacResult<Vec<Permission>> {
        let state = self.state.read().await;
        state.role(role_id)?;
        Ok(state.sorted_role_permissions(role_id))
    }

    async fn set_role_permissions(
        &self,
        role_id: Uuid,
        permission_ids: &[Uuid],
    ) -> RbacResult<Vec<Permission>> {
        let mut state = self.state.write().await;
        state.role(role_id)?;
        for pid in permission_ids {
            state.permission(*pid)?;
        }
        state.role_permissions.retain(|(rid, _)| *rid != role_id);
        for pid in permission_ids {
            state.role_permissions.insert((role_id, *pid));
        }
        Ok(state.sorted_role_permissions(role_id))
    }

    async fn grant_role_permission(&self, role_id: Uuid, permission_id: Uuid) -> RbacResult<()> {
        let mut state = self.state.write().await;
        state.role(role_id)?;
        state.permission(permission_id)?;
        state.role_permissions.insert((role_id, permission_id));
        Ok(())
    }

    async fn revoke_role_permission(
        &self,
        role_id: Uuid,
        permission_id: Uuid,
    ) -> RbacResult<bool> {
        let mut state = self.state.write().await;
        Ok(state.role_permissions.remove(&(role_id, permission_id)))
    }

    async fn list_permissions(&self) -> RbacResult<Vec<Permission>> {
        let state = self.state.read().await;
        let mut permissions: Vec<Permission> = state.permissions.values().cloned().collect();
        permissions.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(permissions)
    }

    async fn get_permission(&self, id: Uuid) -> RbacResult<Option<Permission>> {
        let state = self.state.read().await;
        Ok(state.permissions.get(&id).cloned())
    }

    async fn create_permission(&self, new: NewPermission) -> RbacResult<Permission> {
        let mut state = self.state.write().await;
        if state.permissions.values().any(|p| p.name == new.name) {
            return Err(RbacError::Conflict(format!(
                "Permission name already exists: {}",
                new.name
            )));
        }
        let permission = Permission {
            id: Uuid::new_v4(),
            name: new.name,
            resource: new.resource,
            action: new.action,
            description: new.description,
            created_at: Utc::now(),
        };
        state.permissions.insert(permission.id, permission.clone());
        Ok(permission)
    }

    async fn update_permission(
        &self,
        id: Uuid,
        update: PermissionUpdate,
    ) -> RbacResult<Permission> {
        let mut state = self.state.write().await;
        let permission = state
            .permissions
            .get_mut(&id)
            .ok_or_else(|| RbacError::NotFound(format!("Permission {id}")))?;
        if let Some(resource) = update.resource {
            permission.resource = resource;
        }
        if let Some(action) = update.action {
            permission.action = action;
        }
        if let Some(description) = update.description {
            permission.description = Some(description).filter(|d| !d.is_empty());
        }
        Ok(permission.clone())
    }

    async fn delete_permission(&self, id: Uuid) -> RbacResult<Permission> {
        let mut state = self.state.write().await;
        let name = state.permission(id)?.name.clone();
        let dependents = state
            .role_permissions
            .iter()
            .filter(|(_, pid)| *pid == id)
            .count() as i64;
        if dependents > 0 {
            return Err(RbacError::InUse {
                what: format!("Permission '{name}'"),
                dependents,
            });
        }
        state
            .permissions
            .remove(&id)
            .ok_or_else(|| RbacError::NotFound(format!("Permission {id}")))
    }

    async fn user_roles(&self, user_id: Uuid) -> RbacResult<Vec<UserRoleAssignment>> {
        let state = self.state.read().await;
        state.user(user_id)?;
        let mut out: Vec<UserRoleAssignment> = state
            .user_roles
            .iter()
            .filter(|((uid, _), _)| *uid == user_id)
            .filter_map(|((uid, rid), a)| {
                state.roles.get(rid).map(|role| UserRoleAssignment {
                    user_id: *uid,
                    role_id: *rid,
                    role_name: role.name.clone(),
                    assigned_at: a.assigned_at,
                    assigned_by: a.assigned_by,
                })
            })
            .collect();
        out.sort_by(|a, b| a.role_name.cmp(&b.role_name));
        Ok(out)
    }

    async fn assign_role(
        &self,
        user_id: Uuid,
        role_id: Uuid,
        actor: Option<Uuid>,
    ) -> RbacResult<UserRoleAssignment> {
        let mut state = self.state.write().await;
        let status = state.user(user_id)?.user.status;
        if !matches!(status, UserStatus::Active | UserStatus::Inactive) {
            return Err(RbacError::Conflict(format!(
                "Cannot assign roles to a {status} user"
            )));
        }
        let role_name = state.role(role_id)?.name.clone();
        let assignment = state
            .user_roles
            .entry((user_id, role_id))
            .or_insert_with(|| Assignment {
                assigned_at: Utc::now(),
                assigned_by: actor,
            })
            .clone();
        Ok(UserRoleAssignment {
            user_id,
            role_id,
            role_name,
            assigned_at: assignment.assigned_at,
            assigned_by: assignment.assigned_by,
        })
    }

    async fn unassign_role(
        &self,
        user_id: Uuid,
        role_id: Uuid,
        actor: Option<Uuid>,
        at: DateTime<Utc>,
    ) -> RbacResult<RoleHistoryEntry> {
        let mut state = self.state.write().await;
        if !state.user_roles.contains_key(&(user_id, role_id)) {
            return Err(RbacError::NotFound(format!(
                "Role {role_id} is not assigned to user {user_id}"
            )));
        }
        state
            .remove_assignments(vec![(user_id, role_id)], actor, at, RemovalReason::RoleUnassigned)
            .pop()
            .ok_or_else(|| RbacError::NotFound(format!("Role {role_id}")))
    }

    async fn has_permission(&self, email: &str, permission_name: &str) -> RbacResult<bool> {
        let state = self.state.read().await;
        Ok(state
            .permissions_of(email)
            .iter()
            .any(|p| p.name == permission_name))
    }

    async fn has_resource_permission(
        &self,
        email: &str,
        resource: &str,
        action: &str,
    ) -> RbacResult<bool> {
        let state = self.state.read().await;
        Ok(state
            .permissions_of(email)
            .iter()
            .any(|p| p.resource == resource && p.action == action))
    }

    async fn get_user_permissions(&self, email: &str) -> RbacResult<Vec<String>> {
        let state = self.state.read().await;
        let names: BTreeSet<String> = state
            .permissions_of(email)
            .into_iter()
            .map(|p| p.name.clone())
            .collect();
        Ok(names.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;

    async fn user(store: &MemoryStore, email: &str) -> User {
        store
            .create_user(NewUser {
                email: email.into(),
                name: Some("Test".into()),
                password_hash: None,
            })
            .await
            .unwrap()
    }

    async fn role_named(store: &MemoryStore, name: &str) -> Role {
        store
            .list_roles()
            .await
            .unwrap()
            .into_iter()
            .find(|r| r.name == name)
            .unwrap()
    }

    #[tokio::test]
    async fn default_catalog_is_seeded() {
        let store = MemoryStore::with_default_catalog().await.unwrap();
        assert_eq!(store.list_roles().await.unwrap().len(), 4);
        assert_eq!(store.list_permissions().await.unwrap().len(), 21);
        let viewer = role_named(&store, "Viewer").await;
        assert_eq!(store.role_permissions(viewer.id).await.unwrap().len(), 5);
    }

    #[tokio::test]
    async fn duplicate_email_conflicts() {
        let store = MemoryStore::new();
        user(&store, "a@example.com").await;
        let err = store
            .create_user(NewUser {
                email: "a@example.com".into(),
                name: None,
                password_hash: None,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, RbacError::Conflict(_)));
    }

    #[tokio::test]
    async fn deactivation_moves_every_role_to_history() {
        let store = MemoryStore::with_default_catalog().await.unwrap();
        let x = user(&store, "x@example.com").await;
        let manager = role_named(&store, "Manager").await;
        let agent = role_named(&store, "Agent").await;
        store.assign_role(x.id, manager.id, None).await.unwrap();
        store.assign_role(x.id, agent.id, None).await.unwrap();

        let admin = Uuid::new_v4();
        let at = Utc::now();
        let result = store.deactivate_user(x.id, Some(admin), at).await.unwrap();

        assert_eq!(result.user.status, UserStatus::Deactivated);
        assert_eq!(result.user.deactivated_at, Some(at));
        assert!(store.user_roles(x.id).await.unwrap().is_empty());

        let history = store.role_history(x.id).await.unwrap();
        assert_eq!(history.len(), 2);
        let mut names: Vec<&str> = history.iter().map(|h| h.role_name.as_str()).collect();
        names.sort();
        assert_eq!(names, vec!["Agent", "Manager"]);
        assert!(history.iter().all(|h| {
            h.reason == RemovalReason::UserDeactivated
                && h.removed_by == Some(admin)
                && h.removed_at == at
        }));
    }

    #[tokio::test]
    async fn deactivating_twice_is_rejected() {
        let store = MemoryStore::new();
        let u = user(&store, "twice@example.com").await;
        store.deactivate_user(u.id, None, Utc::now()).await.unwrap();
        let err = store
            .deactivate_user(u.id, None, Utc::now())
            .await
            .unwrap_err();
        assert!(matches!(err, RbacError::InvalidTransition { .. }));
    }

    #[tokio::test]
    async fn reactivation_clears_stamp_and_restores_nothing() {
        let store = MemoryStore::with_default_catalog().await.unwrap();
        let u = user(&store, "back@example.com").await;
        let viewer = role_named(&store, "Viewer").await;
        store.assign_role(u.id, viewer.id, None).await.unwrap();
        store.deactivate_user(u.id, None, Utc::now()).await.unwrap();

        let back = store.set_user_status(u.id, UserStatus::Active).await.unwrap();
        assert_eq!(back.status, UserStatus::Active);
        assert_eq!(back.deactivated_at, None);
        assert!(store.user_roles(u.id).await.unwrap().is_empty());
        assert!(
            !store
                .has_permission("back@example.com", "view_campaigns")
                .await
                .unwrap()
        );
    }

    #[tokio::test]
    async fn deactivated_user_cannot_receive_roles() {
        let store = MemoryStore::with_default_catalog().await.unwrap();
        let u = user(&store, "gone@example.com").await;
        let viewer = role_named(&store, "Viewer").await;
        store.deactivate_user(u.id, None, Utc::now()).await.unwrap();
        let err = store.assign_role(u.id, viewer.id, None).await.unwrap_err();
        assert!(matches!(err, RbacError::Conflict(_)));
    }

    #[tokio::test]
    async fn inactive_user_keeps_roles() {
        let store = MemoryStore::with_default_catalog().await.unwrap();
        let u = user(&store, "pause@example.com").await;
        let viewer = role_named(&store, "Viewer").await;
        store.assign_role(u.id, viewer.id, None).await.unwrap();

        let paused = store
            .set_user_status(u.id, UserStatus::Inactive)
            .await
            .unwrap();
        assert_eq!(paused.status, UserStatus::Inactive);
        assert_eq!(store.user_roles(u.id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn set_status_refuses_lifecycle_targets() {
        let store = MemoryStore::new();
        let u = user(&store, "s@example.com").await;
        let err = store
            .set_user_status(u.id, UserStatus::Deactivated)
            .await
            .unwrap_err();
        assert!(matches!(err, RbacError::Validation(_)));
    }

    #[tokio::test]
    async fn archive_respects_cutoff_and_keeps_history() {
        let store = MemoryStore::with_default_catalog().await.unwrap();
        let old = user(&store, "old@example.com").await;
        let recent = user(&store, "recent@example.com").await;
        let agent = role_named(&store, "Agent").await;
        store.assign_role(old.id, agent.id, None).await.unwrap();

        let now = Utc::now();
        store
            .deactivate_user(old.id, None, now - Duration::days(61))
            .await
            .unwrap();
        store
            .deactivate_user(recent.id, None, now - Duration::days(10))
            .await
            .unwrap();

        let cutoff = now - Duration::days(60);
        let archived = store.archive_deactivated(cutoff, now).await.unwrap();
        assert_eq!(archived.len(), 1);
        assert_eq!(archived[0].email, "old@example.com");
        assert_eq!(archived[0].archived_at, now);

        assert!(store.get_user(old.id).await.unwrap().is_none());
        assert!(store.get_user(recent.id).await.unwrap().is_some());
        assert_eq!(store.role_history(old.id).await.unwrap().len(), 1);

        // Idempotent.
        assert!(
            store
                .archive_deactivated(cutoff, now)
                .await
                .unwrap()
                .is_empty()
        );
    }

    #[tokio::test]
    async fn archive_single_user_before_window_is_pending() {
        let store = MemoryStore::new();
        let u = user(&store, "soon@example.com").await;
        let now = Utc::now();
        let deactivated_at = now - Duration::days(5);
        store.deactivate_user(u.id, None, deactivated_at).await.unwrap();

        let err = store
            .archive_user(u.id, now - Duration::days(60), now)
            .await
            .unwrap_err();
        match err {
            RbacError::RetentionPending { until } => {
                assert_eq!(until, deactivated_at + Duration::days(60));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn archiving_active_user_is_invalid() {
        let store = MemoryStore::new();
        let u = user(&store, "live@example.com").await;
        let now = Utc::now();
        let err = store.archive_user(u.id, now, now).await.unwrap_err();
        assert!(matches!(err, RbacError::InvalidTransition { .. }));
    }

    #[tokio::test]
    async fn permission_in_use_cannot_be_deleted() {
        let store = MemoryStore::with_default_catalog().await.unwrap();
        let perms = store.list_permissions().await.unwrap();
        let view = perms.iter().find(|p| p.name == "view_campaigns").unwrap();

        let err = store.delete_permission(view.id).await.unwrap_err();
        match err {
            // Admin, Manager, Agent, Viewer.
            RbacError::InUse { dependents, .. } => assert_eq!(dependents, 4),
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(store.list_permissions().await.unwrap().len(), perms.len());
    }

    #[tokio::test]
    async fn unused_permission_can_be_deleted() {
        let store = MemoryStore::new();
        let p = store
            .create_permission(NewPermission {
                name: "export_leads".into(),
                resource: "leads".into(),
                action: "export".into(),
                description: None,
            })
            .await
            .unwrap();
        store.delete_permission(p.id).await.unwrap();
        assert!(store.get_permission(p.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn deleting_role_cascades_and_records_history() {
        let store = MemoryStore::with_default_catalog().await.unwrap();
        let u = user(&store, "r@example.com").await;
        let agent = role_named(&store, "Agent").await;
        store.assign_role(u.id, agent.id, None).await.unwrap();

        let deletion = store
            .delete_role(agent.id, None, Utc::now())
            .await
            .unwrap();
        assert_eq!(deletion.revoked_permissions, 10);
        assert_eq!(deletion.removed_assignments.len(), 1);
        assert_eq!(
            deletion.removed_assignments[0].reason,
            RemovalReason::RoleDeleted
        );
        assert!(store.get_role(agent.id).await.unwrap().is_none());
        assert!(store.user_roles(u.id).await.unwrap().is_empty());

        let history = store.role_history(u.id).await.unwrap();
        assert_eq!(history[0].role_name, "Agent");
    }

    #[tokio::test]
    async fn role_rename_conflicts_with_existing_name() {
        let store = MemoryStore::with_default_catalog().await.unwrap();
        let agent = role_named(&store, "Agent").await;
        let err = store
            .update_role(
                agent.id,
                RoleUpdate {
                    name: Some("Viewer".into()),
                    description: None,
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, RbacError::Conflict(_)));
    }

    #[tokio::test]
    async fn set_role_permissions_rejects_unknown_ids() {
        let store = MemoryStore::with_default_catalog().await.unwrap();
        let viewer = role_named(&store, "Viewer").await;
        let err = store
            .set_role_permissions(viewer.id, &[Uuid::new_v4()])
            .await
            .unwrap_err();
        assert!(matches!(err, RbacError::NotFound(_)));
        assert_eq!(store.role_permissions(viewer.id).await.unwrap().len(), 5);
    }

    #[tokio::test]
    async fn unassign_records_history() {
        let store = MemoryStore::with_default_catalog().await.unwrap();
        let u = user(&store, "un@example.com").await;
        let viewer = role_named(&store, "Viewer").await;
        store.assign_role(u.id, viewer.id, None).await.unwrap();

        let entry = store
            .unassign_role(u.id, viewer.id, None, Utc::now())
            .await
            .unwrap();
        assert_eq!(entry.reason, RemovalReason::RoleUnassigned);
        assert!(
            store
                .unassign_role(u.id, viewer.id, None, Utc::now())
                .await
                .is_err()
        );
    }

    #[tokio::test]
    async fn users_without_roles_lists_only_active_unassigned() {
        let store = MemoryStore::with_default_catalog().await.unwrap();
        let a = user(&store, "a@example.com").await;
        let b = user(&store, "b@example.com").await;
        let c = user(&store, "c@example.com").await;
        let viewer = role_named(&store, "Viewer").await;
        store.assign_role(a.id, viewer.id, None).await.unwrap();
        store.deactivate_user(c.id, None, Utc::now()).await.unwrap();

        let lonely = store.list_users_without_roles().await.unwrap();
        assert_eq!(lonely.len(), 1);
        assert_eq!(lonely[0].id, b.id);
    }

    #[tokio::test]
    async fn create_user_with_roles_assigns_in_one_step() {
        let store = MemoryStore::with_default_catalog().await.unwrap();
        let agent = role_named(&store, "Agent").await;
        let viewer = role_named(&store, "Viewer").await;
        let (created, roles) = store
            .create_user_with_roles(
                NewUser {
                    email: "new@example.com".into(),
                    name: None,
                    password_hash: None,
                },
                &[viewer.id, agent.id, viewer.id],
                None,
            )
            .await
            .unwrap();
        let names: Vec<_> = roles.iter().map(|r| r.role_name.as_str()).collect();
        assert_eq!(names, vec!["Agent", "Viewer"]);
        assert_eq!(store.user_roles(created.id).await.unwrap(), roles);
    }

    #[tokio::test]
    async fn create_user_with_unknown_role_leaves_nothing_behind() {
        let store = MemoryStore::with_default_catalog().await.unwrap();
        let viewer = role_named(&store, "Viewer").await;
        let new = || NewUser {
            email: "new@example.com".into(),
            name: None,
            password_hash: None,
        };
        let err = store
            .create_user_with_roles(new(), &[viewer.id, Uuid::new_v4()], None)
            .await
            .unwrap_err();
        assert!(matches!(err, RbacError::NotFound(_)));
        assert!(
            store
                .find_user_by_email("new@example.com")
                .await
                .unwrap()
                .is_none()
        );

        // A retry with valid roles succeeds instead of hitting a duplicate email.
        store
            .create_user_with_roles(new(), &[viewer.id], None)
            .await
            .unwrap();
    }
}
