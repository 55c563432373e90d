//! PostgreSQL implementation of [`RbacStore`].
//!
//! Multi-statement operations run inside one transaction and lock the rows
//! whose state they check (`FOR UPDATE`), so concurrent lifecycle changes
//! serialize instead of interleaving.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgConnection, PgPool};
use uuid::Uuid;

use super::RbacStore;
use crate::models::{
    ArchivedUser, Deactivation, NewPermission, NewRole, NewUser, Permission, PermissionUpdate,
    RemovalReason, Role, RoleDeletion, RoleHistoryEntry, RoleUpdate, User, UserRoleAssignment,
    UserStatus,
};
use crate::rbac::{RbacError, RbacResult};

const USER_COLUMNS: &str = "id, email, name, status::text AS status, deactivated_at, \
                            deactivated_by, created_at, updated_at";
const ROLE_COLUMNS: &str = "id, name, description, created_at, updated_at";
const PERMISSION_COLUMNS: &str = "id, name, resource, action, description, created_at";
const ARCHIVED_COLUMNS: &str =
    "id, email, name, deactivated_at, deactivated_by, created_at, archived_at";
const USER_ROLES_QUERY: &str = r#"
    SELECT ur.user_id, ur.role_id, r.name AS role_name, ur.assigned_at, ur.assigned_by
    FROM user_roles ur
    JOIN roles r ON r.id = ur.role_id
    WHERE ur.user_id = $1
    ORDER BY r.name
"#;

/// Row returned by user queries; `status` is selected as text.
#[derive(Debug, sqlx::FromRow)]
struct UserRow {
    id: Uuid,
    email: String,
    name: Option<String>,
    status: String,
    deactivated_at: Option<DateTime<Utc>>,
    deactivated_by: Option<Uuid>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<UserRow> for User {
    type Error = RbacError;

    fn try_from(row: UserRow) -> RbacResult<Self> {
        Ok(User {
            id: row.id,
            email: row.email,
            name: row.name,
            status: row.status.parse()?,
            deactivated_at: row.deactivated_at,
            deactivated_by: row.deactivated_by,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct CredentialRow {
    #[sqlx(flatten)]
    user: UserRow,
    password_hash: Option<String>,
}

#[derive(Debug, sqlx::FromRow)]
struct HistoryRow {
    id: Uuid,
    user_id: Uuid,
    role_id: Uuid,
    role_name: String,
    removed_at: DateTime<Utc>,
    removed_by: Option<Uuid>,
    reason: String,
}

impl TryFrom<HistoryRow> for RoleHistoryEntry {
    type Error = RbacError;

    fn try_from(row: HistoryRow) -> RbacResult<Self> {
        Ok(RoleHistoryEntry {
            id: row.id,
            user_id: row.user_id,
            role_id: row.role_id,
            role_name: row.role_name,
            removed_at: row.removed_at,
            removed_by: row.removed_by,
            reason: row.reason.parse()?,
        })
    }
}

/// Turn a unique violation into `Conflict`, anything else into `DbError`.
fn conflict_on_unique(err: sqlx::Error, message: impl FnOnce() -> String) -> RbacError {
    match &err {
        sqlx::Error::Database(db) if db.is_unique_violation() => RbacError::Conflict(message()),
        _ => RbacError::DbError(err),
    }
}

/// Lock a user row and return its status and deactivation stamp.
async fn lock_user(
    conn: &mut PgConnection,
    user_id: Uuid,
) -> RbacResult<(UserStatus, Option<DateTime<Utc>>)> {
    let row: Option<(String, Option<DateTime<Utc>>)> = sqlx::query_as(
        "SELECT status::text, deactivated_at FROM users WHERE id = $1 FOR UPDATE",
    )
    .bind(user_id)
    .fetch_optional(&mut *conn)
    .await?;
    let (status, deactivated_at) =
        row.ok_or_else(|| RbacError::NotFound(format!("User {user_id}")))?;
    Ok((status.parse()?, deactivated_at))
}

/// Append history rows for removed `(user_id, role_id, role_name)` assignments.
async fn record_removals(
    conn: &mut PgConnection,
    removed: Vec<(Uuid, Uuid, String)>,
    actor: Option<Uuid>,
    at: DateTime<Utc>,
    reason: RemovalReason,
) -> RbacResult<Vec<RoleHistoryEntry>> {
    let mut entries = Vec::with_capacity(removed.len());
    for (user_id, role_id, role_name) in removed {
        let entry = RoleHistoryEntry {
            id: super::history_id(),
            user_id,
            role_id,
            role_name,
            removed_at: at,
            removed_by: actor,
            reason,
        };
        sqlx::query(
            r#"
            INSERT INTO user_role_history
                (id, user_id, role_id, role_name, removed_at, removed_by, reason)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(entry.id)
        .bind(entry.user_id)
        .bind(entry.role_id)
        .bind(&entry.role_name)
        .bind(entry.removed_at)
        .bind(entry.removed_by)
        .bind(entry.reason.as_str())
        .execute(&mut *conn)
        .await?;
        entries.push(entry);
    }
    Ok(entries)
}

/// Copy a locked user row into `archived_users` and delete it.
async fn move_to_archive(
    conn: &mut PgConnection,
    user_id: Uuid,
    at: DateTime<Utc>,
) -> RbacResult<ArchivedUser> {
    let archived = sqlx::query_as::<_, ArchivedUser>(&format!(
        r#"
        INSERT INTO archived_users ({ARCHIVED_COLUMNS})
        SELECT id, email, name, deactivated_at, deactivated_by, created_at, $2
        FROM users
        WHERE id = $1
        RETURNING {ARCHIVED_COLUMNS}
        "#
    ))
    .bind(user_id)
    .bind(at)
    .fetch_one(&mut *conn)
    .await?;

    sqlx::query("DELETE FROM users WHERE id = $1")
        .bind(user_id)
        .execute(&mut *conn)
        .await?;

    Ok(archived)
}

/// Postgres-backed RBAC store.
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn require_role(&self, role_id: Uuid) -> RbacResult<()> {
        let exists: bool = sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM roles WHERE id = $1)")
            .bind(role_id)
            .fetch_one(&self.pool)
            .await?;
        if exists {
            Ok(())
        } else {
            Err(RbacError::NotFound(format!("Role {role_id}")))
        }
    }
}

#[async_trait]
impl RbacStore for PgStore {
    async fn create_user(&self, new: NewUser) -> RbacResult<User> {
        let email = new.email.clone();
        let row = sqlx::query_as::<_, UserRow>(&format!(
            r#"
            INSERT INTO users (id, email, name, password_hash)
            VALUES ($1, $2, $3, $4)
            RETURNING {USER_COLUMNS}
            "#
        ))
        .bind(Uuid::new_v4())
        .bind(&new.email)
        .bind(&new.name)
        .bind(&new.password_hash)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| conflict_on_unique(e, || format!("Email already registered: {email}")))?;
        row.try_into()
    }

    async fn create_user_with_roles(
        &self,
        new: NewUser,
        role_ids: &[Uuid],
        actor: Option<Uuid>,
    ) -> RbacResult<(User, Vec<UserRoleAssignment>)> {
        let mut roles = role_ids.to_vec();
        roles.sort();
        roles.dedup();
        let email = new.email.clone();
        let mut tx = self.pool.begin().await?;

        // Held until commit so a concurrent role delete cannot slip in.
        let found: Vec<Uuid> =
            sqlx::query_scalar("SELECT id FROM roles WHERE id = ANY($1) FOR SHARE")
                .bind(&roles)
                .fetch_all(&mut *tx)
                .await?;
        if let Some(missing) = roles.iter().find(|id| !found.contains(id)) {
            return Err(RbacError::NotFound(format!("Role {missing}")));
        }

        let row = sqlx::query_as::<_, UserRow>(&format!(
            r#"
            INSERT INTO users (id, email, name, password_hash)
            VALUES ($1, $2, $3, $4)
            RETURNING {USER_COLUMNS}
            "#
        ))
        .bind(Uuid::new_v4())
        .bind(&new.email)
        .bind(&new.name)
        .bind(&new.password_hash)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| conflict_on_unique(e, || format!("Email already registered: {email}")))?;
        let user = User::try_from(row)?;

        sqlx::query(
            r#"
            INSERT INTO user_roles (user_id, role_id, assigned_by)
            SELECT $1, role_id, $3 FROM unnest($2::uuid[]) AS role_id
            "#,
        )
        .bind(user.id)
        .bind(&roles)
        .bind(actor)
        .execute(&mut *tx)
        .await?;

        let assignments = sqlx::query_as::<_, UserRoleAssignment>(USER_ROLES_QUERY)
            .bind(user.id)
            .fetch_all(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok((user, assignments))
    }

    async fn get_user(&self, id: Uuid) -> RbacResult<Option<User>> {
        let row = sqlx::query_as::<_, UserRow>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(User::try_from).transpose()
    }

    async fn find_user_by_email(&self, email: &str) -> RbacResult<Option<User>> {
        let row = sqlx::query_as::<_, UserRow>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE email = $1"
        ))
        .bind(email)
        .fetch_optional(&self.pool)
        .await?;
        row.map(User::try_from).transpose()
    }

    async fn find_credentials(&self, email: &str) -> RbacResult<Option<(User, Option<String>)>> {
        let row = sqlx::query_as::<_, CredentialRow>(&format!(
            "SELECT {USER_COLUMNS}, password_hash FROM users WHERE email = $1"
        ))
        .bind(email)
        .fetch_optional(&self.pool)
        .await?;
        match row {
            Some(row) => Ok(Some((row.user.try_into()?, row.password_hash))),
            None => Ok(None),
        }
    }

    async fn set_password_hash(&self, user_id: Uuid, password_hash: &str) -> RbacResult<()> {
        let result =
            sqlx::query("UPDATE users SET password_hash = $2, updated_at = now() WHERE id = $1")
                .bind(user_id)
                .bind(password_hash)
                .execute(&self.pool)
                .await?;
        if result.rows_affected() == 0 {
            return Err(RbacError::NotFound(format!("User {user_id}")));
        }
        Ok(())
    }

    async fn list_users(&self, status: Option<UserStatus>) -> RbacResult<Vec<User>> {
        let rows = sqlx::query_as::<_, UserRow>(&format!(
            r#"
            SELECT {USER_COLUMNS}
            FROM users
            WHERE $1::text IS NULL OR status::text = $1
            ORDER BY email
            "#
        ))
        .bind(status.map(|s| s.as_str()))
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(User::try_from).collect()
    }

    async fn list_users_without_roles(&self) -> RbacResult<Vec<User>> {
        let rows = sqlx::query_as::<_, UserRow>(&format!(
            r#"
            SELECT {USER_COLUMNS}
            FROM users u
            WHERE u.status = 'active'
              AND NOT EXISTS (SELECT 1 FROM user_roles ur WHERE ur.user_id = u.id)
            ORDER BY u.email
            "#
        ))
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(User::try_from).collect()
    }

    async fn set_user_status(&self, user_id: Uuid, status: UserStatus) -> RbacResult<User> {
        if !matches!(status, UserStatus::Active | UserStatus::Inactive) {
            return Err(RbacError::Validation(format!(
                "Status '{status}' is set by deactivation or archival"
            )));
        }
        let mut tx = self.pool.begin().await?;
        let (current, _) = lock_user(&mut tx, user_id).await?;
        current.transition_to(status)?;

        let row = sqlx::query_as::<_, UserRow>(&format!(
            r#"
            UPDATE users
            SET status = $2::user_status,
                deactivated_at = NULL,
                deactivated_by = NULL,
                updated_at = now()
            WHERE id = $1
            RETURNING {USER_COLUMNS}
            "#
        ))
        .bind(user_id)
        .bind(status.as_str())
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        row.try_into()
    }

    async fn deactivate_user(
        &self,
        user_id: Uuid,
        actor: Option<Uuid>,
        at: DateTime<Utc>,
    ) -> RbacResult<Deactivation> {
        let mut tx = self.pool.begin().await?;
        let (current, _) = lock_user(&mut tx, user_id).await?;
        current.transition_to(UserStatus::Deactivated)?;

        let mut removed: Vec<(Uuid, Uuid, String)> = sqlx::query_as(
            r#"
            DELETE FROM user_roles ur
            USING roles r
            WHERE ur.user_id = $1 AND r.id = ur.role_id
            RETURNING ur.user_id, ur.role_id, r.name
            "#,
        )
        .bind(user_id)
        .fetch_all(&mut *tx)
        .await?;
        removed.sort_by(|a, b| a.2.cmp(&b.2));
        let removed_roles =
            record_removals(&mut tx, removed, actor, at, RemovalReason::UserDeactivated).await?;

        let row = sqlx::query_as::<_, UserRow>(&format!(
            r#"
            UPDATE users
            SET status = 'deactivated',
                deactivated_at = $2,
                deactivated_by = $3,
                updated_at = $2
            WHERE id = $1
            RETURNING {USER_COLUMNS}
            "#
        ))
        .bind(user_id)
        .bind(at)
        .bind(actor)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(Deactivation {
            user: row.try_into()?,
            removed_roles,
        })
    }

    async fn archive_user(
        &self,
        user_id: Uuid,
        cutoff: DateTime<Utc>,
        at: DateTime<Utc>,
    ) -> RbacResult<ArchivedUser> {
        let mut tx = self.pool.begin().await?;
        let (current, deactivated_at) = lock_user(&mut tx, user_id).await?;
        current.transition_to(UserStatus::Archived)?;

        let deactivated_at = deactivated_at.unwrap_or(at);
        if deactivated_at > cutoff {
            return Err(RbacError::RetentionPending {
                until: deactivated_at + (at - cutoff),
            });
        }

        let archived = move_to_archive(&mut tx, user_id, at).await?;
        tx.commit().await?;
        Ok(archived)
    }

    async fn archive_deactivated(
        &self,
        cutoff: DateTime<Utc>,
        at: DateTime<Utc>,
    ) -> RbacResult<Vec<ArchivedUser>> {
        let mut tx = self.pool.begin().await?;
        let due: Vec<Uuid> = sqlx::query_scalar(
            r#"
            SELECT id FROM users
            WHERE status = 'deactivated' AND deactivated_at <= $1
            ORDER BY email
            FOR UPDATE SKIP LOCKED
            "#,
        )
        .bind(cutoff)
        .fetch_all(&mut *tx)
        .await?;

        let mut archived = Vec::with_capacity(due.len());
        for user_id in due {
            archived.push(move_to_archive(&mut tx, user_id, at).await?);
        }

        tx.commit().await?;
        Ok(archived)
    }

    async fn list_archived_users(&self) -> RbacResult<Vec<ArchivedUser>> {
        let rows = sqlx::query_as::<_, ArchivedUser>(&format!(
            "SELECT {ARCHIVED_COLUMNS} FROM archived_users ORDER BY archived_at DESC, email"
        ))
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn role_history(&self, user_id: Uuid) -> RbacResult<Vec<RoleHistoryEntry>> {
        let rows = sqlx::query_as::<_, HistoryRow>(
            r#"
            SELECT id, user_id, role_id, role_name, removed_at, removed_by, reason
            FROM user_role_history
            WHERE user_id = $1
            ORDER BY removed_at, id
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(RoleHistoryEntry::try_from).collect()
    }

    async fn list_roles(&self) -> RbacResult<Vec<Role>> {
        let rows = sqlx::query_as::<_, Role>(&format!(
            "SELECT {ROLE_COLUMNS} FROM roles ORDER BY name"
        ))
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn get_role(&self, id: Uuid) -> RbacResult<Option<Role>> {
        let row = sqlx::query_as::<_, Role>(&format!(
            "SELECT {ROLE_COLUMNS} FROM roles WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    async fn create_role(&self, new: NewRole) -> RbacResult<Role> {
        let name = new.name.clone();
        sqlx::query_as::<_, Role>(&format!(
            r#"
            INSERT INTO roles (id, name, description)
            VALUES ($1, $2, $3)
            RETURNING {ROLE_COLUMNS}
            "#
        ))
        .bind(Uuid::new_v4())
        .bind(&new.name)
        .bind(&new.description)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| conflict_on_unique(e, || format!("Role name already exists: {name}")))
    }

    async fn update_role(&self, id: Uuid, update: RoleUpdate) -> RbacResult<Role> {
        let name = update.name.clone().unwrap_or_default();
        let row = sqlx::query_as::<_, Role>(&format!(
            r#"
            UPDATE roles
            SET name = COALESCE($2, name),
                description = CASE WHEN $3::text IS NULL THEN description
                                   ELSE NULLIF($3, '') END,
                updated_at = now()
            WHERE id = $1
            RETURNING {ROLE_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(&update.name)
        .bind(&update.description)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| conflict_on_unique(e, || format!("Role name already exists: {name}")))?;
        row.ok_or_else(|| RbacError::NotFound(format!("Role {id}")))
    }

    async fn delete_role(
        &self,
        id: Uuid,
        actor: Option<Uuid>,
        at: DateTime<Utc>,
    ) -> RbacResult<RoleDeletion> {
        let mut tx = self.pool.begin().await?;
        let role_name: Option<String> =
            sqlx::query_scalar("SELECT name FROM roles WHERE id = $1 FOR UPDATE")
                .bind(id)
                .fetch_optional(&mut *tx)
                .await?;
        let role_name = role_name.ok_or_else(|| RbacError::NotFound(format!("Role {id}")))?;

        let revoked_permissions = sqlx::query("DELETE FROM role_permissions WHERE role_id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await?
            .rows_affected();

        let user_ids: Vec<Uuid> =
            sqlx::query_scalar("DELETE FROM user_roles WHERE role_id = $1 RETURNING user_id")
                .bind(id)
                .fetch_all(&mut *tx)
                .await?;
        let removed = user_ids
            .into_iter()
            .map(|user_id| (user_id, id, role_name.clone()))
            .collect();
        let removed_assignments =
            record_removals(&mut tx, removed, actor, at, RemovalReason::RoleDeleted).await?;

        let role = sqlx::query_as::<_, Role>(&format!(
            "DELETE FROM roles WHERE id = $1 RETURNING {ROLE_COLUMNS}"
        ))
        .bind(id)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(RoleDeletion {
            role,
            removed_assignments,
            revoked_permissions,
        })
    }

    async fn role_permissions(&self, role_id: Uuid) -> RbacResult<Vec<Permission>> {
        self.require_role(role_id).await?;
        let rows = sqlx::query_as::<_, Permission>(
            r#"
            SELECT p.id, p.name, p.resource, p.action, p.description, p.created_at
            FROM permissions p
            JOIN role_permissions rp ON rp.permission_id = p.id
            WHERE rp.role_id = $1
            ORDER BY p.name
            "#,
        )
        .bind(role_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn set_role_permissions(
        &self,
        role_id: Uuid,
        permission_ids: &[Uuid],
    ) -> RbacResult<Vec<Permission>> {
        let mut tx = self.pool.begin().await?;
        let locked: Option<Uuid> =
            sqlx::query_scalar("SELECT id FROM roles WHERE id = $1 FOR UPDATE")
                .bind(role_id)
                .fetch_optional(&mut *tx)
                .await?;
        if locked.is_none() {
            return Err(RbacError::NotFound(format!("Role {role_id}")));
        }

        let missing: Vec<Uuid> = sqlx::query_scalar(
            r#"
            SELECT wanted.id
            FROM unnest($1::uuid[]) AS wanted (id)
            WHERE NOT EXISTS (SELECT 1 FROM permissions p WHERE p.id = wanted.id)
            "#,
        )
        .bind(permission_ids)
        .fetch_all(&mut *tx)
        .await?;
        if let Some(id) = missing.first() {
            return Err(RbacError::NotFound(format!("Permission {id}")));
        }

        sqlx::query("DELETE FROM role_permissions WHERE role_id = $1")
            .bind(role_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query(
            r#"
            INSERT INTO role_permissions (role_id, permission_id)
            SELECT $1, unnest($2::uuid[])
            ON CONFLICT DO NOTHING
            "#,
        )
        .bind(role_id)
        .bind(permission_ids)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        self.role_permissions(role_id).await
    }

    async fn grant_role_permission(&self, role_id: Uuid, permission_id: Uuid) -> RbacResult<()> {
        sqlx::query(
            r#"
            INSERT INTO role_permissions (role_id, permission_id)
            VALUES ($1, $2)
            ON CONFLICT DO NOTHING
            "#,
        )
        .bind(role_id)
        .bind(permission_id)
        .execute(&self.pool)
        .await
        .map_err(|e| match &e {
            sqlx::Error::Database(db) if db.is_foreign_key_violation() => RbacError::NotFound(
                format!("Role {role_id} or permission {permission_id}"),
            ),
            _ => RbacError::DbError(e),
        })?;
        Ok(())
    }

    async fn revoke_role_permission(
        &self,
        role_id: Uuid,
        permission_id: Uuid,
    ) -> RbacResult<bool> {
        let result =
            sqlx::query("DELETE FROM role_permissions WHERE role_id = $1 AND permission_id = $2")
                .bind(role_id)
                .bind(permission_id)
                .execute(&self.pool)
                .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn list_permissions(&self) -> RbacResult<Vec<Permission>> {
        let rows = sqlx::query_as::<_, Permission>(&format!(
            "SELECT {PERMISSION_COLUMNS} FROM permissions ORDER BY name"
        ))
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn get_permission(&self, id: Uuid) -> RbacResult<Option<Permission>> {
        let row = sqlx::query_as::<_, Permission>(&format!(
            "SELECT {PERMISSION_COLUMNS} FROM permissions WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    async fn create_permission(&self, new: NewPermission) -> RbacResult<Permission> {
        let name = new.name.clone();
        sqlx::query_as::<_, Permission>(&format!(
            r#"
            INSERT INTO permissions (id, name, resource, action, description)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING {PERMISSION_COLUMNS}
            "#
        ))
        .bind(Uuid::new_v4())
        .bind(&new.name)
        .bind(&new.resource)
        .bind(&new.action)
        .bind(&new.description)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| conflict_on_unique(e, || format!("Permission name already exists: {name}")))
    }

    async fn update_permission(
        &self,
        id: Uuid,
        update: PermissionUpdate,
    ) -> RbacResult<Permission> {
        let row = sqlx::query_as::<_, Permission>(&format!(
            r#"
            UPDATE permissions
            SET resource = COALESCE($2, resource),
                action = COALESCE($3, action),
                description = CASE WHEN $4::text IS NULL THEN description
                                   ELSE NULLIF($4, '') END
            WHERE id = $1
            RETURNING {PERMISSION_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(&update.resource)
        .bind(&update.action)
        .bind(&update.description)
        .fetch_optional(&self.pool)
        .await?;
        row.ok_or_else(|| RbacError::NotFound(format!("Permission {id}")))
    }

    async fn delete_permission(&self, id: Uuid) -> RbacResult<Permission> {
        let mut tx = self.pool.begin().await?;
        let name: Option<String> =
            sqlx::query_scalar("SELECT name FROM permissions WHERE id = $1 FOR UPDATE")
                .bind(id)
                .fetch_optional(&mut *tx)
                .await?;
        let name = name.ok_or_else(|| RbacError::NotFound(format!("Permission {id}")))?;

        let dependents: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM role_permissions WHERE permission_id = $1")
                .bind(id)
                .fetch_one(&mut *tx)
                .await?;
        if dependents > 0 {
            return Err(RbacError::InUse {
                what: format!("Permission '{name}'"),
                dependents,
            });
        }

        let permission = sqlx::query_as::<_, Permission>(&format!(
            "DELETE FROM permissions WHERE id = $1 RETURNING {PERMISSION_COLUMNS}"
        ))
        .bind(id)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(permission)
    }

    async fn user_roles(&self, user_id: Uuid) -> RbacResult<Vec<UserRoleAssignment>> {
        let exists: bool = sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM users WHERE id = $1)")
            .bind(user_id)
            .fetch_one(&self.pool)
            .await?;
        if !exists {
            return Err(RbacError::NotFound(format!("User {user_id}")));
        }
        let rows = sqlx::query_as::<_, UserRoleAssignment>(USER_ROLES_QUERY)
            .bind(user_id)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows)
    }

    async fn assign_role(
        &self,
        user_id: Uuid,
        role_id: Uuid,
        actor: Option<Uuid>,
    ) -> RbacResult<UserRoleAssignment> {
        let mut tx = self.pool.begin().await?;
        let status: Option<String> =
            sqlx::query_scalar("SELECT status::text FROM users WHERE id = $1 FOR SHARE")
                .bind(user_id)
                .fetch_optional(&mut *tx)
                .await?;
        let status: UserStatus = status
            .ok_or_else(|| RbacError::NotFound(format!("User {user_id}")))?
            .parse()?;
        if !matches!(status, UserStatus::Active | UserStatus::Inactive) {
            return Err(RbacError::Conflict(format!(
                "Cannot assign roles to a {status} user"
            )));
        }

        let role_exists: bool =
            sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM roles WHERE id = $1)")
                .bind(role_id)
                .fetch_one(&mut *tx)
                .await?;
        if !role_exists {
            return Err(RbacError::NotFound(format!("Role {role_id}")));
        }

        sqlx::query(
            r#"
            INSERT INTO user_roles (user_id, role_id, assigned_by)
            VALUES ($1, $2, $3)
            ON CONFLICT (user_id, role_id) DO NOTHING
            "#,
        )
        .bind(user_id)
        .bind(role_id)
        .bind(actor)
        .execute(&mut *tx)
        .await?;

        let assignment = sqlx::query_as::<_, UserRoleAssignment>(
            r#"
            SELECT ur.user_id, ur.role_id, r.name AS role_name, ur.assigned_at, ur.assigned_by
            FROM user_roles ur
            JOIN roles r ON r.id = ur.role_id
            WHERE ur.user_id = $1 AND ur.role_id = $2
            "#,
        )
        .bind(user_id)
        .bind(role_id)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(assignment)
    }

    async fn unassign_role(
        &self,
        user_id: Uuid,
        role_id: Uuid,
        actor: Option<Uuid>,
        at: DateTime<Utc>,
    ) -> RbacResult<RoleHistoryEntry> {
        let mut tx = self.pool.begin().await?;
        let removed: Option<(Uuid, Uuid, String)> = sqlx::query_as(
            r#"
            DELETE FROM user_roles ur
            USING roles r
            WHERE ur.user_id = $1 AND ur.role_id = $2 AND r.id = ur.role_id
            RETURNING ur.user_id, ur.role_id, r.name
            "#,
        )
        .bind(user_id)
        .bind(role_id)
        .fetch_optional(&mut *tx)
        .await?;
        let removed = removed.ok_or_else(|| {
            RbacError::NotFound(format!("Role {role_id} is not assigned to user {user_id}"))
        })?;

        let mut entries = record_removals(
            &mut tx,
            vec![removed],
            actor,
            at,
            RemovalReason::RoleUnassigned,
        )
        .await?;
        tx.commit().await?;
        entries
            .pop()
            .ok_or_else(|| RbacError::NotFound(format!("Role {role_id}")))
    }

    async fn has_permission(&self, email: &str, permission_name: &str) -> RbacResult<bool> {
        let allowed: bool = sqlx::query_scalar("SELECT has_permission($1, $2)")
            .bind(email)
            .bind(permission_name)
            .fetch_one(&self.pool)
            .await?;
        Ok(allowed)
    }

    async fn has_resource_permission(
        &self,
        email: &str,
        resource: &str,
        action: &str,
    ) -> RbacResult<bool> {
        let allowed: bool = sqlx::query_scalar("SELECT has_resource_permission($1, $2, $3)")
            .bind(email)
            .bind(resource)
            .bind(action)
            .fetch_one(&self.pool)
            .await?;
        Ok(allowed)
    }

    async fn get_user_permissions(&self, email: &str) -> RbacResult<Vec<String>> {
        let names: Vec<String> = sqlx::query_scalar("SELECT get_user_permissions($1)")
            .bind(email)
            .fetch_one(&self.pool)
            .await?;
        Ok(names)
    }
}
