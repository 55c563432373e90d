//! User lifecycle: provisioning, status changes, deactivation, reactivation
//! and archival of individual users.
//!
//! ```text
//! active <-> inactive
//! active | inactive --deactivate--> deactivated --archive--> archived
//! deactivated --reactivate--> active      (no roles restored)
//! ```
//!
//! The store performs each transition atomically against the current row
//! state; the functions here validate input, stamp time and actor, and log.

use chrono::{DateTime, Duration, Utc};
use tracing::{info, warn};
use uuid::Uuid;

use crate::models::{ArchivedUser, Deactivation, NewUser, User, UserRoleAssignment, UserStatus};
use crate::rbac::{RbacError, RbacResult, normalize_email};
use crate::store::RbacStore;

/// Days a deactivated user stays in the live table before archival.
pub const RETENTION_DAYS: i64 = 60;

/// Upper bound on a configurable retention window: 100 years.
pub const MAX_RETENTION_DAYS: i64 = 36_500;

/// Default retention window.
pub fn default_retention() -> Duration {
    Duration::days(RETENTION_DAYS)
}

/// Retention window of `days`, accepted in `1..=MAX_RETENTION_DAYS`.
pub fn retention_days(days: i64) -> RbacResult<Duration> {
    if !(1..=MAX_RETENTION_DAYS).contains(&days) {
        return Err(RbacError::Validation(format!(
            "Retention must be between 1 and {MAX_RETENTION_DAYS} days, got {days}"
        )));
    }
    Ok(Duration::days(days))
}

/// Latest `deactivated_at` that is archivable at `now`.
pub fn retention_cutoff(now: DateTime<Utc>, retention: Duration) -> RbacResult<DateTime<Utc>> {
    if retention <= Duration::zero() {
        return Err(RbacError::Validation("Retention must be positive".to_string()));
    }
    now.checked_sub_signed(retention).ok_or_else(|| {
        RbacError::Validation(format!(
            "Retention of {} days is out of range",
            retention.num_days()
        ))
    })
}

fn new_user(email: &str, name: Option<&str>, password_hash: Option<String>) -> RbacResult<NewUser> {
    Ok(NewUser {
        email: normalize_email(email)?,
        name: name.map(str::trim).filter(|n| !n.is_empty()).map(String::from),
        password_hash,
    })
}

/// Create an `active` user with no roles.
pub async fn create_user(
    store: &dyn RbacStore,
    email: &str,
    name: Option<&str>,
    password_hash: Option<String>,
) -> RbacResult<User> {
    let user = store.create_user(new_user(email, name, password_hash)?).await?;
    info!(user_id = %user.id, email = %user.email, "user created");
    Ok(user)
}

/// Create an `active` user already holding `role_ids`. Either the user and
/// every assignment exist afterwards, or nothing does.
pub async fn create_user_with_roles(
    store: &dyn RbacStore,
    email: &str,
    name: Option<&str>,
    password_hash: Option<String>,
    role_ids: &[Uuid],
    actor: Option<Uuid>,
) -> RbacResult<(User, Vec<UserRoleAssignment>)> {
    let (user, roles) = store
        .create_user_with_roles(new_user(email, name, password_hash)?, role_ids, actor)
        .await?;
    info!(
        user_id = %user.id,
        email = %user.email,
        actor = ?actor,
        roles = roles.len(),
        "user created"
    );
    Ok((user, roles))
}

/// Admin toggle between `active` and `inactive`. Roles are untouched.
///
/// `deactivated` and `archived` have their own entry points
/// ([`deactivate`], [`archive_user`]) and are refused here.
pub async fn set_status(
    store: &dyn RbacStore,
    user_id: Uuid,
    status: UserStatus,
) -> RbacResult<User> {
    let user = store.set_user_status(user_id, status).await?;
    info!(user_id = %user_id, status = %user.status, "user status changed");
    Ok(user)
}

/// Deactivate a user: every role assignment moves to history with reason
/// `user_deactivated` and the user is stamped with time and actor.
pub async fn deactivate(
    store: &dyn RbacStore,
    user_id: Uuid,
    actor: Option<Uuid>,
) -> RbacResult<Deactivation> {
    deactivate_at(store, user_id, actor, Utc::now()).await
}

/// [`deactivate`] with an explicit timestamp.
pub async fn deactivate_at(
    store: &dyn RbacStore,
    user_id: Uuid,
    actor: Option<Uuid>,
    at: DateTime<Utc>,
) -> RbacResult<Deactivation> {
    let result = store.deactivate_user(user_id, actor, at).await?;
    let roles: Vec<&str> = result
        .removed_roles
        .iter()
        .map(|h| h.role_name.as_str())
        .collect();
    info!(
        user_id = %user_id,
        actor = ?actor,
        removed = roles.len(),
        roles = ?roles,
        "user deactivated"
    );
    Ok(result)
}

/// Bring a deactivated user back to `active`. Previous roles are not
/// restored; an admin re-assigns them explicitly.
pub async fn reactivate(store: &dyn RbacStore, user_id: Uuid) -> RbacResult<User> {
    let current = store
        .get_user(user_id)
        .await?
        .ok_or_else(|| RbacError::NotFound(format!("User {user_id}")))?;
    if current.status != UserStatus::Deactivated {
        return Err(RbacError::InvalidTransition {
            from: current.status,
            to: UserStatus::Active,
        });
    }
    let user = store.set_user_status(user_id, UserStatus::Active).await?;
    info!(user_id = %user_id, "user reactivated without roles");
    Ok(user)
}

/// Archive one deactivated user once `retention` has elapsed since
/// deactivation.
pub async fn archive_user(
    store: &dyn RbacStore,
    user_id: Uuid,
    retention: Duration,
    now: DateTime<Utc>,
) -> RbacResult<ArchivedUser> {
    let cutoff = retention_cutoff(now, retention)?;
    match store.archive_user(user_id, cutoff, now).await {
        Ok(archived) => {
            info!(user_id = %user_id, email = %archived.email, "user archived");
            Ok(archived)
        }
        Err(RbacError::RetentionPending { until }) => {
            warn!(user_id = %user_id, until = %until, "archive requested before retention elapsed");
            Err(RbacError::RetentionPending { until })
        }
        Err(e) => Err(e),
    }
}

/// Users that hold no role. Every active user is expected to have one.
pub async fn users_without_roles(store: &dyn RbacStore) -> RbacResult<Vec<User>> {
    let users = store.list_users_without_roles().await?;
    if !users.is_empty() {
        warn!(count = users.len(), "active users without any role");
    }
    Ok(users)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::RemovalReason;
    use crate::rbac::authorize;
    use crate::store::MemoryStore;

    async fn seeded() -> MemoryStore {
        MemoryStore::with_default_catalog().await.unwrap()
    }

    async fn role_id(store: &MemoryStore, name: &str) -> Uuid {
        store
            .list_roles()
            .await
            .unwrap()
            .into_iter()
            .find(|r| r.name == name)
            .map(|r| r.id)
            .unwrap()
    }

    #[tokio::test]
    async fn create_user_normalizes_input() {
        let store = MemoryStore::new();
        let user = create_user(&store, " Ana@Example.com ", Some("  "), None)
            .await
            .unwrap();
        assert_eq!(user.email, "ana@example.com");
        assert_eq!(user.name, None);
        assert_eq!(user.status, UserStatus::Active);

        let err = create_user(&store, "ana@example.com", None, None)
            .await
            .unwrap_err();
        assert!(matches!(err, RbacError::Conflict(_)));
    }

    #[tokio::test]
    async fn deactivating_manager_agent_leaves_two_history_rows() {
        let store = seeded().await;
        let x = create_user(&store, "x@example.com", None, None).await.unwrap();
        let admin = create_user(&store, "admin@example.com", None, None)
            .await
            .unwrap();
        store
            .assign_role(x.id, role_id(&store, "Manager").await, None)
            .await
            .unwrap();
        store
            .assign_role(x.id, role_id(&store, "Agent").await, None)
            .await
            .unwrap();

        let result = deactivate(&store, x.id, Some(admin.id)).await.unwrap();

        assert_eq!(result.user.status, UserStatus::Deactivated);
        assert_eq!(result.user.deactivated_by, Some(admin.id));
        assert!(store.user_roles(x.id).await.unwrap().is_empty());
        let history = store.role_history(x.id).await.unwrap();
        assert_eq!(history.len(), 2);
        assert!(
            history
                .iter()
                .all(|h| h.reason == RemovalReason::UserDeactivated)
        );
        let mut names: Vec<_> = history.iter().map(|h| h.role_name.clone()).collect();
        names.sort();
        assert_eq!(names, vec!["Agent".to_string(), "Manager".to_string()]);
    }

    #[tokio::test]
    async fn deactivated_user_loses_all_permissions() {
        let store = seeded().await;
        let u = create_user(&store, "u@example.com", None, None).await.unwrap();
        store
            .assign_role(u.id, role_id(&store, "Viewer").await, None)
            .await
            .unwrap();
        assert!(
            authorize::has_permission(&store, "u@example.com", "view_leads")
                .await
                .unwrap()
        );

        deactivate(&store, u.id, None).await.unwrap();
        assert!(
            authorize::get_user_permissions(&store, "u@example.com")
                .await
                .unwrap()
                .is_empty()
        );
    }

    #[tokio::test]
    async fn reactivation_restores_no_roles() {
        let store = seeded().await;
        let u = create_user(&store, "u@example.com", None, None).await.unwrap();
        store
            .assign_role(u.id, role_id(&store, "Agent").await, None)
            .await
            .unwrap();
        deactivate(&store, u.id, None).await.unwrap();

        let back = reactivate(&store, u.id).await.unwrap();
        assert_eq!(back.status, UserStatus::Active);
        assert!(back.deactivated_at.is_none());
        assert!(back.deactivated_by.is_none());
        assert!(store.user_roles(u.id).await.unwrap().is_empty());
        // History is kept across the round trip.
        assert_eq!(store.role_history(u.id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn reactivate_requires_deactivated_user() {
        let store = MemoryStore::new();
        let u = create_user(&store, "u@example.com", None, None).await.unwrap();
        let err = reactivate(&store, u.id).await.unwrap_err();
        assert!(matches!(
            err,
            RbacError::InvalidTransition {
                from: UserStatus::Active,
                to: UserStatus::Active
            }
        ));
    }

    #[tokio::test]
    async fn status_toggle_and_invalid_transitions() {
        let store = MemoryStore::new();
        let u = create_user(&store, "u@example.com", None, None).await.unwrap();

        let paused = set_status(&store, u.id, UserStatus::Inactive).await.unwrap();
        assert_eq!(paused.status, UserStatus::Inactive);
        assert!(matches!(
            set_status(&store, u.id, UserStatus::Inactive).await,
            Err(RbacError::InvalidTransition { .. })
        ));

        deactivate(&store, u.id, None).await.unwrap();
        assert!(matches!(
            set_status(&store, u.id, UserStatus::Inactive).await,
            Err(RbacError::InvalidTransition { .. })
        ));
        assert!(matches!(
            deactivate(&store, u.id, None).await,
            Err(RbacError::InvalidTransition { .. })
        ));
    }

    #[tokio::test]
    async fn archive_before_retention_is_pending() {
        let store = MemoryStore::new();
        let u = create_user(&store, "u@example.com", None, None).await.unwrap();
        let now = Utc::now();
        deactivate_at(&store, u.id, None, now - Duration::days(59))
            .await
            .unwrap();

        let err = archive_user(&store, u.id, default_retention(), now)
            .await
            .unwrap_err();
        assert!(matches!(err, RbacError::RetentionPending { .. }));
        assert!(store.get_user(u.id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn archive_after_retention_keeps_history() {
        let store = seeded().await;
        let u = create_user(&store, "u@example.com", Some("Una"), None)
            .await
            .unwrap();
        store
            .assign_role(u.id, role_id(&store, "Viewer").await, None)
            .await
            .unwrap();
        let now = Utc::now();
        deactivate_at(&store, u.id, None, now - Duration::days(60))
            .await
            .unwrap();

        let archived = archive_user(&store, u.id, default_retention(), now)
            .await
            .unwrap();
        assert_eq!(archived.id, u.id);
        assert_eq!(archived.name.as_deref(), Some("Una"));
        assert!(store.get_user(u.id).await.unwrap().is_none());
        assert_eq!(store.list_archived_users().await.unwrap().len(), 1);
        assert_eq!(store.role_history(u.id).await.unwrap().len(), 1);
    }

    #[test]
    fn retention_days_is_bounded() {
        assert_eq!(retention_days(60).unwrap(), default_retention());
        assert_eq!(
            retention_days(MAX_RETENTION_DAYS).unwrap(),
            Duration::days(MAX_RETENTION_DAYS)
        );
        for days in [0, -1, MAX_RETENTION_DAYS + 1, 100_000_000] {
            assert!(matches!(retention_days(days), Err(RbacError::Validation(_))));
        }
    }

    #[test]
    fn retention_cutoff_rejects_overflow() {
        let now = Utc::now();
        assert_eq!(
            retention_cutoff(now, Duration::days(7)).unwrap(),
            now - Duration::days(7)
        );
        assert!(matches!(
            retention_cutoff(now, Duration::days(100_000_000)),
            Err(RbacError::Validation(_))
        ));
        assert!(matches!(
            retention_cutoff(now, Duration::zero()),
            Err(RbacError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn archive_with_huge_retention_is_rejected() {
        let store = MemoryStore::new();
        let u = create_user(&store, "u@example.com", None, None).await.unwrap();
        deactivate(&store, u.id, None).await.unwrap();

        let err = archive_user(&store, u.id, Duration::days(100_000_000), Utc::now())
            .await
            .unwrap_err();
        assert!(matches!(err, RbacError::Validation(_)));
        assert!(store.get_user(u.id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn create_user_with_roles_normalizes_and_assigns() {
        let store = seeded().await;
        let agent = role_id(&store, "Agent").await;
        let (user, roles) = create_user_with_roles(
            &store,
            " Hire@Example.com",
            Some(" Hire "),
            None,
            &[agent],
            None,
        )
        .await
        .unwrap();
        assert_eq!(user.email, "hire@example.com");
        assert_eq!(user.name.as_deref(), Some("Hire"));
        assert_eq!(roles.len(), 1);
        assert_eq!(roles[0].role_id, agent);
    }

    #[tokio::test]
    async fn users_without_roles_diagnostic() {
        let store = seeded().await;
        let a = create_user(&store, "a@example.com", None, None).await.unwrap();
        create_user(&store, "b@example.com", None, None).await.unwrap();
        store
            .assign_role(a.id, role_id(&store, "Viewer").await, None)
            .await
            .unwrap();

        let lonely = users_without_roles(&store).await.unwrap();
        assert_eq!(lonely.len(), 1);
        assert_eq!(lonely[0].email, "b@example.com");
    }
}
