//! Authorization check.
//!
//! A user holds a permission iff one of the user's roles is linked to it.
//! Unknown users and users without roles are denied. Every call re-queries
//! the store, so role changes take effect on the next request.
//!
//! Lookup failures propagate as errors. They are never turned into an
//! allow, nor into a substitute permission set.

use tracing::debug;

use super::RbacResult;
use crate::store::RbacStore;

/// What is being checked: a permission by name, or by resource + action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PermissionCheck {
    Name(String),
    ResourceAction { resource: String, action: String },
}

impl PermissionCheck {
    pub fn name(name: impl Into<String>) -> Self {
        PermissionCheck::Name(name.into())
    }

    pub fn resource_action(resource: impl Into<String>, action: impl Into<String>) -> Self {
        PermissionCheck::ResourceAction {
            resource: resource.into(),
            action: action.into(),
        }
    }

    /// Parse `"resource:action"` into a resource check, anything else into a
    /// name check.
    pub fn parse(s: &str) -> Self {
        match s.split_once(':') {
            Some((resource, action)) if !resource.is_empty() && !action.is_empty() => {
                Self::resource_action(resource, action)
            }
            _ => Self::name(s),
        }
    }
}

impl std::fmt::Display for PermissionCheck {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PermissionCheck::Name(name) => f.write_str(name),
            PermissionCheck::ResourceAction { resource, action } => {
                write!(f, "{resource}:{action}")
            }
        }
    }
}

fn lookup_key(email: &str) -> String {
    email.trim().to_lowercase()
}

/// `has_permission(email, permission_name)`.
pub async fn has_permission(
    store: &dyn RbacStore,
    email: &str,
    permission_name: &str,
) -> RbacResult<bool> {
    check(store, email, &PermissionCheck::name(permission_name)).await
}

/// Evaluate a [`PermissionCheck`] for the user with this email.
pub async fn check(store: &dyn RbacStore, email: &str, check: &PermissionCheck) -> RbacResult<bool> {
    let email = lookup_key(email);
    let allowed = match check {
        PermissionCheck::Name(name) => store.has_permission(&email, name).await?,
        PermissionCheck::ResourceAction { resource, action } => {
            store
                .has_resource_permission(&email, resource, action)
                .await?
        }
    };
    debug!(email = %email, permission = %check, allowed, "authorization check");
    Ok(allowed)
}

/// `get_user_permissions(email)`: sorted permission names, empty when the
/// user is unknown or holds no roles.
pub async fn get_user_permissions(store: &dyn RbacStore, email: &str) -> RbacResult<Vec<String>> {
    store.get_user_permissions(&lookup_key(email)).await
}
