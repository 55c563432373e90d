//! # crm_api
//!
//! HTTP API for CRM access control: login, permission checks and the admin
//! surface over roles, permissions and the user lifecycle.

pub mod config;
pub mod error;
pub mod extract;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod services;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post, put};
use crm_core::archival::ArchivalJob;
use crm_core::rbac::catalog::{MANAGE_PERMISSIONS, MANAGE_ROLES, MANAGE_USERS};
use crm_core::store::RbacStore;
use sqlx::PgPool;
use tower_http::cors::{Any, CorsLayer};

use crate::config::ApiConfig;
use crate::handlers::{archival, auth, health, permissions, rbac, roles, users};
use crate::middleware::auth::{PermissionGuard, require_auth, require_permission};

/// Shared application state passed to all handlers.
#[derive(Clone)]
pub struct AppState {
    /// RBAC storage backend.
    pub store: Arc<dyn RbacStore>,
    /// API configuration.
    pub config: ApiConfig,
}

impl AppState {
    pub fn new(store: Arc<dyn RbacStore>, config: ApiConfig) -> Self {
        Self { store, config }
    }

    /// Archival job over this state's store and configured retention.
    pub fn archival_job(&self) -> ArchivalJob {
        ArchivalJob::new(Arc::clone(&self.store), self.config.retention())
    }
}

/// Run embedded database migrations.
///
/// Delegates to `crm_core::migrate::migrate()` which owns the migration files.
pub async fn migrate(pool: &PgPool) -> Result<(), sqlx::migrate::MigrateError> {
    crm_core::migrate::migrate(pool).await
}

/// Builds the Axum router with all routes and shared state.
pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    // Public routes (no auth required)
    let public = Router::new()
        .route("/api/health", get(health::health_handler))
        .route("/api/auth/login", post(auth::login_handler))
        .route("/api/auth/logout", post(auth::logout_handler));

    // Any authenticated, active user
    let session = Router::new()
        .route("/api/rbac/me/permissions", get(rbac::my_permissions_handler))
        .route("/api/rbac/check", get(rbac::check_handler));

    let role_admin = Router::new()
        .route(
            "/api/admin/roles",
            get(roles::list_roles_handler).post(roles::create_role_handler),
        )
        .route(
            "/api/admin/roles/{id}",
            get(roles::get_role_handler)
                .patch(roles::update_role_handler)
                .delete(roles::delete_role_handler),
        )
        .route(
            "/api/admin/roles/{id}/permissions",
            put(roles::set_role_permissions_handler),
        )
        .route(
            "/api/admin/roles/{id}/permissions/{permission_id}",
            post(roles::grant_role_permission_handler)
                .delete(roles::revoke_role_permission_handler),
        )
        .route_layer(axum::middleware::from_fn_with_state(
            PermissionGuard::new(&state, MANAGE_ROLES),
            require_permission,
        ));

    let permission_admin = Router::new()
        .route(
            "/api/admin/permissions",
            get(permissions::list_permissions_handler)
                .post(permissions::create_permission_handler),
        )
        .route(
            "/api/admin/permissions/{id}",
            get(permissions::get_permission_handler)
                .patch(permissions::update_permission_handler)
                .delete(permissions::delete_permission_handler),
        )
        .route_layer(axum::middleware::from_fn_with_state(
            PermissionGuard::new(&state, MANAGE_PERMISSIONS),
            require_permission,
        ));

    let user_admin = Router::new()
        .route(
            "/api/admin/users",
            get(users::list_users_handler).post(users::create_user_handler),
        )
        .route(
            "/api/admin/users/without-roles",
            get(users::users_without_roles_handler),
        )
        .route("/api/admin/users/{id}", get(users::get_user_handler))
        .route(
            "/api/admin/users/{id}/roles",
            get(users::list_user_roles_handler).post(users::assign_role_handler),
        )
        .route(
            "/api/admin/users/{id}/roles/{role_id}",
            axum::routing::delete(users::unassign_role_handler),
        )
        .route("/api/admin/users/{id}/status", post(users::set_status_handler))
        .route(
            "/api/admin/users/{id}/deactivate",
            post(users::deactivate_handler),
        )
        .route(
            "/api/admin/users/{id}/reactivate",
            post(users::reactivate_handler),
        )
        .route("/api/admin/users/{id}/archive", post(users::archive_handler))
        .route(
            "/api/admin/users/{id}/role-history",
            get(users::role_history_handler),
        )
        .route(
            "/api/admin/archived-users",
            get(users::archived_users_handler),
        )
        .route("/api/admin/archival/run", post(archival::run_archival_handler))
        .route(
            "/api/rbac/users/{email}/permissions",
            get(rbac::user_permissions_handler),
        )
        .route("/api/rbac/users/{email}/check", get(rbac::user_check_handler))
        .route_layer(axum::middleware::from_fn_with_state(
            PermissionGuard::new(&state, MANAGE_USERS),
            require_permission,
        ));

    let protected = Router::new()
        .merge(session)
        .merge(role_admin)
        .merge(permission_admin)
        .merge(user_admin)
        .route_layer(axum::middleware::from_fn_with_state(
            state.clone(),
            require_auth,
        ));

    Router::new()
        .merge(public)
        .merge(protected)
        .layer(cors)
        .with_state(state)
}
