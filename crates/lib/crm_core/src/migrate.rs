//! Database migration support.
//!
//! Embeds and runs SQL migrations from `crm_core/migrations/`: the RBAC
//! schema, the `has_permission` / `get_user_permissions` SQL functions and the
//! seed role/permission catalog.

use sqlx::PgPool;

/// Run all embedded database migrations against the given pool.
pub async fn migrate(pool: &PgPool) -> Result<(), sqlx::migrate::MigrateError> {
    sqlx::migrate!("./migrations").run(pool).await
}
