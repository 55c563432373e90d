//! Request handlers.

pub mod archival;
pub mod auth;
pub mod health;
pub mod permissions;
pub mod rbac;
pub mod roles;
pub mod users;
