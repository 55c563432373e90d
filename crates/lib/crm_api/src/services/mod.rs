//! Business-logic services backing the HTTP handlers.

pub mod auth;
pub mod cookies;
