//! Shared harness: router over a seeded in-memory store, driven with
//! `tower::ServiceExt::oneshot`.

#![allow(dead_code)]

use std::sync::Arc;

use axum::Router;
use axum::body::Body;
use axum::http::header::{AUTHORIZATION, CONTENT_TYPE};
use axum::http::{Method, Request, StatusCode};
use crm_api::{AppState, config::ApiConfig};
use crm_core::auth::password::hash_password;
use crm_core::models::{NewUser, User};
use crm_core::store::{MemoryStore, RbacStore};
use serde_json::{Value, json};
use tower::ServiceExt;
use uuid::Uuid;

pub const ADMIN_EMAIL: &str = "admin@example.com";
pub const PASSWORD: &str = "correct-horse-1";

pub struct TestApp {
    pub router: Router,
    pub store: Arc<MemoryStore>,
    pub admin_token: String,
}

pub async fn app() -> TestApp {
    let store = Arc::new(MemoryStore::with_default_catalog().await.unwrap());
    let state = AppState::new(store.clone(), ApiConfig::with_secret("test-secret"));
    let mut app = TestApp {
        router: crm_api::router(state),
        store,
        admin_token: String::new(),
    };
    create_user(&app, ADMIN_EMAIL, &["Admin"]).await;
    app.admin_token = login(&app, ADMIN_EMAIL).await;
    app
}

pub async fn role_id(app: &TestApp, name: &str) -> Uuid {
    app.store
        .list_roles()
        .await
        .unwrap()
        .into_iter()
        .find(|r| r.name == name)
        .map(|r| r.id)
        .unwrap()
}

pub async fn permission_id(app: &TestApp, name: &str) -> Uuid {
    app.store
        .list_permissions()
        .await
        .unwrap()
        .into_iter()
        .find(|p| p.name == name)
        .map(|p| p.id)
        .unwrap()
}

/// Active user with password [`PASSWORD`] holding the named roles.
pub async fn create_user(app: &TestApp, email: &str, roles: &[&str]) -> User {
    let user = app
        .store
        .create_user(NewUser {
            email: email.into(),
            name: None,
            password_hash: Some(hash_password(PASSWORD).unwrap()),
        })
        .await
        .unwrap();
    for role in roles {
        let id = role_id(app, role).await;
        app.store.assign_role(user.id, id, None).await.unwrap();
    }
    user
}

pub async fn login(app: &TestApp, email: &str) -> String {
    let (status, body) = send(
        app,
        Method::POST,
        "/api/auth/login",
        None,
        Some(json!({ "email": email, "password": PASSWORD })),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "login failed: {body}");
    body["accessToken"].as_str().unwrap().to_string()
}

pub async fn send(
    app: &TestApp,
    method: Method,
    uri: &str,
    token: Option<&str>,
    body: Option<Value>,
) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(token) = token {
        builder = builder.header(AUTHORIZATION, format!("Bearer {token}"));
    }
    let req = match body {
        Some(body) => builder
            .header(CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };
    let resp = app.router.clone().oneshot(req).await.unwrap();
    let status = resp.status();
    let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX)
        .await
        .unwrap();
    let json = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, json)
}

pub async fn get(app: &TestApp, uri: &str, token: &str) -> (StatusCode, Value) {
    send(app, Method::GET, uri, Some(token), None).await
}

pub async fn post(app: &TestApp, uri: &str, token: &str, body: Value) -> (StatusCode, Value) {
    send(app, Method::POST, uri, Some(token), Some(body)).await
}
