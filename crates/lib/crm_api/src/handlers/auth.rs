//! Authentication request handlers.

use axum::extract::State;
use axum_extra::extract::cookie::CookieJar;

use crate::AppState;
use crate::error::AppResult;
use crate::extract::Json;
use crate::models::{LoginRequest, LogoutResponse, TokenResponse};
use crate::services::auth;
use crate::services::cookies::{clear_session_cookie, session_cookie};

/// `POST /api/auth/login`: authenticate with email + password.
///
/// The token is returned in the body and set as the session cookie.
pub async fn login_handler(
    State(state): State<AppState>,
    jar: CookieJar,
    Json(body): Json<LoginRequest>,
) -> AppResult<(CookieJar, Json<TokenResponse>)> {
    let resp = auth::login(
        state.store.as_ref(),
        &body.email,
        &body.password,
        state.config.jwt_secret.as_bytes(),
    )
    .await?;
    let cookie = session_cookie(
        &resp.access_token,
        resp.expires_in,
        state.config.cookie_secure,
    );
    Ok((jar.add(cookie), Json(resp)))
}

/// `POST /api/auth/logout`: clear the session cookie. Bearer tokens simply
/// expire.
pub async fn logout_handler(
    State(state): State<AppState>,
    jar: CookieJar,
) -> (CookieJar, Json<LogoutResponse>) {
    (
        jar.add(clear_session_cookie(state.config.cookie_secure)),
        Json(LogoutResponse { success: true }),
    )
}
