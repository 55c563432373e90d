//! Application error types.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use crm_core::auth::AuthError;
use crm_core::rbac::RbacError;
use thiserror::Error;
use tracing::error;

use crate::models::ErrorResponse;

/// Convenience alias for handler return types.
pub type AppResult<T> = Result<T, AppError>;

/// Application-level errors with HTTP status mapping.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Validation error: {0}")]
    Validation(String),

    /// Delete refused because other rows still reference the target.
    #[error("{message}")]
    InUse { message: String, dependents: i64 },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Internal server error")]
    Internal(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error, message, dependents) = match &self {
            AppError::Validation(m) => (
                StatusCode::BAD_REQUEST,
                "validation_error",
                m.as_str(),
                None,
            ),
            AppError::InUse {
                message,
                dependents,
            } => (
                StatusCode::BAD_REQUEST,
                "in_use",
                message.as_str(),
                Some(*dependents),
            ),
            AppError::NotFound(m) => (StatusCode::NOT_FOUND, "not_found", m.as_str(), None),
            AppError::Conflict(m) => (StatusCode::CONFLICT, "conflict", m.as_str(), None),
            AppError::Unauthorized(m) => {
                (StatusCode::UNAUTHORIZED, "unauthorized", m.as_str(), None)
            }
            AppError::Forbidden(m) => (StatusCode::FORBIDDEN, "forbidden", m.as_str(), None),
            AppError::Internal(detail) => {
                error!(detail = %detail, "internal error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal_error",
                    "Internal server error",
                    None,
                )
            }
        };
        let body = Json(ErrorResponse {
            error: error.to_string(),
            message: message.to_string(),
            dependents,
        });
        (status, body).into_response()
    }
}

impl From<RbacError> for AppError {
    fn from(e: RbacError) -> Self {
        let message = e.to_string();
        match e {
            RbacError::NotFound(msg) => AppError::NotFound(msg),
            RbacError::Conflict(msg) => AppError::Conflict(msg),
            RbacError::Validation(msg) => AppError::Validation(msg),
            RbacError::InUse { dependents, .. } => AppError::InUse {
                message,
                dependents,
            },
            RbacError::InvalidTransition { .. } | RbacError::RetentionPending { .. } => {
                AppError::Conflict(message)
            }
            RbacError::DbError(_) => AppError::Internal(message),
        }
    }
}

impl From<AuthError> for AppError {
    fn from(e: AuthError) -> Self {
        match e {
            AuthError::CredentialError => AppError::Unauthorized("Invalid credentials".into()),
            AuthError::AccountDisabled(status) => {
                AppError::Unauthorized(format!("Account is {status}"))
            }
            AuthError::TokenError(msg) => AppError::Unauthorized(msg),
            AuthError::ValidationError(msg) => AppError::Validation(msg),
            AuthError::Store(e) => AppError::from(e),
            AuthError::Internal(msg) => AppError::Internal(msg),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crm_core::models::UserStatus;

    #[test]
    fn in_use_keeps_count_and_message() {
        let err = AppError::from(RbacError::InUse {
            what: "Permission 'view_leads'".into(),
            dependents: 2,
        });
        match err {
            AppError::InUse {
                message,
                dependents,
            } => {
                assert_eq!(dependents, 2);
                assert!(message.contains("view_leads"));
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn lifecycle_errors_are_conflicts() {
        let err = AppError::from(RbacError::InvalidTransition {
            from: UserStatus::Archived,
            to: UserStatus::Active,
        });
        assert!(matches!(err, AppError::Conflict(_)));
        assert_eq!(err.into_response().status(), StatusCode::CONFLICT);
    }

    #[test]
    fn database_errors_hide_detail() {
        let err = AppError::from(RbacError::DbError(sqlx::Error::PoolTimedOut));
        assert_eq!(
            err.into_response().status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
