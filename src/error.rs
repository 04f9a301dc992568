use axum::{
    http::StatusCode,
    response::{IntoResponse, Redirect, Response},
};
use thiserror::Error;

use crate::views;

/// Error type shared by every handler and service.
#[derive(Debug, Error)]
pub enum AppError {
    /// Malformed or rejected form input.
    #[error("{0}")]
    Validation(String),

    /// Bad credentials or a missing, unknown or expired session.
    #[error("authentication required: {0}")]
    Auth(String),

    /// Authenticated, but not an admin.
    #[error("admin access required")]
    Authz,

    #[error("{0} not found")]
    NotFound(&'static str),

    /// A provider credential needed for the operation is not configured.
    #[error("{0}")]
    Config(String),

    /// The email or storage provider failed or timed out.
    #[error("{0}")]
    Upstream(String),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl AppError {
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::Auth(_) => StatusCode::SEE_OTHER,
            AppError::Authz => StatusCode::FORBIDDEN,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Config(_) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::Upstream(_) => StatusCode::BAD_GATEWAY,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = match &self {
            AppError::Auth(reason) => {
                tracing::debug!(%reason, "redirecting to login");
                return Redirect::to("/login").into_response();
            }
            AppError::Internal(e) => {
                tracing::error!(error = ?e, "internal error");
                "Something went wrong. Please try again.".to_string()
            }
            other => other.to_string(),
        };
        (status, views::error_page(status, &message)).into_response()
    }
}
