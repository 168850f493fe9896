use crate::onboard::store::StoreError;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;
use tracing::error;

/// Failures surfaced by the account service.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("{0}")]
    Validation(String),
    #[error("Email is already in use.")]
    DuplicateEmail,
    #[error("Phone number is already in use.")]
    DuplicatePhone,
    #[error("User not found.")]
    UserNotFound,
    #[error("Invalid or expired OTP.")]
    InvalidOrExpiredOtp,
    #[error("Unauthorized.")]
    Unauthorized,
    #[error("internal error: {0}")]
    Internal(#[source] anyhow::Error),
}

impl ServiceError {
    #[must_use]
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Validation(_)
            | Self::DuplicateEmail
            | Self::DuplicatePhone
            | Self::InvalidOrExpiredOtp => StatusCode::BAD_REQUEST,
            Self::UserNotFound => StatusCode::NOT_FOUND,
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<StoreError> for ServiceError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::DuplicateEmail => Self::DuplicateEmail,
            StoreError::DuplicatePhone => Self::DuplicatePhone,
            StoreError::UserNotFound(_) => Self::UserNotFound,
            StoreError::Database(err) => Self::Internal(err.into()),
        }
    }
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let status = self.status();
        if let Self::Internal(err) = &self {
            // Backend detail stays in the logs.
            error!("Internal error: {err:?}");
            return (status, "Internal server error".to_string()).into_response();
        }
        (status, self.to_string()).into_response()
    }
}
