use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;
use tracing::error;

use crate::{
    auth::services::{AuthError, RegistrationError},
    credits::services::LedgerError,
    store::StoreError,
};

/// Error returned by HTTP handlers; rendered as a plain-text body.
#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Registration(#[from] RegistrationError),
    #[error(transparent)]
    Auth(#[from] AuthError),
    #[error(transparent)]
    Ledger(#[from] LedgerError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

fn store_status(e: &StoreError) -> StatusCode {
    match e {
        StoreError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        StoreError::Conflict => StatusCode::CONFLICT,
        StoreError::Malformed(_) | StoreError::Backend(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl AppError {
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::Registration(RegistrationError::DuplicateUsername) => StatusCode::CONFLICT,
            AppError::Registration(RegistrationError::InvalidUsernameFormat) => {
                StatusCode::BAD_REQUEST
            }
            AppError::Registration(RegistrationError::Hashing(_)) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            AppError::Registration(RegistrationError::Storage(e)) => store_status(e),
            AppError::Registration(RegistrationError::Ledger(_)) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            AppError::Auth(AuthError::InvalidCredentials) => StatusCode::UNAUTHORIZED,
            AppError::Auth(AuthError::Storage(e)) => store_status(e),
            AppError::Ledger(LedgerError::UnknownAccount(_)) => StatusCode::NOT_FOUND,
            AppError::Ledger(LedgerError::InvalidAmount(_)) => StatusCode::BAD_REQUEST,
            AppError::Ledger(LedgerError::Storage(e)) => store_status(e),
            AppError::Store(e) => store_status(e),
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        // Store and internal failures can carry backend details; keep those in
        // the log and answer with a generic message.
        let body = if status.is_server_error() {
            error!(error = %self, %status, "request failed");
            match status {
                StatusCode::SERVICE_UNAVAILABLE => "Service temporarily unavailable".to_string(),
                _ => "Internal server error".to_string(),
            }
        } else {
            self.to_string()
        };
        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_domain_errors_to_statuses() {
        let cases: Vec<(AppError, StatusCode)> = vec![
            (RegistrationError::DuplicateUsername.into(), StatusCode::CONFLICT),
            (RegistrationError::InvalidUsernameFormat.into(), StatusCode::BAD_REQUEST),
            (AuthError::InvalidCredentials.into(), StatusCode::UNAUTHORIZED),
            (LedgerError::UnknownAccount("x".into()).into(), StatusCode::NOT_FOUND),
            (LedgerError::InvalidAmount(0).into(), StatusCode::BAD_REQUEST),
            (
                AuthError::Storage(StoreError::Unavailable("timeout".into())).into(),
                StatusCode::SERVICE_UNAVAILABLE,
            ),
            (
                LedgerError::Storage(StoreError::Backend("boom".into())).into(),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
            (
                RegistrationError::Ledger(LedgerError::InvalidAmount(-1)).into(),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];
        for (err, status) in cases {
            assert_eq!(err.status(), status, "{err}");
        }
    }

    #[test]
    fn server_errors_hide_backend_details() {
        let res = AppError::from(StoreError::Backend("password=hunter2".into())).into_response();
        assert_eq!(res.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn user_facing_messages_follow_the_site_wording() {
        assert_eq!(
            AppError::from(RegistrationError::DuplicateUsername).to_string(),
            "That username already exists!"
        );
        assert_eq!(
            AppError::from(AuthError::InvalidCredentials).to_string(),
            "Invalid username or password"
        );
    }
}
