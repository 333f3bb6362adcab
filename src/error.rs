use thiserror::Error;
use actix_web::{ResponseError, HttpResponse, http::StatusCode};
use serde_json::json;

use crate::auth::TokenKind;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Authentication error: {0}")]
    AuthError(#[from] AuthError),

    #[error("Validation error: {0}")]
    ValidationError(#[from] ValidationError),

    #[error("Conflict: {0}")]
    ConflictError(String),

    #[error("Not found: {0}")]
    NotFoundError(String),

    #[error("Database error: {0}")]
    DatabaseError(#[from] DatabaseError),

    #[error("Upstream error: {0}")]
    UpstreamError(#[from] UpstreamError),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Internal server error: {0}")]
    InternalError(String),
}

impl From<config::ConfigError> for AppError {
    fn from(err: config::ConfigError) -> Self {
        AppError::ConfigError(err.to_string())
    }
}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        AppError::DatabaseError(err.into())
    }
}

impl From<sqlx::migrate::MigrateError> for AppError {
    fn from(err: sqlx::migrate::MigrateError) -> Self {
        AppError::DatabaseError(DatabaseError::MigrationError(err.to_string()))
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::InternalError(err.to_string())
    }
}

impl From<validator::ValidationErrors> for AppError {
    fn from(err: validator::ValidationErrors) -> Self {
        AppError::ValidationError(ValidationError::BadRequest(err.to_string()))
    }
}

/// Any token that fails to decode, verify or match its expected kind is
/// reported to clients as the same `InvalidToken`.
impl From<TokenError> for AppError {
    fn from(err: TokenError) -> Self {
        match err {
            TokenError::Signing(msg) => AppError::InternalError(msg),
            _ => AppError::AuthError(AuthError::InvalidToken),
        }
    }
}

impl From<LedgerError> for AppError {
    fn from(err: LedgerError) -> Self {
        match err {
            LedgerError::Database(e) => AppError::DatabaseError(e),
            LedgerError::NotFound | LedgerError::AlreadyUsed | LedgerError::Expired => {
                AppError::AuthError(AuthError::InvalidToken)
            }
        }
    }
}

impl AppError {
    /// Message placed in the response body. Server-side failures get a generic
    /// text so storage and network details stay in the logs.
    pub fn public_message(&self) -> String {
        match self {
            AppError::DatabaseError(_) | AppError::ConfigError(_) | AppError::InternalError(_) => {
                "Internal server error".to_string()
            }
            AppError::UpstreamError(UpstreamError::Timeout) => "Upstream timeout".to_string(),
            AppError::UpstreamError(_) => "Upstream error".to_string(),
            AppError::AuthError(e) => e.to_string(),
            AppError::ValidationError(e) => e.to_string(),
            other => other.to_string(),
        }
    }
}

impl ResponseError for AppError {
    fn error_response(&self) -> HttpResponse {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        }
        let response = json!({
            "error": {
                "status": status.as_u16(),
                "message": self.public_message()
            }
        });
        HttpResponse::build(status).json(response)
    }

    fn status_code(&self) -> StatusCode {
        match self {
            AppError::AuthError(e) => match e {
                AuthError::InvalidCredentials => StatusCode::UNAUTHORIZED,
                AuthError::InvalidToken => StatusCode::UNAUTHORIZED,
                AuthError::MissingToken => StatusCode::UNAUTHORIZED,
                AuthError::MissingIdentity => StatusCode::UNAUTHORIZED,
                AuthError::NotVerified => StatusCode::FORBIDDEN,
                AuthError::Forbidden => StatusCode::FORBIDDEN,
            },
            AppError::ValidationError(_) => StatusCode::BAD_REQUEST,
            AppError::ConflictError(_) => StatusCode::CONFLICT,
            AppError::NotFoundError(_) => StatusCode::NOT_FOUND,
            AppError::DatabaseError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::UpstreamError(UpstreamError::Timeout) => StatusCode::GATEWAY_TIMEOUT,
            AppError::UpstreamError(_) => StatusCode::BAD_GATEWAY,
            AppError::ConfigError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::InternalError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    #[error("Invalid credentials")]
    InvalidCredentials,

    #[error("Email not verified")]
    NotVerified,

    #[error("Invalid token")]
    InvalidToken,

    #[error("Missing bearer token")]
    MissingToken,

    #[error("Missing caller identity")]
    MissingIdentity,

    #[error("Forbidden")]
    Forbidden,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("{0}")]
    BadRequest(String),

    #[error("Invalid email")]
    InvalidEmail,

    #[error("Weak password: {0}")]
    WeakPassword(String),

    #[error("Bad token")]
    BadToken,
}

/// Failures of the token codec.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TokenError {
    #[error("Invalid signature")]
    InvalidSignature,

    #[error("Malformed token")]
    Malformed,

    #[error("Token expired")]
    Expired,

    #[error("Expected a {expected} token, got {found}")]
    WrongKind { expected: TokenKind, found: TokenKind },

    #[error("Signer misconfigured: {0}")]
    Signing(String),
}

/// Failures of the refresh ledger.
#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("Token not found")]
    NotFound,

    #[error("Token already used")]
    AlreadyUsed,

    #[error("Token expired")]
    Expired,

    #[error("Ledger storage failure: {0}")]
    Database(#[from] DatabaseError),
}

impl From<sqlx::Error> for LedgerError {
    fn from(err: sqlx::Error) -> Self {
        LedgerError::Database(err.into())
    }
}

#[derive(Error, Debug)]
pub enum UpstreamError {
    #[error("Upstream unreachable: {0}")]
    Unreachable(String),

    #[error("Upstream timed out")]
    Timeout,

    #[error("Upstream response error: {0}")]
    ResponseError(String),
}

impl From<reqwest::Error> for UpstreamError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            UpstreamError::Timeout
        } else if err.is_connect() || err.is_request() {
            UpstreamError::Unreachable(err.to_string())
        } else {
            UpstreamError::ResponseError(err.to_string())
        }
    }
}

#[derive(Error, Debug)]
pub enum DatabaseError {
    #[error("Connection error: {0}")]
    ConnectionError(String),

    #[error("Query error: {0}")]
    QueryError(String),

    #[error("Migration error: {0}")]
    MigrationError(String),

    #[error("Record not found")]
    NotFound,

    #[error("Duplicate record")]
    Duplicate,
}

const UNIQUE_VIOLATION: &str = "23505";

impl From<sqlx::Error> for DatabaseError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => DatabaseError::NotFound,
            sqlx::Error::Database(ref db_err)
                if db_err.code().as_deref() == Some(UNIQUE_VIOLATION) =>
            {
                DatabaseError::Duplicate
            }
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
                DatabaseError::ConnectionError(err.to_string())
            }
            _ => DatabaseError::QueryError(err.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    #[test]
    fn test_error_conversion() {
        let io_err = io::Error::new(io::ErrorKind::NotFound, "file not found");
        let app_err: AppError = io_err.into();
        assert!(matches!(app_err, AppError::InternalError(_)));

        let config_err = config::ConfigError::NotFound(String::from("key not found"));
        let app_err: AppError = config_err.into();
        assert!(matches!(app_err, AppError::ConfigError(_)));

        let db_err = sqlx::Error::RowNotFound;
        let app_err: AppError = db_err.into();
        assert!(matches!(app_err, AppError::DatabaseError(DatabaseError::NotFound)));

        let app_err: AppError = sqlx::Error::PoolTimedOut.into();
        assert!(matches!(app_err, AppError::DatabaseError(DatabaseError::ConnectionError(_))));
    }

    #[test]
    fn test_token_and_ledger_failures_collapse_to_invalid_token() {
        for err in [TokenError::InvalidSignature, TokenError::Malformed, TokenError::Expired] {
            let app_err: AppError = err.into();
            assert!(matches!(app_err, AppError::AuthError(AuthError::InvalidToken)));
        }
        for err in [LedgerError::NotFound, LedgerError::AlreadyUsed, LedgerError::Expired] {
            let app_err: AppError = err.into();
            assert!(matches!(app_err, AppError::AuthError(AuthError::InvalidToken)));
        }

        let app_err: AppError = LedgerError::Database(DatabaseError::QueryError("boom".into())).into();
        assert!(matches!(app_err, AppError::DatabaseError(_)));
    }

    #[test]
    fn test_error_status_codes() {
        let err = AppError::AuthError(AuthError::InvalidCredentials);
        assert_eq!(err.status_code(), StatusCode::UNAUTHORIZED);

        let err = AppError::AuthError(AuthError::NotVerified);
        assert_eq!(err.status_code(), StatusCode::FORBIDDEN);

        let err = AppError::ValidationError(ValidationError::WeakPassword("too short".into()));
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);

        let err = AppError::ConflictError("email exists".into());
        assert_eq!(err.status_code(), StatusCode::CONFLICT);

        let err = AppError::DatabaseError(DatabaseError::NotFound);
        assert_eq!(err.status_code(), StatusCode::INTERNAL_SERVER_ERROR);

        let err = AppError::UpstreamError(UpstreamError::Unreachable("refused".into()));
        assert_eq!(err.status_code(), StatusCode::BAD_GATEWAY);

        let err = AppError::UpstreamError(UpstreamError::Timeout);
        assert_eq!(err.status_code(), StatusCode::GATEWAY_TIMEOUT);
    }

    #[test]
    fn test_error_display() {
        let err = AppError::ValidationError(ValidationError::BadRequest("test error".into()));
        assert_eq!(err.to_string(), "Validation error: test error");

        let err = AppError::AuthError(AuthError::InvalidCredentials);
        assert_eq!(err.to_string(), "Authentication error: Invalid credentials");

        let err = AppError::DatabaseError(DatabaseError::NotFound);
        assert_eq!(err.to_string(), "Database error: Record not found");
    }

    #[test]
    fn test_server_errors_hide_details() {
        let err = AppError::DatabaseError(DatabaseError::QueryError(
            "relation \"users\" does not exist".into(),
        ));
        assert_eq!(err.public_message(), "Internal server error");

        let err = AppError::UpstreamError(UpstreamError::Unreachable("10.0.0.3:8081".into()));
        assert_eq!(err.public_message(), "Upstream error");

        let err = AppError::AuthError(AuthError::InvalidToken);
        assert_eq!(err.public_message(), "Invalid token");
    }
}
