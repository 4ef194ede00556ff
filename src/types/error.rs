//! Error types for the subsidy platform
//!
//! One taxonomy for the whole service: route handlers convert any
//! `PlatformError` into the uniform `{success: false, error: {...}}`
//! envelope with the status code from `status_code()`.

use hyper::StatusCode;

/// Main error type for platform operations
#[derive(Debug, thiserror::Error)]
pub enum PlatformError {
    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Not found: {0}")]
    NotFound(String),

    /// State-precondition violation (e.g. verifying a milestone that is not
    /// completed, re-approving an already approved one). The message names
    /// the unmet precondition.
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Unique-constraint violation (email or wallet already registered)
    #[error("Duplicate: {0}")]
    Duplicate(String),

    #[error("Chain error: {0}")]
    Chain(String),

    #[error("Oracle error: {0}")]
    Oracle(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Authentication error: {0}")]
    Auth(String),
}

impl PlatformError {
    /// Convert error to HTTP status code
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::Duplicate(_) => StatusCode::CONFLICT,
            Self::Chain(_) => StatusCode::BAD_GATEWAY,
            Self::Oracle(_) => StatusCode::BAD_GATEWAY,
            Self::Database(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Auth(_) => StatusCode::UNAUTHORIZED,
        }
    }

    /// Whether this error should additionally be written to the audit log
    /// when it escapes a handler. Upstream and server-side failures qualify;
    /// ordinary client errors do not.
    pub fn is_auditable(&self) -> bool {
        matches!(
            self,
            Self::Chain(_) | Self::Database(_) | Self::Internal(_) | Self::Config(_)
        )
    }

    /// Convert to status code and body tuple for HTTP response
    pub fn into_status_code_and_body(self) -> (StatusCode, String) {
        let status = self.status_code();
        let body = self.to_string();
        (status, body)
    }
}

// Implement From conversions for common error types

impl From<std::io::Error> for PlatformError {
    fn from(err: std::io::Error) -> Self {
        Self::Internal(err.to_string())
    }
}

impl From<serde_json::Error> for PlatformError {
    fn from(err: serde_json::Error) -> Self {
        Self::BadRequest(format!("JSON error: {}", err))
    }
}

impl From<hyper::Error> for PlatformError {
    fn from(err: hyper::Error) -> Self {
        Self::Internal(format!("HTTP error: {}", err))
    }
}

impl From<mongodb::error::Error> for PlatformError {
    fn from(err: mongodb::error::Error) -> Self {
        // Surface duplicate-key violations as their own class so the API
        // answers 409 instead of 503.
        if err.to_string().contains("E11000") {
            Self::Duplicate("unique constraint violated".into())
        } else {
            Self::Database(err.to_string())
        }
    }
}

impl From<jsonwebtoken::errors::Error> for PlatformError {
    fn from(err: jsonwebtoken::errors::Error) -> Self {
        Self::Unauthorized(format!("JWT error: {}", err))
    }
}

impl From<reqwest::Error> for PlatformError {
    fn from(err: reqwest::Error) -> Self {
        Self::Oracle(err.to_string())
    }
}

/// Result type alias for platform operations
pub type Result<T> = std::result::Result<T, PlatformError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        assert_eq!(
            PlatformError::Conflict("already verified".into()).status_code(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            PlatformError::Forbidden("role".into()).status_code(),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            PlatformError::Duplicate("email".into()).status_code(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            PlatformError::Chain("rpc down".into()).status_code(),
            StatusCode::BAD_GATEWAY
        );
    }

    #[test]
    fn test_auditable_classes() {
        assert!(PlatformError::Chain("x".into()).is_auditable());
        assert!(PlatformError::Internal("x".into()).is_auditable());
        assert!(!PlatformError::Conflict("x".into()).is_auditable());
        assert!(!PlatformError::Forbidden("x".into()).is_auditable());
    }
}
