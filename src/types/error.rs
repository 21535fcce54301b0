//! Error types for Gatekeeper
//!
//! One enum for the whole crate. Each variant knows its HTTP status so route
//! handlers never have to re-classify failures.

use hyper::StatusCode;
use uuid::Uuid;

/// Main error type for Gatekeeper operations
#[derive(Debug, thiserror::Error)]
pub enum GatekeeperError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Username already taken: {0}")]
    DuplicateUsername(String),

    #[error("Group name already taken: {0}")]
    DuplicateGroupName(String),

    #[error("A pending ticket already exists: {0}")]
    DuplicatePending(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Ticket {0} is already resolved")]
    AlreadyResolved(Uuid),

    #[error("Still referenced: {0}")]
    EntityReferenced(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Dependency failure: {0}")]
    Dependency(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl GatekeeperError {
    /// Convert error to HTTP status code
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::DuplicateUsername(_)
            | Self::DuplicateGroupName(_)
            | Self::DuplicatePending(_)
            | Self::AlreadyResolved(_)
            | Self::EntityReferenced(_)
            | Self::Conflict(_) => StatusCode::CONFLICT,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::Dependency(_) | Self::Database(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Config(_) | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Stable machine-readable code for response bodies
    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "VALIDATION_ERROR",
            Self::DuplicateUsername(_) => "DUPLICATE_USERNAME",
            Self::DuplicateGroupName(_) => "DUPLICATE_GROUP_NAME",
            Self::DuplicatePending(_) => "DUPLICATE_PENDING",
            Self::NotFound(_) => "NOT_FOUND",
            Self::Unauthorized(_) => "UNAUTHORIZED",
            Self::Forbidden(_) => "FORBIDDEN",
            Self::AlreadyResolved(_) => "ALREADY_RESOLVED",
            Self::EntityReferenced(_) => "ENTITY_REFERENCED",
            Self::Conflict(_) => "CONFLICT",
            Self::Dependency(_) => "DEPENDENCY_ERROR",
            Self::Database(_) => "DB_ERROR",
            Self::Config(_) => "CONFIG_ERROR",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// Whether the caller may retry the same request unchanged
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Dependency(_) | Self::Database(_) | Self::AlreadyResolved(_)
        )
    }

    /// Convert to status code and body tuple for HTTP response
    pub fn into_status_code_and_body(self) -> (StatusCode, String) {
        let status = self.status_code();
        let body = self.to_string();
        (status, body)
    }
}

impl From<std::io::Error> for GatekeeperError {
    fn from(err: std::io::Error) -> Self {
        Self::Internal(err.to_string())
    }
}

impl From<serde_json::Error> for GatekeeperError {
    fn from(err: serde_json::Error) -> Self {
        Self::Validation(format!("JSON error: {}", err))
    }
}

impl From<hyper::Error> for GatekeeperError {
    fn from(err: hyper::Error) -> Self {
        Self::Internal(format!("HTTP error: {}", err))
    }
}

impl From<reqwest::Error> for GatekeeperError {
    fn from(err: reqwest::Error) -> Self {
        Self::Dependency(format!("broker request failed: {}", err))
    }
}

impl From<mongodb::error::Error> for GatekeeperError {
    fn from(err: mongodb::error::Error) -> Self {
        Self::Database(err.to_string())
    }
}

impl From<jsonwebtoken::errors::Error> for GatekeeperError {
    fn from(err: jsonwebtoken::errors::Error) -> Self {
        Self::Unauthorized(format!("JWT error: {}", err))
    }
}

/// Result type alias for Gatekeeper operations
pub type Result<T> = std::result::Result<T, GatekeeperError>;
