use serde::Serialize;
use thiserror::Error;

/// Error taxonomy for the coordination layer.
///
/// Lifecycle and validation errors are returned synchronously to the command
/// that triggered them. Device and upstream errors additionally move the
/// owning session to `Error` and are broadcast on the event bus so every
/// connected client sees them, not just the requester.
#[derive(Debug, Error)]
pub enum TraqError {
    #[error("invalid request: {0}")]
    Validation(String),

    #[error("session already active")]
    AlreadyActive,

    #[error("no active session")]
    NotActive,

    #[error("resource unavailable: {0}")]
    ResourceUnavailable(String),

    #[error("upstream service error: {0}")]
    Upstream(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

impl TraqError {
    /// Stable machine-readable code for API error bodies.
    pub fn code(&self) -> &'static str {
        match self {
            TraqError::Validation(_) => "VALIDATION_ERROR",
            TraqError::AlreadyActive => "ALREADY_ACTIVE",
            TraqError::NotActive => "NOT_ACTIVE",
            TraqError::ResourceUnavailable(_) => "RESOURCE_UNAVAILABLE",
            TraqError::Upstream(_) => "UPSTREAM_ERROR",
            TraqError::Io(_) => "IO_ERROR",
            TraqError::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

impl Serialize for TraqError {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

pub type Result<T> = std::result::Result<T, TraqError>;
