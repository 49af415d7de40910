//! Typed error hierarchy for the CivicReport service.
//!
//! `PortalError` covers every failure a portal operation can report. The
//! HTTP layer maps it onto `api::ApiError`; the store layer works in
//! `anyhow` and is wrapped as `PortalError::Database` at the seam.

use thiserror::Error;

use civic_common::ParseError;

#[derive(Debug, Error)]
pub enum PortalError {
    #[error("Issue {id} not found")]
    IssueNotFound { id: String },

    #[error("Notification {id} not found")]
    NotificationNotFound { id: String },

    #[error("Admin user {id} not found")]
    AdminNotFound { id: String },

    #[error("{id} is not an active admin and cannot be assigned issues")]
    InvalidAssignee { id: String },

    #[error("{0}")]
    Validation(String),

    #[error("Authentication required: {0}")]
    Unauthorized(String),

    #[error("{0}")]
    Forbidden(String),

    #[error("Database error: {0}")]
    Database(#[source] anyhow::Error),

    #[error("Database lock poisoned")]
    LockPoisoned,

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl From<ParseError> for PortalError {
    fn from(err: ParseError) -> Self {
        PortalError::Validation(err.to_string())
    }
}

impl PortalError {
    /// Wrap a store failure.
    pub fn db(err: anyhow::Error) -> Self {
        PortalError::Database(err)
    }
}

pub type PortalResult<T> = std::result::Result<T, PortalError>;
