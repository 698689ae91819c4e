//! Shared error types for the hub.
//!
//! `ErrorKind` is the wire-level error taxonomy: every rejection a
//! participant or host can see is one of these kinds, never a stack
//! trace. `SessionError` and `RepositoryError`
//! are the typed errors the hub's internals produce; both carry an
//! `ErrorKind` so they can be turned into an `error` frame at the Connection
//! boundary without string matching.

pub use color_eyre::Report;

#[derive(Debug, thiserror::Error)]
pub enum LogError {
    #[error("failed to install color_eyre")]
    ColorEyre(#[from] color_eyre::Report),
    #[error("failed to install tracing-subscriber")]
    TracingSubscriber(#[from] Box<dyn std::error::Error + Send + Sync>),
}

/// The error taxonomy a participant or host can observe over the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    InvalidMessage,
    Stale,
    NoQuestion,
    Paused,
    Duplicate,
    LateJoin,
    TooLate,
    Unauthorized,
    NotFound,
    Conflict,
    Locked,
    TooManyRequests,
    PersistenceFailure,
    FatalSessionFailure,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::InvalidMessage => "invalid_message",
            ErrorKind::Stale => "stale",
            ErrorKind::NoQuestion => "no_question",
            ErrorKind::Paused => "paused",
            ErrorKind::Duplicate => "duplicate",
            ErrorKind::LateJoin => "late_join",
            ErrorKind::TooLate => "too_late",
            ErrorKind::Unauthorized => "unauthorized",
            ErrorKind::NotFound => "not_found",
            ErrorKind::Conflict => "conflict",
            ErrorKind::Locked => "locked",
            ErrorKind::TooManyRequests => "too_many_requests",
            ErrorKind::PersistenceFailure => "persistence_failure",
            ErrorKind::FatalSessionFailure => "fatal_session_failure",
        }
    }
}

/// An error raised while processing a command against an Event Session.
#[derive(Debug, thiserror::Error)]
#[error("{kind:?}: {message}")]
pub struct SessionError {
    pub kind: ErrorKind,
    pub message: String,
}

impl SessionError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

/// An error raised by the repository (the external persistence collaborator).
#[derive(Debug, thiserror::Error)]
pub enum RepositoryError {
    #[error("not found")]
    NotFound,
    #[error("persistence failure: {0}")]
    Backend(String),
}

impl From<RepositoryError> for SessionError {
    fn from(err: RepositoryError) -> Self {
        match err {
            RepositoryError::NotFound => SessionError::new(ErrorKind::NotFound, "not found"),
            RepositoryError::Backend(message) => {
                SessionError::new(ErrorKind::PersistenceFailure, message)
            }
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("unknown message type: {0}")]
    UnknownType(String),
    #[error("malformed message: {0}")]
    Malformed(#[from] serde_json::Error),
}

impl From<CodecError> for SessionError {
    fn from(err: CodecError) -> Self {
        SessionError::new(ErrorKind::InvalidMessage, err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_kind_serializes_snake_case() {
        let json = serde_json::to_string(&ErrorKind::TooManyRequests).unwrap();
        assert_eq!(json, "\"too_many_requests\"");
    }

    #[test]
    fn repository_not_found_maps_to_not_found_kind() {
        let session_err: SessionError = RepositoryError::NotFound.into();
        assert_eq!(session_err.kind, ErrorKind::NotFound);
    }
}
