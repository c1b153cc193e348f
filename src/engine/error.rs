use ulid::Ulid;

use crate::credentials::CredentialError;
use crate::timefmt::TimeError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    /// Malformed or policy-violating input.
    InvalidRequest(&'static str),
    /// Overlap with an active booking on the same resource.
    Conflict(Ulid),
    NotFound(Ulid),
    Forbidden,
    Unauthorized,
    AlreadyExists(String),
    LimitExceeded(&'static str),
    /// Persistence or collaborator failure.
    StorageError(String),
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::InvalidRequest(msg) => write!(f, "invalid request: {msg}"),
            EngineError::Conflict(id) => write!(f, "time slot already taken by booking {id}"),
            EngineError::NotFound(id) => write!(f, "not found: {id}"),
            EngineError::Forbidden => write!(f, "forbidden"),
            EngineError::Unauthorized => write!(f, "invalid credentials"),
            EngineError::AlreadyExists(what) => write!(f, "already exists: {what}"),
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            EngineError::StorageError(e) => write!(f, "storage error: {e}"),
        }
    }
}

impl std::error::Error for EngineError {}

impl From<TimeError> for EngineError {
    fn from(e: TimeError) -> Self {
        match e {
            TimeError::Instant(_) => EngineError::InvalidRequest("unparseable timestamp"),
            TimeError::Day(_) => EngineError::InvalidRequest("unparseable date"),
            TimeError::Offset(_) => EngineError::InvalidRequest("unparseable UTC offset"),
        }
    }
}

impl From<CredentialError> for EngineError {
    fn from(e: CredentialError) -> Self {
        match e {
            CredentialError::InvalidToken(_) => EngineError::Unauthorized,
            other => EngineError::StorageError(other.to_string()),
        }
    }
}
