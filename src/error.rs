//! Service-level error taxonomy
//!
//! Business outcomes (`Conflict`, `NotFound`, `Forbidden`, `Invalid`) are
//! expected and end up as guidance for the user. `Transient` covers storage
//! and delivery failures. `InvalidState` is an invariant breach.

use crate::db::DbError;
use serde::Serialize;
use thiserror::Error;

/// Coarse classification used at the chat and HTTP boundaries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Conflict,
    NotFound,
    Forbidden,
    Invalid,
    InvalidState,
    Transient,
}

#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("Circle name already taken: {0}")]
    CircleNameTaken(String),
    #[error("Already a member of this circle")]
    AlreadyMember,
    #[error("Not a member of this circle")]
    NotAMember,
    #[error("Circle not found: {0}")]
    CircleNotFound(String),
    #[error("User not found: {0}")]
    UserNotFound(String),
    #[error("Event not found: {0}")]
    EventNotFound(i64),
    #[error("Participant not found: {0}")]
    ParticipantNotFound(i64),
    #[error("Only the event organizer can approve payments")]
    NotOrganizer,
    #[error("Use leave to remove yourself from a circle")]
    SelfRemoval,
    #[error("Invalid registration step: {0}")]
    InvalidStep(i64),
    #[error("{0}")]
    Invalid(String),
    #[error("Storage failure: {0}")]
    Storage(DbError),
}

impl ServiceError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ServiceError::CircleNameTaken(_) | ServiceError::AlreadyMember => ErrorKind::Conflict,
            ServiceError::CircleNotFound(_)
            | ServiceError::UserNotFound(_)
            | ServiceError::EventNotFound(_)
            | ServiceError::ParticipantNotFound(_) => ErrorKind::NotFound,
            ServiceError::NotAMember | ServiceError::NotOrganizer => ErrorKind::Forbidden,
            ServiceError::SelfRemoval | ServiceError::Invalid(_) => ErrorKind::Invalid,
            ServiceError::InvalidStep(_) => ErrorKind::InvalidState,
            ServiceError::Storage(_) => ErrorKind::Transient,
        }
    }

    pub fn invalid(message: impl Into<String>) -> Self {
        ServiceError::Invalid(message.into())
    }
}

impl From<DbError> for ServiceError {
    fn from(e: DbError) -> Self {
        match e {
            DbError::CircleNameTaken(name) => ServiceError::CircleNameTaken(name),
            DbError::DuplicateMembership { .. } => ServiceError::AlreadyMember,
            other => ServiceError::Storage(other),
        }
    }
}

pub type ServiceResult<T> = Result<T, ServiceError>;
