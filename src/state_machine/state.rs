//! Conversation state types

use crate::db::{CircleMode, User};
use serde::{Deserialize, Serialize};

/// Where a user is in onboarding. Persisted as `users.step` plus
/// `users.circle_mode`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ConvState {
    /// No record yet (or a record still at step 0)
    New,
    AwaitingName,
    AwaitingCircle { mode: CircleMode },
    Registered,
}

impl ConvState {
    pub fn step(self) -> i64 {
        match self {
            ConvState::New => 0,
            ConvState::AwaitingName => 1,
            ConvState::AwaitingCircle { .. } => 2,
            ConvState::Registered => 3,
        }
    }

    pub fn circle_mode(self) -> CircleMode {
        match self {
            ConvState::AwaitingCircle { mode } => mode,
            _ => CircleMode::Unset,
        }
    }

    pub fn is_registered(self) -> bool {
        matches!(self, ConvState::Registered)
    }

    /// Rebuild the state from a stored step. Unknown steps are returned as
    /// `Err(step)`.
    pub fn from_record(step: i64, mode: CircleMode) -> Result<Self, i64> {
        match step {
            0 => Ok(ConvState::New),
            1 => Ok(ConvState::AwaitingName),
            2 => Ok(ConvState::AwaitingCircle { mode }),
            3 => Ok(ConvState::Registered),
            other => Err(other),
        }
    }
}

/// Per-message context passed into transitions
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConvContext {
    pub user_id: String,
    pub name: String,
    pub primary_circle_id: Option<i64>,
    /// Base URL of the organizer mini-app
    pub organizer_url: String,
}

impl ConvContext {
    pub fn new(user_id: impl Into<String>, organizer_url: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            name: String::new(),
            primary_circle_id: None,
            organizer_url: organizer_url.into(),
        }
    }

    pub fn from_user(user: &User, organizer_url: impl Into<String>) -> Self {
        Self {
            user_id: user.user_id.clone(),
            name: user.name.clone(),
            primary_circle_id: user.primary_circle_id,
            organizer_url: organizer_url.into(),
        }
    }
}
