//! Bounded buffer of recently received chat messages

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::RwLock;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReceivedMessage {
    pub timestamp: DateTime<Utc>,
    pub user_id: String,
    pub text: String,
}

/// Oldest entries are evicted once `capacity` is reached. Reads return a copy.
pub struct RecentMessages {
    capacity: usize,
    entries: RwLock<VecDeque<ReceivedMessage>>,
}

impl RecentMessages {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            entries: RwLock::new(VecDeque::with_capacity(capacity)),
        }
    }

    pub fn push(&self, user_id: impl Into<String>, text: impl Into<String>) {
        if self.capacity == 0 {
            return;
        }
        let message = ReceivedMessage {
            timestamp: Utc::now(),
            user_id: user_id.into(),
            text: text.into(),
        };
        // A poisoned lock only means a writer panicked mid-push; the deque is still valid
        let mut entries = self
            .entries
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        while entries.len() >= self.capacity {
            entries.pop_front();
        }
        entries.push_back(message);
    }

    /// Oldest first
    pub fn snapshot(&self) -> Vec<ReceivedMessage> {
        self.entries
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .iter()
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
