//! Mock implementations for testing
//!
//! These mocks stand in for the messaging platform without real I/O.

use crate::notify::{Content, Delivery, MessageSink, NotifyError};
use async_trait::async_trait;
use std::sync::Mutex;
use std::time::Duration;

// ============================================================================
// Recording Sink
// ============================================================================

/// Sink that records every send and always succeeds
#[derive(Default)]
pub struct RecordingSink {
    sent: Mutex<Vec<(Delivery, Vec<Content>)>>,
}

#[allow(dead_code)]
impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// All recorded sends in arrival order
    pub fn sent(&self) -> Vec<(Delivery, Vec<Content>)> {
        self.sent.lock().unwrap().clone()
    }

    /// Recipients of direct pushes in arrival order
    pub fn pushed_to(&self) -> Vec<String> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .filter_map(|(delivery, _)| match delivery {
                Delivery::Push { to } => Some(to.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn clear(&self) {
        self.sent.lock().unwrap().clear();
    }

    /// Wait until at least `count` sends were recorded. Notifications are
    /// spawned tasks, so tests must yield before asserting on them.
    pub async fn wait_for(&self, count: usize) {
        let waited = tokio::time::timeout(Duration::from_secs(5), async {
            while self.sent.lock().unwrap().len() < count {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await;
        assert!(
            waited.is_ok(),
            "timed out waiting for {count} sends, got {:?}",
            self.sent()
        );
    }
}

#[async_trait]
impl MessageSink for RecordingSink {
    async fn send(&self, delivery: &Delivery, contents: &[Content]) -> Result<(), NotifyError> {
        self.sent
            .lock()
            .unwrap()
            .push((delivery.clone(), contents.to_vec()));
        Ok(())
    }
}

// ============================================================================
// Failing Sink
// ============================================================================

/// Sink that rejects sends, either all of them or only rich content
pub struct FailingSink {
    reject_plain_text: bool,
    delivered: Mutex<Vec<Content>>,
    attempts: Mutex<usize>,
}

impl FailingSink {
    /// Every send fails
    pub fn always() -> Self {
        Self {
            reject_plain_text: true,
            delivered: Mutex::new(Vec::new()),
            attempts: Mutex::new(0),
        }
    }

    /// Only sends containing choices fail
    pub fn choices_only() -> Self {
        Self {
            reject_plain_text: false,
            ..Self::always()
        }
    }

    /// Contents that were accepted
    pub fn delivered(&self) -> Vec<Content> {
        self.delivered.lock().unwrap().clone()
    }

    pub fn attempts(&self) -> usize {
        *self.attempts.lock().unwrap()
    }

    /// Wait until at least `count` sends were attempted
    pub async fn wait_for_attempts(&self, count: usize) {
        let waited = tokio::time::timeout(Duration::from_secs(5), async {
            while self.attempts() < count {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await;
        assert!(
            waited.is_ok(),
            "timed out waiting for {count} attempts, got {}",
            self.attempts()
        );
    }
}

#[async_trait]
impl MessageSink for FailingSink {
    async fn send(&self, _delivery: &Delivery, contents: &[Content]) -> Result<(), NotifyError> {
        *self.attempts.lock().unwrap() += 1;
        let has_choices = contents.iter().any(|c| matches!(c, Content::Choices { .. }));
        if self.reject_plain_text || has_choices {
            return Err(NotifyError::Status {
                status: 400,
                body: "rejected by test sink".to_string(),
            });
        }
        self.delivered.lock().unwrap().extend_from_slice(contents);
        Ok(())
    }
}
