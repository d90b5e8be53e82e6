//! Runtime for inbound chat messages
//!
//! Loads the user's conversation state, drives the pure state machine to
//! completion for one message, and delivers the single synchronous reply.

mod executor;
pub mod recent;

#[cfg(test)]
pub mod testing;

pub use executor::{ExecutorError, MessageExecutor};
pub use recent::{ReceivedMessage, RecentMessages};

use crate::circles::CircleService;
use crate::db::Database;
use crate::error::{ErrorKind, ServiceError};
use crate::ledger::Ledger;
use crate::notify::{Content, Delivery, Notifier};
use crate::state_machine::replies;
use crate::state_machine::{ConvContext, ConvState, Event};

/// Handles one inbound message at a time per call; calls for different users
/// may run concurrently and coordinate only through the database.
pub struct MessageRuntime {
    db: Database,
    circles: CircleService,
    ledger: Ledger,
    notifier: Notifier,
    organizer_url: String,
}

impl MessageRuntime {
    pub fn new(
        db: Database,
        circles: CircleService,
        ledger: Ledger,
        notifier: Notifier,
        organizer_url: impl Into<String>,
    ) -> Self {
        Self {
            db,
            circles,
            ledger,
            notifier,
            organizer_url: organizer_url.into(),
        }
    }

    /// Process one message and deliver the reply through `reply_token` when
    /// present. Returns the reply that was produced.
    pub async fn handle(&self, user_id: &str, raw_text: &str, reply_token: Option<&str>) -> Content {
        let reply = self.process(user_id, raw_text);
        if let Some(token) = reply_token {
            self.deliver(token, &reply).await;
        }
        reply
    }

    /// Compute the reply without delivering it
    pub fn process(&self, user_id: &str, raw_text: &str) -> Content {
        let text = sanitize_input(raw_text);
        if text.is_empty() {
            return replies::no_content();
        }

        let user = match self.db.get_user(user_id) {
            Ok(user) => user,
            Err(e) => {
                tracing::error!(user_id = %user_id, error = %e, "Failed to load user");
                return replies::retry_later();
            }
        };

        let (state, context) = match &user {
            Some(user) => match ConvState::from_record(user.step, user.circle_mode) {
                Ok(state) => (state, ConvContext::from_user(user, &self.organizer_url)),
                Err(step) => {
                    let e = ServiceError::InvalidStep(step);
                    tracing::error!(user_id = %user_id, error = %e, kind = ?e.kind(), "Stored registration step is invalid");
                    return reply_for_failure(e.kind());
                }
            },
            None => (
                ConvState::New,
                ConvContext::new(user_id, &self.organizer_url),
            ),
        };

        let executor = MessageExecutor::new(
            &self.db,
            &self.circles,
            &self.ledger,
            state,
            context,
        );
        match executor.run(Event::message(text)) {
            Ok(reply) => reply,
            Err(e) => {
                let kind = e.kind();
                if kind == ErrorKind::Transient {
                    tracing::error!(user_id = %user_id, error = %e, "Message processing failed");
                } else {
                    tracing::error!(user_id = %user_id, error = %e, ?kind, "Message rejected");
                }
                reply_for_failure(kind)
            }
        }
    }

    /// Reply delivery failures degrade to a plain-text rendition once, then
    /// are logged.
    async fn deliver(&self, token: &str, reply: &Content) {
        let delivery = Delivery::reply(token);
        let Err(e) = self
            .notifier
            .send(&delivery, std::slice::from_ref(reply))
            .await
        else {
            return;
        };
        if matches!(reply, Content::Text { .. }) {
            tracing::warn!(error = %e, "Reply delivery failed");
            return;
        }

        tracing::warn!(error = %e, "Reply delivery failed, retrying as plain text");
        let plain = reply.to_plain();
        if let Err(e) = self
            .notifier
            .send(&delivery, std::slice::from_ref(&plain))
            .await
        {
            tracing::warn!(error = %e, "Plain-text reply delivery failed");
        }
    }
}

/// Storage trouble asks the user to retry; anything else is a generic error
fn reply_for_failure(kind: ErrorKind) -> Content {
    match kind {
        ErrorKind::Transient => replies::retry_later(),
        _ => replies::generic_error(),
    }
}

/// HTML-escape then trim
pub fn sanitize_input(raw: &str) -> String {
    let mut escaped = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&#34;"),
            '\'' => escaped.push_str("&#39;"),
            c => escaped.push(c),
        }
    }
    escaped.trim().to_string()
}
