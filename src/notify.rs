//! Outbound notification boundary
//!
//! Message content and delivery strategy are two closed sets combined by a
//! single `MessageSink::send`. The core never sees transport details.

mod line;

pub use line::LineMessagingClient;

use async_trait::async_trait;
use serde::Serialize;
use std::fmt::Write as _;
use std::sync::Arc;
use thiserror::Error;
use tokio::task::JoinHandle;

/// What a selectable choice does when tapped
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum ChoiceAction {
    /// Send this text back as if the user typed it
    SendText(String),
    /// Open an external link
    OpenUri(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Choice {
    pub label: String,
    pub action: ChoiceAction,
}

impl Choice {
    pub fn send_text(label: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            action: ChoiceAction::SendText(text.into()),
        }
    }

    /// A choice whose label is also the text it sends
    pub fn echo(label: impl Into<String>) -> Self {
        let label = label.into();
        Self {
            action: ChoiceAction::SendText(label.clone()),
            label,
        }
    }

    pub fn open_uri(label: impl Into<String>, uri: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            action: ChoiceAction::OpenUri(uri.into()),
        }
    }
}

/// Message content variants
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Content {
    Text { text: String },
    Choices { text: String, choices: Vec<Choice> },
}

impl Content {
    pub fn text(text: impl Into<String>) -> Self {
        Content::Text { text: text.into() }
    }

    pub fn choices(text: impl Into<String>, choices: Vec<Choice>) -> Self {
        Content::Choices {
            text: text.into(),
            choices,
        }
    }

    pub fn body(&self) -> &str {
        match self {
            Content::Text { text } | Content::Choices { text, .. } => text,
        }
    }

    /// Plain-text rendition that spells the choices out, used when the
    /// transport rejects interactive content
    pub fn to_plain(&self) -> Content {
        match self {
            Content::Text { .. } => self.clone(),
            Content::Choices { text, choices } => {
                let mut out = text.clone();
                if !choices.is_empty() {
                    out.push('\n');
                }
                for choice in choices {
                    match &choice.action {
                        ChoiceAction::SendText(t) => {
                            let _ = write!(out, "\n• {}: send \"{t}\"", choice.label);
                        }
                        ChoiceAction::OpenUri(uri) => {
                            let _ = write!(out, "\n• {}: {uri}", choice.label);
                        }
                    }
                }
                Content::Text { text: out }
            }
        }
    }
}

/// Delivery strategy variants
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivery {
    /// Answer an inbound message through its single-use reply handle
    Reply { token: String },
    /// Direct message to one user
    Push { to: String },
    Multicast { to: Vec<String> },
    /// Every user who follows the bot
    Broadcast,
}

impl Delivery {
    pub fn push(to: impl Into<String>) -> Self {
        Delivery::Push { to: to.into() }
    }

    pub fn reply(token: impl Into<String>) -> Self {
        Delivery::Reply {
            token: token.into(),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Delivery::Reply { .. } => "reply",
            Delivery::Push { .. } => "push",
            Delivery::Multicast { .. } => "multicast",
            Delivery::Broadcast => "broadcast",
        }
    }
}

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("HTTP client error: {0}")]
    Client(String),
    #[error("Messaging API returned {status}: {body}")]
    Status { status: u16, body: String },
    #[error("Invalid message: {0}")]
    Invalid(String),
}

/// Sink for outbound messages
#[async_trait]
pub trait MessageSink: Send + Sync {
    async fn send(&self, delivery: &Delivery, contents: &[Content]) -> Result<(), NotifyError>;
}

#[async_trait]
impl<T: MessageSink + ?Sized> MessageSink for Arc<T> {
    async fn send(&self, delivery: &Delivery, contents: &[Content]) -> Result<(), NotifyError> {
        (**self).send(delivery, contents).await
    }
}

/// Sink used when no channel credentials are configured
pub struct LogOnlySink;

#[async_trait]
impl MessageSink for LogOnlySink {
    async fn send(&self, delivery: &Delivery, contents: &[Content]) -> Result<(), NotifyError> {
        for content in contents {
            tracing::info!(
                delivery = delivery.kind(),
                target = ?delivery,
                text = content.body(),
                "Outbound message (not delivered)"
            );
        }
        Ok(())
    }
}

/// Shared handle to the message sink
#[derive(Clone)]
pub struct Notifier {
    sink: Arc<dyn MessageSink>,
}

impl Notifier {
    pub fn new(sink: Arc<dyn MessageSink>) -> Self {
        Self { sink }
    }

    /// Send and wait for the outcome
    pub async fn send(&self, delivery: &Delivery, contents: &[Content]) -> Result<(), NotifyError> {
        self.sink.send(delivery, contents).await
    }

    /// Fire-and-forget direct message. Failures are logged, never returned.
    pub fn spawn_push(&self, to: impl Into<String>, content: Content) -> JoinHandle<()> {
        let sink = self.sink.clone();
        let delivery = Delivery::Push { to: to.into() };
        tokio::spawn(async move {
            if let Err(e) = sink.send(&delivery, std::slice::from_ref(&content)).await {
                tracing::warn!(error = %e, target = ?delivery, "Async notification failed");
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_rendition_spells_out_choices() {
        let content = Content::choices(
            "Pick one",
            vec![
                Choice::send_text("Create", "circle:create"),
                Choice::open_uri("Open", "https://example.com/app"),
            ],
        );

        let Content::Text { text } = content.to_plain() else {
            panic!("expected text");
        };
        assert!(text.starts_with("Pick one\n"));
        assert!(text.contains("• Create: send \"circle:create\""));
        assert!(text.contains("• Open: https://example.com/app"));
    }

    #[test]
    fn test_plain_text_is_unchanged() {
        let content = Content::text("hello");
        assert_eq!(content.to_plain(), content);
        assert_eq!(content.body(), "hello");
    }

    #[tokio::test]
    async fn test_log_only_sink_accepts_everything() {
        let notifier = Notifier::new(Arc::new(LogOnlySink));
        notifier
            .send(&Delivery::Broadcast, &[Content::text("hi")])
            .await
            .unwrap();
        notifier
            .spawn_push("U1", Content::text("hi"))
            .await
            .unwrap();
    }
}
