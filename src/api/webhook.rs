//! Chat platform webhook
//!
//! Signature verification happens upstream; this handler trusts the sender.

use super::AppState;
use crate::runtime::sanitize_input;
use axum::{extract::State, http::StatusCode, Json};
use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct WebhookRequest {
    #[serde(default)]
    pub events: Vec<WebhookEvent>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookEvent {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub reply_token: Option<String>,
    #[serde(default)]
    pub source: Option<EventSource>,
    #[serde(default)]
    pub message: Option<WebhookMessage>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventSource {
    #[serde(default)]
    pub user_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct WebhookMessage {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub text: Option<String>,
}

impl WebhookEvent {
    /// `(user_id, text)` for text messages from a user
    fn text_message(&self) -> Option<(&str, &str)> {
        if self.kind != "message" {
            return None;
        }
        let message = self.message.as_ref().filter(|m| m.kind == "text")?;
        let user_id = self.source.as_ref()?.user_id.as_deref()?;
        Some((user_id, message.text.as_deref()?))
    }
}

/// Each text message is processed to completion before the next one
pub async fn handle_webhook(
    State(state): State<AppState>,
    Json(request): Json<WebhookRequest>,
) -> StatusCode {
    for event in &request.events {
        let Some((user_id, text)) = event.text_message() else {
            tracing::debug!(kind = %event.kind, "Ignoring non-text webhook event");
            continue;
        };
        tracing::info!(user_id = %user_id, "Chat message received");
        let recorded = sanitize_input(text);
        if !recorded.is_empty() {
            state.recent.push(user_id, recorded);
        }
        state
            .runtime
            .handle(user_id, text, event.reply_token.as_deref())
            .await;
    }
    StatusCode::OK
}
