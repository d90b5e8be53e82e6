//! LINE Messaging API adapter

use super::{ChoiceAction, Content, Delivery, MessageSink, NotifyError};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use std::time::Duration;

/// Quick-reply labels longer than this are rejected by the platform
const MAX_LABEL_CHARS: usize = 20;
const MAX_QUICK_REPLY_ITEMS: usize = 13;
const MAX_MULTICAST_RECIPIENTS: usize = 500;

pub struct LineMessagingClient {
    client: Client,
    base_url: String,
    access_token: String,
}

impl LineMessagingClient {
    pub fn new(base_url: &str, access_token: String) -> Result<Self, NotifyError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| NotifyError::Client(e.to_string()))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            access_token,
        })
    }

    async fn post(&self, path: &str, body: &Value) -> Result<(), NotifyError> {
        let response = self
            .client
            .post(format!("{}{path}", self.base_url))
            .bearer_auth(&self.access_token)
            .json(body)
            .send()
            .await
            .map_err(|e| NotifyError::Client(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        let body = response.text().await.unwrap_or_default();
        Err(NotifyError::Status {
            status: status.as_u16(),
            body,
        })
    }
}

#[async_trait]
impl MessageSink for LineMessagingClient {
    async fn send(&self, delivery: &Delivery, contents: &[Content]) -> Result<(), NotifyError> {
        if contents.is_empty() {
            return Err(NotifyError::Invalid("no messages to send".to_string()));
        }
        let messages: Vec<Value> = contents.iter().map(message_json).collect();

        match delivery {
            Delivery::Multicast { to } => {
                for chunk in to.chunks(MAX_MULTICAST_RECIPIENTS) {
                    let body = json!({ "to": chunk, "messages": messages });
                    self.post("/v2/bot/message/multicast", &body).await?;
                }
                Ok(())
            }
            other => {
                let (path, body) = request_for(other, messages);
                self.post(path, &body).await
            }
        }
    }
}

/// Endpoint and body for a single-request delivery
fn request_for(delivery: &Delivery, messages: Vec<Value>) -> (&'static str, Value) {
    match delivery {
        Delivery::Reply { token } => (
            "/v2/bot/message/reply",
            json!({ "replyToken": token, "messages": messages }),
        ),
        Delivery::Push { to } => (
            "/v2/bot/message/push",
            json!({ "to": to, "messages": messages }),
        ),
        Delivery::Multicast { to } => (
            "/v2/bot/message/multicast",
            json!({ "to": to, "messages": messages }),
        ),
        Delivery::Broadcast => ("/v2/bot/message/broadcast", json!({ "messages": messages })),
    }
}

fn message_json(content: &Content) -> Value {
    match content {
        Content::Text { text } => json!({ "type": "text", "text": text }),
        Content::Choices { text, choices } => {
            let items: Vec<Value> = choices
                .iter()
                .take(MAX_QUICK_REPLY_ITEMS)
                .map(|choice| {
                    let label = truncate_label(&choice.label);
                    let action = match &choice.action {
                        ChoiceAction::SendText(t) => {
                            json!({ "type": "message", "label": label, "text": t })
                        }
                        ChoiceAction::OpenUri(uri) => {
                            json!({ "type": "uri", "label": label, "uri": uri })
                        }
                    };
                    json!({ "type": "action", "action": action })
                })
                .collect();
            json!({
                "type": "text",
                "text": text,
                "quickReply": { "items": items },
            })
        }
    }
}

fn truncate_label(label: &str) -> String {
    label.chars().take(MAX_LABEL_CHARS).collect()
}
