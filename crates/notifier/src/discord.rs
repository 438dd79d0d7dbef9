use crate::{NotifyBackend, NotifyError, Notification};
use async_trait::async_trait;
use serde::Serialize;
use std::time::Duration;

const USERNAME: &str = "valwatch";
const REQUEST_TIMEOUT_SECONDS: u64 = 10;

#[derive(Debug, Serialize, PartialEq)]
pub struct WebhookMessage {
    pub username: String,
    pub content: String,
}

impl WebhookMessage {
    pub fn from_notification(notification: &Notification) -> Self {
        Self {
            username: USERNAME.to_string(),
            content: notification.render(),
        }
    }
}

/// Posts notifications to a Discord webhook.
pub struct DiscordBackend {
    client: reqwest::Client,
    webhook: String,
}

impl DiscordBackend {
    pub fn new(webhook: impl Into<String>) -> Result<Self, NotifyError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECONDS))
            .build()?;

        Ok(Self {
            client,
            webhook: webhook.into(),
        })
    }
}

#[async_trait]
impl NotifyBackend for DiscordBackend {
    fn name(&self) -> &'static str {
        "discord"
    }

    async fn deliver(&self, notification: &Notification) -> Result<(), NotifyError> {
        let message = WebhookMessage::from_notification(notification);

        let response = self.client.post(&self.webhook).json(&message).send().await?;

        if !response.status().is_success() {
            return Err(NotifyError::Status {
                backend: self.name(),
                status: response.status().as_u16(),
            });
        }

        Ok(())
    }
}
