//! Outbound operator notifications.
//!
//! The watcher talks to a [`Notifier`]; [`NotifyClient`] fans each notification
//! out to the configured backends and swallows delivery failures after logging
//! them, so a broken webhook never stops monitoring.

mod discord;
mod error;

pub use discord::{DiscordBackend, WebhookMessage};
pub use error::NotifyError;

use async_trait::async_trait;
use std::fmt;
use tracing::{error, info};

#[derive(Debug, Clone, PartialEq)]
pub enum Notification {
    Alert(String),
    Recover(String),
    Delegation { amount: f64, token: String },
    Undelegation { amount: f64, token: String },
}

impl Notification {
    pub fn kind(&self) -> &'static str {
        match self {
            Notification::Alert(_) => "alert",
            Notification::Recover(_) => "recover",
            Notification::Delegation { .. } => "delegation",
            Notification::Undelegation { .. } => "undelegation",
        }
    }

    pub fn render(&self) -> String {
        match self {
            Notification::Alert(msg) => format!(":rotating_light: {}", msg),
            Notification::Recover(msg) => format!(":ok_hand: {}", msg),
            Notification::Delegation { amount, token } => {
                format!(":money_mouth: new delegation of {} {}", amount, token)
            }
            Notification::Undelegation { amount, token } => {
                format!(":money_with_wings: lost delegation of {} {}", amount, token)
            }
        }
    }
}

impl fmt::Display for Notification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render())
    }
}

/// Fire-and-forget sink for operator notifications.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, notification: Notification);

    async fn alert(&self, msg: String) {
        self.notify(Notification::Alert(msg)).await
    }

    async fn recover(&self, msg: String) {
        self.notify(Notification::Recover(msg)).await
    }

    async fn delegation(&self, amount: f64, token: String) {
        self.notify(Notification::Delegation { amount, token }).await
    }

    async fn undelegation(&self, amount: f64, token: String) {
        self.notify(Notification::Undelegation { amount, token }).await
    }
}

/// A single delivery channel.
#[async_trait]
pub trait NotifyBackend: Send + Sync {
    fn name(&self) -> &'static str;

    async fn deliver(&self, notification: &Notification) -> Result<(), NotifyError>;
}

/// Writes notifications to the log. Used when no outbound channel is configured.
pub struct LogBackend;

#[async_trait]
impl NotifyBackend for LogBackend {
    fn name(&self) -> &'static str {
        "log"
    }

    async fn deliver(&self, notification: &Notification) -> Result<(), NotifyError> {
        info!(kind = notification.kind(), "{}", notification.render());
        Ok(())
    }
}

#[derive(Debug, Clone, Default)]
pub struct NotifyConfig {
    pub discord_webhook: Option<String>,
}

pub struct NotifyClient {
    backends: Vec<Box<dyn NotifyBackend>>,
}

impl NotifyClient {
    pub fn new(config: NotifyConfig) -> Result<Self, NotifyError> {
        let mut backends: Vec<Box<dyn NotifyBackend>> = Vec::new();

        match config.discord_webhook.filter(|w| !w.is_empty()) {
            Some(webhook) => backends.push(Box::new(DiscordBackend::new(webhook)?)),
            None => backends.push(Box::new(LogBackend)),
        }

        Ok(Self { backends })
    }

    pub fn with_backends(backends: Vec<Box<dyn NotifyBackend>>) -> Self {
        Self { backends }
    }

    pub fn backend_names(&self) -> Vec<&'static str> {
        self.backends.iter().map(|b| b.name()).collect()
    }
}

#[async_trait]
impl Notifier for NotifyClient {
    async fn notify(&self, notification: Notification) {
        for backend in &self.backends {
            if let Err(e) = backend.deliver(&notification).await {
                error!(
                    backend = backend.name(),
                    kind = notification.kind(),
                    error = %e,
                    "Failed to deliver notification"
                );
            }
        }
    }
}
