//! Fire-and-forget notifications.
//!
//! A [`Notifier`] fans a [`Notification`] out to every configured
//! [`NotifyChannel`]. Channel failures are logged and swallowed.

use async_trait::async_trait;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::model::Urgency;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notification {
    pub work_item_id: u64,
    pub title: String,
    pub body: String,
    pub urgency: Urgency,
}

#[async_trait]
pub trait NotifyChannel: Send + Sync {
    fn name(&self) -> &'static str;

    async fn send(&self, notification: &Notification) -> anyhow::Result<()>;
}

/// Generic JSON webhook (Slack-compatible `text` field plus structured fields).
pub struct WebhookChannel {
    url: String,
    client: reqwest::Client,
}

#[derive(Serialize)]
struct WebhookPayload<'a> {
    text: String,
    #[serde(flatten)]
    notification: &'a Notification,
}

impl WebhookChannel {
    pub fn new(url: &str) -> Self {
        Self {
            url: url.to_string(),
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl NotifyChannel for WebhookChannel {
    fn name(&self) -> &'static str {
        "webhook"
    }

    async fn send(&self, notification: &Notification) -> anyhow::Result<()> {
        let prefix = match notification.urgency {
            Urgency::High => "[urgent] ",
            Urgency::Normal => "",
        };
        let payload = WebhookPayload {
            text: format!(
                "{}#{}: {}\n{}",
                prefix, notification.work_item_id, notification.title, notification.body
            ),
            notification,
        };
        let response = self.client.post(&self.url).json(&payload).send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("webhook returned {}: {}", status, body);
        }
        debug!(channel = "webhook", "Notification sent");
        Ok(())
    }
}

/// Writes notifications to the log; always enabled.
pub struct LogChannel;

#[async_trait]
impl NotifyChannel for LogChannel {
    fn name(&self) -> &'static str {
        "log"
    }

    async fn send(&self, notification: &Notification) -> anyhow::Result<()> {
        info!(
            work_item = notification.work_item_id,
            urgency = ?notification.urgency,
            "{}",
            notification.title
        );
        Ok(())
    }
}

pub struct Notifier {
    channels: Vec<Arc<dyn NotifyChannel>>,
}

impl Notifier {
    pub fn with_channels(channels: Vec<Arc<dyn NotifyChannel>>) -> Self {
        Self { channels }
    }

    /// Log channel plus a webhook when one is configured.
    pub fn from_webhook(url: Option<&str>) -> Self {
        let mut channels: Vec<Arc<dyn NotifyChannel>> = vec![Arc::new(LogChannel)];
        if let Some(url) = url.filter(|u| !u.is_empty()) {
            channels.push(Arc::new(WebhookChannel::new(url)));
        }
        Self { channels }
    }

    pub async fn notify(&self, notification: &Notification) {
        for channel in &self.channels {
            if let Err(e) = channel.send(notification).await {
                warn!(channel = channel.name(), error = %e, "Notification failed");
            }
        }
    }
}
