//! Webhook notifier for provider outages.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;

use super::{Notification, Notifier};

/// Posts notifications as JSON to a webhook URL
pub struct WebhookNotifier {
    url: String,
    timeout: Duration,
    client: reqwest::Client,
}

impl WebhookNotifier {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            url: url.into(),
            timeout,
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn notify(&self, notification: &Notification) -> Result<()> {
        let response = self
            .client
            .post(&self.url)
            .timeout(self.timeout)
            .json(notification)
            .send()
            .await
            .context("Failed to send webhook notification")?;

        if !response.status().is_success() {
            anyhow::bail!("Webhook returned {}", response.status());
        }

        Ok(())
    }
}
