//! Outbound notifications for the offline-device sweep

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use crate::config::NotifyConfig;

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, title: &str, message: &str) -> Result<()>;
}

pub type SharedNotifier = Arc<dyn Notifier>;

/// Writes notifications to the log only
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, title: &str, message: &str) -> Result<()> {
        info!("{}: {}", title, message);
        Ok(())
    }
}

/// Form-encoded POST to a push webhook (Pushover-compatible field names)
pub struct WebhookNotifier {
    url: String,
    token: String,
    user: String,
    sound: String,
    client: reqwest::Client,
}

impl WebhookNotifier {
    pub fn new(config: &NotifyConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .context("building webhook HTTP client")?;

        Ok(Self {
            url: config.webhook_url.clone(),
            token: config.token.clone(),
            user: config.user.clone(),
            sound: config.sound.clone(),
            client,
        })
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn notify(&self, title: &str, message: &str) -> Result<()> {
        let mut form = vec![
            ("token", self.token.as_str()),
            ("user", self.user.as_str()),
            ("title", title),
            ("message", message),
        ];
        if !self.sound.is_empty() {
            form.push(("sound", self.sound.as_str()));
        }

        let response = self
            .client
            .post(&self.url)
            .form(&form)
            .send()
            .await
            .with_context(|| format!("POST {}", self.url))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("webhook returned {}: {}", status, body);
        }
        Ok(())
    }
}

/// Webhook notifier when a URL is configured, log-only otherwise
pub fn from_config(config: &NotifyConfig) -> Result<SharedNotifier> {
    if config.webhook_url.is_empty() {
        info!("No notify.webhook_url set, offline alerts go to the log only");
        return Ok(Arc::new(LogNotifier));
    }
    Ok(Arc::new(WebhookNotifier::new(config)?))
}
