//! Remote mirror of audit events
//!
//! Provides:
//! - Webhook notifications as `{ "username": ..., "content": ... }` JSON posts
//! - A no-op notifier when no webhook is configured

use std::sync::Arc;

use async_trait::async_trait;
use cg_config::AuditConfig;
use serde_json::json;
use tracing::{debug, error, info, warn};

#[async_trait]
pub trait RemoteNotifier: Send + Sync {
    /// Deliver one message. Failures are logged, never returned.
    async fn notify(&self, content: &str);

    fn is_enabled(&self) -> bool;
}

/// Used when no webhook is configured
pub struct NoOpNotifier;

#[async_trait]
impl RemoteNotifier for NoOpNotifier {
    async fn notify(&self, _content: &str) {}

    fn is_enabled(&self) -> bool {
        false
    }
}

pub struct WebhookNotifier {
    client: reqwest::Client,
    webhook_url: String,
    username: String,
}

impl WebhookNotifier {
    pub fn new(webhook_url: String, username: String, timeout: std::time::Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|e| {
                warn!(error = %e, "Failed to build webhook client with timeout, using defaults");
                reqwest::Client::new()
            });

        info!(username = %username, "Webhook notifier initialized");

        Self {
            client,
            webhook_url,
            username,
        }
    }

    pub fn build_payload(&self, content: &str) -> serde_json::Value {
        json!({
            "username": self.username,
            "content": content,
        })
    }

    async fn send(&self, payload: serde_json::Value) -> Result<(), reqwest::Error> {
        let response = self
            .client
            .post(&self.webhook_url)
            .json(&payload)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            error!(status = %status, body = %body, "Webhook returned error");
        }

        Ok(())
    }
}

#[async_trait]
impl RemoteNotifier for WebhookNotifier {
    async fn notify(&self, content: &str) {
        let payload = self.build_payload(content);
        match self.send(payload).await {
            Ok(()) => debug!("Webhook notification sent"),
            Err(e) => error!(error = %e, "Failed to send webhook notification"),
        }
    }

    fn is_enabled(&self) -> bool {
        true
    }
}

pub fn create_notifier(config: &AuditConfig) -> Arc<dyn RemoteNotifier> {
    match config.webhook() {
        Some(url) => Arc::new(WebhookNotifier::new(
            url.to_string(),
            config.webhook_username.clone(),
            std::time::Duration::from_millis(config.webhook_timeout_ms),
        )),
        None => {
            info!("No audit webhook configured - using NoOpNotifier");
            Arc::new(NoOpNotifier)
        }
    }
}
