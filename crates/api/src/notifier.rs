//! Best-effort out-of-band audit channel.
//!
//! Notification failures are logged and swallowed. Callers that must not
//! block (the event path) spawn the send.

use async_trait::async_trait;
use tracing::{debug, warn};

/// Audit sink. Implementations must never let a delivery failure escape.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, subject: &str, body: serde_json::Value);
}

/// Webhook notifier posting JSON payloads.
#[derive(Debug, Clone)]
pub struct WebhookNotifier {
    client: reqwest::Client,
    url: String,
}

impl WebhookNotifier {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: url.into(),
        }
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn notify(&self, subject: &str, body: serde_json::Value) {
        let payload = serde_json::json!({
            "subject": subject,
            "body": body,
        });

        match self.client.post(&self.url).json(&payload).send().await {
            Ok(response) if response.status().is_success() => {
                debug!(subject, "notification delivered");
            }
            Ok(response) => {
                warn!(subject, status = %response.status(), "notification rejected");
            }
            Err(e) => {
                warn!(subject, error = %e, "notification failed");
            }
        }
    }
}

/// No-op notifier used when no webhook is configured.
#[derive(Debug, Clone, Default)]
pub struct NullNotifier;

#[async_trait]
impl Notifier for NullNotifier {
    async fn notify(&self, _subject: &str, _body: serde_json::Value) {}
}
