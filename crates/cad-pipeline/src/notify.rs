//! Run notifications over a chat webhook.
//!
//! Silent when no webhook is configured.  Notification failures are logged
//! and swallowed: the pipeline's health never depends on the chat service.

use serde_json::json;
use tracing::warn;

pub struct Notifier {
    client: reqwest::Client,
    webhook_url: Option<String>,
}

impl Notifier {
    pub fn new(webhook_url: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            webhook_url,
        }
    }

    pub fn enabled(&self) -> bool {
        self.webhook_url.is_some()
    }

    /// Post a plain-text notification.
    pub async fn send(&self, text: &str) {
        let Some(url) = &self.webhook_url else { return };

        let res = self
            .client
            .post(url)
            .json(&json!({ "text": text }))
            .send()
            .await;

        match res {
            Ok(resp) if resp.status().is_success() => {}
            Ok(resp) => warn!(status = %resp.status(), "webhook notification rejected"),
            Err(e) => warn!(error = %e, "webhook notification failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disabled_without_url() {
        assert!(!Notifier::new(None).enabled());
        assert!(Notifier::new(Some("https://chat.example/hook".into())).enabled());
    }

    #[tokio::test]
    async fn send_without_url_is_a_no_op() {
        // Must not panic or attempt network I/O.
        Notifier::new(None).send("hello").await;
    }
}
