//! Slack notification channel.
//!
//! Posts to `chat.postMessage` with a bot token. Slack answers HTTP 200 with
//! `"ok": false` on most API errors, so the body is inspected as well.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::debug;

use super::{NotificationChannel, install_rustls_provider, send_with_rate_limit};
use crate::notification::format::NotificationMessage;
use crate::{Error, Result};

const SLACK_POST_MESSAGE_URL: &str = "https://slack.com/api/chat.postMessage";

/// Slack channel configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlackConfig {
    /// Whether the channel is enabled.
    pub enabled: bool,
    /// Bot token (`xoxb-...`).
    pub bot_token: String,
    /// Target channel ids.
    #[serde(default)]
    pub channel_ids: Vec<String>,
}

/// Slack notification channel.
pub struct SlackChannel {
    config: SlackConfig,
    client: Client,
}

impl SlackChannel {
    /// Create a new Slack channel.
    pub fn new(config: SlackConfig) -> Self {
        install_rustls_provider();
        Self {
            config,
            client: Client::new(),
        }
    }

    fn build_payload(channel_id: &str, message: &NotificationMessage) -> serde_json::Value {
        let text = if message.subject.is_empty() {
            message.body.clone()
        } else {
            format!("*{}*\n{}", message.subject, message.body)
        };

        json!({
            "channel": channel_id,
            "text": text,
        })
    }

    async fn post(&self, channel_id: &str, message: &NotificationMessage) -> Result<()> {
        let payload = Self::build_payload(channel_id, message);
        let response = send_with_rate_limit("slack", || {
            self.client
                .post(SLACK_POST_MESSAGE_URL)
                .bearer_auth(&self.config.bot_token)
                .json(&payload)
        })
        .await?;

        let body: serde_json::Value = response.json().await?;
        check_api_response(&body)
    }
}

/// Map a `chat.postMessage` response body to a result.
fn check_api_response(body: &serde_json::Value) -> Result<()> {
    if body.get("ok").and_then(|v| v.as_bool()) == Some(true) {
        return Ok(());
    }
    let reason = body
        .get("error")
        .and_then(|v| v.as_str())
        .unwrap_or("unknown error");
    Err(Error::delivery("slack", format!("chat.postMessage: {}", reason)))
}

#[async_trait]
impl NotificationChannel for SlackChannel {
    fn channel_type(&self) -> &'static str {
        "slack"
    }

    fn is_enabled(&self) -> bool {
        self.config.enabled
            && !self.config.bot_token.is_empty()
            && !self.config.channel_ids.is_empty()
    }

    async fn send(&self, message: &NotificationMessage) -> Result<()> {
        if !self.is_enabled() {
            return Ok(());
        }

        for channel_id in &self.config.channel_ids {
            self.post(channel_id, message).await?;
        }

        debug!(
            receivers = self.config.channel_ids.len(),
            "Slack notification sent"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slack_channel_enabled() {
        assert!(!SlackChannel::new(SlackConfig::default()).is_enabled());

        let channel = SlackChannel::new(SlackConfig {
            enabled: true,
            bot_token: "xoxb-1".to_string(),
            channel_ids: vec!["C1".to_string()],
        });
        assert!(channel.is_enabled());

        let no_receivers = SlackChannel::new(SlackConfig {
            enabled: true,
            bot_token: "xoxb-1".to_string(),
            channel_ids: Vec::new(),
        });
        assert!(!no_receivers.is_enabled());
    }

    #[test]
    fn test_build_payload() {
        let message = NotificationMessage::new("Docker Event: container start", "Time: now");
        let payload = SlackChannel::build_payload("C1", &message);

        assert_eq!(payload["channel"], "C1");
        assert_eq!(payload["text"], "*Docker Event: container start*\nTime: now");

        let body_only = SlackChannel::build_payload("C1", &NotificationMessage::new("", "text"));
        assert_eq!(body_only["text"], "text");
    }

    #[test]
    fn test_check_api_response() {
        assert!(check_api_response(&json!({"ok": true})).is_ok());

        let err = check_api_response(&json!({"ok": false, "error": "channel_not_found"}))
            .unwrap_err();
        assert!(err.to_string().contains("channel_not_found"));
        assert!(check_api_response(&json!({})).is_err());
    }

    #[tokio::test]
    async fn test_send_disabled_is_noop() {
        let channel = SlackChannel::new(SlackConfig::default());
        let message = NotificationMessage::new("s", "b");
        assert!(channel.send(&message).await.is_ok());
    }
}
