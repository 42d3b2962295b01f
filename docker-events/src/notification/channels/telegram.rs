//! Telegram Bot API notification channel.
//!
//! Sends plain-text messages via `POST /bot<token>/sendMessage`, once per chat.
//! Handles 429 rate limits by respecting the `parameters.retry_after` field
//! returned in the JSON response body.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::debug;

use super::{NotificationChannel, install_rustls_provider, send_with_rate_limit, truncate_message};
use crate::Result;
use crate::notification::format::NotificationMessage;

/// Telegram `sendMessage` text limit (UTF-8 characters).
const TELEGRAM_MESSAGE_LIMIT: usize = 4096;

/// Telegram channel configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TelegramConfig {
    /// Whether the channel is enabled.
    pub enabled: bool,
    /// Telegram Bot API token.
    pub bot_token: String,
    /// Target chat ids (users, groups or channels).
    #[serde(default)]
    pub chat_ids: Vec<i64>,
}

/// Telegram notification channel.
pub struct TelegramChannel {
    config: TelegramConfig,
    client: Client,
}

impl TelegramChannel {
    /// Create a new Telegram channel.
    pub fn new(config: TelegramConfig) -> Self {
        install_rustls_provider();
        Self {
            config,
            client: Client::new(),
        }
    }

    /// Build the message text.
    fn build_message(message: &NotificationMessage) -> String {
        let text = if message.subject.is_empty() {
            message.body.clone()
        } else {
            format!("{}\n\n{}", message.subject, message.body)
        };
        truncate_message(text.trim(), TELEGRAM_MESSAGE_LIMIT)
    }

    fn endpoint(&self) -> String {
        format!(
            "https://api.telegram.org/bot{}/sendMessage",
            self.config.bot_token
        )
    }
}

#[async_trait]
impl NotificationChannel for TelegramChannel {
    fn channel_type(&self) -> &'static str {
        "telegram"
    }

    fn is_enabled(&self) -> bool {
        self.config.enabled && !self.config.bot_token.is_empty() && !self.config.chat_ids.is_empty()
    }

    async fn send(&self, message: &NotificationMessage) -> Result<()> {
        if !self.is_enabled() {
            return Ok(());
        }

        let url = self.endpoint();
        let text = Self::build_message(message);

        for chat_id in &self.config.chat_ids {
            let payload = json!({
                "chat_id": chat_id,
                "text": text,
            });
            send_with_rate_limit("telegram", || self.client.post(&url).json(&payload)).await?;
        }

        debug!(
            receivers = self.config.chat_ids.len(),
            "Telegram notification sent"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_telegram_config_default() {
        let config = TelegramConfig::default();
        assert!(!config.enabled);
        assert!(config.bot_token.is_empty());
        assert!(config.chat_ids.is_empty());
    }

    #[test]
    fn test_telegram_channel_enabled() {
        let config = TelegramConfig {
            enabled: true,
            bot_token: "123:ABC".to_string(),
            chat_ids: vec![456, -100123],
        };
        let channel = TelegramChannel::new(config);
        assert!(channel.is_enabled());
        assert_eq!(
            channel.endpoint(),
            "https://api.telegram.org/bot123:ABC/sendMessage"
        );
    }

    #[test]
    fn test_build_message() {
        let message = NotificationMessage::new("Docker Event: container die", "Time: now");
        assert_eq!(
            TelegramChannel::build_message(&message),
            "Docker Event: container die\n\nTime: now"
        );

        let long = NotificationMessage::new("subject", "x".repeat(5000));
        let text = TelegramChannel::build_message(&long);
        assert!(text.chars().count() <= TELEGRAM_MESSAGE_LIMIT);
        assert!(text.starts_with("subject\n\n"));
        assert!(text.ends_with("[truncated]"));
    }
}
