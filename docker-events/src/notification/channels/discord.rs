//! Discord notification channel.
//!
//! Delivers an embed to every configured webhook and, when a bot token is set,
//! to every channel via `POST /channels/{id}/messages`.
//!
//! Implements Discord's recommended rate limit handling:
//! - No hardcoded rate limits
//! - Retries on 429 responses respecting `Retry-After` / `X-RateLimit-Reset-After`

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::debug;

use super::{NotificationChannel, install_rustls_provider, send_with_rate_limit, truncate_message};
use crate::Result;
use crate::notification::format::NotificationMessage;

const DISCORD_API_BASE: &str = "https://discord.com/api/v10";

/// Embed title limit (characters).
const EMBED_TITLE_LIMIT: usize = 256;
/// Embed description limit (characters).
const EMBED_DESCRIPTION_LIMIT: usize = 4096;

const EMBED_COLOR: u32 = 0x2496ed;

/// Discord channel configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscordConfig {
    /// Whether the channel is enabled.
    pub enabled: bool,
    /// Bot token, required for `channel_ids`.
    #[serde(default)]
    pub bot_token: Option<String>,
    /// Channel ids the bot posts to.
    #[serde(default)]
    pub channel_ids: Vec<String>,
    /// Incoming webhook URLs.
    #[serde(default)]
    pub webhook_urls: Vec<String>,
    /// Optional username for webhook posts.
    pub username: Option<String>,
}

impl Default for DiscordConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            bot_token: None,
            channel_ids: Vec::new(),
            webhook_urls: Vec::new(),
            username: Some("docker-events".to_string()),
        }
    }
}

impl DiscordConfig {
    fn bot_token(&self) -> Option<&str> {
        self.bot_token.as_deref().filter(|t| !t.is_empty())
    }
}

/// Discord notification channel.
pub struct DiscordChannel {
    config: DiscordConfig,
    client: Client,
}

impl DiscordChannel {
    /// Create a new Discord channel.
    pub fn new(config: DiscordConfig) -> Self {
        install_rustls_provider();
        Self {
            config,
            client: Client::new(),
        }
    }

    /// Build the embed payload for a message.
    fn build_payload(&self, message: &NotificationMessage, webhook: bool) -> serde_json::Value {
        let embed = json!({
            "title": truncate_message(&message.subject, EMBED_TITLE_LIMIT),
            "description": truncate_message(&message.body, EMBED_DESCRIPTION_LIMIT),
            "color": EMBED_COLOR,
        });

        let mut payload = json!({
            "embeds": [embed]
        });

        if webhook && let Some(username) = &self.config.username {
            payload["username"] = json!(username);
        }

        payload
    }

    fn channel_message_url(channel_id: &str) -> String {
        format!("{}/channels/{}/messages", DISCORD_API_BASE, channel_id)
    }

    fn receiver_count(&self) -> usize {
        let bot_channels = if self.config.bot_token().is_some() {
            self.config.channel_ids.len()
        } else {
            0
        };
        self.config.webhook_urls.len() + bot_channels
    }
}

#[async_trait]
impl NotificationChannel for DiscordChannel {
    fn channel_type(&self) -> &'static str {
        "discord"
    }

    fn is_enabled(&self) -> bool {
        self.config.enabled && self.receiver_count() > 0
    }

    async fn send(&self, message: &NotificationMessage) -> Result<()> {
        if !self.is_enabled() {
            return Ok(());
        }

        let webhook_payload = self.build_payload(message, true);
        for url in &self.config.webhook_urls {
            send_with_rate_limit("discord", || self.client.post(url).json(&webhook_payload))
                .await?;
        }

        if let Some(token) = self.config.bot_token() {
            let bot_payload = self.build_payload(message, false);
            let authorization = format!("Bot {}", token);
            for channel_id in &self.config.channel_ids {
                let url = Self::channel_message_url(channel_id);
                send_with_rate_limit("discord", || {
                    self.client
                        .post(&url)
                        .header(reqwest::header::AUTHORIZATION, &authorization)
                        .json(&bot_payload)
                })
                .await?;
            }
        }

        debug!(receivers = self.receiver_count(), "Discord notification sent");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_discord_config_default() {
        let config = DiscordConfig::default();
        assert!(!config.enabled);
        assert!(config.webhook_urls.is_empty());
        assert!(config.bot_token.is_none());
    }

    #[test]
    fn test_discord_channel_enabled() {
        assert!(!DiscordChannel::new(DiscordConfig::default()).is_enabled());

        let webhook_only = DiscordChannel::new(DiscordConfig {
            enabled: true,
            webhook_urls: vec!["https://example.com/hook".to_string()],
            ..Default::default()
        });
        assert!(webhook_only.is_enabled());

        let channels_without_token = DiscordChannel::new(DiscordConfig {
            enabled: true,
            channel_ids: vec!["1".to_string()],
            ..Default::default()
        });
        assert!(!channels_without_token.is_enabled());

        let bot = DiscordChannel::new(DiscordConfig {
            enabled: true,
            bot_token: Some("token".to_string()),
            channel_ids: vec!["1".to_string(), "2".to_string()],
            webhook_urls: vec!["https://example.com/hook".to_string()],
            ..Default::default()
        });
        assert_eq!(bot.receiver_count(), 3);
    }

    #[test]
    fn test_build_payload() {
        let channel = DiscordChannel::new(DiscordConfig::default());
        let message = NotificationMessage::new("Docker Event: container start", "Time: now");

        let payload = channel.build_payload(&message, true);
        assert!(payload["embeds"].is_array());
        let embed = &payload["embeds"][0];
        assert_eq!(embed["title"], "Docker Event: container start");
        assert_eq!(embed["description"], "Time: now");
        assert_eq!(embed["color"], EMBED_COLOR as i64);
        assert_eq!(payload["username"], "docker-events");

        let bot_payload = channel.build_payload(&message, false);
        assert!(bot_payload.get("username").is_none());
    }

    #[test]
    fn test_build_payload_truncates_title() {
        let channel = DiscordChannel::new(DiscordConfig::default());
        let message = NotificationMessage::new("t".repeat(300), "body");
        let payload = channel.build_payload(&message, false);
        let title = payload["embeds"][0]["title"].as_str().unwrap();
        assert_eq!(title.chars().count(), EMBED_TITLE_LIMIT);
    }

    #[test]
    fn test_channel_message_url() {
        assert_eq!(
            DiscordChannel::channel_message_url("42"),
            "https://discord.com/api/v10/channels/42/messages"
        );
    }
}
