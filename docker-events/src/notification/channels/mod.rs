//! Notification channels.
//!
//! This module provides the transports a notification is fanned out to:
//! - Slack (`chat.postMessage`)
//! - Telegram Bot API
//! - Discord (webhooks and bot channels)

mod discord;
mod slack;
mod telegram;

pub use discord::{DiscordChannel, DiscordConfig};
pub use slack::{SlackChannel, SlackConfig};
pub use telegram::{TelegramChannel, TelegramConfig};

use std::sync::{Arc, OnceLock};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::HeaderMap;
use reqwest::{RequestBuilder, Response, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::format::NotificationMessage;
use crate::{Error, Result};

/// Maximum number of attempts for a rate-limited request.
const MAX_RATE_LIMIT_RETRIES: u32 = 3;

/// Wait applied when a 429 response carries no usable hint.
const DEFAULT_RETRY_AFTER: Duration = Duration::from_secs(1);

/// Trait for notification channels.
#[async_trait]
pub trait NotificationChannel: Send + Sync {
    /// Get the channel type name.
    fn channel_type(&self) -> &'static str;

    /// Check if the channel is enabled.
    fn is_enabled(&self) -> bool;

    /// Send a message to every receiver of this channel.
    async fn send(&self, message: &NotificationMessage) -> Result<()>;
}

/// Channel configuration wrapper.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ChannelConfig {
    Slack(SlackConfig),
    Telegram(TelegramConfig),
    Discord(DiscordConfig),
}

impl ChannelConfig {
    /// Get the channel type name.
    pub fn channel_type(&self) -> &'static str {
        match self {
            Self::Slack(_) => "slack",
            Self::Telegram(_) => "telegram",
            Self::Discord(_) => "discord",
        }
    }

    /// Check if the channel is enabled.
    pub fn is_enabled(&self) -> bool {
        match self {
            Self::Slack(c) => c.enabled,
            Self::Telegram(c) => c.enabled,
            Self::Discord(c) => c.enabled,
        }
    }

    /// Build the runtime channel for this configuration.
    pub fn build(&self) -> Arc<dyn NotificationChannel> {
        match self {
            Self::Slack(c) => Arc::new(SlackChannel::new(c.clone())),
            Self::Telegram(c) => Arc::new(TelegramChannel::new(c.clone())),
            Self::Discord(c) => Arc::new(DiscordChannel::new(c.clone())),
        }
    }
}

/// Install the process-wide rustls crypto provider once.
pub(crate) fn install_rustls_provider() {
    static PROVIDER_INSTALLED: OnceLock<()> = OnceLock::new();
    PROVIDER_INSTALLED.get_or_init(|| {
        if let Err(e) = rustls::crypto::aws_lc_rs::default_provider().install_default() {
            debug!(existing_provider = ?e, "rustls CryptoProvider already installed");
        }
    });
}

/// Send a request, waiting out 429 responses up to [`MAX_RATE_LIMIT_RETRIES`] attempts.
///
/// `build` is called once per attempt. Non-429 failures are returned without retrying.
pub(crate) async fn send_with_rate_limit<F>(channel: &'static str, build: F) -> Result<Response>
where
    F: Fn() -> RequestBuilder,
{
    let mut attempts = 0;

    loop {
        attempts += 1;

        let response = build()
            .send()
            .await
            .map_err(|e| Error::delivery(channel, format!("request failed: {}", e)))?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        if status == StatusCode::TOO_MANY_REQUESTS {
            let header_hint = retry_after_from_headers(response.headers());
            let body = response.text().await.unwrap_or_default();
            let retry_after = header_hint.or_else(|| retry_after_from_body(&body));

            if attempts >= MAX_RATE_LIMIT_RETRIES {
                warn!(
                    channel,
                    retries = MAX_RATE_LIMIT_RETRIES,
                    ?retry_after,
                    "Rate limit: max retries exceeded"
                );
                return Err(Error::delivery(
                    channel,
                    format!("rate limit exceeded after {} retries", MAX_RATE_LIMIT_RETRIES),
                ));
            }

            let wait = retry_after.unwrap_or(DEFAULT_RETRY_AFTER);
            debug!(
                channel,
                ?wait,
                attempt = attempts,
                max = MAX_RATE_LIMIT_RETRIES,
                "Rate limited (429), waiting before retry"
            );
            tokio::time::sleep(wait).await;
            continue;
        }

        let body = response.text().await.unwrap_or_default();
        warn!(channel, %status, body = %body, "Notification request failed");
        return Err(Error::delivery(channel, format!("{} - {}", status, body)));
    }
}

/// Parse `Retry-After` (or Discord's `X-RateLimit-Reset-After`) in seconds.
fn retry_after_from_headers(headers: &HeaderMap) -> Option<Duration> {
    ["Retry-After", "X-RateLimit-Reset-After"]
        .into_iter()
        .filter_map(|name| headers.get(name))
        .filter_map(|value| value.to_str().ok())
        .filter_map(|value| value.trim().parse::<f64>().ok())
        .find(|secs| secs.is_finite() && *secs >= 0.0)
        .map(Duration::from_secs_f64)
}

/// Parse the retry hint of a JSON 429 body (Telegram `parameters.retry_after`,
/// Discord `retry_after`).
fn retry_after_from_body(body: &str) -> Option<Duration> {
    let value: serde_json::Value = serde_json::from_str(body).ok()?;
    value
        .get("parameters")
        .and_then(|p| p.get("retry_after"))
        .or_else(|| value.get("retry_after"))
        .and_then(|v| v.as_f64())
        .filter(|secs| secs.is_finite() && *secs >= 0.0)
        .map(Duration::from_secs_f64)
}

/// Truncate text to `limit` characters, marking the cut.
pub(crate) fn truncate_message(text: &str, limit: usize) -> String {
    if text.chars().count() <= limit {
        return text.to_string();
    }
    let suffix = "\n\n[truncated]";
    let budget = limit.saturating_sub(suffix.chars().count());
    let truncated: String = text.chars().take(budget).collect();
    format!("{truncated}{suffix}")
}
