//! Runtime configuration.
//!
//! Every option can be given as a flag or through its environment variable.
//! `main` loads a `.env` file (if present) before parsing, so the variables
//! may also live there.

use std::collections::HashMap;
use std::time::Duration;

use clap::Parser;
use tracing::warn;

use crate::docker::build_filters;
use crate::grouping::GroupingWindow;
use crate::logging::LogFormat;
use crate::notification::DEFAULT_SUBJECT;
use crate::notification::channels::{ChannelConfig, DiscordConfig, SlackConfig, TelegramConfig};
use crate::{Error, Result};

/// Grouping window used when `EVENT_GROUP_WINDOW` is unset or unparseable.
pub const DEFAULT_GROUP_WINDOW: Duration = Duration::from_secs(5);

/// Event type watched when `DOCKER_EVENT_TYPE` is unset.
pub const DEFAULT_EVENT_TYPE: &str = "container";

/// Command line / environment arguments.
#[derive(Parser, Debug, Clone, Default)]
#[command(
    name = "docker-events",
    version,
    about = "Relay Docker engine events to Slack, Telegram and Discord"
)]
pub struct Args {
    /// Comma separated docker event filters (key=value)
    #[arg(long, env = "DOCKER_FILTERS")]
    pub docker_filters: Option<String>,

    /// Comma separated event types to watch
    #[arg(long, env = "DOCKER_EVENT_TYPE")]
    pub docker_event_type: Option<String>,

    /// Subject prefix of every notification
    #[arg(long, env = "NOTIFY_SUBJECT")]
    pub notify_subject: Option<String>,

    /// Message body template, e.g. "{{.Name}} {{.Action}}"
    #[arg(long, env = "MESSAGE_TEMPLATE")]
    pub message_template: Option<String>,

    /// Container log lines available to the template as {{.Logs}}
    #[arg(long, env = "MESSAGE_LOG_LINES")]
    pub message_log_lines: Option<String>,

    /// Grouping window (e.g. 5s, 1m30s, 500ms). Zero or negative disables grouping
    #[arg(long, env = "EVENT_GROUP_WINDOW")]
    pub event_group_window: Option<String>,

    #[arg(long, env = "SLACK_BOT_TOKEN", hide_env_values = true)]
    pub slack_bot_token: Option<String>,

    #[arg(long, env = "SLACK_CHANNEL_IDS")]
    pub slack_channel_ids: Option<String>,

    #[arg(long, env = "TELEGRAM_BOT_TOKEN", hide_env_values = true)]
    pub telegram_bot_token: Option<String>,

    #[arg(long, env = "TELEGRAM_CHAT_IDS")]
    pub telegram_chat_ids: Option<String>,

    #[arg(long, env = "DISCORD_BOT_TOKEN", hide_env_values = true)]
    pub discord_bot_token: Option<String>,

    #[arg(long, env = "DISCORD_CHANNEL_IDS")]
    pub discord_channel_ids: Option<String>,

    #[arg(long, env = "DISCORD_WEBHOOK_URLS", hide_env_values = true)]
    pub discord_webhook_urls: Option<String>,

    /// Log output format
    #[arg(long, env = "LOG_FORMAT", value_enum, default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,
}

/// Validated configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub docker_filters: Vec<String>,
    pub event_types: Vec<String>,
    pub notify_subject: String,
    pub message_template: Option<String>,
    pub log_lines: u32,
    pub group_window: GroupingWindow,
    pub slack: Option<SlackConfig>,
    pub telegram: Option<TelegramConfig>,
    pub discord: Option<DiscordConfig>,
    pub log_format: LogFormat,
}

impl Config {
    pub fn from_args(args: Args) -> Result<Self> {
        let log_lines = parse_log_lines(args.message_log_lines.as_deref())?;

        let event_types = match split_and_trim(args.docker_event_type.as_deref()) {
            types if types.is_empty() => vec![DEFAULT_EVENT_TYPE.to_string()],
            types => types,
        };

        let notify_subject = non_empty(args.notify_subject)
            .unwrap_or_else(|| DEFAULT_SUBJECT.to_string());

        let slack = match non_empty(args.slack_bot_token) {
            Some(bot_token) => {
                let channel_ids = split_and_trim(args.slack_channel_ids.as_deref());
                if channel_ids.is_empty() {
                    return Err(Error::config(
                        "slack configured but SLACK_CHANNEL_IDS is empty",
                    ));
                }
                Some(SlackConfig {
                    enabled: true,
                    bot_token,
                    channel_ids,
                })
            }
            None => None,
        };

        let telegram = match non_empty(args.telegram_bot_token) {
            Some(bot_token) => {
                let raw_ids = split_and_trim(args.telegram_chat_ids.as_deref());
                if raw_ids.is_empty() {
                    return Err(Error::config(
                        "telegram configured but TELEGRAM_CHAT_IDS is empty",
                    ));
                }
                let chat_ids = raw_ids
                    .iter()
                    .map(|raw| {
                        raw.parse::<i64>().map_err(|e| {
                            Error::config(format!("invalid TELEGRAM_CHAT_IDS value {:?}: {}", raw, e))
                        })
                    })
                    .collect::<Result<Vec<_>>>()?;
                Some(TelegramConfig {
                    enabled: true,
                    bot_token,
                    chat_ids,
                })
            }
            None => None,
        };

        let mut discord = match non_empty(args.discord_bot_token) {
            Some(bot_token) => {
                let channel_ids = split_and_trim(args.discord_channel_ids.as_deref());
                if channel_ids.is_empty() {
                    return Err(Error::config(
                        "discord bot configured but DISCORD_CHANNEL_IDS is empty",
                    ));
                }
                Some(DiscordConfig {
                    enabled: true,
                    bot_token: Some(bot_token),
                    channel_ids,
                    ..Default::default()
                })
            }
            None => None,
        };

        let webhook_urls = split_and_trim(args.discord_webhook_urls.as_deref());
        if !webhook_urls.is_empty() {
            discord
                .get_or_insert_with(|| DiscordConfig {
                    enabled: true,
                    ..Default::default()
                })
                .webhook_urls = webhook_urls;
        }

        let config = Self {
            docker_filters: split_and_trim(args.docker_filters.as_deref()),
            event_types,
            notify_subject,
            message_template: non_empty(args.message_template),
            log_lines,
            group_window: parse_group_window(args.event_group_window.as_deref()),
            slack,
            telegram,
            discord,
            log_format: args.log_format,
        };
        config.validate()?;

        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.channels().is_empty() {
            return Err(Error::config(
                "missing required configuration: notification credentials (Slack, Telegram, or Discord)",
            ));
        }
        self.filters().map(|_| ())
    }

    /// Configured transports.
    pub fn channels(&self) -> Vec<ChannelConfig> {
        let mut channels = Vec::new();
        if let Some(slack) = &self.slack {
            channels.push(ChannelConfig::Slack(slack.clone()));
        }
        if let Some(telegram) = &self.telegram {
            channels.push(ChannelConfig::Telegram(telegram.clone()));
        }
        if let Some(discord) = &self.discord {
            channels.push(ChannelConfig::Discord(discord.clone()));
        }
        channels
    }

    /// Docker `filters` argument for the event subscription.
    pub fn filters(&self) -> Result<HashMap<String, Vec<String>>> {
        build_filters(&self.docker_filters, &self.event_types)
    }
}

/// Split on `,`, trimming entries and dropping empty ones.
pub fn split_and_trim(raw: Option<&str>) -> Vec<String> {
    raw.unwrap_or_default()
        .split(',')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(str::to_string)
        .collect()
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

fn parse_log_lines(raw: Option<&str>) -> Result<u32> {
    let Some(raw) = raw.map(str::trim).filter(|r| !r.is_empty()) else {
        return Ok(0);
    };
    let lines = raw
        .parse::<i64>()
        .map_err(|e| Error::config(format!("invalid MESSAGE_LOG_LINES value {:?}: {}", raw, e)))?;
    Ok(u32::try_from(lines.max(0)).unwrap_or(u32::MAX))
}

/// Grouping window from an `EVENT_GROUP_WINDOW` value.
///
/// Unset or unparseable values give [`DEFAULT_GROUP_WINDOW`]; zero or negative
/// durations disable grouping.
pub fn parse_group_window(raw: Option<&str>) -> GroupingWindow {
    let Some(raw) = raw.map(str::trim).filter(|r| !r.is_empty()) else {
        return GroupingWindow::new(DEFAULT_GROUP_WINDOW);
    };

    match parse_duration(raw) {
        Some((true, _)) => GroupingWindow::Disabled,
        Some((false, duration)) => GroupingWindow::new(duration),
        None => {
            warn!(value = raw, default = ?DEFAULT_GROUP_WINDOW, "Invalid EVENT_GROUP_WINDOW, using default");
            GroupingWindow::new(DEFAULT_GROUP_WINDOW)
        }
    }
}

/// Parse a duration such as `300ms`, `-1.5h` or `2h45m`.
///
/// Returns `(negative, magnitude)`. Valid units are `ns`, `us` (or `µs`), `ms`,
/// `s`, `m` and `h`. A bare `0` is accepted.
pub fn parse_duration(raw: &str) -> Option<(bool, Duration)> {
    let (negative, mut rest) = match raw.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, raw.strip_prefix('+').unwrap_or(raw)),
    };

    if rest == "0" {
        return Some((negative, Duration::ZERO));
    }
    if rest.is_empty() {
        return None;
    }

    let mut nanos = 0f64;
    while !rest.is_empty() {
        let number_len = rest
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .unwrap_or(rest.len());
        let (number, tail) = rest.split_at(number_len);
        if !number.bytes().any(|b| b.is_ascii_digit()) {
            return None;
        }
        let value: f64 = number.parse().ok()?;

        let unit_len = tail
            .find(|c: char| c.is_ascii_digit() || c == '.')
            .unwrap_or(tail.len());
        let (unit, tail) = tail.split_at(unit_len);
        let scale = match unit {
            "ns" => 1.0,
            "us" | "µs" | "μs" => 1e3,
            "ms" => 1e6,
            "s" => 1e9,
            "m" => 60e9,
            "h" => 3600e9,
            _ => return None,
        };

        nanos += value * scale;
        rest = tail;
    }

    if !nanos.is_finite() || nanos > u64::MAX as f64 {
        return None;
    }
    Some((negative && nanos > 0.0, Duration::from_nanos(nanos.round() as u64)))
}
