//! The production [`EventSink`]: renders events and fans them out to channels.

use std::sync::Arc;

use async_trait::async_trait;
use futures::future::join_all;
use tracing::{debug, info, warn};

use super::channels::NotificationChannel;
use super::format::{NotificationMessage, format_event, format_grouped_events, unique_actions};
use super::sink::EventSink;
use super::template::{MessageTemplate, TemplateData};
use crate::docker::{DockerEvent, LogFetcher};
use crate::{Error, Result};

/// Subject prefix used when none is configured.
pub const DEFAULT_SUBJECT: &str = "Docker Event";

#[derive(Debug, Clone)]
enum TemplateState {
    None,
    Parsed(MessageTemplate),
    Invalid(String),
}

/// Renders notifications and delivers them to every enabled channel.
pub struct Notifier {
    channels: Vec<Arc<dyn NotificationChannel>>,
    subject: String,
    template: TemplateState,
    log_lines: u32,
    logs: Option<Arc<dyn LogFetcher>>,
}

impl Notifier {
    /// Create a notifier over the enabled subset of `channels`.
    pub fn new(channels: Vec<Arc<dyn NotificationChannel>>) -> Self {
        let channels: Vec<_> = channels.into_iter().filter(|c| c.is_enabled()).collect();
        for channel in &channels {
            info!("Added notification channel: {}", channel.channel_type());
        }

        Self {
            channels,
            subject: DEFAULT_SUBJECT.to_string(),
            template: TemplateState::None,
            log_lines: 0,
            logs: None,
        }
    }

    pub fn with_subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = subject.into();
        self
    }

    /// Use a message template for bodies. Blank sources disable templating.
    ///
    /// An invalid template is kept as an error and every delivery falls back to
    /// the default format.
    pub fn with_template(mut self, source: &str) -> Self {
        self.template = if source.trim().is_empty() {
            TemplateState::None
        } else {
            match MessageTemplate::parse(source) {
                Ok(template) => TemplateState::Parsed(template),
                Err(e) => {
                    warn!(error = %e, "Invalid message template, default format will be used");
                    TemplateState::Invalid(e.to_string())
                }
            }
        };
        self
    }

    /// Enable `{{.Logs}}` by fetching the last `lines` lines of container output.
    pub fn with_log_fetcher(mut self, fetcher: Arc<dyn LogFetcher>, lines: u32) -> Self {
        self.logs = Some(fetcher);
        self.log_lines = lines;
        self
    }

    pub fn channel_types(&self) -> Vec<&'static str> {
        self.channels.iter().map(|c| c.channel_type()).collect()
    }

    fn template(&self) -> std::result::Result<Option<&MessageTemplate>, &str> {
        match &self.template {
            TemplateState::None => Ok(None),
            TemplateState::Parsed(template) => Ok(Some(template)),
            TemplateState::Invalid(e) => Err(e),
        }
    }

    /// Logs for the template's event, when the template asks for them.
    async fn fetch_logs(&self, template: &MessageTemplate, event: &DockerEvent) -> Option<String> {
        if !template.uses_logs() || self.log_lines == 0 || event.event_type != "container" {
            return None;
        }
        let fetcher = self.logs.as_ref()?;
        if event.actor.id.is_empty() {
            return None;
        }

        match fetcher.tail_logs(&event.actor.id, self.log_lines).await {
            Ok(logs) => Some(logs),
            Err(e) => {
                debug!(container = %event.short_id(), error = %e, "Failed to fetch container logs");
                Some(format!("[error fetching logs: {}]", e))
            }
        }
    }

    /// Render `data` with the configured template.
    ///
    /// `None` when no template is set, `Some(Err)` when it is invalid or fails
    /// to render.
    async fn render_with(&self, data: TemplateData<'_>) -> Option<Result<String>> {
        let template = match self.template() {
            Ok(Some(template)) => template,
            Ok(None) => return None,
            Err(e) => return Some(Err(Error::template(e))),
        };
        let data = match self.fetch_logs(template, data.event()).await {
            Some(logs) => data.with_logs(logs),
            None => data,
        };
        Some(template.render(&data))
    }

    /// Build the message for a single event.
    pub async fn render_single(&self, event: &DockerEvent) -> NotificationMessage {
        match self.render_with(TemplateData::single(event)).await {
            Some(Ok(body)) => {
                let subject = format!("{}: {} {}", self.subject, event.event_type, event.action);
                NotificationMessage::new(subject, body)
            }
            Some(Err(e)) => {
                warn!(error = %e, "Failed to format event with template, falling back to default format");
                format_event(&self.subject, event)
            }
            None => format_event(&self.subject, event),
        }
    }

    /// Build the message for a batch of two or more events.
    pub async fn render_batch(&self, events: &[DockerEvent]) -> NotificationMessage {
        let rendered = match TemplateData::grouped(events) {
            Some(data) => self.render_with(data).await,
            None => None,
        };

        match rendered {
            Some(Ok(body)) => {
                let subject = format!(
                    "{}: {} events ({})",
                    self.subject,
                    events.len(),
                    unique_actions(events).join(", ")
                );
                NotificationMessage::new(subject, body)
            }
            Some(Err(e)) => {
                warn!(error = %e, "Failed to format grouped events with template, falling back to default format");
                format_grouped_events(&self.subject, events)
            }
            None => format_grouped_events(&self.subject, events),
        }
    }

    /// Send `message` to every channel concurrently.
    ///
    /// All channels are attempted. Failures are folded into one
    /// [`Error::Delivery`] naming each failed channel.
    pub async fn dispatch(&self, message: &NotificationMessage) -> Result<()> {
        let results = join_all(self.channels.iter().map(|channel| async move {
            (channel.channel_type(), channel.send(message).await)
        }))
        .await;

        let failures: Vec<(&'static str, Error)> = results
            .into_iter()
            .filter_map(|(name, result)| result.err().map(|e| (name, e)))
            .collect();

        if failures.is_empty() {
            debug!(subject = %message.subject, channels = self.channels.len(), "Notification sent");
            return Ok(());
        }

        let channels = failures
            .iter()
            .map(|(name, _)| *name)
            .collect::<Vec<_>>()
            .join(", ");
        let message = failures
            .iter()
            .map(|(name, e)| format!("{}: {}", name, e))
            .collect::<Vec<_>>()
            .join("; ");
        Err(Error::delivery(channels, message))
    }
}

#[async_trait]
impl EventSink for Notifier {
    async fn deliver_single(&self, event: &DockerEvent) -> Result<()> {
        let message = self.render_single(event).await;
        self.dispatch(&message).await
    }

    async fn deliver_batch(&self, key: &str, events: &[DockerEvent]) -> Result<()> {
        match events {
            [] => Ok(()),
            [event] => self.deliver_single(event).await,
            _ => {
                debug!(key, count = events.len(), "Delivering grouped notification");
                let message = self.render_batch(events).await;
                self.dispatch(&message).await
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};
    use parking_lot::Mutex;

    use super::*;
    use crate::docker::Actor;

    struct RecordingChannel {
        name: &'static str,
        enabled: bool,
        fail: bool,
        sent: Mutex<Vec<NotificationMessage>>,
    }

    impl RecordingChannel {
        fn new(name: &'static str) -> Arc<Self> {
            Arc::new(Self {
                name,
                enabled: true,
                fail: false,
                sent: Mutex::new(Vec::new()),
            })
        }

        fn failing(name: &'static str) -> Arc<Self> {
            Arc::new(Self {
                name,
                enabled: true,
                fail: true,
                sent: Mutex::new(Vec::new()),
            })
        }

        fn sent(&self) -> Vec<NotificationMessage> {
            self.sent.lock().clone()
        }
    }

    #[async_trait]
    impl NotificationChannel for RecordingChannel {
        fn channel_type(&self) -> &'static str {
            self.name
        }

        fn is_enabled(&self) -> bool {
            self.enabled
        }

        async fn send(&self, message: &NotificationMessage) -> Result<()> {
            self.sent.lock().push(message.clone());
            if self.fail {
                return Err(Error::delivery(self.name, "boom"));
            }
            Ok(())
        }
    }

    struct StaticLogs(Result<String>);

    #[async_trait]
    impl LogFetcher for StaticLogs {
        async fn tail_logs(&self, _container_id: &str, _lines: u32) -> Result<String> {
            match &self.0 {
                Ok(logs) => Ok(logs.clone()),
                Err(e) => Err(Error::Other(e.to_string())),
            }
        }
    }

    fn build_notifier(channels: &[&Arc<RecordingChannel>]) -> Notifier {
        Notifier::new(
            channels
                .iter()
                .map(|c| Arc::clone(*c) as Arc<dyn NotificationChannel>)
                .collect(),
        )
    }

    fn event(action: &str) -> DockerEvent {
        DockerEvent {
            id: "abcdef0123456789".to_string(),
            status: action.to_string(),
            from: String::new(),
            event_type: "container".to_string(),
            action: action.to_string(),
            scope: "local".to_string(),
            actor: Actor {
                id: "abcdef0123456789".to_string(),
                attributes: [("name".to_string(), "web".to_string())]
                    .into_iter()
                    .collect(),
            },
            timestamp: Utc.timestamp_opt(0, 0).unwrap(),
        }
    }

    #[tokio::test]
    async fn test_single_without_template_uses_default_format() {
        let channel = RecordingChannel::new("a");
        let notifier = build_notifier(&[&channel]).with_subject("Host");

        notifier.deliver_single(&event("start")).await.unwrap();

        let sent = channel.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0], format_event("Host", &event("start")));
    }

    #[tokio::test]
    async fn test_single_with_template() {
        let channel = RecordingChannel::new("a");
        let notifier = build_notifier(&[&channel])
            .with_subject("Host")
            .with_template("{{.Name}} {{.Action}}");

        notifier.deliver_single(&event("die")).await.unwrap();

        let sent = channel.sent();
        assert_eq!(sent[0].subject, "Host: container die");
        assert_eq!(sent[0].body, "web die");
    }

    #[tokio::test]
    async fn test_batch_with_template_subject_lists_actions() {
        let channel = RecordingChannel::new("a");
        let notifier = build_notifier(&[&channel])
            .with_subject("Host")
            .with_template("{{.EventCount}} events for {{.Name}}");

        let events = vec![event("stop"), event("die"), event("stop")];
        notifier.deliver_batch("key", &events).await.unwrap();

        let sent = channel.sent();
        assert_eq!(sent[0].subject, "Host: 3 events (die, stop)");
        assert_eq!(sent[0].body, "3 events for web");
    }

    #[tokio::test]
    async fn test_batch_template_ranges_over_events() {
        let channel = RecordingChannel::new("a");
        let notifier = build_notifier(&[&channel])
            .with_subject("Host")
            .with_template("{{.Name}}:{{range .Events}} {{.Action}}{{end}} ({{.Event.Action}} first)");

        let events = vec![event("create"), event("start"), event("die")];
        notifier.deliver_batch("key", &events).await.unwrap();

        assert_eq!(channel.sent()[0].body, "web: create start die (create first)");
    }

    #[tokio::test]
    async fn test_render_failure_falls_back() {
        let channel = RecordingChannel::new("a");
        let notifier = build_notifier(&[&channel])
            .with_subject("Host")
            .with_template("{{if eq .EventCount \"2\"}}two{{end}}");

        let events = vec![event("start"), event("stop")];
        notifier.deliver_batch("key", &events).await.unwrap();

        assert_eq!(channel.sent()[0], format_grouped_events("Host", &events));
    }

    #[tokio::test]
    async fn test_invalid_template_falls_back() {
        let channel = RecordingChannel::new("a");
        let notifier = build_notifier(&[&channel])
            .with_subject("Host")
            .with_template("{{.Nope}}");

        let events = vec![event("start"), event("stop")];
        notifier.deliver_batch("key", &events).await.unwrap();
        notifier.deliver_single(&events[0]).await.unwrap();

        let sent = channel.sent();
        assert_eq!(sent[0], format_grouped_events("Host", &events));
        assert_eq!(sent[1], format_event("Host", &events[0]));
    }

    #[tokio::test]
    async fn test_batch_of_one_and_empty_batch() {
        let channel = RecordingChannel::new("a");
        let notifier = build_notifier(&[&channel]);

        notifier.deliver_batch("key", &[]).await.unwrap();
        assert!(channel.sent().is_empty());

        notifier.deliver_batch("key", &[event("start")]).await.unwrap();
        assert_eq!(
            channel.sent(),
            vec![format_event(DEFAULT_SUBJECT, &event("start"))]
        );
    }

    #[tokio::test]
    async fn test_failure_names_channels_after_all_attempted() {
        let ok = RecordingChannel::new("ok");
        let bad = RecordingChannel::failing("bad");
        let worse = RecordingChannel::failing("worse");
        let notifier = build_notifier(&[&bad, &ok, &worse]);

        let err = notifier.deliver_single(&event("start")).await.unwrap_err();

        assert_eq!(ok.sent().len(), 1);
        assert_eq!(bad.sent().len(), 1);
        assert_eq!(worse.sent().len(), 1);
        match err {
            Error::Delivery { channel, .. } => assert_eq!(channel, "bad, worse"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_disabled_channels_are_skipped() {
        let disabled = Arc::new(RecordingChannel {
            name: "off",
            enabled: false,
            fail: true,
            sent: Mutex::new(Vec::new()),
        });
        let notifier = build_notifier(&[&disabled]);

        assert!(notifier.channel_types().is_empty());
        notifier.deliver_single(&event("start")).await.unwrap();
        assert!(disabled.sent().is_empty());
    }

    #[tokio::test]
    async fn test_logs_rendered_when_requested() {
        let channel = RecordingChannel::new("a");
        let notifier = build_notifier(&[&channel])
            .with_template("{{.Name}}:\n{{.Logs}}")
            .with_log_fetcher(Arc::new(StaticLogs(Ok("line 1\nline 2".to_string()))), 10);

        notifier.deliver_single(&event("die")).await.unwrap();
        assert_eq!(channel.sent()[0].body, "web:\nline 1\nline 2");
    }

    #[tokio::test]
    async fn test_log_errors_are_inlined() {
        let channel = RecordingChannel::new("a");
        let notifier = build_notifier(&[&channel])
            .with_template("{{.GetLogs}}")
            .with_log_fetcher(Arc::new(StaticLogs(Err(Error::Other("gone".into())))), 5);

        notifier.deliver_single(&event("die")).await.unwrap();
        assert_eq!(channel.sent()[0].body, "[error fetching logs: gone]");
    }

    #[tokio::test]
    async fn test_logs_skipped_without_lines() {
        let channel = RecordingChannel::new("a");
        let notifier = build_notifier(&[&channel])
            .with_template("[{{.Logs}}]")
            .with_log_fetcher(Arc::new(StaticLogs(Ok("ignored".to_string()))), 0);

        notifier.deliver_single(&event("die")).await.unwrap();
        assert_eq!(channel.sent()[0].body, "[]");
    }
}
