//! Plain-text rendering of events into notification messages.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Write;

use serde::Serialize;

use crate::docker::{DockerEvent, short_id};

const DEFAULT_SINGLE_PREFIX: &str = "Docker event";
const DEFAULT_GROUPED_PREFIX: &str = "Docker events";

/// A rendered notification, ready for any channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NotificationMessage {
    pub subject: String,
    pub body: String,
}

impl NotificationMessage {
    pub fn new(subject: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            subject: subject.into(),
            body: body.into(),
        }
    }
}

fn prefix_or<'a>(prefix: &'a str, default: &'a str) -> &'a str {
    match prefix.trim() {
        "" => default,
        trimmed => trimmed,
    }
}

/// Sorted, de-duplicated actions of a batch.
pub fn unique_actions(events: &[DockerEvent]) -> Vec<&str> {
    events
        .iter()
        .map(|e| e.action.as_str())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

/// Default message for a single event.
pub fn format_event(subject_prefix: &str, event: &DockerEvent) -> NotificationMessage {
    let prefix = prefix_or(subject_prefix, DEFAULT_SINGLE_PREFIX);

    let mut subject = format!("{}: {} {}", prefix, event.event_type, event.action);
    if !event.actor.id.is_empty() {
        let _ = write!(subject, " ({})", event.actor.id);
    }

    let mut body = String::new();
    let _ = writeln!(body, "Time: {}", event.time());
    for (label, value) in [
        ("Status", &event.status),
        ("From", &event.from),
        ("Scope", &event.scope),
        ("ID", &event.id),
        ("Actor", &event.actor.id),
    ] {
        if !value.is_empty() {
            let _ = writeln!(body, "{}: {}", label, value);
        }
    }

    if !event.actor.attributes.is_empty() {
        body.push_str("Attributes:\n");
        for (key, value) in &event.actor.attributes {
            let _ = writeln!(body, "  - {}={}", key, value);
        }
    }

    NotificationMessage::new(subject, body.trim())
}

/// Attributes carrying the same value on every event of the batch.
fn common_attributes(events: &[DockerEvent]) -> BTreeMap<&str, &str> {
    let Some((first, rest)) = events.split_first() else {
        return BTreeMap::new();
    };

    first
        .actor
        .attributes
        .iter()
        .filter(|(key, value)| {
            rest.iter()
                .all(|e| e.actor.attributes.get(key.as_str()) == Some(*value))
        })
        .map(|(key, value)| (key.as_str(), value.as_str()))
        .collect()
}

/// Default digest for a batch of events. Batches of one render like [`format_event`].
pub fn format_grouped_events(subject_prefix: &str, events: &[DockerEvent]) -> NotificationMessage {
    let (first, last) = match events {
        [] => return NotificationMessage::new("", ""),
        [event] => return format_event(subject_prefix, event),
        [first, .., last] => (first, last),
    };

    let prefix = prefix_or(subject_prefix, DEFAULT_GROUPED_PREFIX);
    let container_id = if first.id.is_empty() {
        first.actor.id.as_str()
    } else {
        first.id.as_str()
    };

    let subject = format!(
        "{}: {} events for container {} ({})",
        prefix,
        events.len(),
        short_id(container_id),
        unique_actions(events).join(", ")
    );

    let mut body = String::new();
    let _ = writeln!(body, "Container: {}", container_id);
    let _ = writeln!(body, "Event count: {}", events.len());
    let _ = writeln!(body, "Time range: {} to {}\n", first.time(), last.time());

    let common = common_attributes(events);
    if !common.is_empty() {
        body.push_str("Common attributes:\n");
        for (key, value) in &common {
            let _ = writeln!(body, "  - {}={}", key, value);
        }
        body.push('\n');
    }

    body.push_str("Events:\n");
    for (i, event) in events.iter().enumerate() {
        let _ = write!(
            body,
            "  {}. [{}] {} {}",
            i + 1,
            event.clock(),
            event.event_type,
            event.action
        );
        if !event.status.is_empty() && event.status != event.action {
            let _ = write!(body, " (status: {})", event.status);
        }
        body.push('\n');
    }

    NotificationMessage::new(subject, body.trim())
}
