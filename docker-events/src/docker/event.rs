//! Docker engine events as seen by the relay.

use std::collections::BTreeMap;

use bollard::models::EventMessage;
use chrono::{DateTime, Local, SecondsFormat, TimeZone, Utc};
use serde::{Deserialize, Serialize};

/// Length of the abbreviated container id shown in notifications.
const SHORT_ID_LEN: usize = 12;

/// The object that emitted an event (container, image, network, ...).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    pub id: String,
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
}

/// A single event emitted by the docker engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DockerEvent {
    pub id: String,
    pub status: String,
    pub from: String,
    pub event_type: String,
    pub action: String,
    pub scope: String,
    pub actor: Actor,
    pub timestamp: DateTime<Utc>,
}

impl DockerEvent {
    /// The event timestamp in the host's timezone.
    pub fn local_time(&self) -> DateTime<Local> {
        self.timestamp.with_timezone(&Local)
    }

    /// RFC 3339 rendering of the event timestamp, in local time.
    pub fn time(&self) -> String {
        self.local_time().to_rfc3339_opts(SecondsFormat::Secs, true)
    }

    /// `HH:MM:SS` of the event timestamp, in local time.
    pub fn clock(&self) -> String {
        self.local_time().format("%H:%M:%S").to_string()
    }

    /// The first 12 characters of the event id.
    pub fn short_id(&self) -> &str {
        short_id(&self.id)
    }

    /// Look up an actor attribute.
    pub fn attribute(&self, key: &str) -> Option<&str> {
        self.actor.attributes.get(key).map(String::as_str)
    }

    /// Container name, only meaningful for container events.
    pub fn container_name(&self) -> Option<&str> {
        if self.event_type == "container" {
            self.attribute("name")
        } else {
            None
        }
    }
}

/// Abbreviate an id to at most 12 characters.
pub fn short_id(id: &str) -> &str {
    match id.char_indices().nth(SHORT_ID_LEN) {
        Some((idx, _)) => &id[..idx],
        None => id,
    }
}

impl From<EventMessage> for DockerEvent {
    fn from(msg: EventMessage) -> Self {
        let timestamp = match (msg.time_nano, msg.time) {
            (Some(nanos), _) if nanos != 0 => Utc.timestamp_nanos(nanos),
            (_, Some(secs)) if secs != 0 => Utc
                .timestamp_opt(secs, 0)
                .single()
                .unwrap_or_else(Utc::now),
            _ => Utc::now(),
        };

        let (actor_id, attributes) = match msg.actor {
            Some(actor) => (
                actor.id.unwrap_or_default(),
                actor
                    .attributes
                    .map(|attrs| attrs.into_iter().collect())
                    .unwrap_or_default(),
            ),
            None => (String::new(), BTreeMap::new()),
        };

        let action = msg.action.unwrap_or_default();
        // The engine's deprecated `from` field carried the image reference.
        let from = attributes.get("image").cloned().unwrap_or_default();

        Self {
            id: actor_id.clone(),
            status: action.clone(),
            from,
            event_type: msg.typ.map(|t| t.to_string()).unwrap_or_default(),
            action,
            scope: msg.scope.map(|s| s.to_string()).unwrap_or_default(),
            actor: Actor {
                id: actor_id,
                attributes,
            },
            timestamp,
        }
    }
}
