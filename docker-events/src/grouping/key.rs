//! Grouping key derivation.

use crate::docker::DockerEvent;

/// Derives the key an event is batched under.
///
/// `None` means the event cannot be grouped and is delivered on its own.
pub trait KeyPolicy: Send + Sync {
    fn key_for(&self, event: &DockerEvent) -> Option<String>;
}

/// Groups events by the object they concern: the event id, falling back to the actor id.
#[derive(Debug, Clone, Copy, Default)]
pub struct ContainerKey;

impl KeyPolicy for ContainerKey {
    fn key_for(&self, event: &DockerEvent) -> Option<String> {
        [event.id.as_str(), event.actor.id.as_str()]
            .into_iter()
            .map(str::trim)
            .find(|id| !id.is_empty())
            .map(str::to_string)
    }
}

impl<F> KeyPolicy for F
where
    F: Fn(&DockerEvent) -> Option<String> + Send + Sync,
{
    fn key_for(&self, event: &DockerEvent) -> Option<String> {
        self(event)
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;
    use crate::docker::Actor;

    fn event(id: &str, actor_id: &str) -> DockerEvent {
        DockerEvent {
            id: id.to_string(),
            status: String::new(),
            from: String::new(),
            event_type: "container".to_string(),
            action: "start".to_string(),
            scope: "local".to_string(),
            actor: Actor {
                id: actor_id.to_string(),
                ..Default::default()
            },
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn test_container_key_prefers_event_id() {
        assert_eq!(ContainerKey.key_for(&event("c1", "a1")), Some("c1".to_string()));
    }

    #[test]
    fn test_container_key_falls_back_to_actor() {
        assert_eq!(ContainerKey.key_for(&event("", "a1")), Some("a1".to_string()));
        assert_eq!(ContainerKey.key_for(&event("  ", "a1")), Some("a1".to_string()));
    }

    #[test]
    fn test_container_key_none_without_ids() {
        assert_eq!(ContainerKey.key_for(&event("", "")), None);
    }

    #[test]
    fn test_closure_policy() {
        let by_type = |event: &DockerEvent| Some(event.event_type.clone());
        assert_eq!(by_type.key_for(&event("c1", "")), Some("container".to_string()));
    }
}
