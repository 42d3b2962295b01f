//! Application wiring: docker subscription -> grouper -> notifier.

use std::sync::Arc;

use futures::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::Result;
use crate::config::Config;
use crate::docker::{DockerEvent, DockerWatcher, EventSource, LogFetcher};
use crate::grouping::EventGrouper;
use crate::notification::Notifier;

/// Build the notifier described by `config`.
pub fn build_notifier(config: &Config, logs: Arc<dyn LogFetcher>) -> Notifier {
    let channels = config.channels().iter().map(|c| c.build()).collect();

    let mut notifier = Notifier::new(channels)
        .with_subject(config.notify_subject.clone())
        .with_log_fetcher(logs, config.log_lines);
    if let Some(template) = &config.message_template {
        notifier = notifier.with_template(template);
    }
    notifier
}

/// Run until `cancel` fires or the docker event stream fails.
///
/// Open groups are always drained before returning.
pub async fn run(config: Config, cancel: CancellationToken) -> Result<()> {
    let filters = config.filters()?;
    let watcher = Arc::new(DockerWatcher::connect(filters).await?);

    let notifier = build_notifier(&config, watcher.clone());
    info!(channels = ?notifier.channel_types(), "Notifier ready");

    let grouper = EventGrouper::new(Arc::new(notifier), config.group_window);
    info!(
        filters = ?config.docker_filters,
        types = ?config.event_types,
        window = %config.group_window,
        "Starting docker events watcher"
    );

    let result = relay(watcher.as_ref(), &grouper, cancel).await;

    let report = grouper.shutdown().await;
    info!(
        groups = report.groups,
        events = report.events,
        in_flight = report.in_flight,
        failures = report.failures.len(),
        "Pending groups flushed"
    );

    result
}

/// Feed every event of `source` into `grouper`.
///
/// Handler errors are logged and the relay keeps going. Returns `Ok` when the
/// stream ends (cancellation included) and the stream's error otherwise.
pub async fn relay<S>(source: &S, grouper: &EventGrouper, cancel: CancellationToken) -> Result<()>
where
    S: EventSource + ?Sized,
{
    let mut events = source.subscribe(cancel.clone());

    while let Some(item) = events.next().await {
        let event = match item {
            Ok(event) => event,
            Err(e) => {
                error!(error = %e, "Docker event stream failed");
                return Err(e);
            }
        };

        log_event(&event);
        if let Err(e) = grouper.handle_event(event).await {
            warn!(error = %e, "Failed to notify docker event");
        }
    }

    if cancel.is_cancelled() {
        info!(reason = "cancelled", "Docker events watcher stopped");
    } else {
        info!(reason = "stream closed", "Docker events watcher stopped");
    }
    Ok(())
}

fn log_event(event: &DockerEvent) {
    let actor = (!event.actor.id.is_empty()).then_some(event.actor.id.as_str());
    info!(
        event_type = %event.event_type,
        action = %event.action,
        status = %event.status,
        id = %event.id,
        actor,
        timestamp = %event.time(),
        "Docker event"
    );
}
