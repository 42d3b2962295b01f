//! Docker event subscription.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use bollard::Docker;
use bollard::container::LogsOptions;
use bollard::system::EventsOptions;
use futures::StreamExt;
use futures::stream::BoxStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::event::DockerEvent;
use crate::{Error, Result};

/// Upper bound for a container log fetch.
const LOG_FETCH_TIMEOUT: Duration = Duration::from_secs(5);

/// A long-lived source of docker events.
///
/// The stream ends cleanly once `cancel` fires and yields nothing afterwards.
/// An `Err` item is terminal for the subscription.
pub trait EventSource: Send + Sync {
    fn subscribe(&self, cancel: CancellationToken) -> BoxStream<'static, Result<DockerEvent>>;
}

/// Fetches the tail of a container's output for message templates.
#[async_trait]
pub trait LogFetcher: Send + Sync {
    async fn tail_logs(&self, container_id: &str, lines: u32) -> Result<String>;
}

/// Event source backed by the local docker engine.
#[derive(Clone)]
pub struct DockerWatcher {
    client: Docker,
    filters: HashMap<String, Vec<String>>,
}

impl DockerWatcher {
    /// Connect using `DOCKER_HOST` or the platform default socket and negotiate the API version.
    pub async fn connect(filters: HashMap<String, Vec<String>>) -> Result<Self> {
        let client = Docker::connect_with_defaults()?.negotiate_version().await?;
        info!(version = ?client.client_version(), "Connected to docker engine");
        Ok(Self { client, filters })
    }

    /// Wrap an already configured client.
    pub fn with_client(client: Docker, filters: HashMap<String, Vec<String>>) -> Self {
        Self { client, filters }
    }

    pub fn filters(&self) -> &HashMap<String, Vec<String>> {
        &self.filters
    }
}

impl EventSource for DockerWatcher {
    fn subscribe(&self, cancel: CancellationToken) -> BoxStream<'static, Result<DockerEvent>> {
        let options = EventsOptions::<String> {
            since: None,
            until: None,
            filters: self.filters.clone(),
        };
        debug!(filters = ?self.filters, "Subscribing to docker events");

        self.client
            .events(Some(options))
            .map(|item| item.map(DockerEvent::from).map_err(Error::from))
            .take_until(cancel.cancelled_owned())
            .boxed()
    }
}

#[async_trait]
impl LogFetcher for DockerWatcher {
    async fn tail_logs(&self, container_id: &str, lines: u32) -> Result<String> {
        let options = LogsOptions::<String> {
            stdout: true,
            stderr: true,
            tail: lines.to_string(),
            ..Default::default()
        };

        let collect = async {
            let mut output = String::new();
            let mut logs = self.client.logs(container_id, Some(options));
            while let Some(chunk) = logs.next().await {
                output.push_str(&String::from_utf8_lossy(&chunk?.into_bytes()));
            }
            Ok::<_, Error>(output)
        };

        let output = tokio::time::timeout(LOG_FETCH_TIMEOUT, collect)
            .await
            .map_err(|_| {
                Error::Other(format!(
                    "Timed out fetching logs for container {}",
                    container_id
                ))
            })??;

        Ok(output.trim().to_string())
    }
}
