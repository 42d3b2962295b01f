use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use tokio::task::JoinSet;
use tokio::time::{Instant, sleep};

use docker_events::Result;
use docker_events::docker::{Actor, DockerEvent};
use docker_events::grouping::{EventGrouper, GroupingWindow};
use docker_events::notification::EventSink;

#[derive(Debug, Clone)]
struct Delivered {
    key: Option<String>,
    actions: Vec<String>,
    seqs: Vec<String>,
    at: Duration,
}

/// Records every delivery with the (virtual) time it happened at.
struct RecordingSink {
    started: Instant,
    delivered: Mutex<Vec<Delivered>>,
    /// Delay applied before recording deliveries of the given container id.
    slow: HashMap<String, Duration>,
}

impl RecordingSink {
    fn new() -> Arc<Self> {
        Self::with_slow(HashMap::new())
    }

    fn with_slow(slow: HashMap<String, Duration>) -> Arc<Self> {
        Arc::new(Self {
            started: Instant::now(),
            delivered: Mutex::new(Vec::new()),
            slow,
        })
    }

    fn delivered(&self) -> Vec<Delivered> {
        self.delivered.lock().clone()
    }

    async fn record(&self, key: Option<&str>, events: &[DockerEvent]) {
        if let Some(delay) = events.first().and_then(|e| self.slow.get(&e.id)) {
            sleep(*delay).await;
        }
        self.delivered.lock().push(Delivered {
            key: key.map(str::to_string),
            actions: events.iter().map(|e| e.action.clone()).collect(),
            seqs: events
                .iter()
                .filter_map(|e| e.attribute("seq").map(str::to_string))
                .collect(),
            at: self.started.elapsed(),
        });
    }
}

#[async_trait]
impl EventSink for RecordingSink {
    async fn deliver_single(&self, event: &DockerEvent) -> Result<()> {
        self.record(None, std::slice::from_ref(event)).await;
        Ok(())
    }

    async fn deliver_batch(&self, key: &str, events: &[DockerEvent]) -> Result<()> {
        self.record(Some(key), events).await;
        Ok(())
    }
}

fn event(id: &str, action: &str) -> DockerEvent {
    DockerEvent {
        id: id.to_string(),
        status: action.to_string(),
        from: "nginx".to_string(),
        event_type: "container".to_string(),
        action: action.to_string(),
        scope: "local".to_string(),
        actor: Actor {
            id: id.to_string(),
            attributes: [("name".to_string(), format!("{id}-name"))]
                .into_iter()
                .collect(),
        },
        timestamp: Utc::now(),
    }
}

fn ms(n: u64) -> Duration {
    Duration::from_millis(n)
}

/// Paused time still goes through the millisecond timer wheel.
fn assert_at(actual: Duration, expected: Duration) {
    assert!(
        actual >= expected && actual < expected + ms(5),
        "delivered at {actual:?}, expected {expected:?}"
    );
}

#[tokio::test(start_paused = true)]
async fn burst_is_flushed_once_after_quiet_window() {
    let sink = RecordingSink::new();
    let grouper = EventGrouper::new(sink.clone(), GroupingWindow::Enabled(ms(2000)));

    grouper.handle_event(event("c1", "create")).await.unwrap();
    sleep(ms(500)).await;
    grouper.handle_event(event("c1", "start")).await.unwrap();
    sleep(ms(500)).await;
    grouper.handle_event(event("c1", "die")).await.unwrap();

    sleep(ms(1900)).await;
    assert!(sink.delivered().is_empty());
    assert_eq!(grouper.pending()[0].event_count, 3);

    sleep(ms(200)).await;
    let delivered = sink.delivered();
    assert_eq!(delivered.len(), 1);
    assert_eq!(delivered[0].key.as_deref(), Some("c1"));
    assert_eq!(delivered[0].actions, vec!["create", "start", "die"]);
    assert_at(delivered[0].at, ms(3000));
    assert!(grouper.is_idle());
}

#[tokio::test(start_paused = true)]
async fn keys_have_independent_windows() {
    let sink = RecordingSink::new();
    let grouper = EventGrouper::new(sink.clone(), GroupingWindow::Enabled(ms(2000)));

    grouper.handle_event(event("c1", "start")).await.unwrap();
    sleep(ms(100)).await;
    grouper.handle_event(event("c2", "start")).await.unwrap();

    sleep(ms(5000)).await;
    let delivered = sink.delivered();
    assert_eq!(delivered.len(), 2);

    assert_eq!(delivered[0].key, None);
    assert_at(delivered[0].at, ms(2000));
    assert_at(delivered[1].at, ms(2100));
}

#[tokio::test(start_paused = true)]
async fn shutdown_flushes_immediately_without_later_duplicate() {
    let sink = RecordingSink::new();
    let grouper = EventGrouper::new(sink.clone(), GroupingWindow::Enabled(ms(2000)));

    grouper.handle_event(event("c1", "start")).await.unwrap();
    sleep(ms(500)).await;

    let report = grouper.shutdown().await;
    assert_eq!(report.groups, 1);
    assert_eq!(report.events, 1);
    assert!(report.is_clean());

    let delivered = sink.delivered();
    assert_eq!(delivered.len(), 1);
    assert_at(delivered[0].at, ms(500));

    sleep(ms(10000)).await;
    assert_eq!(sink.delivered().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn shutdown_drains_every_key_once() {
    let sink = RecordingSink::new();
    let grouper = EventGrouper::new(sink.clone(), GroupingWindow::Enabled(ms(30000)));

    for id in ["a", "b", "c"] {
        grouper.handle_event(event(id, "create")).await.unwrap();
        grouper.handle_event(event(id, "start")).await.unwrap();
    }
    grouper.handle_event(event("a", "die")).await.unwrap();

    let report = grouper.shutdown().await;
    assert_eq!(report.groups, 3);
    assert_eq!(report.events, 7);
    assert!(grouper.is_idle());

    sleep(ms(60000)).await;
    let mut keys: Vec<_> = sink
        .delivered()
        .into_iter()
        .map(|d| (d.key.unwrap_or_default(), d.actions.len()))
        .collect();
    keys.sort();
    assert_eq!(
        keys,
        vec![
            ("a".to_string(), 3),
            ("b".to_string(), 2),
            ("c".to_string(), 2)
        ]
    );

    // Closed: later events pass straight through.
    grouper.handle_event(event("a", "destroy")).await.unwrap();
    let delivered = sink.delivered();
    assert_eq!(delivered.len(), 4);
    assert_eq!(delivered[3].actions, vec!["destroy"]);
    assert!(grouper.is_idle());
}

#[tokio::test(start_paused = true)]
async fn shutdown_waits_for_flush_already_delivering() {
    let sink = RecordingSink::with_slow([("c1".to_string(), ms(500))].into());
    let grouper = EventGrouper::new(sink.clone(), GroupingWindow::Enabled(ms(2000)));

    grouper.handle_event(event("c1", "die")).await.unwrap();
    sleep(ms(2100)).await;
    // The timer has taken the group and the sink is still working on it.
    assert!(grouper.is_idle());
    assert!(sink.delivered().is_empty());

    let report = grouper.shutdown().await;
    assert_eq!(report.groups, 0);
    assert_eq!(report.in_flight, 1);

    let delivered = sink.delivered();
    assert_eq!(delivered.len(), 1);
    assert_eq!(delivered[0].actions, vec!["die"]);
    assert_at(delivered[0].at, ms(2500));
}

#[tokio::test(start_paused = true)]
async fn slow_delivery_does_not_delay_other_keys() {
    let sink = RecordingSink::with_slow([("slow".to_string(), ms(10000))].into());
    let grouper = EventGrouper::new(sink.clone(), GroupingWindow::Enabled(ms(1000)));

    grouper.handle_event(event("slow", "start")).await.unwrap();
    sleep(ms(100)).await;
    grouper.handle_event(event("fast", "start")).await.unwrap();

    sleep(ms(1500)).await;
    let delivered = sink.delivered();
    assert_eq!(delivered.len(), 1);
    assert_eq!(delivered[0].actions, vec!["start"]);
    assert_at(delivered[0].at, ms(1100));

    // The slow key can be grouped again while its previous flush is in flight.
    grouper.handle_event(event("slow", "stop")).await.unwrap();
    assert_eq!(grouper.pending().len(), 1);

    sleep(ms(20000)).await;
    assert_eq!(sink.delivered().len(), 3);
}

#[tokio::test(start_paused = true)]
async fn disabled_window_delivers_immediately() {
    let sink = RecordingSink::new();
    let grouper = EventGrouper::new(sink.clone(), GroupingWindow::new(Duration::ZERO));
    assert_eq!(grouper.window(), GroupingWindow::Disabled);

    grouper.handle_event(event("c1", "create")).await.unwrap();
    grouper.handle_event(event("c1", "start")).await.unwrap();

    let delivered = sink.delivered();
    assert_eq!(delivered.len(), 2);
    assert!(delivered.iter().all(|d| d.at == Duration::ZERO));
    assert!(grouper.is_idle());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_producers_deliver_each_event_exactly_once() {
    const PRODUCERS: usize = 8;
    const EVENTS_PER_PRODUCER: usize = 50;

    let sink = RecordingSink::new();
    let grouper = EventGrouper::new(sink.clone(), GroupingWindow::Enabled(Duration::from_millis(5)));

    let mut tasks = JoinSet::new();
    for producer in 0..PRODUCERS {
        let grouper = grouper.clone();
        tasks.spawn(async move {
            for n in 0..EVENTS_PER_PRODUCER {
                let id = format!("c{}", (producer + n) % 5);
                let mut e = event(&id, "update");
                e.actor
                    .attributes
                    .insert("seq".to_string(), format!("{producer}-{n}"));
                grouper.handle_event(e).await.unwrap();
                if n % 7 == 0 {
                    sleep(Duration::from_millis(3)).await;
                }
            }
        });
    }
    while let Some(result) = tasks.join_next().await {
        result.unwrap();
    }

    // Let some timers fire on their own, then drain the rest.
    sleep(Duration::from_millis(2)).await;
    grouper.shutdown().await;
    sleep(Duration::from_millis(50)).await;

    let mut seen: Vec<String> = sink
        .delivered()
        .into_iter()
        .flat_map(|d| d.seqs)
        .collect();
    let total = seen.len();
    seen.sort();
    seen.dedup();

    assert_eq!(total, PRODUCERS * EVENTS_PER_PRODUCER);
    assert_eq!(seen.len(), total);
    assert!(grouper.is_idle());
}
