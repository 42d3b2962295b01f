//! Per-key debouncing of docker events.
//!
//! Each grouping key is either idle (no entry) or has exactly one open group.
//! The first event for an idle key opens a group and arms a timer for the
//! window; every further event for that key appends to the group and re-arms
//! the timer. When the timer lapses, or on [`EventGrouper::shutdown`], the
//! group is removed from the table and its events are handed to the sink.
//!
//! Every arm mints a fresh generation token. A timer callback carries the key
//! and the token it was armed with and only flushes if the live group still
//! holds that token, so a callback that fires after being superseded or
//! drained is a no-op. Tokens come from a grouper-wide counter and never repeat.
//!
//! The state lock is held for table and timer bookkeeping only, never while
//! the sink is delivering. A timer flush registers with the grouper's task
//! tracker in the same critical section that removes its group, so shutdown
//! can wait for deliveries that were already underway when it drained.

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, trace, warn};

use super::key::{ContainerKey, KeyPolicy};
use super::timer::{Scheduler, TimerHandle, TokioScheduler};
use crate::docker::DockerEvent;
use crate::notification::EventSink;
use crate::{Error, Result};

/// Debounce window applied to each key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupingWindow {
    /// Every event is delivered immediately and individually.
    Disabled,
    /// Events are buffered until the key has been quiet for this long.
    Enabled(Duration),
}

impl GroupingWindow {
    /// A zero duration disables grouping.
    pub fn new(window: Duration) -> Self {
        if window.is_zero() {
            Self::Disabled
        } else {
            Self::Enabled(window)
        }
    }

    pub fn duration(&self) -> Option<Duration> {
        match self {
            Self::Disabled => None,
            Self::Enabled(window) => Some(*window),
        }
    }

    pub fn is_enabled(&self) -> bool {
        matches!(self, Self::Enabled(_))
    }
}

impl From<Duration> for GroupingWindow {
    fn from(window: Duration) -> Self {
        Self::new(window)
    }
}

impl std::fmt::Display for GroupingWindow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Disabled => write!(f, "disabled"),
            Self::Enabled(window) => write!(f, "{:?}", window),
        }
    }
}

/// Accumulated state for one open key.
struct Group {
    events: Vec<DockerEvent>,
    generation: u64,
    deadline: Instant,
    timer: TimerHandle,
}

#[derive(Default)]
struct GrouperState {
    groups: HashMap<String, Group>,
    next_generation: u64,
    /// Set by shutdown; no group is opened afterwards.
    closed: bool,
}

impl GrouperState {
    fn mint_generation(&mut self) -> u64 {
        let generation = self.next_generation;
        self.next_generation += 1;
        generation
    }
}

/// Point-in-time view of an open group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingGroup {
    pub key: String,
    pub event_count: usize,
    pub generation: u64,
    pub deadline: Instant,
}

/// Outcome of draining the grouper.
#[derive(Debug, Default)]
pub struct ShutdownReport {
    /// Number of groups flushed by the drain.
    pub groups: usize,
    /// Number of events across those groups.
    pub events: usize,
    /// Timer flushes that were still delivering and had to be awaited.
    pub in_flight: usize,
    /// Groups whose delivery failed, by key.
    pub failures: Vec<(String, Error)>,
}

impl ShutdownReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

struct Inner {
    sink: Arc<dyn EventSink>,
    policy: Arc<dyn KeyPolicy>,
    scheduler: Arc<dyn Scheduler>,
    window: GroupingWindow,
    state: Mutex<GrouperState>,
    flushes: TaskTracker,
}

/// Buffers events per key and flushes each burst to the sink exactly once.
///
/// Cloning yields another handle to the same grouper.
#[derive(Clone)]
pub struct EventGrouper {
    inner: Arc<Inner>,
}

impl EventGrouper {
    /// Create a grouper keyed by container using tokio timers.
    pub fn new(sink: Arc<dyn EventSink>, window: GroupingWindow) -> Self {
        Self::with_components(
            sink,
            window,
            Arc::new(ContainerKey),
            Arc::new(TokioScheduler),
        )
    }

    /// Create a grouper with a custom key policy and scheduler.
    pub fn with_components(
        sink: Arc<dyn EventSink>,
        window: GroupingWindow,
        policy: Arc<dyn KeyPolicy>,
        scheduler: Arc<dyn Scheduler>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                sink,
                policy,
                scheduler,
                window,
                state: Mutex::new(GrouperState::default()),
                flushes: TaskTracker::new(),
            }),
        }
    }

    pub fn window(&self) -> GroupingWindow {
        self.inner.window
    }

    /// Accept an event.
    ///
    /// With grouping enabled the event is buffered and this returns `Ok`;
    /// failures of the eventual flush are logged, not returned. Events are
    /// delivered synchronously instead, with the sink's error returned
    /// unchanged, when grouping is disabled, when the event has no grouping
    /// key, or once the grouper has been shut down.
    pub async fn handle_event(&self, event: DockerEvent) -> Result<()> {
        let Some(window) = self.inner.window.duration() else {
            return self.inner.sink.deliver_single(&event).await;
        };

        let Some(key) = self.inner.policy.key_for(&event) else {
            debug!(
                event_type = %event.event_type,
                action = %event.action,
                "Event has no grouping key, delivering immediately"
            );
            return self.inner.sink.deliver_single(&event).await;
        };

        match self.inner.buffer(key, event, window) {
            None => Ok(()),
            Some(event) => {
                debug!(id = %event.id, "Grouper is shut down, delivering immediately");
                self.inner.sink.deliver_single(&event).await
            }
        }
    }

    /// Open groups, ordered by key.
    pub fn pending(&self) -> Vec<PendingGroup> {
        let state = self.inner.state.lock();
        let mut pending: Vec<PendingGroup> = state
            .groups
            .iter()
            .map(|(key, group)| PendingGroup {
                key: key.clone(),
                event_count: group.events.len(),
                generation: group.generation,
                deadline: group.deadline,
            })
            .collect();
        pending.sort_by(|a, b| a.key.cmp(&b.key));
        pending
    }

    /// Whether no group is open.
    pub fn is_idle(&self) -> bool {
        self.inner.state.lock().groups.is_empty()
    }

    /// Flush every open group now, from the calling task, then wait for timer
    /// flushes that were already delivering.
    ///
    /// Timers of drained groups are cancelled; any that already started find
    /// their key gone and do nothing. A failing delivery does not stop the
    /// remaining groups from being flushed. Later calls are no-ops, and
    /// events handled afterwards are delivered immediately.
    pub async fn shutdown(&self) -> ShutdownReport {
        let drained: Vec<(String, Vec<DockerEvent>)> = {
            let mut state = self.inner.state.lock();
            state.closed = true;
            state
                .groups
                .drain()
                .map(|(key, group)| {
                    group.timer.cancel();
                    (key, group.events)
                })
                .collect()
        };

        let mut report = ShutdownReport::default();
        if !drained.is_empty() {
            info!(groups = drained.len(), "Flushing pending event groups");
        }
        for (key, events) in drained {
            report.groups += 1;
            report.events += events.len();
            if let Err(e) = self.inner.deliver(&key, events).await {
                warn!(key = %key, error = %e, "Failed to deliver event group during shutdown");
                report.failures.push((key, e));
            }
        }

        self.inner.flushes.close();
        report.in_flight = self.inner.flushes.len();
        if report.in_flight > 0 {
            info!(flushes = report.in_flight, "Waiting for in-flight group flushes");
        }
        self.inner.flushes.wait().await;

        report
    }
}

impl Inner {
    /// Append `event` to the group for `key`, re-arming its timer.
    ///
    /// Returns the event back if the grouper is closed.
    fn buffer(
        self: &Arc<Self>,
        key: String,
        event: DockerEvent,
        window: Duration,
    ) -> Option<DockerEvent> {
        let mut state = self.state.lock();
        if state.closed {
            return Some(event);
        }

        let generation = state.mint_generation();
        let deadline = Instant::now() + window;
        let timer = self.arm(key.clone(), generation, window);

        match state.groups.entry(key) {
            Entry::Occupied(mut entry) => {
                let group = entry.get_mut();
                group.timer.cancel();
                group.events.push(event);
                group.generation = generation;
                group.deadline = deadline;
                group.timer = timer;
                debug!(
                    key = %entry.key(),
                    events = entry.get().events.len(),
                    generation,
                    "Extended event group"
                );
            }
            Entry::Vacant(entry) => {
                debug!(key = %entry.key(), generation, "Opened event group");
                entry.insert(Group {
                    events: vec![event],
                    generation,
                    deadline,
                    timer,
                });
            }
        }

        None
    }

    /// Schedule the flush of `generation` of `key`.
    fn arm(self: &Arc<Self>, key: String, generation: u64, window: Duration) -> TimerHandle {
        let inner = Arc::clone(self);
        self.scheduler.schedule(
            window,
            Box::pin(async move { inner.flush_expired(key, generation).await }),
        )
    }

    /// Timer callback: flush `key` if it is still at `generation`.
    async fn flush_expired(&self, key: String, generation: u64) {
        let (events, _flush) = {
            let mut state = self.state.lock();
            let current = state.groups.get(&key).map(|group| group.generation);
            if current != Some(generation) {
                trace!(key = %key, generation, ?current, "Ignoring stale group timer");
                return;
            }
            match state.groups.remove(&key) {
                Some(group) => (group.events, self.flushes.token()),
                None => return,
            }
        };

        let count = events.len();
        match self.deliver(&key, events).await {
            Ok(()) => debug!(key = %key, events = count, "Flushed event group"),
            Err(e) => warn!(key = %key, events = count, error = %e, "Failed to deliver event group"),
        }
    }

    /// Hand a flushed group to the sink. The method is picked by the event count alone.
    async fn deliver(&self, key: &str, events: Vec<DockerEvent>) -> Result<()> {
        match events.as_slice() {
            [] => Ok(()),
            [event] => self.sink.deliver_single(event).await,
            events => self.sink.deliver_batch(key, events).await,
        }
    }
}
