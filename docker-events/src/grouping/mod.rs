//! Windowed grouping of docker events.
//!
//! Bursts of events concerning the same object are coalesced into a single
//! notification. See [`EventGrouper`] for the lifecycle of a group.

mod grouper;
mod key;
mod timer;

pub use grouper::{EventGrouper, GroupingWindow, PendingGroup, ShutdownReport};
pub use key::{ContainerKey, KeyPolicy};
pub use timer::{Scheduler, TimerHandle, TimerTask, TokioScheduler};
