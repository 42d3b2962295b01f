//! Docker engine integration.
//!
//! Converts engine event messages into [`DockerEvent`]s and exposes them as a
//! cancellable subscription through [`EventSource`].

mod event;
mod filters;
mod watcher;

pub use event::{Actor, DockerEvent, short_id};
pub use filters::build_filters;
pub use watcher::{DockerWatcher, EventSource, LogFetcher};
