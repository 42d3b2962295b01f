//! docker-events library crate.
//!
//! Watches the docker engine event stream, coalesces bursts of events per
//! container and relays them as chat notifications.

pub mod app;
pub mod config;
pub mod docker;
pub mod error;
pub mod grouping;
pub mod logging;
pub mod notification;

pub use error::{Error, Result};
