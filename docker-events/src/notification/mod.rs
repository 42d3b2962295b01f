//! Notification rendering and delivery.
//!
//! The grouper hands flushed events to an [`EventSink`]. The production sink
//! is the [`Notifier`], which renders a [`NotificationMessage`] (default
//! format or a user [`MessageTemplate`]) and sends it through every enabled
//! [`NotificationChannel`].

pub mod channels;
mod format;
mod notifier;
mod sink;
mod template;

pub use channels::{ChannelConfig, NotificationChannel};
pub use format::{NotificationMessage, format_event, format_grouped_events, unique_actions};
pub use notifier::{DEFAULT_SUBJECT, Notifier};
pub use sink::EventSink;
pub use template::{MessageTemplate, TemplateData};
