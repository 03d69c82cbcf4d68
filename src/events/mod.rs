//! Event fan-out
//!
//! Decouples backends from listeners: backends publish chunks keyed by
//! session id, listeners subscribe by session id, and creation progress and
//! credential prompts travel on their own broadcast topics.

mod hub;
pub mod listeners;
pub mod types;

pub use hub::{EventHub, DEFAULT_BACKLOG_BYTES};
pub use listeners::{Callback, Listeners, Subscription};
pub use types::{ProgressStep, SessionStatusEvent};
