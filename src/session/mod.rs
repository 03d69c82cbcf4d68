//! Session Management Module
//!
//! - Lifecycle state machine with validated transitions
//! - Concurrent session limit
//! - Thread-safe session access via DashMap
//! - Per-session cancellation of in-flight creation

mod registry;
mod state;
pub mod types;

pub use registry::{RegistryError, SessionRegistry, DEFAULT_MAX_SESSIONS};
pub use state::{SessionState, SessionStateMachine, StateError};
pub use types::{NewSession, SessionInfo, SessionKind, SessionTarget};
