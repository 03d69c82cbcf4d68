//! Keystone - a terminal session broker
//!
//! Multiplexes local PTY shells and remote SSH shells behind one API that
//! streams output to subscribers and accepts keystrokes, resizes and
//! out-of-band credential responses.

pub mod backend;
pub mod broker;
pub mod config;
pub mod credential;
pub mod events;
#[cfg(feature = "local-terminal")]
pub mod local;
pub mod session;
pub mod ssh;

pub use backend::{BackendKind, PtySpawner, RemoteTransport, ShellBackend, TransportConnection};
pub use broker::{
    CreateSessionRequest, CreateSessionResponse, CreationError, SessionBroker,
    SessionBrokerBuilder,
};
pub use config::{BrokerConfig, HostConfig, HostConfigProvider};
pub use events::{ProgressStep, SessionStatusEvent, Subscription};
pub use session::{SessionInfo, SessionKind, SessionState, SessionTarget};

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Install the global tracing subscriber.
///
/// `RUST_LOG` wins; otherwise `fallback_filter`, otherwise `info`. A second
/// call is a no-op.
pub fn init_logging(fallback_filter: Option<&str>) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(fallback_filter.unwrap_or("info")))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .try_init();
}
