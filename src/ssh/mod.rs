//! SSH transport
//!
//! Password-authenticated russh connections with host key verification
//! against an OpenSSH `known_hosts` file, exposed through the
//! [`RemoteTransport`](crate::backend::RemoteTransport) seam.

mod channel;
mod client;
mod config;
mod error;
pub mod known_hosts;

pub use channel::RemoteShellBackend;
pub use client::{ClientHandler, RusshConnection, RusshTransport};
pub use config::SshSettings;
pub use error::SshError;
pub use known_hosts::{HostKeyVerification, KnownHostsStore};
