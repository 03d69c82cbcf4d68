//! Credential prompting for remote sessions
//!
//! Remote hosts without a stored secret ask the UI for one through an
//! explicit rendezvous keyed by request id.

mod broker;
pub mod types;

pub use broker::{CredentialBroker, PendingAuthInfo, PendingSecret};
pub use types::{CredentialOutcome, CredentialPromptEvent, CredentialResponse, Secret};
