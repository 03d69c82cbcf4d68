//! Credential types

use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

/// A human-supplied or stored secret. Zeroed on drop, redacted in `Debug`.
#[derive(Clone)]
pub struct Secret(Zeroizing<String>);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Self(Zeroizing::new(value.into()))
    }

    pub fn expose(&self) -> &str {
        self.0.as_str()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl std::fmt::Debug for Secret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Secret(***)")
    }
}

impl From<String> for Secret {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

/// How a pending credential request was resolved
#[derive(Debug, Clone)]
pub enum CredentialOutcome {
    Provided(Secret),
    Cancelled,
}

impl CredentialOutcome {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, CredentialOutcome::Cancelled)
    }
}

/// Event payload: Broker → UI
/// Sent when a remote session needs a secret typed by the user
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CredentialPromptEvent {
    /// Routes the response back to the waiting creation attempt
    pub request_id: String,
    /// Session being created
    pub session_id: String,
    pub host: String,
    pub username: String,
    pub prompt_label: String,
}

/// Command payload: UI → Broker
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CredentialResponse {
    pub request_id: String,
    /// `None` cancels the request
    pub secret: Option<String>,
}
