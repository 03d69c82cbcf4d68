//! Broker configuration types

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use crate::backend::SpawnRequest;
use crate::events::DEFAULT_BACKLOG_BYTES;
use crate::session::DEFAULT_MAX_SESSIONS;
use crate::ssh::SshSettings;

/// Current config schema version
pub const CONFIG_VERSION: u32 = 1;

/// Local terminal defaults
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TerminalSettings {
    pub cols: u16,
    pub rows: u16,
    /// Shell executable; platform default when absent
    #[serde(skip_serializing_if = "Option::is_none")]
    pub shell: Option<PathBuf>,
    /// Working directory; home when absent
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cwd: Option<PathBuf>,
    /// Extra environment on top of the broker's own
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub env: BTreeMap<String, String>,
    pub load_profile: bool,
}

impl Default for TerminalSettings {
    fn default() -> Self {
        Self {
            cols: 80,
            rows: 24,
            shell: None,
            cwd: None,
            env: BTreeMap::new(),
            load_profile: true,
        }
    }
}

impl TerminalSettings {
    pub fn spawn_request(&self) -> SpawnRequest {
        SpawnRequest {
            shell: self.shell.clone(),
            cols: self.cols,
            rows: self.rows,
            cwd: self.cwd.clone(),
            env: self.env.clone(),
            load_profile: self.load_profile,
        }
    }
}

/// Top-level `config.json`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BrokerConfig {
    pub version: u32,
    pub terminal: TerminalSettings,
    pub ssh: SshSettings,
    /// Bound on waiting for a typed secret; wait forever when absent
    #[serde(skip_serializing_if = "Option::is_none")]
    pub credential_timeout_secs: Option<u64>,
    pub max_sessions: usize,
    /// Output kept for a session nobody is listening to yet
    pub data_backlog_bytes: usize,
    /// tracing filter used when RUST_LOG is unset
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_filter: Option<String>,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            version: CONFIG_VERSION,
            terminal: TerminalSettings::default(),
            ssh: SshSettings::default(),
            credential_timeout_secs: None,
            max_sessions: DEFAULT_MAX_SESSIONS,
            data_backlog_bytes: DEFAULT_BACKLOG_BYTES,
            log_filter: None,
        }
    }
}

impl BrokerConfig {
    pub fn credential_timeout(&self) -> Option<Duration> {
        self.credential_timeout_secs.map(Duration::from_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_object_is_default() {
        let config: BrokerConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config, BrokerConfig::default());
        assert_eq!(config.max_sessions, 20);
        assert_eq!(config.data_backlog_bytes, 64 * 1024);
        assert!(config.credential_timeout().is_none());
    }

    #[test]
    fn test_partial_camel_case() {
        let config: BrokerConfig = serde_json::from_str(
            r#"{
                "terminal": { "cols": 120, "shell": "/bin/zsh", "env": { "LANG": "C" } },
                "ssh": { "connectTimeoutSecs": 5 },
                "credentialTimeoutSecs": 60,
                "maxSessions": 4
            }"#,
        )
        .unwrap();

        assert_eq!(config.terminal.cols, 120);
        assert_eq!(config.terminal.rows, 24);
        assert_eq!(config.ssh.connect_timeout_secs, 5);
        assert_eq!(config.ssh.keepalive_max, 3);
        assert_eq!(config.credential_timeout(), Some(Duration::from_secs(60)));
        assert_eq!(config.max_sessions, 4);

        let request = config.terminal.spawn_request();
        assert_eq!(request.shell, Some(PathBuf::from("/bin/zsh")));
        assert_eq!(request.env.get("LANG").map(String::as_str), Some("C"));
    }
}
