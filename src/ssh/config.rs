//! SSH transport settings

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Transport-level settings shared by every remote session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SshSettings {
    /// TCP connect plus handshake budget
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    #[serde(default = "default_keepalive_interval")]
    pub keepalive_interval_secs: u64,

    /// Missed keepalives before the server is considered gone
    #[serde(default = "default_keepalive_max")]
    pub keepalive_max: usize,

    /// Strict host key checking (default: false)
    /// - true: reject connections to unknown hosts
    /// - false: accept and record unknown hosts, still reject changed keys
    #[serde(default)]
    pub strict_host_key_checking: bool,

    /// Override for `~/.ssh/known_hosts`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub known_hosts_path: Option<PathBuf>,
}

fn default_connect_timeout() -> u64 {
    30
}

fn default_keepalive_interval() -> u64 {
    30
}

fn default_keepalive_max() -> usize {
    3
}

impl SshSettings {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    /// `None` when keepalives are disabled (interval of zero)
    pub fn keepalive_interval(&self) -> Option<Duration> {
        (self.keepalive_interval_secs > 0).then(|| Duration::from_secs(self.keepalive_interval_secs))
    }

    /// Path of the known_hosts file to verify against
    pub fn known_hosts_file(&self) -> PathBuf {
        self.known_hosts_path.clone().unwrap_or_else(|| {
            dirs::home_dir()
                .map(|h| h.join(".ssh").join("known_hosts"))
                .unwrap_or_else(|| PathBuf::from(".ssh/known_hosts"))
        })
    }
}

impl Default for SshSettings {
    fn default() -> Self {
        Self {
            connect_timeout_secs: default_connect_timeout(),
            keepalive_interval_secs: default_keepalive_interval(),
            keepalive_max: default_keepalive_max(),
            strict_host_key_checking: false,
            known_hosts_path: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_from_empty_json() {
        let settings: SshSettings = serde_json::from_str("{}").unwrap();
        assert_eq!(settings, SshSettings::default());
        assert_eq!(settings.connect_timeout(), Duration::from_secs(30));
        assert_eq!(settings.keepalive_max, 3);
    }

    #[test]
    fn test_zero_keepalive_disables() {
        let settings = SshSettings {
            keepalive_interval_secs: 0,
            ..SshSettings::default()
        };
        assert!(settings.keepalive_interval().is_none());
    }

    #[test]
    fn test_known_hosts_override() {
        let settings: SshSettings =
            serde_json::from_str(r#"{"knownHostsPath":"/tmp/kh","strictHostKeyChecking":true}"#)
                .unwrap();
        assert_eq!(settings.known_hosts_file(), PathBuf::from("/tmp/kh"));
        assert!(settings.strict_host_key_checking);
    }
}
