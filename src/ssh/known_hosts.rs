//! Known hosts verification
//!
//! Reads an OpenSSH `known_hosts` file into memory and answers whether a
//! server key is verified, unknown, or changed. Newly trusted keys are
//! appended to the same file.

use std::collections::HashMap;
use std::fs::{self, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use parking_lot::RwLock;
use russh::keys::{PublicKey, PublicKeyBase64};
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use super::error::SshError;

/// Result of host key verification
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostKeyVerification {
    Verified,
    /// First connection to this host (or to this key type)
    Unknown { fingerprint: String },
    /// Stored key of the same type differs
    Changed {
        expected_fingerprint: String,
        actual_fingerprint: String,
    },
}

#[derive(Clone, Debug, PartialEq, Eq)]
struct HostKeyEntry {
    key_type: String,
    key_data: String,
}

pub struct KnownHostsStore {
    /// `host` or `[host]:port` -> keys, one per type in practice
    hosts: RwLock<HashMap<String, Vec<HostKeyEntry>>>,
    path: PathBuf,
}

impl KnownHostsStore {
    /// Load `path`. A missing or unreadable file starts an empty store.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let hosts = match Self::load(&path) {
            Ok(hosts) => hosts,
            Err(e) => {
                warn!("Failed to load known_hosts {:?}: {}", path, e);
                HashMap::new()
            }
        };
        Self {
            hosts: RwLock::new(hosts),
            path,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load(path: &Path) -> Result<HashMap<String, Vec<HostKeyEntry>>, SshError> {
        let mut hosts: HashMap<String, Vec<HostKeyEntry>> = HashMap::new();
        if !path.exists() {
            return Ok(hosts);
        }

        let reader = BufReader::new(fs::File::open(path)?);
        let mut entry_count = 0;

        for line in reader.lines() {
            let line = line?;
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            // hostname[,alias] keytype base64key [comment]
            let mut parts = line.split_whitespace();
            let (Some(hostnames), Some(key_type), Some(key_data)) =
                (parts.next(), parts.next(), parts.next())
            else {
                continue;
            };

            let entry = HostKeyEntry {
                key_type: key_type.to_string(),
                key_data: key_data.to_string(),
            };

            for hostname in hostnames.split(',') {
                // Hashed entries (|1|...) cannot be matched without the salt logic
                if hostname.starts_with('|') || hostname.starts_with('@') {
                    continue;
                }
                hosts
                    .entry(hostname.to_lowercase())
                    .or_default()
                    .push(entry.clone());
                entry_count += 1;
            }
        }

        info!(
            "Loaded {} known host entries ({} unique hosts) from {:?}",
            entry_count,
            hosts.len(),
            path
        );
        Ok(hosts)
    }

    /// Lookup key in known_hosts notation
    fn make_key(host: &str, port: u16) -> String {
        let host = host.to_lowercase();
        if port == 22 {
            host
        } else {
            format!("[{}]:{}", host, port)
        }
    }

    /// SHA256 fingerprint in OpenSSH display form
    pub fn fingerprint(key: &PublicKey) -> String {
        Self::fingerprint_bytes(&key.public_key_bytes())
    }

    fn fingerprint_bytes(bytes: &[u8]) -> String {
        let hash = Sha256::digest(bytes);
        format!("SHA256:{}", BASE64.encode(hash).trim_end_matches('='))
    }

    fn fingerprint_b64(stored_b64: &str) -> String {
        match BASE64.decode(stored_b64) {
            Ok(bytes) => Self::fingerprint_bytes(&bytes),
            Err(_) => "unknown".to_string(),
        }
    }

    pub fn verify(&self, host: &str, port: u16, key: &PublicKey) -> HostKeyVerification {
        let lookup_key = Self::make_key(host, port);
        let actual_b64 = BASE64.encode(key.public_key_bytes());
        let actual_type = key.algorithm().as_str().to_string();
        let fingerprint = Self::fingerprint(key);

        let hosts = self.hosts.read();
        let Some(entries) = hosts.get(&lookup_key) else {
            debug!("Unknown host: {}", lookup_key);
            return HostKeyVerification::Unknown { fingerprint };
        };

        let same_type: Vec<&HostKeyEntry> =
            entries.iter().filter(|e| e.key_type == actual_type).collect();
        if same_type.is_empty() {
            debug!(
                "Host {} known but no {} key stored, treating as new",
                lookup_key, actual_type
            );
            return HostKeyVerification::Unknown { fingerprint };
        }
        if same_type.iter().any(|e| e.key_data == actual_b64) {
            debug!("Host key verified for {} ({})", lookup_key, actual_type);
            return HostKeyVerification::Verified;
        }

        HostKeyVerification::Changed {
            expected_fingerprint: Self::fingerprint_b64(&same_type[0].key_data),
            actual_fingerprint: fingerprint,
        }
    }

    /// Trust a key: remember it and append it to the file
    pub fn add_host(&self, host: &str, port: u16, key: &PublicKey) -> Result<(), SshError> {
        let lookup_key = Self::make_key(host, port);
        let entry = HostKeyEntry {
            key_type: key.algorithm().as_str().to_string(),
            key_data: BASE64.encode(key.public_key_bytes()),
        };

        self.append_to_file(&lookup_key, &entry)?;
        info!(
            "Added host key for {} ({}) to {:?}",
            lookup_key, entry.key_type, self.path
        );
        self.hosts.write().entry(lookup_key).or_default().push(entry);
        Ok(())
    }

    fn append_to_file(&self, host: &str, entry: &HostKeyEntry) -> Result<(), SshError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        writeln!(file, "{} {} {}", host, entry.key_type, entry.key_data)?;
        Ok(())
    }
}
