//! Saved remote hosts
//!
//! The broker only reads hosts through [`HostConfigProvider`]. The stores
//! here also carry the management operations a front end needs to maintain
//! the list.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;
use tracing::{info, warn};

use super::storage::{read_json, write_json_atomic, Loaded, StorageError};
use crate::credential::Secret;

/// Current hosts file schema version
pub const HOSTS_VERSION: u32 = 1;

fn default_port() -> u16 {
    22
}

/// Connection parameters for one remote host
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HostConfig {
    pub id: String,
    pub name: String,
    /// Hostname or IP
    pub address: String,
    #[serde(default = "default_port")]
    pub port: u16,
    pub username: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl HostConfig {
    /// Stored secret; an empty password counts as none
    pub fn stored_secret(&self) -> Option<Secret> {
        self.password
            .as_deref()
            .filter(|p| !p.is_empty())
            .map(Secret::new)
    }
}

/// Read-only host lookup used by the broker
#[async_trait]
pub trait HostConfigProvider: Send + Sync {
    async fn lookup_host(&self, host_ref: &str) -> Option<HostConfig>;
}

#[derive(Debug, thiserror::Error)]
pub enum HostStoreError {
    #[error("Host not found: {0}")]
    NotFound(String),

    #[error("Host already exists: {0}")]
    Duplicate(String),

    #[error("Invalid host: {0}")]
    Invalid(String),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Input for creating a host
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewHost {
    /// Generated when absent
    #[serde(default)]
    pub id: Option<String>,
    pub name: String,
    pub address: String,
    #[serde(default)]
    pub port: Option<u16>,
    pub username: String,
    #[serde(default)]
    pub password: Option<String>,
}

/// Partial update. `password: null` removes the stored password.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HostPatch {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default, deserialize_with = "present_or_null")]
    pub password: Option<Option<String>>,
}

/// Distinguishes an absent field (`None`) from an explicit null (`Some(None)`)
fn present_or_null<'de, D>(deserializer: D) -> Result<Option<Option<String>>, D::Error>
where
    D: Deserializer<'de>,
{
    Option::<String>::deserialize(deserializer).map(Some)
}

fn normalize_password(password: Option<String>) -> Option<String> {
    password.filter(|p| !p.is_empty())
}

fn validate(address: &str, username: &str, port: u16) -> Result<(), HostStoreError> {
    if address.trim().is_empty() {
        return Err(HostStoreError::Invalid("address is required".into()));
    }
    if username.trim().is_empty() {
        return Err(HostStoreError::Invalid("username is required".into()));
    }
    if port == 0 {
        return Err(HostStoreError::Invalid("port must be positive".into()));
    }
    Ok(())
}

fn build_host(input: NewHost) -> Result<HostConfig, HostStoreError> {
    let port = input.port.unwrap_or_else(default_port);
    validate(&input.address, &input.username, port)?;

    let now = Utc::now();
    Ok(HostConfig {
        id: input
            .id
            .filter(|id| !id.is_empty())
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
        name: input.name,
        address: input.address,
        port,
        username: input.username,
        password: normalize_password(input.password),
        created_at: now,
        updated_at: now,
    })
}

fn apply_patch(host: &mut HostConfig, patch: HostPatch) -> Result<(), HostStoreError> {
    let mut next = host.clone();
    if let Some(name) = patch.name {
        next.name = name;
    }
    if let Some(address) = patch.address {
        next.address = address;
    }
    if let Some(port) = patch.port {
        next.port = port;
    }
    if let Some(username) = patch.username {
        next.username = username;
    }
    if let Some(password) = patch.password {
        next.password = normalize_password(password);
    }
    validate(&next.address, &next.username, next.port)?;

    next.updated_at = Utc::now().max(host.updated_at);
    *host = next;
    Ok(())
}

fn sorted_by_name(hosts: &HashMap<String, HostConfig>) -> Vec<HostConfig> {
    let mut list: Vec<HostConfig> = hosts.values().cloned().collect();
    list.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.id.cmp(&b.id)));
    list
}

// ============================================================================
// In-memory store
// ============================================================================

/// In-memory host table
#[derive(Default)]
pub struct MemoryHostStore {
    hosts: RwLock<HashMap<String, HostConfig>>,
}

impl MemoryHostStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_hosts(hosts: impl IntoIterator<Item = HostConfig>) -> Self {
        Self {
            hosts: RwLock::new(hosts.into_iter().map(|h| (h.id.clone(), h)).collect()),
        }
    }

    pub async fn list(&self) -> Vec<HostConfig> {
        sorted_by_name(&*self.hosts.read().await)
    }

    pub async fn get(&self, id: &str) -> Option<HostConfig> {
        self.hosts.read().await.get(id).cloned()
    }

    pub async fn create(&self, input: NewHost) -> Result<HostConfig, HostStoreError> {
        let host = build_host(input)?;
        let mut hosts = self.hosts.write().await;
        if hosts.contains_key(&host.id) {
            return Err(HostStoreError::Duplicate(host.id));
        }
        hosts.insert(host.id.clone(), host.clone());
        Ok(host)
    }

    pub async fn update(&self, id: &str, patch: HostPatch) -> Result<HostConfig, HostStoreError> {
        let mut hosts = self.hosts.write().await;
        let host = hosts
            .get_mut(id)
            .ok_or_else(|| HostStoreError::NotFound(id.to_string()))?;
        apply_patch(host, patch)?;
        Ok(host.clone())
    }

    pub async fn delete(&self, id: &str) -> bool {
        self.hosts.write().await.remove(id).is_some()
    }
}

#[async_trait]
impl HostConfigProvider for MemoryHostStore {
    async fn lookup_host(&self, host_ref: &str) -> Option<HostConfig> {
        self.get(host_ref).await
    }
}

// ============================================================================
// JSON file store
// ============================================================================

#[derive(Debug, Serialize, Deserialize)]
struct HostsFile {
    #[serde(default)]
    version: u32,
    #[serde(default)]
    hosts: Vec<HostConfig>,
}

/// `hosts.json` backed store. Every mutation is written through atomically.
pub struct JsonHostStore {
    path: PathBuf,
    hosts: RwLock<HashMap<String, HostConfig>>,
}

impl JsonHostStore {
    /// Load the file. Missing starts empty; corrupted is backed up and starts empty.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self, HostStoreError> {
        let path = path.into();
        let hosts = match read_json::<HostsFile>(&path).await? {
            Loaded::Parsed(file) => {
                if file.version > HOSTS_VERSION {
                    return Err(StorageError::VersionTooNew {
                        found: file.version,
                        supported: HOSTS_VERSION,
                    }
                    .into());
                }
                file.hosts
            }
            Loaded::Missing => Vec::new(),
            Loaded::Corrupted => {
                warn!("Starting with an empty host list");
                Vec::new()
            }
        };

        info!("Loaded {} hosts from {:?}", hosts.len(), path);
        Ok(Self {
            path,
            hosts: RwLock::new(hosts.into_iter().map(|h| (h.id.clone(), h)).collect()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn persist(&self, hosts: &HashMap<String, HostConfig>) -> Result<(), HostStoreError> {
        let file = HostsFile {
            version: HOSTS_VERSION,
            hosts: sorted_by_name(hosts),
        };
        write_json_atomic(&self.path, &file).await?;
        Ok(())
    }

    pub async fn list(&self) -> Vec<HostConfig> {
        sorted_by_name(&*self.hosts.read().await)
    }

    pub async fn get(&self, id: &str) -> Option<HostConfig> {
        self.hosts.read().await.get(id).cloned()
    }

    pub async fn create(&self, input: NewHost) -> Result<HostConfig, HostStoreError> {
        let host = build_host(input)?;
        let mut hosts = self.hosts.write().await;
        if hosts.contains_key(&host.id) {
            return Err(HostStoreError::Duplicate(host.id));
        }
        hosts.insert(host.id.clone(), host.clone());
        if let Err(e) = self.persist(&hosts).await {
            hosts.remove(&host.id);
            return Err(e);
        }
        info!("Saved host {} ({})", host.id, host.name);
        Ok(host)
    }

    pub async fn update(&self, id: &str, patch: HostPatch) -> Result<HostConfig, HostStoreError> {
        let mut hosts = self.hosts.write().await;
        let previous = hosts
            .get(id)
            .cloned()
            .ok_or_else(|| HostStoreError::NotFound(id.to_string()))?;

        let mut updated = previous.clone();
        apply_patch(&mut updated, patch)?;
        hosts.insert(id.to_string(), updated.clone());
        if let Err(e) = self.persist(&hosts).await {
            hosts.insert(id.to_string(), previous);
            return Err(e);
        }
        Ok(updated)
    }

    pub async fn delete(&self, id: &str) -> Result<bool, HostStoreError> {
        let mut hosts = self.hosts.write().await;
        let Some(previous) = hosts.remove(id) else {
            return Ok(false);
        };
        if let Err(e) = self.persist(&hosts).await {
            hosts.insert(id.to_string(), previous);
            return Err(e);
        }
        info!("Deleted host {}", id);
        Ok(true)
    }
}

#[async_trait]
impl HostConfigProvider for JsonHostStore {
    async fn lookup_host(&self, host_ref: &str) -> Option<HostConfig> {
        self.get(host_ref).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn web_host() -> NewHost {
        NewHost {
            id: Some("web".into()),
            name: "Web".into(),
            address: "10.0.0.5".into(),
            port: None,
            username: "deploy".into(),
            password: Some(String::new()),
        }
    }

    #[tokio::test]
    async fn test_create_defaults() {
        let store = MemoryHostStore::new();
        let host = store.create(web_host()).await.unwrap();

        assert_eq!(host.port, 22);
        // Empty password is stored as none
        assert_eq!(host.password, None);
        assert!(host.stored_secret().is_none());
        assert_eq!(host.created_at, host.updated_at);
    }

    #[tokio::test]
    async fn test_duplicate_and_invalid_rejected() {
        let store = MemoryHostStore::new();
        store.create(web_host()).await.unwrap();
        assert!(matches!(
            store.create(web_host()).await,
            Err(HostStoreError::Duplicate(_))
        ));

        let mut bad = web_host();
        bad.id = None;
        bad.username = " ".into();
        assert!(matches!(store.create(bad).await, Err(HostStoreError::Invalid(_))));
    }

    #[tokio::test]
    async fn test_list_sorted_by_name() {
        let store = MemoryHostStore::new();
        for name in ["zeta", "alpha", "mid"] {
            store
                .create(NewHost {
                    name: name.into(),
                    address: "h".into(),
                    username: "u".into(),
                    ..NewHost::default()
                })
                .await
                .unwrap();
        }
        let names: Vec<String> = store.list().await.into_iter().map(|h| h.name).collect();
        assert_eq!(names, vec!["alpha", "mid", "zeta"]);
    }

    #[test]
    fn test_patch_null_password() {
        let patch: HostPatch = serde_json::from_str(r#"{"password": null}"#).unwrap();
        assert_eq!(patch.password, Some(None));

        let patch: HostPatch = serde_json::from_str(r#"{"name": "x"}"#).unwrap();
        assert_eq!(patch.password, None);
    }

    #[tokio::test]
    async fn test_update_and_clear_password() {
        let store = MemoryHostStore::new();
        let mut input = web_host();
        input.password = Some("s3cret".into());
        let created = store.create(input).await.unwrap();
        assert_eq!(created.stored_secret().unwrap().expose(), "s3cret");

        let updated = store
            .update(
                "web",
                HostPatch {
                    port: Some(2222),
                    password: Some(None),
                    ..HostPatch::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.port, 2222);
        assert_eq!(updated.password, None);
        assert!(updated.updated_at >= created.updated_at);
        assert_eq!(updated.created_at, created.created_at);

        assert!(matches!(
            store.update("nope", HostPatch::default()).await,
            Err(HostStoreError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_json_store_persists() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("hosts.json");

        let store = JsonHostStore::open(&path).await.unwrap();
        assert!(store.list().await.is_empty());
        store.create(web_host()).await.unwrap();

        let reopened = JsonHostStore::open(&path).await.unwrap();
        let host = reopened.lookup_host("web").await.unwrap();
        assert_eq!(host.address, "10.0.0.5");

        assert!(reopened.delete("web").await.unwrap());
        assert!(!reopened.delete("web").await.unwrap());
        let again = JsonHostStore::open(&path).await.unwrap();
        assert!(again.lookup_host("web").await.is_none());
    }

    #[tokio::test]
    async fn test_json_store_reads_port_default() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("hosts.json");
        std::fs::write(
            &path,
            r#"{"version":1,"hosts":[{"id":"a","name":"A","address":"a.example","username":"root",
                "createdAt":"2024-01-01T00:00:00Z","updatedAt":"2024-01-01T00:00:00Z"}]}"#,
        )
        .unwrap();

        let store = JsonHostStore::open(&path).await.unwrap();
        assert_eq!(store.get("a").await.unwrap().port, 22);
    }
}
