//! Configuration Management Module
//!
//! Broker settings (`config.json`) and saved remote hosts (`hosts.json`).

pub mod hosts;
pub mod storage;
pub mod types;

pub use hosts::{
    HostConfig, HostConfigProvider, HostPatch, HostStoreError, JsonHostStore, MemoryHostStore,
    NewHost,
};
pub use storage::{config_dir, config_file, hosts_file, ConfigStorage, StorageError};
pub use types::{BrokerConfig, TerminalSettings, CONFIG_VERSION};
