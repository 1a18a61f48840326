//! Coordination store access.
//!
//! The mesh keeps its service registry and revoked-token list in an external
//! TTL key/value store. Everything above this module talks to it through the
//! [`CoordinationStore`] trait; [`EtcdClient`] speaks the etcd v2 keys API and
//! [`InMemoryStore`] keeps keys in process for tests and offline runs.

pub mod etcd;
pub mod memory;

use async_trait::async_trait;
use reqwest::Url;
use std::time::Duration;

use crate::config::MeshConfig;
use crate::error::{MeshError, Result};

pub use etcd::{EtcdClient, EtcdConfig};
pub use memory::InMemoryStore;

#[async_trait]
pub trait CoordinationStore: Send + Sync {
    /// Returns `None` when the key does not exist (or has expired).
    async fn read(&self, path: &str) -> Result<Option<String>>;

    /// Writes `value` at `path`. With a `ttl` the key disappears unless it is
    /// written again before the lease runs out.
    async fn write(&self, path: &str, value: &str, ttl: Option<Duration>) -> Result<()>;

    /// Removes `path`. Deleting a missing key succeeds.
    async fn delete(&self, path: &str) -> Result<()>;
}

/// Parse the comma separated endpoint list from the `ETCD` variable.
///
/// Only plain `http://host:port` entries are accepted.
pub fn parse_endpoints(raw: &str) -> Result<Vec<Url>> {
    let mut endpoints = Vec::new();

    for entry in raw.split(',').map(str::trim).filter(|e| !e.is_empty()) {
        let Some(authority) = entry.strip_prefix("http://") else {
            return Err(MeshError::config(format!(
                "Only http is supported for etcd (got '{}')",
                entry
            )));
        };

        let authority = authority.trim_end_matches('/');
        let (host, port) = authority.split_once(':').ok_or_else(|| {
            MeshError::config(format!("etcd endpoint '{}' must be host:port", entry))
        })?;
        if host.is_empty() {
            return Err(MeshError::config(format!(
                "etcd endpoint '{}' has no host",
                entry
            )));
        }
        let port: u16 = port.parse().map_err(|_| {
            MeshError::config(format!("etcd endpoint '{}' has an invalid port", entry))
        })?;

        let url = Url::parse(&format!("http://{}:{}/", host, port))
            .map_err(|e| MeshError::config(format!("Invalid etcd endpoint '{}': {}", entry, e)))?;
        endpoints.push(url);
    }

    if endpoints.is_empty() {
        return Err(MeshError::config("etcd service has not been configured"));
    }

    Ok(endpoints)
}

/// Build an etcd client from the process configuration.
pub fn etcd_client(config: &MeshConfig) -> Result<EtcdClient> {
    EtcdClient::new(EtcdConfig {
        endpoints: config.etcd_endpoints()?,
        ..Default::default()
    })
}
