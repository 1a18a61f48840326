//! etcd v2 keys API client.

use async_trait::async_trait;
use reqwest::{RequestBuilder, Response, StatusCode, Url};
use serde::Deserialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tracing::{debug, instrument, warn};

use super::CoordinationStore;
use crate::error::{MeshError, Result};

/// etcd's "Key not found" error code.
const KEY_NOT_FOUND: u32 = 100;

/// Configuration for the etcd client.
#[derive(Clone, Debug)]
pub struct EtcdConfig {
    /// Cluster members, tried in order.
    pub endpoints: Vec<Url>,
    /// Connection timeout.
    pub connect_timeout: Duration,
    /// Request timeout.
    pub request_timeout: Duration,
}

impl Default for EtcdConfig {
    fn default() -> Self {
        Self {
            endpoints: Vec::new(),
            connect_timeout: Duration::from_secs(5),
            request_timeout: Duration::from_secs(10),
        }
    }
}

#[derive(Debug, Deserialize)]
struct KeysResponse {
    node: Option<Node>,
}

#[derive(Debug, Deserialize)]
struct Node {
    value: Option<String>,
}

#[derive(Debug, Deserialize)]
struct EtcdErrorBody {
    #[serde(rename = "errorCode")]
    error_code: u32,
    #[serde(default)]
    message: String,
}

/// Client for the etcd cluster backing the mesh.
///
/// Cheap to clone; all clones share one connection pool and the same
/// preferred endpoint.
#[derive(Clone)]
pub struct EtcdClient {
    http: reqwest::Client,
    endpoints: Arc<Vec<Url>>,
    preferred: Arc<AtomicUsize>,
}

impl EtcdClient {
    pub fn new(config: EtcdConfig) -> Result<Self> {
        if config.endpoints.is_empty() {
            return Err(MeshError::config("etcd service has not been configured"));
        }

        let http = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout)
            .timeout(config.request_timeout)
            .build()?;

        tracing::info!(
            endpoints = ?config.endpoints.iter().map(Url::as_str).collect::<Vec<_>>(),
            "etcd client configured"
        );

        Ok(Self {
            http,
            endpoints: Arc::new(config.endpoints),
            preferred: Arc::new(AtomicUsize::new(0)),
        })
    }

    /// Create a client from a raw `ETCD` style endpoint list.
    pub fn from_endpoints(raw: &str) -> Result<Self> {
        Self::new(EtcdConfig {
            endpoints: super::parse_endpoints(raw)?,
            ..Default::default()
        })
    }

    pub fn endpoints(&self) -> &[Url] {
        &self.endpoints
    }

    fn key_url(endpoint: &Url, path: &str) -> String {
        let base = endpoint.as_str().trim_end_matches('/');
        if path.starts_with('/') {
            format!("{}/v2/keys{}", base, path)
        } else {
            format!("{}/v2/keys/{}", base, path)
        }
    }

    /// Send a request to the first endpoint that answers, starting with the
    /// one that answered last time. Only transport failures move on to the
    /// next member.
    async fn dispatch<F>(&self, path: &str, build: F) -> Result<Response>
    where
        F: Fn(&reqwest::Client, String) -> RequestBuilder,
    {
        let count = self.endpoints.len();
        let start = self.preferred.load(Ordering::Relaxed) % count;
        let mut last_error = None;

        for offset in 0..count {
            let index = (start + offset) % count;
            let endpoint = &self.endpoints[index];
            let url = Self::key_url(endpoint, path);

            match build(&self.http, url).send().await {
                Ok(response) => {
                    if index != start {
                        debug!(endpoint = %endpoint, "Switched to etcd endpoint");
                    }
                    self.preferred.store(index, Ordering::Relaxed);
                    return Ok(response);
                }
                Err(err) if err.is_connect() || err.is_timeout() => {
                    warn!(endpoint = %endpoint, error = %err, "etcd endpoint unreachable");
                    last_error = Some(err);
                }
                Err(err) => return Err(MeshError::store(err.to_string())),
            }
        }

        Err(MeshError::store(match last_error {
            Some(err) => format!("no etcd endpoint reachable: {}", err),
            None => "no etcd endpoint reachable".to_string(),
        }))
    }

    /// A 404 means absence only when etcd itself says "key not found".
    /// Anything else, such as a proxy's 404 page, is a store error.
    async fn not_found(response: Response) -> Result<()> {
        let status = response.status();
        match response.json::<EtcdErrorBody>().await {
            Ok(body) if body.error_code == KEY_NOT_FOUND => Ok(()),
            Ok(body) => Err(MeshError::store(format!(
                "etcd error {} ({}): {}",
                body.error_code, status, body.message
            ))),
            Err(_) => Err(MeshError::store(format!(
                "etcd returned {} without an etcd error body",
                status
            ))),
        }
    }

    async fn error_from(response: Response) -> MeshError {
        let status = response.status();
        match response.json::<EtcdErrorBody>().await {
            Ok(body) => MeshError::store(format!(
                "etcd error {} ({}): {}",
                body.error_code, status, body.message
            )),
            Err(_) => MeshError::store(format!("etcd returned {}", status)),
        }
    }
}

#[async_trait]
impl CoordinationStore for EtcdClient {
    #[instrument(skip(self))]
    async fn read(&self, path: &str) -> Result<Option<String>> {
        let response = self.dispatch(path, |http, url| http.get(url)).await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Self::not_found(response).await.map(|()| None);
        }
        if !response.status().is_success() {
            return Err(Self::error_from(response).await);
        }

        let body: KeysResponse = response
            .json()
            .await
            .map_err(|e| MeshError::store(format!("Malformed etcd response: {}", e)))?;

        // Directories have no value but still exist.
        Ok(Some(body.node.and_then(|n| n.value).unwrap_or_default()))
    }

    #[instrument(skip(self, value))]
    async fn write(&self, path: &str, value: &str, ttl: Option<Duration>) -> Result<()> {
        let ttl = ttl.map(|t| t.as_secs().max(1).to_string());
        let response = self
            .dispatch(path, |http, url| {
                let mut form = vec![("value", value.to_string())];
                if let Some(ttl) = &ttl {
                    form.push(("ttl", ttl.clone()));
                }
                http.put(url).form(&form)
            })
            .await?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(Self::error_from(response).await)
        }
    }

    #[instrument(skip(self))]
    async fn delete(&self, path: &str) -> Result<()> {
        let response = self.dispatch(path, |http, url| http.delete(url)).await?;

        if response.status().is_success() {
            Ok(())
        } else if response.status() == StatusCode::NOT_FOUND {
            Self::not_found(response).await
        } else {
            Err(Self::error_from(response).await)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_v2_key_urls() {
        let endpoint = Url::parse("http://etcd:2379/").unwrap();
        assert_eq!(
            EtcdClient::key_url(&endpoint, "/services/chat/location"),
            "http://etcd:2379/v2/keys/services/chat/location"
        );
        assert_eq!(
            EtcdClient::key_url(&endpoint, "revoked-tokens/abc"),
            "http://etcd:2379/v2/keys/revoked-tokens/abc"
        );
    }

    #[test]
    fn requires_at_least_one_endpoint() {
        assert!(EtcdClient::new(EtcdConfig::default()).is_err());
    }
}
