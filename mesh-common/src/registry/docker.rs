//! Container introspection.
//!
//! A containerized instance does not know which host port Docker published
//! for it, so it asks the Docker Engine API about itself
//! (`GET /containers/<hostname>/json`).

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::StatusCode;
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::OnceCell;
use tracing::{debug, info};

use crate::config::MeshConfig;
use crate::error::{MeshError, Result};

pub const DOCKER_ENV_MARKER: &str = "/.dockerenv";
pub const DEFAULT_DOCKER_SOCKET: &str = "/var/run/docker.sock";

/// What the registrar needs to know about its own container.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContainerAttributes {
    /// `NetworkSettings.Gateway`, absent when Docker reports an empty string.
    pub gateway: Option<String>,
    /// Published host ports, in the order Docker lists the container ports.
    pub host_ports: Vec<String>,
}

impl ContainerAttributes {
    /// Extract the attributes from a `docker inspect` document.
    ///
    /// Container ports that are exposed but not published (`null` bindings)
    /// are skipped.
    pub fn from_inspect(document: &Value) -> Result<Self> {
        let settings = document.get("NetworkSettings").ok_or_else(|| {
            MeshError::ContainerRuntime("inspect document has no NetworkSettings".to_string())
        })?;

        let gateway = settings
            .get("Gateway")
            .and_then(Value::as_str)
            .filter(|g| !g.is_empty())
            .map(str::to_string);

        let mut host_ports = Vec::new();
        if let Some(ports) = settings.get("Ports").and_then(Value::as_object) {
            for bindings in ports.values() {
                let first = bindings
                    .as_array()
                    .and_then(|b| b.first())
                    .and_then(|b| b.get("HostPort"))
                    .and_then(Value::as_str)
                    .filter(|p| !p.is_empty());
                if let Some(port) = first {
                    host_ports.push(port.to_string());
                }
            }
        }

        Ok(Self {
            gateway,
            host_ports,
        })
    }
}

#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    fn is_containerized(&self) -> bool;

    /// Hostname of this container, which Docker sets to the container id.
    fn hostname(&self) -> Result<String>;

    async fn attributes(&self) -> Result<ContainerAttributes>;
}

/// Runtime for processes that are not in a container.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoContainer;

#[async_trait]
impl ContainerRuntime for NoContainer {
    fn is_containerized(&self) -> bool {
        false
    }

    fn hostname(&self) -> Result<String> {
        Err(MeshError::ContainerRuntime("not running in a container".to_string()))
    }

    async fn attributes(&self) -> Result<ContainerAttributes> {
        Err(MeshError::ContainerRuntime("not running in a container".to_string()))
    }
}

/// Fixed container answers, for tests and for hosts where the Docker API is
/// not reachable but the values are known.
#[derive(Debug, Clone)]
pub struct StaticContainer {
    hostname: String,
    attributes: ContainerAttributes,
}

impl StaticContainer {
    pub fn new(hostname: impl Into<String>, attributes: ContainerAttributes) -> Self {
        Self {
            hostname: hostname.into(),
            attributes,
        }
    }
}

#[async_trait]
impl ContainerRuntime for StaticContainer {
    fn is_containerized(&self) -> bool {
        true
    }

    fn hostname(&self) -> Result<String> {
        Ok(self.hostname.clone())
    }

    async fn attributes(&self) -> Result<ContainerAttributes> {
        Ok(self.attributes.clone())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum DockerEndpoint {
    Unix(PathBuf),
    Http(String),
}

impl DockerEndpoint {
    /// Interpret a `DOCKER_HOST` value.
    fn parse(docker_host: Option<&str>) -> Result<Self> {
        let Some(host) = docker_host.map(str::trim).filter(|h| !h.is_empty()) else {
            return Ok(DockerEndpoint::Unix(PathBuf::from(DEFAULT_DOCKER_SOCKET)));
        };

        if let Some(path) = host.strip_prefix("unix://") {
            return Ok(DockerEndpoint::Unix(PathBuf::from(path)));
        }
        if let Some(authority) = host.strip_prefix("tcp://") {
            return Ok(DockerEndpoint::Http(format!(
                "http://{}",
                authority.trim_end_matches('/')
            )));
        }
        if host.starts_with("http://") {
            return Ok(DockerEndpoint::Http(host.trim_end_matches('/').to_string()));
        }

        Err(MeshError::config(format!(
            "Unsupported DOCKER_HOST '{}' (expected unix://, tcp:// or http://)",
            host
        )))
    }
}

/// Docker Engine backed [`ContainerRuntime`].
///
/// The inspect result is fetched on first use and kept for the life of the
/// process. A failed lookup is not cached.
pub struct DockerRuntime {
    endpoint: DockerEndpoint,
    marker: PathBuf,
    hostname: Option<String>,
    http: reqwest::Client,
    attributes: OnceCell<ContainerAttributes>,
}

impl DockerRuntime {
    pub fn new(docker_host: Option<&str>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()?;

        Ok(Self {
            endpoint: DockerEndpoint::parse(docker_host)?,
            marker: PathBuf::from(DOCKER_ENV_MARKER),
            hostname: None,
            http,
            attributes: OnceCell::new(),
        })
    }

    pub fn from_config(config: &MeshConfig) -> Result<Self> {
        Self::new(config.docker_host.as_deref())
    }

    /// Use another file than `/.dockerenv` to detect a container.
    pub fn with_marker(mut self, marker: impl Into<PathBuf>) -> Self {
        self.marker = marker.into();
        self
    }

    /// Skip hostname discovery and use `hostname`.
    pub fn with_hostname(mut self, hostname: impl Into<String>) -> Self {
        self.hostname = Some(hostname.into());
        self
    }

    #[tracing::instrument(skip(self))]
    async fn inspect(&self) -> Result<ContainerAttributes> {
        let hostname = self.hostname()?;
        let path = format!("/containers/{}/json", hostname);

        let (status, body) = match &self.endpoint {
            DockerEndpoint::Unix(socket) => unix_get(socket, &path).await?,
            DockerEndpoint::Http(base) => {
                let response = self
                    .http
                    .get(format!("{}{}", base, path))
                    .send()
                    .await
                    .map_err(|e| {
                        MeshError::ContainerRuntime(format!("Docker API unreachable: {}", e))
                    })?;
                let status = response.status();
                let body = response.bytes().await.map_err(|e| {
                    MeshError::ContainerRuntime(format!("Failed to read Docker response: {}", e))
                })?;
                (status, body)
            }
        };

        if status == StatusCode::NOT_FOUND {
            return Err(MeshError::ContainerRuntime(format!(
                "Cannot obtain docker attributes: container '{}' not found",
                hostname
            )));
        }
        if !status.is_success() {
            return Err(MeshError::ContainerRuntime(format!(
                "Docker API returned {} for container '{}'",
                status, hostname
            )));
        }

        let document: Value = serde_json::from_slice(&body).map_err(|e| {
            MeshError::ContainerRuntime(format!("Invalid inspect document: {}", e))
        })?;
        let attributes = ContainerAttributes::from_inspect(&document)?;

        info!(
            container = %hostname,
            gateway = ?attributes.gateway,
            host_ports = ?attributes.host_ports,
            "Fetched container attributes"
        );

        Ok(attributes)
    }
}

#[async_trait]
impl ContainerRuntime for DockerRuntime {
    fn is_containerized(&self) -> bool {
        self.marker.exists()
    }

    fn hostname(&self) -> Result<String> {
        if let Some(hostname) = &self.hostname {
            return Ok(hostname.clone());
        }
        if let Ok(hostname) = std::env::var("HOSTNAME")
            && !hostname.trim().is_empty()
        {
            return Ok(hostname.trim().to_string());
        }

        let hostname = std::fs::read_to_string("/etc/hostname").map_err(|e| {
            MeshError::ContainerRuntime(format!("Cannot read /etc/hostname: {}", e))
        })?;
        let hostname = hostname.trim();
        if hostname.is_empty() {
            return Err(MeshError::ContainerRuntime("hostname is empty".to_string()));
        }
        Ok(hostname.to_string())
    }

    async fn attributes(&self) -> Result<ContainerAttributes> {
        self.attributes
            .get_or_try_init(|| self.inspect())
            .await
            .cloned()
    }
}

#[cfg(unix)]
async fn unix_get(socket: &Path, path: &str) -> Result<(StatusCode, Bytes)> {
    use http_body_util::{BodyExt, Empty};
    use hyper_util::rt::TokioIo;

    let socket_error = |e: &dyn std::fmt::Display| {
        MeshError::ContainerRuntime(format!(
            "Docker socket {} unreachable: {}",
            socket.display(),
            e
        ))
    };

    let stream = tokio::net::UnixStream::connect(socket)
        .await
        .map_err(|e| socket_error(&e))?;
    let (mut sender, connection) = hyper::client::conn::http1::handshake(TokioIo::new(stream))
        .await
        .map_err(|e| socket_error(&e))?;
    tokio::spawn(async move {
        if let Err(e) = connection.await {
            debug!(error = %e, "Docker socket connection closed");
        }
    });

    let request = http::Request::get(path)
        .header(http::header::HOST, "docker")
        .body(Empty::<Bytes>::new())
        .map_err(|e| MeshError::ContainerRuntime(format!("Invalid Docker request: {}", e)))?;

    let response = sender
        .send_request(request)
        .await
        .map_err(|e| socket_error(&e))?;
    let status = response.status();
    let body = response
        .into_body()
        .collect()
        .await
        .map_err(|e| socket_error(&e))?
        .to_bytes();

    Ok((status, body))
}

#[cfg(not(unix))]
async fn unix_get(socket: &Path, _path: &str) -> Result<(StatusCode, Bytes)> {
    Err(MeshError::ContainerRuntime(format!(
        "unix socket {} is not supported on this platform",
        socket.display()
    )))
}
