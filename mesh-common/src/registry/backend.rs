use async_trait::async_trait;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use super::identity::ServiceIdentity;
use crate::error::{MeshError, Result};
use crate::store::CoordinationStore;

pub const TRAEFIK_ROOT: &str = "/traefik";
pub const SERVICES_ROOT: &str = "/services";

/// Which load balancer reads the registration records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LoadBalancerKind {
    /// Flat `/services/...` keys consumed by a confd-driven HAProxy.
    #[default]
    Haproxy,
    /// Traefik's etcd provider tree under `/traefik`.
    Traefik,
}

impl FromStr for LoadBalancerKind {
    type Err = MeshError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "haproxy" => Ok(LoadBalancerKind::Haproxy),
            "traefik" => Ok(LoadBalancerKind::Traefik),
            other => Err(MeshError::config(format!(
                "Unsupported LOAD_BALANCER '{}' (expected haproxy or traefik)",
                other
            ))),
        }
    }
}

impl fmt::Display for LoadBalancerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LoadBalancerKind::Haproxy => f.write_str("haproxy"),
            LoadBalancerKind::Traefik => f.write_str("traefik"),
        }
    }
}

/// A single key written during a heartbeat.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistrationRecord {
    pub path: String,
    pub value: String,
    /// `None` for keys shared by every instance of the service.
    pub ttl: Option<Duration>,
}

impl RegistrationRecord {
    fn leased(path: String, value: impl Into<String>, lease: Duration) -> Self {
        Self {
            path,
            value: value.into(),
            ttl: Some(lease),
        }
    }

    fn permanent(path: String, value: impl Into<String>) -> Self {
        Self {
            path,
            value: value.into(),
            ttl: None,
        }
    }
}

#[async_trait]
pub trait RegistrationBackend: Send + Sync {
    fn kind(&self) -> LoadBalancerKind;

    /// Keys announcing `identity`, in write order.
    fn records(&self, identity: &ServiceIdentity, lease: Duration) -> Vec<RegistrationRecord>;

    /// Write every record. Stops at the first failed write; the next
    /// heartbeat writes the whole set again.
    async fn register(
        &self,
        store: &dyn CoordinationStore,
        identity: &ServiceIdentity,
        lease: Duration,
    ) -> Result<()> {
        for record in self.records(identity, lease) {
            store.write(&record.path, &record.value, record.ttl).await?;
        }
        Ok(())
    }
}

/// `/services/<name>/...` layout.
#[derive(Debug, Clone)]
pub struct FlatKeyBackend {
    algorithm: String,
}

impl FlatKeyBackend {
    pub fn new(algorithm: impl Into<String>) -> Self {
        Self {
            algorithm: algorithm.into(),
        }
    }
}

#[async_trait]
impl RegistrationBackend for FlatKeyBackend {
    fn kind(&self) -> LoadBalancerKind {
        LoadBalancerKind::Haproxy
    }

    fn records(&self, identity: &ServiceIdentity, lease: Duration) -> Vec<RegistrationRecord> {
        let service = format!("{}/{}", SERVICES_ROOT, identity.service_name);
        vec![
            RegistrationRecord::permanent(
                format!("{}/location", service),
                identity.service_url.as_str(),
            ),
            RegistrationRecord::permanent(
                format!("{}/backend/balance", service),
                self.algorithm.as_str(),
            ),
            RegistrationRecord::leased(
                format!("{}/upstream/{}", service, identity.instance_name),
                identity.address.as_str(),
                lease,
            ),
        ]
    }
}

/// Traefik backend/frontend tree.
#[derive(Debug, Clone)]
pub struct TreeBackend {
    root: String,
    sticky: bool,
}

impl TreeBackend {
    /// Sessions are sticky only for the `source` balance algorithm.
    pub fn new(algorithm: &str) -> Self {
        Self {
            root: TRAEFIK_ROOT.to_string(),
            sticky: algorithm == "source",
        }
    }

    pub fn with_root(mut self, root: impl Into<String>) -> Self {
        self.root = root.into().trim_end_matches('/').to_string();
        self
    }
}

#[async_trait]
impl RegistrationBackend for TreeBackend {
    fn kind(&self) -> LoadBalancerKind {
        LoadBalancerKind::Traefik
    }

    fn records(&self, identity: &ServiceIdentity, lease: Duration) -> Vec<RegistrationRecord> {
        let name = &identity.service_name;
        let backend = format!("{}/backends/{}-backend", self.root, name);
        let server = format!("{}/servers/{}", backend, identity.instance_name);
        let frontend = format!("{}/frontends/{}-frontend", self.root, name);

        vec![
            RegistrationRecord::leased(
                format!("{}/url", server),
                format!("http://{}", identity.address),
                lease,
            ),
            RegistrationRecord::leased(format!("{}/weight", server), "1", lease),
            RegistrationRecord::permanent(
                format!("{}/loadbalancer/sticky", backend),
                if self.sticky { "true" } else { "false" },
            ),
            RegistrationRecord::leased(
                format!("{}/backend", frontend),
                format!("{}-backend", name),
                lease,
            ),
            RegistrationRecord::leased(format!("{}/entrypoints", frontend), "http", lease),
            RegistrationRecord::leased(
                format!("{}/routes/path/rule", frontend),
                format!("PathPrefix:{}", identity.service_url),
                lease,
            ),
        ]
    }
}

pub fn backend_for(kind: LoadBalancerKind, algorithm: &str) -> Box<dyn RegistrationBackend> {
    match kind {
        LoadBalancerKind::Haproxy => Box::new(FlatKeyBackend::new(algorithm)),
        LoadBalancerKind::Traefik => Box::new(TreeBackend::new(algorithm)),
    }
}
