use serde::Serialize;

use super::docker::ContainerRuntime;
use crate::error::{MeshError, Result};

/// Raw identity settings, usually taken from the environment through
/// [`MeshConfig::identity_source`](crate::config::MeshConfig::identity_source).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IdentitySource {
    pub service_name: Option<String>,
    pub service_version: Option<String>,
    pub instance_name: Option<String>,
    pub service_address: Option<String>,
    pub service_url: Option<String>,
    pub host_ip_address: Option<String>,
}

/// How this instance is known to the rest of the mesh.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServiceIdentity {
    pub service_name: String,
    pub instance_name: String,
    /// `host:port` other services connect to.
    pub address: String,
    /// Path prefix the load balancer routes to this service.
    pub service_url: String,
}

pub fn service_name(source: &IdentitySource) -> Result<String> {
    source
        .service_name
        .clone()
        .ok_or_else(|| MeshError::Identity("service name".to_string()))
}

/// `INSTANCE_NAME`, or `<service>[_v<version>]`. Inside a container the
/// container hostname is appended so replicas get distinct names.
pub fn instance_name(
    source: &IdentitySource,
    runtime: &dyn ContainerRuntime,
) -> Result<String> {
    let base = match (&source.instance_name, &source.service_name) {
        (Some(instance), _) => instance.clone(),
        (None, Some(service)) => match &source.service_version {
            Some(version) => format!("{}_v{}", service, version),
            None => service.clone(),
        },
        (None, None) => return Err(MeshError::Identity("instance name".to_string())),
    };

    if !runtime.is_containerized() {
        return Ok(base);
    }

    let hostname = runtime.hostname()?;
    Ok(format!("{}_{}", base, hostname))
}

/// `SERVICE_ADDRESS`, or the host side of the first published container port.
pub async fn service_address(
    source: &IdentitySource,
    runtime: &dyn ContainerRuntime,
) -> Result<String> {
    if let Some(address) = &source.service_address {
        return Ok(address.clone());
    }
    if !runtime.is_containerized() {
        return Err(MeshError::Identity("service address".to_string()));
    }

    let attributes = runtime.attributes().await?;
    let ip = match (&source.host_ip_address, &attributes.gateway) {
        (Some(ip), _) => ip.clone(),
        (None, Some(gateway)) => gateway.clone(),
        (None, None) => {
            return Err(MeshError::Identity(
                "service address: no HOST_IP_ADDRESS and the container has no gateway"
                    .to_string(),
            ));
        }
    };
    let port = attributes.host_ports.first().ok_or_else(|| {
        MeshError::Identity("service address: the container publishes no ports".to_string())
    })?;

    Ok(format!("{}:{}", ip, port))
}

pub fn service_url(source: &IdentitySource) -> Result<String> {
    if let Some(url) = &source.service_url {
        return Ok(url.clone());
    }
    Ok(format!("/api/{}", service_name(source)?))
}

/// Derive the full identity of this instance. Any missing piece is fatal.
pub async fn resolve_identity(
    source: &IdentitySource,
    runtime: &dyn ContainerRuntime,
) -> Result<ServiceIdentity> {
    let identity = ServiceIdentity {
        service_name: service_name(source)?,
        instance_name: instance_name(source, runtime)?,
        address: service_address(source, runtime).await?,
        service_url: service_url(source)?,
    };

    tracing::info!(
        service = %identity.service_name,
        instance = %identity.instance_name,
        address = %identity.address,
        url = %identity.service_url,
        containerized = runtime.is_containerized(),
        "Resolved service identity"
    );

    Ok(identity)
}
