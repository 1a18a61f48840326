use crate::error::{MeshError, Result};
use crate::registry::{IdentitySource, LoadBalancerKind};
use crate::store::parse_endpoints;
use config::{Config as Cfg, Environment, File};
use reqwest::Url;
use secrecy::Secret;
use serde::Deserialize;

/// Process configuration shared by every mesh service.
///
/// Values come from an optional `configuration` file and then from the
/// environment, using the plain variable names (`SERVICE_NAME`, `ETCD`, `LB`,
/// ...). Anything that is only needed by one component stays optional here and
/// is validated by the accessor that hands it out.
#[derive(Debug, Deserialize, Clone)]
pub struct MeshConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub otlp_endpoint: Option<String>,

    /// Comma separated `http://host:port` list.
    #[serde(default)]
    pub etcd: Option<String>,
    #[serde(default)]
    pub jwt_secret_key: Option<Secret<String>>,
    /// Skips revocation lookups.
    #[serde(default)]
    pub testing: bool,

    /// Load balancer base URL used for relative outbound requests.
    #[serde(default)]
    pub lb: Option<String>,
    #[serde(default = "default_load_balancer")]
    pub load_balancer: String,
    #[serde(default = "default_lb_algorithm")]
    pub lb_algorithm: String,

    #[serde(default)]
    pub service_name: Option<String>,
    #[serde(default)]
    pub service_version: Option<String>,
    #[serde(default)]
    pub instance_name: Option<String>,
    #[serde(default)]
    pub service_address: Option<String>,
    #[serde(default)]
    pub service_url: Option<String>,
    #[serde(default)]
    pub host_ip_address: Option<String>,
    #[serde(default)]
    pub docker_host: Option<String>,
}

fn default_port() -> u16 {
    8080
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_load_balancer() -> String {
    "haproxy".to_string()
}

fn default_lb_algorithm() -> String {
    "roundrobin".to_string()
}

impl Default for MeshConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            log_level: default_log_level(),
            otlp_endpoint: None,
            etcd: None,
            jwt_secret_key: None,
            testing: false,
            lb: None,
            load_balancer: default_load_balancer(),
            lb_algorithm: default_lb_algorithm(),
            service_name: None,
            service_version: None,
            instance_name: None,
            service_address: None,
            service_url: None,
            host_ip_address: None,
            docker_host: None,
        }
    }
}

impl MeshConfig {
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();

        let config = Cfg::builder()
            .add_source(File::with_name("configuration").required(false))
            .add_source(Environment::default())
            .build()?;

        Ok(config.try_deserialize()?)
    }

    pub fn etcd_endpoints(&self) -> Result<Vec<Url>> {
        let raw = self
            .etcd
            .as_deref()
            .ok_or_else(|| MeshError::config("etcd service has not been configured"))?;
        parse_endpoints(raw)
    }

    pub fn jwt_secret(&self) -> Result<&Secret<String>> {
        self.jwt_secret_key
            .as_ref()
            .ok_or_else(|| MeshError::config("JWT_SECRET_KEY is not set"))
    }

    pub fn load_balancer(&self) -> Result<LoadBalancerKind> {
        self.load_balancer.parse()
    }

    /// Environment overrides consumed by identity resolution.
    pub fn identity_source(&self) -> IdentitySource {
        IdentitySource {
            service_name: non_empty(&self.service_name),
            service_version: non_empty(&self.service_version),
            instance_name: non_empty(&self.instance_name),
            service_address: non_empty(&self.service_address),
            service_url: non_empty(&self.service_url),
            host_ip_address: non_empty(&self.host_ip_address),
        }
    }
}

fn non_empty(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;

    #[test]
    fn defaults_match_documented_values() {
        let config = MeshConfig::default();
        assert_eq!(config.port, 8080);
        assert_eq!(config.load_balancer, "haproxy");
        assert_eq!(config.lb_algorithm, "roundrobin");
        assert!(!config.testing);
        assert_eq!(config.load_balancer().unwrap(), LoadBalancerKind::Haproxy);
    }

    #[test]
    fn missing_etcd_is_a_config_error() {
        let err = MeshConfig::default().etcd_endpoints().unwrap_err();
        assert!(err.to_string().contains("etcd service has not been configured"));
    }

    #[test]
    fn deserializes_from_flat_keys() {
        let config: MeshConfig = Cfg::builder()
            .set_override("etcd", "http://etcd1:2379, http://etcd2:2379")
            .unwrap()
            .set_override("jwt_secret_key", "top-secret")
            .unwrap()
            .set_override("testing", "true")
            .unwrap()
            .set_override("load_balancer", "traefik")
            .unwrap()
            .set_override("service_name", "chat")
            .unwrap()
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();

        assert!(config.testing);
        assert_eq!(config.etcd_endpoints().unwrap().len(), 2);
        assert_eq!(config.jwt_secret().unwrap().expose_secret(), "top-secret");
        assert_eq!(config.load_balancer().unwrap(), LoadBalancerKind::Traefik);
        assert_eq!(config.identity_source().service_name.as_deref(), Some("chat"));
    }

    #[test]
    fn blank_identity_values_are_ignored() {
        let config = MeshConfig {
            service_name: Some("  ".to_string()),
            service_version: Some("3".to_string()),
            ..Default::default()
        };
        let source = config.identity_source();
        assert_eq!(source.service_name, None);
        assert_eq!(source.service_version.as_deref(), Some("3"));
    }
}
