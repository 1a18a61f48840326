use bytes::Bytes;
use reqwest::header::{CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue};
use reqwest::{Method, Response};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use super::retry::RetryPolicy;
use crate::config::MeshConfig;
use crate::error::{MeshError, Result};
use crate::observability::inject_trace_context;

/// Per-request knobs for [`MeshHttpClient::request`].
///
/// The body is buffered so every retry sends the same bytes.
#[derive(Debug, Clone)]
pub struct RequestOptions {
    headers: HeaderMap,
    body: Option<Bytes>,
    bearer: Option<String>,
    timeout: Option<Duration>,
    raise_for_status: bool,
}

impl Default for RequestOptions {
    fn default() -> Self {
        Self {
            headers: HeaderMap::new(),
            body: None,
            bearer: None,
            timeout: None,
            raise_for_status: true,
        }
    }
}

impl RequestOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Serialize `value` as the JSON request body.
    pub fn json<T: Serialize + ?Sized>(mut self, value: &T) -> Result<Self> {
        let body = serde_json::to_vec(value)
            .map_err(|e| MeshError::Internal(anyhow::anyhow!("Failed to encode body: {}", e)))?;
        self.headers
            .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        self.body = Some(Bytes::from(body));
        Ok(self)
    }

    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = Some(body.into());
        self
    }

    pub fn header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    pub fn bearer_auth(mut self, token: impl Into<String>) -> Self {
        self.bearer = Some(token.into());
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// With `false`, 4xx/5xx responses are returned instead of turned into
    /// [`MeshError::UpstreamStatus`].
    pub fn raise_for_status(mut self, raise: bool) -> Self {
        self.raise_for_status = raise;
        self
    }
}

/// HTTP client for calls to other services.
///
/// Relative URLs (anything without `://`) are sent to the load balancer;
/// absolute URLs go out unchanged. One connection pool is shared by all
/// clones, so build it once and hand it to whoever needs it.
#[derive(Clone)]
pub struct MeshHttpClient {
    http: reqwest::Client,
    load_balancer: Option<Arc<str>>,
    policy: Arc<RetryPolicy>,
}

impl MeshHttpClient {
    pub fn new(load_balancer: Option<String>, policy: RetryPolicy) -> Result<Self> {
        let http = reqwest::Client::builder()
            .pool_idle_timeout(Duration::from_secs(90))
            .build()?;

        let load_balancer = load_balancer
            .map(|lb| lb.trim().trim_end_matches('/').to_string())
            .filter(|lb| !lb.is_empty())
            .map(Arc::from);

        Ok(Self {
            http,
            load_balancer,
            policy: Arc::new(policy),
        })
    }

    /// Client routed through the `LB` load balancer with the default policy.
    pub fn from_config(config: &MeshConfig) -> Result<Self> {
        Self::new(config.lb.clone(), RetryPolicy::default())
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Where a request for `url` is actually sent.
    pub fn resolve_url(&self, url: &str) -> Result<String> {
        if url.contains("://") {
            return Ok(url.to_string());
        }

        let lb = self.load_balancer.as_deref().ok_or_else(|| {
            MeshError::config(format!(
                "LB is not configured, cannot send relative request to '{}'",
                url
            ))
        })?;

        if url.starts_with('/') {
            Ok(format!("{}{}", lb, url))
        } else {
            Ok(format!("{}/{}", lb, url))
        }
    }

    /// Send a request, retrying on 502/503 and connection failures.
    ///
    /// After the last attempt the final response is handled like any other
    /// (subject to `raise_for_status`).
    #[tracing::instrument(skip(self, method, options), fields(method = %method))]
    pub async fn request(
        &self,
        method: Method,
        url: &str,
        options: RequestOptions,
    ) -> Result<Response> {
        let url = self.resolve_url(url)?;
        let max_attempts = self.policy.max_attempts.max(1);
        let mut attempt = 1;

        loop {
            let last_attempt = attempt >= max_attempts;

            match self.build(&method, &url, &options).send().await {
                Ok(response)
                    if !last_attempt && self.policy.should_retry_status(response.status()) =>
                {
                    warn!(
                        url = %url,
                        attempt,
                        status = response.status().as_u16(),
                        "Upstream unavailable, retrying"
                    );
                }
                Ok(response) => {
                    if attempt > 1 {
                        info!(
                            url = %url,
                            attempt,
                            status = response.status().as_u16(),
                            "Request completed after retry"
                        );
                    }
                    return Self::check_status(response, options.raise_for_status);
                }
                Err(err) if !last_attempt && err.is_connect() => {
                    warn!(url = %url, attempt, error = %err, "Connection failed, retrying");
                }
                Err(err) => return Err(err.into()),
            }

            let backoff = self.policy.backoff_for(attempt);
            metrics::counter!("http_client_retries_total").increment(1);
            debug!(backoff_ms = backoff.as_millis() as u64, "Backing off");
            sleep(backoff).await;
            attempt += 1;
        }
    }

    fn build(&self, method: &Method, url: &str, options: &RequestOptions) -> reqwest::RequestBuilder {
        let mut headers = options.headers.clone();
        inject_trace_context(&mut headers);

        let mut builder = self.http.request(method.clone(), url).headers(headers);
        if let Some(token) = &options.bearer {
            builder = builder.bearer_auth(token);
        }
        if let Some(body) = &options.body {
            builder = builder.body(body.clone());
        }
        if let Some(timeout) = options.timeout {
            builder = builder.timeout(timeout);
        }
        builder
    }

    fn check_status(response: Response, raise_for_status: bool) -> Result<Response> {
        let status = response.status();
        if raise_for_status && (status.is_client_error() || status.is_server_error()) {
            return Err(MeshError::UpstreamStatus {
                status,
                url: response.url().to_string(),
            });
        }
        Ok(response)
    }

    pub async fn get(&self, url: &str, options: RequestOptions) -> Result<Response> {
        self.request(Method::GET, url, options).await
    }

    pub async fn post(&self, url: &str, options: RequestOptions) -> Result<Response> {
        self.request(Method::POST, url, options).await
    }

    pub async fn put(&self, url: &str, options: RequestOptions) -> Result<Response> {
        self.request(Method::PUT, url, options).await
    }

    pub async fn delete(&self, url: &str, options: RequestOptions) -> Result<Response> {
        self.request(Method::DELETE, url, options).await
    }
}
