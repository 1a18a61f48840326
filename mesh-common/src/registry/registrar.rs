use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::backend::RegistrationBackend;
use super::identity::ServiceIdentity;
use crate::error::{MeshError, Result};
use crate::store::CoordinationStore;

pub const DEFAULT_LEASE: Duration = Duration::from_secs(50);
pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(15);

/// Lease and refresh interval for registration records.
///
/// The interval is at most a third of the lease, so an instance survives
/// two consecutive failed refreshes before the load balancer drops it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeartbeatSettings {
    lease: Duration,
    interval: Duration,
}

impl Default for HeartbeatSettings {
    fn default() -> Self {
        Self {
            lease: DEFAULT_LEASE,
            interval: DEFAULT_INTERVAL,
        }
    }
}

impl HeartbeatSettings {
    pub fn new(lease: Duration, interval: Duration) -> Result<Self> {
        if interval.is_zero() {
            return Err(MeshError::config("heartbeat interval must be positive"));
        }
        if interval.saturating_mul(3) > lease {
            return Err(MeshError::config(format!(
                "heartbeat interval {:?} is longer than a third of the {:?} lease",
                interval, lease
            )));
        }
        Ok(Self { lease, interval })
    }

    /// Refresh at 3/10 of `lease`, the same ratio as the 50s/15s default.
    pub fn from_lease(lease: Duration) -> Result<Self> {
        Self::new(lease, lease * 3 / 10)
    }

    pub fn lease(&self) -> Duration {
        self.lease
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }
}

/// Shared view of whether the registration has ever been written.
#[derive(Debug, Clone, Default)]
pub struct RegistrationStatus {
    registered: Arc<AtomicBool>,
}

impl RegistrationStatus {
    pub fn is_registered(&self) -> bool {
        self.registered.load(Ordering::Acquire)
    }

    fn mark_registered(&self) {
        self.registered.store(true, Ordering::Release);
    }
}

/// Keeps this instance's registration alive in the coordination store.
pub struct Registrar {
    store: Arc<dyn CoordinationStore>,
    backend: Arc<dyn RegistrationBackend>,
    identity: ServiceIdentity,
    settings: HeartbeatSettings,
    status: RegistrationStatus,
}

impl Registrar {
    pub fn new(
        store: Arc<dyn CoordinationStore>,
        backend: Arc<dyn RegistrationBackend>,
        identity: ServiceIdentity,
    ) -> Self {
        Self {
            store,
            backend,
            identity,
            settings: HeartbeatSettings::default(),
            status: RegistrationStatus::default(),
        }
    }

    pub fn with_settings(mut self, settings: HeartbeatSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn identity(&self) -> &ServiceIdentity {
        &self.identity
    }

    pub fn settings(&self) -> HeartbeatSettings {
        self.settings
    }

    pub fn status(&self) -> RegistrationStatus {
        self.status.clone()
    }

    /// Write the registration once. Failures are logged and counted, never
    /// returned; the next heartbeat tries again.
    #[tracing::instrument(
        skip(self),
        fields(
            service = %self.identity.service_name,
            instance = %self.identity.instance_name,
            load_balancer = %self.backend.kind()
        )
    )]
    pub async fn refresh_once(&self) -> bool {
        let backend = self.backend.kind().to_string();
        metrics::counter!("registration_refresh_total", "backend" => backend.clone()).increment(1);

        match self
            .backend
            .register(self.store.as_ref(), &self.identity, self.settings.lease)
            .await
        {
            Ok(()) => {
                if !self.status.is_registered() {
                    info!(address = %self.identity.address, "Service registered");
                }
                self.status.mark_registered();
                debug!("Registration refreshed");
                true
            }
            Err(e) => {
                metrics::counter!("registration_refresh_failures_total", "backend" => backend)
                    .increment(1);
                warn!(error = %e, "Registration refresh failed, retrying next heartbeat");
                false
            }
        }
    }

    /// Heartbeat until `shutdown` is cancelled.
    pub async fn run_until(&self, shutdown: CancellationToken) {
        info!(
            service = %self.identity.service_name,
            instance = %self.identity.instance_name,
            lease_secs = self.settings.lease.as_secs(),
            interval_secs = self.settings.interval.as_secs(),
            "Starting registration heartbeat"
        );

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = self.refresh_once() => {}
            }
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = sleep(self.settings.interval) => {}
            }
        }

        info!(instance = %self.identity.instance_name, "Registration heartbeat stopped");
    }

    /// Heartbeat for the life of the process.
    pub async fn run(&self) {
        self.run_until(CancellationToken::new()).await
    }

    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(async move { self.run().await })
    }
}
