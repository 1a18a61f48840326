//! Service registration.
//!
//! An instance works out who it is ([`resolve_identity`]) and then keeps a
//! leased record of itself in the coordination store ([`Registrar`]) in the
//! layout its load balancer reads ([`RegistrationBackend`]).

pub mod backend;
pub mod docker;
pub mod identity;
pub mod registrar;

pub use backend::{
    FlatKeyBackend, LoadBalancerKind, RegistrationBackend, RegistrationRecord, TreeBackend,
    backend_for,
};
pub use docker::{ContainerAttributes, ContainerRuntime, DockerRuntime, NoContainer, StaticContainer};
pub use identity::{IdentitySource, ServiceIdentity, resolve_identity};
pub use registrar::{
    DEFAULT_INTERVAL, DEFAULT_LEASE, HeartbeatSettings, Registrar, RegistrationStatus,
};
