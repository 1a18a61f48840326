//! mesh-common: registration, discovery and token auth shared by mesh services.
pub mod auth;
pub mod clock;
pub mod config;
pub mod error;
pub mod http;
pub mod observability;
pub mod registry;
pub mod store;

pub use config::MeshConfig;
pub use error::{MeshError, Result};

pub use async_trait;
pub use axum;
pub use reqwest;
pub use serde;
pub use serde_json;
pub use tokio;
pub use tokio_util;
pub use tracing;
