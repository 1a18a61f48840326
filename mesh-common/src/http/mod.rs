//! Outbound HTTP through the load balancer.

pub mod client;
pub mod retry;

pub use client::{MeshHttpClient, RequestOptions};
pub use retry::RetryPolicy;
