//! Bearer token authentication with revocation.

pub mod middleware;
pub mod revocation;
pub mod token;

pub use middleware::{
    AuthUser, Authenticator, CurrentIdentity, OptionalAuth, RequiredAuth, authenticate,
    bearer_token,
};
pub use revocation::{REVOCATION_CACHE_TTL, REVOKED_TOKENS_PREFIX, RevocationCache};
pub use token::{Claims, DEFAULT_TOKEN_TTL, Identity, TokenService};
