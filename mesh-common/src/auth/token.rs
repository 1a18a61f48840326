use chrono::Duration as ChronoDuration;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use secrecy::{ExposeSecret, Secret};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use super::revocation::RevocationCache;
use crate::clock::{Clock, SystemClock};
use crate::config::MeshConfig;
use crate::error::{MeshError, Result};
use crate::store::CoordinationStore;

/// Default lifetime of issued tokens.
pub const DEFAULT_TOKEN_TTL: Duration = Duration::from_secs(3600);

/// Claims carried by mesh bearer tokens.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    pub user_id: u64,
    /// Expiration time (Unix timestamp)
    pub exp: i64,
}

/// Who a request was authenticated as.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Identity {
    Authenticated(Claims),
    /// No token was presented and the route allows that.
    Anonymous,
}

impl Identity {
    pub fn claims(&self) -> Option<&Claims> {
        match self {
            Identity::Authenticated(claims) => Some(claims),
            Identity::Anonymous => None,
        }
    }

    pub fn user_id(&self) -> Option<u64> {
        self.claims().map(|c| c.user_id)
    }

    pub fn is_anonymous(&self) -> bool {
        matches!(self, Identity::Anonymous)
    }
}

/// Issues and verifies HS256 bearer tokens.
#[derive(Clone)]
pub struct TokenService {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    revocation: Option<RevocationCache>,
    clock: Arc<dyn Clock>,
}

impl TokenService {
    /// Token service that checks revocation markers in `store`.
    pub fn new(secret: &Secret<String>, store: Arc<dyn CoordinationStore>) -> Self {
        let mut service = Self::without_revocation(secret);
        service.revocation = Some(RevocationCache::new(store));
        service
    }

    /// Token service that never consults the coordination store.
    pub fn without_revocation(secret: &Secret<String>) -> Self {
        let secret = secret.expose_secret().as_bytes();
        Self {
            encoding_key: EncodingKey::from_secret(secret),
            decoding_key: DecodingKey::from_secret(secret),
            revocation: None,
            clock: Arc::new(SystemClock),
        }
    }

    /// Build from process configuration; `TESTING` turns revocation checks off.
    pub fn from_config(config: &MeshConfig, store: Arc<dyn CoordinationStore>) -> Result<Self> {
        let secret = config.jwt_secret()?;
        if config.testing {
            tracing::warn!("Token revocation checks disabled (testing mode)");
            Ok(Self::without_revocation(secret))
        } else {
            Ok(Self::new(secret, store))
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.revocation = self.revocation.map(|r| r.with_clock(clock.clone()));
        self.clock = clock;
        self
    }

    pub fn checks_revocation(&self) -> bool {
        self.revocation.is_some()
    }

    /// Issue a token for `user_id` that expires `ttl` from now.
    pub fn issue(&self, user_id: u64, ttl: Duration) -> Result<String> {
        let ttl = ChronoDuration::from_std(ttl)
            .map_err(|e| MeshError::Internal(anyhow::anyhow!("Token ttl out of range: {}", e)))?;
        let expires_at = self.clock.now() + ttl;
        // `exp` is whole seconds; round up so the token lives at least `ttl`.
        let exp = if expires_at.timestamp_subsec_nanos() > 0 {
            expires_at.timestamp() + 1
        } else {
            expires_at.timestamp()
        };
        let claims = Claims { user_id, exp };

        Ok(encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &self.encoding_key,
        )?)
    }

    /// Signature and claim shape only; expiry is left to the caller.
    fn decode_signed(&self, token: &str) -> Result<Claims> {
        let mut validation = Validation::new(Algorithm::HS256);
        // Expiry is checked against the injected clock in `is_expired`.
        validation.validate_exp = false;
        validation.required_spec_claims = HashSet::from(["exp".to_string()]);

        Ok(decode::<Claims>(token, &self.decoding_key, &validation)
            .map_err(|_| MeshError::Unauthenticated)?
            .claims)
    }

    /// Expired once the clock has moved past `exp`.
    fn is_expired(&self, claims: &Claims) -> bool {
        let now = self.clock.now();
        (now.timestamp(), now.timestamp_subsec_nanos()) > (claims.exp, 0)
    }

    /// Verify a bearer token.
    ///
    /// Every failure is reported as [`MeshError::Unauthenticated`]: malformed,
    /// badly signed, expired and revoked tokens look the same to the caller.
    /// If the revocation lookup itself fails the token is rejected.
    pub async fn verify(&self, token: &str) -> Result<Claims> {
        if token.is_empty() {
            return Err(MeshError::Unauthenticated);
        }

        let claims = self.decode_signed(token)?;
        if self.is_expired(&claims) {
            return Err(MeshError::Unauthenticated);
        }

        if let Some(revocation) = &self.revocation {
            match revocation.is_revoked(token).await {
                Ok(false) => {}
                Ok(true) => return Err(MeshError::Unauthenticated),
                Err(e) => {
                    tracing::error!(error = %e, "Revocation lookup failed, rejecting token");
                    return Err(MeshError::Unauthenticated);
                }
            }
        }

        Ok(claims)
    }

    /// Like [`verify`](Self::verify), but an empty token is an anonymous caller.
    pub async fn verify_optional(&self, token: &str) -> Result<Identity> {
        if token.is_empty() {
            return Ok(Identity::Anonymous);
        }
        self.verify(token).await.map(Identity::Authenticated)
    }

    /// Revoke `token` until it would have expired anyway.
    ///
    /// Tokens that fail to decode or carry a bad signature are rejected with
    /// [`MeshError::Unauthenticated`]. A well-signed token that has already
    /// expired is accepted and nothing is written.
    pub async fn revoke(&self, token: &str) -> Result<()> {
        let revocation = self
            .revocation
            .as_ref()
            .ok_or_else(|| MeshError::config("Token revocation is disabled"))?;

        let claims = self.decode_signed(token)?;
        if self.is_expired(&claims) {
            tracing::debug!(user_id = claims.user_id, "Token already expired, nothing to revoke");
            return Ok(());
        }

        let remaining = (claims.exp - self.clock.now().timestamp()).max(1) as u64;
        revocation
            .revoke(token, Duration::from_secs(remaining))
            .await?;

        tracing::info!(user_id = claims.user_id, "Token revoked");
        Ok(())
    }
}
