use async_trait::async_trait;
use axum::{
    extract::{FromRequestParts, Request, State},
    http::{HeaderMap, request::Parts},
    middleware::Next,
    response::Response,
};
use axum_extra::headers::{Authorization, HeaderMapExt, authorization::Bearer};

use super::token::{Claims, Identity, TokenService};
use crate::error::{MeshError, Result};

/// Bearer token from the `Authorization` header, or `""` when there is none
/// (missing header or a different scheme).
pub fn bearer_token(headers: &HeaderMap) -> String {
    headers
        .typed_get::<Authorization<Bearer>>()
        .map(|auth| auth.token().to_string())
        .unwrap_or_default()
}

/// Turns request headers into an [`Identity`] or rejects the request.
#[async_trait]
pub trait Authenticator: Send + Sync {
    async fn authenticate(&self, headers: &HeaderMap) -> Result<Identity>;
}

/// Every request must carry a valid token.
#[derive(Clone)]
pub struct RequiredAuth {
    tokens: TokenService,
}

impl RequiredAuth {
    pub fn new(tokens: TokenService) -> Self {
        Self { tokens }
    }
}

#[async_trait]
impl Authenticator for RequiredAuth {
    async fn authenticate(&self, headers: &HeaderMap) -> Result<Identity> {
        let token = bearer_token(headers);
        self.tokens
            .verify(&token)
            .await
            .map(Identity::Authenticated)
    }
}

/// Requests without a token pass as anonymous; a token that is present must
/// be valid.
#[derive(Clone)]
pub struct OptionalAuth {
    tokens: TokenService,
}

impl OptionalAuth {
    pub fn new(tokens: TokenService) -> Self {
        Self { tokens }
    }
}

#[async_trait]
impl Authenticator for OptionalAuth {
    async fn authenticate(&self, headers: &HeaderMap) -> Result<Identity> {
        let token = bearer_token(headers);
        self.tokens.verify_optional(&token).await
    }
}

/// Middleware that authenticates the request with `A`.
///
/// On success the [`Identity`] (and for authenticated callers the [`Claims`])
/// is stored in the request extensions. On failure the request is answered
/// with a 401 carrying the bearer challenge and nothing is stored.
///
/// ```ignore
/// let app = Router::new()
///     .route("/messages", post(create_message))
///     .layer(from_fn_with_state(RequiredAuth::new(tokens), authenticate::<RequiredAuth>));
/// ```
pub async fn authenticate<A>(
    State(auth): State<A>,
    mut req: Request,
    next: Next,
) -> Result<Response, MeshError>
where
    A: Authenticator + Clone + 'static,
{
    let identity = auth.authenticate(req.headers()).await?;

    if let Identity::Authenticated(claims) = &identity {
        req.extensions_mut().insert(claims.clone());
    }
    req.extensions_mut().insert(identity);

    Ok(next.run(req).await)
}

/// Extractor for handlers behind [`RequiredAuth`].
pub struct AuthUser(pub Claims);

#[axum::async_trait]
impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
{
    type Rejection = MeshError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<Claims>()
            .cloned()
            .map(AuthUser)
            .ok_or(MeshError::Unauthenticated)
    }
}

/// Extractor for handlers behind either authenticator.
pub struct CurrentIdentity(pub Identity);

#[axum::async_trait]
impl<S> FromRequestParts<S> for CurrentIdentity
where
    S: Send + Sync,
{
    type Rejection = MeshError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<Identity>()
            .cloned()
            .map(CurrentIdentity)
            .ok_or(MeshError::Unauthenticated)
    }
}
