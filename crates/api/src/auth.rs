//! JWT bearer authentication.
//!
//! Token issuance belongs to the external identity service; this module
//! only validates bearer tokens and extracts the acting principal. The
//! acting user is always derived from verified claims, never from
//! client-supplied identifiers.

use std::sync::Arc;

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use chrono::Utc;
use common::UserId;
use engine::Requester;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};
use store::Storage;
use uuid::Uuid;

use crate::AppState;
use crate::error::ApiError;

/// Claims carried by a storefront bearer token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// User id (subject).
    pub sub: String,
    /// Role name: `ADMIN` or `CUSTOMER`.
    pub role: String,
    /// Expiry timestamp (seconds).
    pub exp: i64,
    /// Issued-at timestamp (seconds).
    pub iat: i64,
}

/// Role claim vocabulary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Admin,
    Customer,
}

/// Validated decoding material for bearer tokens.
#[derive(Clone)]
pub struct AuthKeys {
    decoding: DecodingKey,
    encoding: EncodingKey,
    validation: Validation,
}

impl AuthKeys {
    pub fn new(secret: &str) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_required_spec_claims(&["sub", "exp"]);
        Self {
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            validation,
        }
    }

    fn decode(&self, token: &str) -> Result<Claims, ApiError> {
        decode::<Claims>(token, &self.decoding, &self.validation)
            .map(|data| data.claims)
            .map_err(|err| match err.kind() {
                jsonwebtoken::errors::ErrorKind::ExpiredSignature => {
                    ApiError::Unauthorized("token expired")
                }
                _ => ApiError::Unauthorized("invalid token"),
            })
    }

    /// Issues a token for the given user.
    ///
    /// Production tokens come from the identity service; this exists for
    /// tests and local tooling.
    pub fn issue_token(&self, user_id: UserId, role: Role, ttl_secs: i64) -> Option<String> {
        let now = Utc::now().timestamp();
        let claims = Claims {
            sub: user_id.to_string(),
            role: match role {
                Role::Admin => "ADMIN".to_string(),
                Role::Customer => "CUSTOMER".to_string(),
            },
            exp: now + ttl_secs,
            iat: now,
        };
        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding).ok()
    }
}

/// The authenticated principal of a request.
#[derive(Debug, Clone, Copy)]
pub struct AuthedUser {
    pub user_id: UserId,
    pub role: Role,
}

impl AuthedUser {
    /// The engine-level requester this principal acts as.
    pub fn requester(&self) -> Requester {
        match self.role {
            Role::Admin => Requester::admin(self.user_id),
            Role::Customer => Requester::user(self.user_id),
        }
    }
}

/// Extractor asserting the `ADMIN` role.
#[derive(Debug, Clone, Copy)]
pub struct AdminUser(pub AuthedUser);

fn bearer_token(parts: &Parts) -> Result<&str, ApiError> {
    let header = parts
        .headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .ok_or(ApiError::Unauthorized("missing bearer token"))?;
    header
        .strip_prefix("Bearer ")
        .ok_or(ApiError::Unauthorized("invalid authorization header"))
}

impl<S> FromRequestParts<Arc<AppState<S>>> for AuthedUser
where
    S: Storage + 'static,
{
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState<S>>,
    ) -> Result<Self, Self::Rejection> {
        if let Some(user) = parts.extensions.get::<AuthedUser>() {
            return Ok(*user);
        }

        let token = bearer_token(parts)?;
        let claims = state.auth.decode(token)?;

        let user_id = Uuid::parse_str(&claims.sub)
            .map(UserId::from_uuid)
            .map_err(|_| ApiError::Unauthorized("malformed subject claim"))?;
        let role = match claims.role.as_str() {
            "ADMIN" => Role::Admin,
            _ => Role::Customer,
        };

        let user = AuthedUser { user_id, role };
        parts.extensions.insert(user);
        Ok(user)
    }
}

impl<S> FromRequestParts<Arc<AppState<S>>> for AdminUser
where
    S: Storage + 'static,
{
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState<S>>,
    ) -> Result<Self, Self::Rejection> {
        let user = AuthedUser::from_request_parts(parts, state).await?;
        if user.role != Role::Admin {
            return Err(ApiError::Forbidden("administrator role required"));
        }
        Ok(AdminUser(user))
    }
}
