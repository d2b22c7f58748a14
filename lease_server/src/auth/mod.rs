//! Bearer token validation for lease requests.
//!
//! - Introspection mode: tokens are checked against an RFC 7662 introspection endpoint.
//! - Static mode: tokens are looked up in a fixed table from the config file.
//!
//! Either way only liveness and expiry are validated; the owner identity is taken from the token.

mod introspection;

use alloc::sync::Arc;

use axum::http::{HeaderMap, header::AUTHORIZATION};
use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use secrecy::SecretString;
use serde::Deserialize;
use thiserror::Error as ThisError;
use tracing::info;

use crate::config::AuthConfig;

pub(crate) use introspection::{HttpIntrospector, IntrospectionError, StaticIntrospector};

/// The subset of an RFC 7662 introspection response the server relies on.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
pub(crate) struct TokenInfo {
    pub active: bool,
    /// Expiry as seconds since the unix epoch.
    #[serde(default)]
    pub exp: Option<i64>,
    #[serde(default)]
    pub sub: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
}

/// Resolves a bearer token to its claims.
pub(crate) trait TokenIntrospector: Send + Sync {
    fn introspect<'a>(
        &'a self,
        token: &'a SecretString,
    ) -> BoxFuture<'a, Result<TokenInfo, IntrospectionError>>;
}

/// A validated caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Identity {
    pub owner: String,
    /// The lease granted to this caller ends when its token does.
    pub expiry: DateTime<Utc>,
}

#[derive(Debug, ThisError)]
pub(crate) enum AuthError {
    #[error("missing or malformed bearer token")]
    MissingBearer,
    #[error("token is not active")]
    Inactive,
    #[error("token carries no positive expiry")]
    MissingExpiry,
    #[error("token expired at {0}")]
    Expired(DateTime<Utc>),
    #[error("token carries no subject")]
    MissingSubject,
    #[error(transparent)]
    Introspection(#[from] IntrospectionError),
}

/// Authentication runtime shared by the request handlers.
#[derive(Clone)]
pub(crate) struct Runtime {
    introspector: Arc<dyn TokenIntrospector>,
}

impl Runtime {
    pub(crate) fn new(introspector: Arc<dyn TokenIntrospector>) -> Self {
        Self { introspector }
    }

    /// Build the runtime for the configured mode.
    ///
    /// # Errors
    ///
    /// Returns an error if the introspection HTTP client cannot be built.
    pub(crate) fn from_config(cfg: &AuthConfig) -> eyre::Result<Self> {
        let introspector: Arc<dyn TokenIntrospector> = match *cfg {
            AuthConfig::Introspection {
                ref url,
                ref client_id,
                ref client_secret,
            } => {
                info!(%url, "Auth mode: introspection");
                Arc::new(HttpIntrospector::new(
                    url.clone(),
                    client_id.clone(),
                    client_secret.clone(),
                )?)
            }
            AuthConfig::Static { ref tokens } => {
                info!(tokens = tokens.len(), "Auth mode: static");
                Arc::new(StaticIntrospector::new(tokens))
            }
        };
        Ok(Self::new(introspector))
    }

    /// Validate `token` and derive the caller's identity.
    ///
    /// # Errors
    ///
    /// Returns an error if the token is inactive, has no usable expiry or subject,
    /// or the introspection collaborator fails.
    pub(crate) async fn authenticate(
        &self,
        token: &SecretString,
        now: DateTime<Utc>,
    ) -> Result<Identity, AuthError> {
        let info = self.introspector.introspect(token).await?;
        identity_from_claims(info, now)
    }
}

fn identity_from_claims(info: TokenInfo, now: DateTime<Utc>) -> Result<Identity, AuthError> {
    if !info.active {
        return Err(AuthError::Inactive);
    }
    let expiry = info
        .exp
        .filter(|exp| *exp > 0)
        .and_then(|exp| DateTime::from_timestamp(exp, 0))
        .ok_or(AuthError::MissingExpiry)?;
    if expiry <= now {
        return Err(AuthError::Expired(expiry));
    }
    let owner = info
        .sub
        .or(info.username)
        .filter(|owner| !owner.is_empty())
        .ok_or(AuthError::MissingSubject)?;
    // The lease file is whitespace delimited.
    if owner.chars().any(char::is_whitespace) {
        return Err(AuthError::MissingSubject);
    }
    Ok(Identity { owner, expiry })
}

/// Extract the token from an `Authorization: Bearer <token>` header.
pub(crate) fn bearer_token(headers: &HeaderMap) -> Option<SecretString> {
    let value = headers.get(AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.split_once(' ')?;
    let token = token.trim();
    (scheme.eq_ignore_ascii_case("bearer") && !token.is_empty())
        .then(|| SecretString::from(token.to_string()))
}
