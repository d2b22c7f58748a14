use alloc::sync::Arc;
use core::time::Duration;

use chrono::Utc;
use futures::future::BoxFuture;
use reqwest::StatusCode;
use secrecy::{ExposeSecret as _, SecretString};
use thiserror::Error as ThisError;
use tracing::debug;

use super::{TokenInfo, TokenIntrospector};
use crate::config::StaticToken;

const INTROSPECTION_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, ThisError)]
pub(crate) enum IntrospectionError {
    #[error("introspection request failed")]
    Transport(#[source] reqwest::Error),
    #[error("introspection endpoint answered {0}")]
    Status(StatusCode),
    #[error("introspection response could not be decoded")]
    Decode(#[source] reqwest::Error),
}

/// RFC 7662 token introspection, authenticated with client credentials.
pub(crate) struct HttpIntrospector {
    client: reqwest::Client,
    url: String,
    client_id: String,
    client_secret: Arc<SecretString>,
}

impl HttpIntrospector {
    pub(crate) fn new(
        url: String,
        client_id: String,
        client_secret: Arc<SecretString>,
    ) -> eyre::Result<Self> {
        crate::install_crypto_provider();
        let client = reqwest::Client::builder()
            .timeout(INTROSPECTION_TIMEOUT)
            .build()?;
        Ok(Self {
            client,
            url,
            client_id,
            client_secret,
        })
    }

    async fn introspect_inner(&self, token: &SecretString) -> Result<TokenInfo, IntrospectionError> {
        let response = self
            .client
            .post(&self.url)
            .basic_auth(&self.client_id, Some(self.client_secret.expose_secret()))
            .form(&[
                ("token", token.expose_secret()),
                ("token_type_hint", "access_token"),
            ])
            .send()
            .await
            .map_err(IntrospectionError::Transport)?;

        let status = response.status();
        if !status.is_success() {
            return Err(IntrospectionError::Status(status));
        }
        response
            .json::<TokenInfo>()
            .await
            .map_err(IntrospectionError::Decode)
    }
}

impl TokenIntrospector for HttpIntrospector {
    fn introspect<'a>(
        &'a self,
        token: &'a SecretString,
    ) -> BoxFuture<'a, Result<TokenInfo, IntrospectionError>> {
        Box::pin(self.introspect_inner(token))
    }
}

/// Fixed token table. Each token is always active and valid for its configured lifetime from now.
pub(crate) struct StaticIntrospector {
    tokens: Vec<StaticToken>,
}

impl StaticIntrospector {
    pub(crate) fn new(tokens: &[StaticToken]) -> Self {
        Self {
            tokens: tokens.to_vec(),
        }
    }

    fn lookup(&self, token: &SecretString) -> TokenInfo {
        let Some(entry) = self
            .tokens
            .iter()
            .find(|t| t.token.expose_secret() == token.expose_secret())
        else {
            debug!("Unknown static token");
            return TokenInfo::default();
        };
        let lifetime = i64::try_from(entry.lifetime_secs).unwrap_or(i64::MAX);
        TokenInfo {
            active: true,
            exp: Some(Utc::now().timestamp().saturating_add(lifetime)),
            sub: Some(entry.owner.clone()),
            username: None,
        }
    }
}

impl TokenIntrospector for StaticIntrospector {
    fn introspect<'a>(
        &'a self,
        token: &'a SecretString,
    ) -> BoxFuture<'a, Result<TokenInfo, IntrospectionError>> {
        let info = self.lookup(token);
        Box::pin(async move { Ok(info) })
    }
}
