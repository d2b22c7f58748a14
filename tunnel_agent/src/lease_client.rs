//! Client side of the lease exchange.

use core::time::Duration;

use futures::future::BoxFuture;
use reqwest::StatusCode;
use secrecy::{ExposeSecret as _, SecretString};
use thiserror::Error as ThisError;
use tracing::debug;
use tunlease_common::protocol::{LEASE_PATH, LeaseRequest, LeaseResponse, STATUS_SUCCESS};

const LEASE_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, ThisError)]
pub enum ProtocolError {
    #[error("lease request failed")]
    Transport(#[source] reqwest::Error),
    #[error("lease server answered {0}")]
    Status(StatusCode),
    #[error("lease response could not be decoded")]
    Decode(#[source] reqwest::Error),
    #[error("lease server reported status {0:?}")]
    Rejected(String),
}

/// Obtains leases from a lease server.
pub trait LeaseProvider: Send + Sync {
    /// Ask the server at `base_url` to lease an address for `public_key`.
    fn request_lease<'a>(
        &'a self,
        base_url: &'a str,
        public_key: &'a str,
        credential: &'a SecretString,
    ) -> BoxFuture<'a, Result<LeaseResponse, ProtocolError>>;
}

/// HTTP(S) lease client.
#[derive(Debug, Clone)]
pub struct HttpLeaseClient {
    client: reqwest::Client,
}

impl HttpLeaseClient {
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new() -> eyre::Result<Self> {
        crate::install_crypto_provider();
        let client = reqwest::Client::builder()
            .timeout(LEASE_REQUEST_TIMEOUT)
            .build()?;
        Ok(Self { client })
    }

    async fn request_inner(
        &self,
        base_url: &str,
        public_key: &str,
        credential: &SecretString,
    ) -> Result<LeaseResponse, ProtocolError> {
        let url = format!("{}{LEASE_PATH}", base_url.trim_end_matches('/'));
        debug!(%url, "Requesting lease");
        let response = self
            .client
            .post(&url)
            .bearer_auth(credential.expose_secret())
            .json(&LeaseRequest {
                pub_key: public_key.to_string(),
            })
            .send()
            .await
            .map_err(ProtocolError::Transport)?;

        let status = response.status();
        if !status.is_success() {
            return Err(ProtocolError::Status(status));
        }
        let lease = response
            .json::<LeaseResponse>()
            .await
            .map_err(ProtocolError::Decode)?;
        if lease.status != STATUS_SUCCESS {
            return Err(ProtocolError::Rejected(lease.status));
        }
        Ok(lease)
    }
}

impl LeaseProvider for HttpLeaseClient {
    fn request_lease<'a>(
        &'a self,
        base_url: &'a str,
        public_key: &'a str,
        credential: &'a SecretString,
    ) -> BoxFuture<'a, Result<LeaseResponse, ProtocolError>> {
        Box::pin(self.request_inner(base_url, public_key, credential))
    }
}
