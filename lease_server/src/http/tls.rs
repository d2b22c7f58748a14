use core::net::SocketAddr;
use std::path::Path;

use axum_server::tls_rustls::RustlsConfig as AxumRustlsConfig;
use eyre::{WrapErr as _, eyre};

use crate::config::{TlsConfig, resolve_config_relative_paths};

/// Load the certificate and key for serving HTTPS.
///
/// Both files must exist; paths are resolved relative to the config file.
#[tracing::instrument(skip(tls_cfg))]
pub(crate) async fn setup_tls_config(
    tls_cfg: &TlsConfig,
    config_path: &Path,
    addr: SocketAddr,
) -> eyre::Result<AxumRustlsConfig> {
    let cert_path = resolve_config_relative_paths(config_path, &tls_cfg.cert_path);
    let key_path = resolve_config_relative_paths(config_path, &tls_cfg.key_path);

    if !(cert_path.exists() && key_path.exists()) {
        eyre::bail!(
            "TLS configuration error: cert {} and key {} must both exist",
            cert_path.display(),
            key_path.display()
        );
    }

    let rustls_cfg = AxumRustlsConfig::from_pem_file(
        cert_path
            .to_str()
            .ok_or_else(|| eyre!("Invalid Cert-Path"))?,
        key_path.to_str().ok_or_else(|| eyre!("Invalid Key-Path"))?,
    )
    .await
    .wrap_err(format!(
        "Failed to load TLS certificates from cert: {}, key: {}",
        cert_path.display(),
        key_path.display()
    ))?;
    tracing::info!("Listening on https://{}", addr);
    Ok(rustls_cfg)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn missing_certificate_is_an_error() {
        let cfg = TlsConfig {
            cert_path: "./no_such_cert.pem".to_string(),
            key_path: "./no_such_key.pem".to_string(),
            enable: true,
        };
        let err = setup_tls_config(
            &cfg,
            Path::new("/nonexistent/tunlease/server.toml"),
            "127.0.0.1:8443".parse().unwrap(),
        )
        .await
        .unwrap_err();
        assert!(err.to_string().contains("must both exist"), "{err}");
    }
}
