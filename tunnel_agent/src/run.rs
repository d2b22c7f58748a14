use alloc::sync::Arc;
use std::path::Path;

use eyre::WrapErr as _;
use secrecy::SecretString;
use tokio::{fs, signal};
use tracing::{Instrument as _, error, info, warn};
use tunlease_common::TunnelDevice;

use crate::{
    config::{self, AgentConfig, resolve_config_relative_paths},
    device::{Candidate, DeviceManager, ManagerSettings, RENEW_RETRY_INTERVAL},
    health::checker_for,
    lease_client::HttpLeaseClient,
    netcfg::IpCommand,
};

/// Creates a future that resolves when SIGTERM or Ctrl-C is received.
pub(crate) async fn shutdown_signal() {
    #[cfg(unix)]
    {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = sigterm.recv() => {}
                    _ = signal::ctrl_c() => {}
                }
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler, only Ctrl-C will stop the agent: {e}");
                drop(signal::ctrl_c().await);
            }
        }
    }
    #[cfg(not(unix))]
    {
        drop(signal::ctrl_c().await);
    }
}

/// Candidates in configured order, each with its own checker.
fn candidates(config: &AgentConfig) -> eyre::Result<Vec<Candidate>> {
    config
        .servers
        .iter()
        .map(|server| {
            let checker = checker_for(&config.health, &server.probe_address)
                .wrap_err(format!("Invalid probe address for server {}", server.name))?;
            Ok(Candidate {
                name: server.name.clone(),
                lease_url: server.lease_url.clone(),
                checker,
            })
        })
        .collect()
}

/// Token from the command line or environment, else from `token_file`.
pub(crate) async fn read_token(
    token: Option<String>,
    token_file: Option<&str>,
) -> eyre::Result<SecretString> {
    if let Some(token) = token {
        return Ok(SecretString::from(token));
    }
    let Some(path) = token_file else {
        eyre::bail!("No token given, pass --token, --token-file or set TUNLEASE_TOKEN");
    };
    let raw = fs::read_to_string(path)
        .await
        .wrap_err(format!("Failed to read token file at: {path}"))?;
    let token = raw.trim();
    if token.is_empty() {
        eyre::bail!("Token file {path} is empty");
    }
    Ok(SecretString::from(token.to_string()))
}

/// Bring the interface up and keep it leased until a shutdown signal arrives.
///
/// # Errors
///
/// Returns an error if the configuration is invalid or the interface cannot be started.
#[tracing::instrument(skip_all)]
pub(crate) async fn start_agent(config_path: &Path, token: SecretString) -> eyre::Result<()> {
    let config = config::load(config_path).await?;
    let candidates = candidates(&config)?;

    let interface = &config.interface;
    let tunnel = Arc::new(TunnelDevice::new(
        interface.backend,
        &interface.name,
        &interface.userspace_binary,
    ));
    let manager = Arc::new(DeviceManager::new(
        tunnel,
        Arc::new(IpCommand),
        Arc::new(HttpLeaseClient::new()?),
        candidates,
        ManagerSettings {
            key_path: resolve_config_relative_paths(config_path, &interface.private_key_path),
            listen_port: interface.listen_port,
            monitor_interval: config.health.interval(),
            failure_threshold: config.health.failure_threshold,
            retry_interval: RENEW_RETRY_INTERVAL,
        },
    ));
    manager.start().await?;

    let initial = manager.clone();
    tokio::spawn(
        async move {
            match initial.renew_until_success(Some(token)).await {
                Ok(server) => info!(%server, "Tunnel attached"),
                Err(e) => error!("Initial lease failed: {e}"),
            }
        }
        .in_current_span(),
    );

    shutdown_signal().await;
    info!("Received shutdown, stopping");
    manager.stop().await;
    Ok(())
}

/// Probe every candidate once and print one line per server.
///
/// # Errors
///
/// Returns an error if the configuration is invalid or no server is healthy.
pub(crate) async fn probe(config_path: &Path) -> eyre::Result<()> {
    let config = config::load(config_path).await?;
    let mut healthy = 0_usize;
    for candidate in candidates(&config)? {
        let target = candidate.checker.target_description().to_string();
        let span = tracing::info_span!("probe", server = %candidate.name);
        match candidate.checker.check().instrument(span).await {
            Ok(()) => {
                healthy += 1;
                println!("{}\t{target}\thealthy", candidate.name);
            }
            Err(e) => println!("{}\t{target}\tunhealthy: {e}", candidate.name),
        }
    }
    if healthy == 0 {
        eyre::bail!("No configured server is healthy");
    }
    Ok(())
}
