use alloc::sync::Arc;
use std::path::Path;

use chrono::Utc;
use eyre::WrapErr as _;
use ipnet::{IpNet, Ipv4Net};
use tracing::{info, warn};
use tunlease_common::{KeyPair, LeaseResponse, TunnelDevice, TunnelDriver, protocol::STATUS_SUCCESS};

use crate::{
    app::{
        AddressPool, InterfaceBase, LeaseAllocator, LeaseFile, LeaseRecord,
        runtime::start_background_tasks,
    },
    auth,
    config::{ServerConfig, load, resolve_config_relative_paths},
    health,
};

/// What the server tells agents about itself in every lease response.
#[derive(Debug, Clone)]
pub(crate) struct ServerIdentity {
    pub public_key: String,
    pub endpoint: String,
    pub allowed_ips: Vec<IpNet>,
}

impl ServerIdentity {
    pub(crate) fn lease_response(&self, record: &LeaseRecord, pool: &AddressPool) -> LeaseResponse {
        LeaseResponse {
            status: STATUS_SUCCESS.to_string(),
            ip: Ipv4Net::from(record.address),
            server_wireguard_ip: pool.gateway(),
            allowed_ips: self.allowed_ips.clone(),
            pub_key: self.public_key.clone(),
            endpoint: self.endpoint.clone(),
        }
    }
}

/// Application state shared across request handlers and background tasks.
#[derive(Clone)]
pub(crate) struct AppState {
    /// Record set, lease file and tunnel peer table.
    pub allocator: Arc<LeaseAllocator>,
    /// Bearer token validation.
    pub auth: Arc<auth::Runtime>,
    pub server: Arc<ServerIdentity>,
}

/// Bring up the tunnel interface and restore the leases persisted by a previous run.
#[tracing::instrument(skip_all)]
async fn initialize_allocator(
    config: &ServerConfig,
    config_path: &Path,
    keys: &KeyPair,
) -> eyre::Result<Arc<LeaseAllocator>> {
    let tunnel_cfg = &config.tunnel;
    let tunnel: Arc<dyn TunnelDriver> = Arc::new(TunnelDevice::new(
        tunnel_cfg.backend,
        &tunnel_cfg.interface,
        &tunnel_cfg.userspace_binary,
    ));
    tunnel.start().await.wrap_err(format!(
        "Failed to bring up tunnel interface {}",
        tunnel_cfg.interface
    ))?;
    info!(interface = %tunnel_cfg.interface, backend = ?tunnel_cfg.backend, "Tunnel interface up");

    let file = LeaseFile::new(resolve_config_relative_paths(
        config_path,
        &config.leases.path,
    ));
    let initial = file.load(Utc::now()).await.wrap_err(format!(
        "Failed to load leases from: {}",
        file.path().display()
    ))?;
    info!(path = %file.path().display(), leases = initial.len(), "Loaded leases");

    let allocator = Arc::new(LeaseAllocator::new(
        AddressPool::new(config.pool.prefix),
        initial,
        file,
        tunnel,
        InterfaceBase {
            private_key: keys.private_key.clone(),
            listen_port: tunnel_cfg.listen_port,
        },
    ));

    allocator
        .sync_peers()
        .await
        .wrap_err("Failed to install restored peers")?;
    // Rewrite the file without the records that expired while the server was down.
    if let Err(e) = allocator.persist().await {
        warn!("Failed to rewrite lease file on startup: {e}");
    }
    Ok(allocator)
}

/// Initialize application state and start background tasks.
#[tracing::instrument(skip_all)]
pub(crate) async fn initialize_state(config_path: &Path) -> eyre::Result<(AppState, ServerConfig)> {
    let config = load(config_path).await?;

    let key_path = resolve_config_relative_paths(config_path, &config.tunnel.private_key_path);
    let keys = KeyPair::load_or_generate(&key_path).wrap_err(format!(
        "Failed to load server private key from: {}",
        key_path.display()
    ))?;
    info!(public_key = %keys.public_key, "Server key loaded");

    let allocator = initialize_allocator(&config, config_path, &keys).await?;
    let auth = Arc::new(auth::Runtime::from_config(&config.auth)?);

    let health_socket = if config.health.enable {
        Some(health::bind(&config.health).await?)
    } else {
        info!("Health responder disabled");
        None
    };

    let app_state = AppState {
        allocator,
        auth,
        server: Arc::new(ServerIdentity {
            public_key: keys.public_key,
            endpoint: config.tunnel.endpoint.clone(),
            allowed_ips: config.allowed_ips(),
        }),
    };

    start_background_tasks(&app_state, config.leases.reclaim_interval(), health_socket);

    Ok((app_state, config))
}
