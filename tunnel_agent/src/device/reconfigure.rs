//! Replacing one applied configuration with another on the interface.

use ipnet::{IpNet, Ipv4Net};
use thiserror::Error as ThisError;
use tracing::{info, warn};
use tunlease_common::{LeaseResponse, PeerConfig};

use crate::netcfg::{NetConfigError, NetConfigurator};

/// What a lease from one server installed on the interface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppliedConfig {
    pub address: IpNet,
    pub routes: Vec<IpNet>,
    pub peer: PeerConfig,
}

impl AppliedConfig {
    #[must_use]
    pub fn from_lease(lease: &LeaseResponse) -> Self {
        Self {
            address: IpNet::V4(Ipv4Net::from(lease.ip.addr())),
            routes: lease.allowed_ips.clone(),
            peer: lease.server_peer(),
        }
    }
}

#[derive(Debug, ThisError)]
pub enum ReconfigureError {
    #[error("failed to install address {address}")]
    InstallAddress {
        address: IpNet,
        #[source]
        source: NetConfigError,
    },
}

/// Tear down `old` (if any) and bring up `new`.
///
/// Old routes go before the old address, and the new address before the new
/// routes. Only installing the new address can fail the whole operation.
///
/// # Errors
///
/// Returns [`ReconfigureError::InstallAddress`] if the new address cannot be added.
pub async fn reconfigure(
    net: &dyn NetConfigurator,
    interface: &str,
    old: Option<&AppliedConfig>,
    new: &AppliedConfig,
) -> Result<(), ReconfigureError> {
    if let Some(old) = old {
        for &route in &old.routes {
            if let Err(e) = net.remove_route(interface, route).await {
                warn!(%route, "Failed to remove old route: {e}");
            }
        }
        if let Err(e) = net.remove_address(interface, old.address).await {
            warn!(address = %old.address, "Failed to remove old address: {e}");
        }
    }

    net.add_address(interface, new.address)
        .await
        .map_err(|source| ReconfigureError::InstallAddress {
            address: new.address,
            source,
        })?;

    for &route in &new.routes {
        if let Err(e) = net.add_route(interface, route).await {
            warn!(%route, "Failed to install route: {e}");
        }
    }
    info!(%interface, address = %new.address, routes = new.routes.len(), "Applied lease configuration");
    Ok(())
}
