//! Reachability probes and the monitor that turns repeated probe failures into
//! a renewal trigger.

mod icmp;
mod monitor;
mod udp;

use core::{
    net::{IpAddr, SocketAddr},
    time::Duration,
};
use std::io;

use alloc::sync::Arc;
use futures::future::BoxFuture;
use thiserror::Error as ThisError;

use crate::config::{HealthConfig, ProbeKind};

pub use icmp::IcmpChecker;
pub use monitor::{HealthMonitor, MonitorError, MonitorPhase, MonitorStatus};
pub use udp::UdpChecker;

/// Failure of a single probe.
#[derive(Debug, ThisError)]
pub enum ProbeError {
    #[error("probe socket error")]
    Io(#[from] io::Error),
    #[error("no reply within {0:?}")]
    Timeout(Duration),
    #[error("unexpected reply: {0}")]
    UnexpectedReply(String),
}

/// One reachability probe against a fixed target.
pub trait Checker: Send + Sync {
    /// Probe the target once; resolves within the checker's own timeout.
    fn check(&self) -> BoxFuture<'_, Result<(), ProbeError>>;

    /// Human readable target, for logging.
    fn target_description(&self) -> &str;
}

/// Build the configured checker for `probe_address`.
///
/// # Errors
///
/// Returns an error if the address does not fit the probe kind.
pub fn checker_for(health: &HealthConfig, probe_address: &str) -> eyre::Result<Arc<dyn Checker>> {
    Ok(match health.probe {
        ProbeKind::Udp => {
            let target: SocketAddr = probe_address
                .parse()
                .map_err(|e| eyre::eyre!("invalid UDP probe address {probe_address:?}: {e}"))?;
            Arc::new(UdpChecker::new(target))
        }
        ProbeKind::Icmp => {
            // A port is tolerated so one address list works for both probe kinds.
            let ip = probe_address
                .parse::<IpAddr>()
                .or_else(|_| probe_address.parse::<SocketAddr>().map(|s| s.ip()))
                .map_err(|e| eyre::eyre!("invalid ICMP probe address {probe_address:?}: {e}"))?;
            let IpAddr::V4(target) = ip else {
                eyre::bail!("ICMP probes support IPv4 targets only, got {ip}");
            };
            Arc::new(IcmpChecker::new(target, health.icmp_timeout()))
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn checker_matches_probe_kind() {
        let mut health = HealthConfig::default();
        let udp = checker_for(&health, "127.0.0.1:51821").unwrap();
        assert_eq!(udp.target_description(), "udp://127.0.0.1:51821");
        assert!(checker_for(&health, "127.0.0.1").is_err(), "UDP probes need a port");

        health.probe = ProbeKind::Icmp;
        let icmp = checker_for(&health, "10.90.0.1:51821").unwrap();
        assert_eq!(icmp.target_description(), "icmp://10.90.0.1");
        assert!(checker_for(&health, "10.90.0.1").is_ok());
        assert!(checker_for(&health, "::1").is_err());
    }
}
