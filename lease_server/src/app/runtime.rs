//! Background tasks of the lease server.

use alloc::sync::Arc;
use core::time::Duration;

use chrono::Utc;
use tokio::{
    net::UdpSocket,
    time::{MissedTickBehavior, interval},
};
use tracing::{Instrument as _, error, info};

use crate::{
    app::{AppState, LeaseAllocator},
    health,
};

/// Periodically drop expired leases and resynchronize peers.
///
/// A failed pass is logged and retried on the next tick.
pub(crate) async fn reclaim_expired(allocator: Arc<LeaseAllocator>, every: Duration) {
    let mut ticker = interval(every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        if let Err(e) = allocator.reclaim(Utc::now()).await {
            error!("Lease reclamation failed: {e}");
        }
    }
}

pub(super) fn start_background_tasks(
    state: &AppState,
    reclaim_interval: Duration,
    health_socket: Option<UdpSocket>,
) {
    // Expired lease reclamation
    {
        let allocator = state.allocator.clone();
        info!(interval_secs = reclaim_interval.as_secs(), "Starting lease reclamation");
        tokio::spawn(
            async move {
                reclaim_expired(allocator, reclaim_interval).await;
            }
            .in_current_span(),
        );
    }

    // UDP health responder
    if let Some(socket) = health_socket {
        tokio::spawn(
            async move {
                health::serve(socket).await;
            }
            .in_current_span(),
        );
    }
}

#[cfg(test)]
mod tests {
    use core::net::Ipv4Addr;
    use std::env;

    use chrono::Duration as ChronoDuration;
    use secrecy::SecretString;
    use tokio::time::{sleep, timeout};
    use tunlease_common::{BackendKind, PeerConfig, TunnelDevice};

    use super::*;
    use crate::app::{AddressPool, InterfaceBase, LeaseFile, LeaseRecord};

    #[tokio::test]
    async fn reclamation_task_removes_expired_peers() {
        let path = env::temp_dir()
            .join(format!("tunlease_runtime_{}", std::process::id()))
            .join("leases.txt");
        let file = LeaseFile::new(path.clone());
        let tunnel = Arc::new(TunnelDevice::new(BackendKind::Detached, "tl0", ""));

        let expired = LeaseRecord {
            owner: "alice".to_string(),
            public_key: "YWxpY2U=".to_string(),
            address: Ipv4Addr::new(10, 90, 0, 2),
            expiry: Utc::now() - ChronoDuration::minutes(1),
        };
        let active = LeaseRecord {
            owner: "bob".to_string(),
            public_key: "Ym9i".to_string(),
            address: Ipv4Addr::new(10, 90, 0, 3),
            expiry: Utc::now() + ChronoDuration::hours(1),
        };
        let allocator = Arc::new(LeaseAllocator::new(
            AddressPool::new("10.90.0.1/20".parse().unwrap()),
            vec![expired, active.clone()],
            file.clone(),
            tunnel.clone(),
            InterfaceBase {
                private_key: SecretString::from("c2VydmVy"),
                listen_port: 51820,
            },
        ));

        let task = tokio::spawn(reclaim_expired(allocator.clone(), Duration::from_millis(20)));

        let TunnelDevice::Detached(ref detached) = *tunnel else {
            panic!("expected detached backend");
        };
        // The record lock is held until peers are synced and the file is written.
        timeout(Duration::from_secs(5), async {
            while allocator.records().await.len() != 1 {
                sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("reclamation should drop the expired lease");
        task.abort();

        assert_eq!(
            detached.applied_peers(),
            vec![PeerConfig::single_host("Ym9i", active.address)]
        );
        assert_eq!(file.load(Utc::now()).await.unwrap(), vec![active]);
        drop(std::fs::remove_dir_all(path.parent().unwrap()));
    }
}
