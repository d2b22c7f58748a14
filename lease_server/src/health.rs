//! UDP health responder: answers every `health` datagram with `ok`.

use core::net::{IpAddr, SocketAddr};

use eyre::WrapErr as _;
use tokio::net::UdpSocket;
use tracing::{debug, info, warn};
use tunlease_common::protocol::{HEALTH_OK, HEALTH_PROBE};

use crate::config::HealthConfig;

/// Bind the responder socket.
///
/// # Errors
///
/// Returns an error if the bind address is invalid or the port is taken.
pub(crate) async fn bind(cfg: &HealthConfig) -> eyre::Result<UdpSocket> {
    let ip: IpAddr = cfg
        .bind
        .parse()
        .wrap_err(format!("Invalid health bind address: {}", cfg.bind))?;
    let addr = SocketAddr::from((ip, cfg.port));
    let socket = UdpSocket::bind(addr)
        .await
        .wrap_err(format!("Failed to bind health responder on {addr}"))?;
    info!("Health responder listening on udp://{addr}");
    Ok(socket)
}

/// Serve probes until the task is dropped. Other payloads are ignored.
pub(crate) async fn serve(socket: UdpSocket) {
    let mut buf = [0u8; 64];
    loop {
        let (len, peer) = match socket.recv_from(&mut buf).await {
            Ok(received) => received,
            Err(e) => {
                warn!("Health responder receive failed: {e}");
                continue;
            }
        };
        if buf.get(..len) != Some(HEALTH_PROBE) {
            debug!(%peer, len, "Ignoring unexpected datagram");
            continue;
        }
        if let Err(e) = socket.send_to(HEALTH_OK, peer).await {
            debug!(%peer, "Failed to answer health probe: {e}");
        }
    }
}
