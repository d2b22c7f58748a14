use core::{
    net::{Ipv4Addr, Ipv6Addr, SocketAddr},
    time::Duration,
};

use futures::future::BoxFuture;
use tokio::{net::UdpSocket, time::timeout};
use tunlease_common::protocol::{HEALTH_OK, HEALTH_PROBE};

use super::{Checker, ProbeError};

/// How long a health responder may take to answer.
pub const UDP_PROBE_TIMEOUT: Duration = Duration::from_secs(1);

/// Sends `health` to the server's responder and expects `ok` back.
#[derive(Debug, Clone)]
pub struct UdpChecker {
    target: SocketAddr,
    timeout: Duration,
    description: String,
}

impl UdpChecker {
    #[must_use]
    pub fn new(target: SocketAddr) -> Self {
        Self::with_timeout(target, UDP_PROBE_TIMEOUT)
    }

    #[must_use]
    pub fn with_timeout(target: SocketAddr, timeout: Duration) -> Self {
        Self {
            target,
            timeout,
            description: format!("udp://{target}"),
        }
    }

    async fn probe(&self) -> Result<(), ProbeError> {
        let local = match self.target {
            SocketAddr::V4(_) => SocketAddr::from((Ipv4Addr::UNSPECIFIED, 0)),
            SocketAddr::V6(_) => SocketAddr::from((Ipv6Addr::UNSPECIFIED, 0)),
        };
        let socket = UdpSocket::bind(local).await?;
        socket.connect(self.target).await?;
        socket.send(HEALTH_PROBE).await?;

        let mut buf = [0u8; 64];
        let len = timeout(self.timeout, socket.recv(&mut buf))
            .await
            .map_err(|_| ProbeError::Timeout(self.timeout))??;
        let reply = buf.get(..len).unwrap_or_default();
        if reply == HEALTH_OK {
            Ok(())
        } else {
            Err(ProbeError::UnexpectedReply(
                String::from_utf8_lossy(reply).into_owned(),
            ))
        }
    }
}

impl Checker for UdpChecker {
    fn check(&self) -> BoxFuture<'_, Result<(), ProbeError>> {
        Box::pin(self.probe())
    }

    fn target_description(&self) -> &str {
        &self.description
    }
}
