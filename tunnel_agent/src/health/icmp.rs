//! ICMP echo probes over an unprivileged datagram ICMP socket.
//!
//! The kernel owns the echo identifier of such sockets and only delivers replies
//! matching it, so replies are correlated by sequence number and payload.

use core::{
    net::{Ipv4Addr, SocketAddr},
    sync::atomic::{AtomicU16, Ordering},
    time::Duration,
};

use futures::future::BoxFuture;
use socket2::{Domain, Protocol, Socket, Type};
use tokio::{
    net::UdpSocket,
    time::{Instant, timeout_at},
};
use tracing::trace;

use super::{Checker, ProbeError};

const ECHO_REQUEST: u8 = 8;
const ECHO_REPLY: u8 = 0;
const HEADER_LEN: usize = 8;
const PAYLOAD: &[u8] = b"tunlease-probe";

/// Sends one ICMP echo request per check and waits for the matching reply.
#[derive(Debug)]
pub struct IcmpChecker {
    target: Ipv4Addr,
    timeout: Duration,
    sequence: AtomicU16,
    description: String,
}

impl IcmpChecker {
    #[must_use]
    pub fn new(target: Ipv4Addr, timeout: Duration) -> Self {
        Self {
            target,
            timeout,
            sequence: AtomicU16::new(0),
            description: format!("icmp://{target}"),
        }
    }

    fn open_socket(&self) -> std::io::Result<UdpSocket> {
        let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::ICMPV4))?;
        socket.set_nonblocking(true)?;
        socket.connect(&SocketAddr::from((self.target, 0)).into())?;
        UdpSocket::from_std(socket.into())
    }

    async fn probe(&self) -> Result<(), ProbeError> {
        let sequence = self.sequence.fetch_add(1, Ordering::Relaxed);
        let socket = self.open_socket()?;
        socket.send(&echo_request(sequence, PAYLOAD)).await?;

        let deadline = Instant::now() + self.timeout;
        let mut buf = [0u8; 512];
        loop {
            let len = timeout_at(deadline, socket.recv(&mut buf))
                .await
                .map_err(|_| ProbeError::Timeout(self.timeout))??;
            let packet = buf.get(..len).unwrap_or_default();
            if is_matching_reply(packet, sequence, PAYLOAD) {
                return Ok(());
            }
            trace!(peer = %self.target, len, "Ignoring unrelated ICMP packet");
        }
    }
}

impl Checker for IcmpChecker {
    fn check(&self) -> BoxFuture<'_, Result<(), ProbeError>> {
        Box::pin(self.probe())
    }

    fn target_description(&self) -> &str {
        &self.description
    }
}

/// RFC 1071 internet checksum.
fn checksum(data: &[u8]) -> u16 {
    let mut sum: u32 = 0;
    let mut chunks = data.chunks_exact(2);
    for pair in &mut chunks {
        let &[hi, lo] = pair else { continue };
        sum = sum.wrapping_add(u32::from(u16::from_be_bytes([hi, lo])));
    }
    if let &[last] = chunks.remainder() {
        sum = sum.wrapping_add(u32::from(u16::from_be_bytes([last, 0])));
    }
    while sum > 0xffff {
        sum = (sum & 0xffff) + (sum >> 16);
    }
    !u16::try_from(sum).unwrap_or(u16::MAX)
}

/// Echo request with a zero identifier; the kernel substitutes its own.
fn echo_request(sequence: u16, payload: &[u8]) -> Vec<u8> {
    let mut packet = Vec::with_capacity(HEADER_LEN + payload.len());
    packet.extend_from_slice(&[ECHO_REQUEST, 0, 0, 0, 0, 0]);
    packet.extend_from_slice(&sequence.to_be_bytes());
    packet.extend_from_slice(payload);
    let sum = checksum(&packet).to_be_bytes();
    if let Some(field) = packet.get_mut(2..4) {
        field.copy_from_slice(&sum);
    }
    packet
}

fn is_matching_reply(packet: &[u8], sequence: u16, payload: &[u8]) -> bool {
    let Some((header, body)) = packet.split_at_checked(HEADER_LEN) else {
        return false;
    };
    let &[kind, code, _, _, _, _, seq_hi, seq_lo] = header else {
        return false;
    };
    kind == ECHO_REPLY && code == 0 && u16::from_be_bytes([seq_hi, seq_lo]) == sequence && body == payload
}
