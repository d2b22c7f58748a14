//! Shared building blocks for the lease server and the tunnel agent.
//!
//! This crate provides:
//! - The lease and health probe wire protocol
//! - Tunnel interface backends and peer configuration rendering
//! - Key pair handling
//! - Retry interval generation
//! - Logging setup
#![cfg_attr(
    test,
    expect(clippy::unwrap_used, reason = "This is not problematic in tests")
)]

extern crate alloc;
extern crate core;

pub mod backoff;
pub mod command;
pub mod keys;
pub mod logging;
pub mod protocol;
pub mod tunnel;

pub use backoff::BackoffPolicy;
pub use keys::{KeyError, KeyPair, validate_public_key};
pub use logging::{LogFormat, init_tracing};
pub use protocol::{LeaseRequest, LeaseResponse, PeerConfig};
pub use tunnel::{BackendKind, DeviceConfig, TunnelDevice, TunnelDriver, TunnelError};

/// Default userspace tunnel implementation launched by [`BackendKind::Userspace`].
pub const DEFAULT_USERSPACE_BINARY: &str = "wireguard-go";
