//! Tunnel interface backends.
//!
//! Both the lease server and the agent drive their interface through [`TunnelDriver`]:
//! bring it up, tear it down, and replace its whole configuration at once.
//! [`TunnelDevice`] selects the concrete backend at construction time.

use core::{fmt::Write as _, time::Duration};
use std::sync::Mutex;

use futures::future::BoxFuture;
use secrecy::{ExposeSecret as _, SecretString};
use serde::Deserialize;
use thiserror::Error as ThisError;
use tokio::{
    process::{Child, Command},
    time::{Instant, sleep},
};
use tracing::{debug, info, warn};

use crate::{
    command::{self, CommandError},
    protocol::PeerConfig,
};

/// How long a userspace backend may take to create its link.
const USERSPACE_LINK_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, ThisError)]
pub enum TunnelError {
    #[error(transparent)]
    Command(#[from] CommandError),
    #[error("failed to launch userspace backend `{binary}`")]
    Launch {
        binary: String,
        #[source]
        source: std::io::Error,
    },
    #[error("interface {0} did not appear")]
    LinkTimeout(String),
}

/// Full desired state of a tunnel interface.
#[derive(Debug, Clone)]
pub struct DeviceConfig {
    pub private_key: SecretString,
    pub listen_port: Option<u16>,
    /// Replaces the interface's peer table wholesale.
    pub peers: Vec<PeerConfig>,
}

impl DeviceConfig {
    /// Render in the configuration format understood by `wg syncconf`.
    #[must_use]
    pub fn render(&self) -> SecretString {
        let mut out = String::from("[Interface]\n");
        // Writing to a String cannot fail.
        drop(writeln!(out, "PrivateKey = {}", self.private_key.expose_secret()));
        if let Some(port) = self.listen_port {
            drop(writeln!(out, "ListenPort = {port}"));
        }
        for peer in &self.peers {
            out.push_str("\n[Peer]\n");
            drop(writeln!(out, "PublicKey = {}", peer.public_key));
            if let Some(ref psk) = peer.preshared_key {
                drop(writeln!(out, "PresharedKey = {psk}"));
            }
            if let Some(ref endpoint) = peer.endpoint {
                drop(writeln!(out, "Endpoint = {endpoint}"));
            }
            let allowed: Vec<String> = peer
                .allowed_subnets
                .iter()
                .map(ToString::to_string)
                .collect();
            drop(writeln!(out, "AllowedIPs = {}", allowed.join(", ")));
            if !peer.keepalive.is_zero() {
                drop(writeln!(out, "PersistentKeepalive = {}", peer.keepalive.as_secs()));
            }
        }
        SecretString::from(out)
    }
}

/// Capability set of a tunnel interface.
pub trait TunnelDriver: Send + Sync {
    /// Interface name.
    fn name(&self) -> &str;

    /// Ensure the interface exists and its link is up.
    fn start(&self) -> BoxFuture<'_, Result<(), TunnelError>>;

    /// Remove the interface.
    fn stop(&self) -> BoxFuture<'_, Result<(), TunnelError>>;

    /// Apply `config`, replacing any previous configuration including all peers.
    fn configure<'a>(&'a self, config: &'a DeviceConfig) -> BoxFuture<'a, Result<(), TunnelError>>;
}

/// Selects the tunnel implementation.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// In-kernel WireGuard module.
    #[default]
    Kernel,
    /// A userspace implementation, e.g. `wireguard-go`, owning a TUN device.
    Userspace,
    /// Does not touch the host; only remembers the last applied configuration.
    Detached,
}

/// Kernel-module backed interface.
#[derive(Debug)]
pub struct KernelTunnel {
    name: String,
}

/// Interface owned by a userspace implementation running as a child process.
#[derive(Debug)]
pub struct UserspaceTunnel {
    name: String,
    binary: String,
    child: tokio::sync::Mutex<Option<Child>>,
}

/// Backend that records configuration without applying it.
#[derive(Debug, Default)]
pub struct DetachedTunnel {
    name: String,
    applied: Mutex<Option<DeviceConfig>>,
}

impl DetachedTunnel {
    /// Peers of the most recently applied configuration.
    #[must_use]
    pub fn applied_peers(&self) -> Vec<PeerConfig> {
        self.applied
            .lock()
            .map(|guard| guard.as_ref().map(|c| c.peers.clone()).unwrap_or_default())
            .unwrap_or_default()
    }
}

/// A tunnel interface with its backend chosen at construction time.
#[derive(Debug)]
pub enum TunnelDevice {
    Kernel(KernelTunnel),
    Userspace(UserspaceTunnel),
    Detached(DetachedTunnel),
}

impl TunnelDevice {
    /// Construct a device named `name` for the given backend.
    ///
    /// `userspace_binary` is only used by [`BackendKind::Userspace`].
    #[must_use]
    pub fn new(kind: BackendKind, name: &str, userspace_binary: &str) -> Self {
        let name = name.to_string();
        match kind {
            BackendKind::Kernel => Self::Kernel(KernelTunnel { name }),
            BackendKind::Userspace => Self::Userspace(UserspaceTunnel {
                name,
                binary: userspace_binary.to_string(),
                child: tokio::sync::Mutex::new(None),
            }),
            BackendKind::Detached => Self::Detached(DetachedTunnel {
                name,
                applied: Mutex::new(None),
            }),
        }
    }

    async fn start_inner(&self) -> Result<(), TunnelError> {
        match *self {
            Self::Kernel(ref dev) => {
                if !link_exists(&dev.name).await {
                    info!(interface = %dev.name, "Creating kernel tunnel interface");
                    command::run("ip", &["link", "add", "dev", &dev.name, "type", "wireguard"], None)
                        .await?;
                }
                set_link_up(&dev.name).await
            }
            Self::Userspace(ref dev) => {
                let mut child = dev.child.lock().await;
                if child.is_none() && !link_exists(&dev.name).await {
                    info!(interface = %dev.name, binary = %dev.binary, "Launching userspace tunnel backend");
                    let spawned = Command::new(&dev.binary)
                        .args(["-f", &dev.name])
                        .kill_on_drop(true)
                        .spawn()
                        .map_err(|source| TunnelError::Launch {
                            binary: dev.binary.clone(),
                            source,
                        })?;
                    *child = Some(spawned);
                    wait_for_link(&dev.name, USERSPACE_LINK_TIMEOUT).await?;
                }
                drop(child);
                set_link_up(&dev.name).await
            }
            Self::Detached(ref dev) => {
                debug!(interface = %dev.name, "Detached tunnel started");
                Ok(())
            }
        }
    }

    async fn stop_inner(&self) -> Result<(), TunnelError> {
        match *self {
            Self::Kernel(ref dev) => {
                command::run("ip", &["link", "del", "dev", &dev.name], None).await?;
                Ok(())
            }
            Self::Userspace(ref dev) => {
                if let Some(mut child) = dev.child.lock().await.take()
                    && let Err(e) = child.kill().await
                {
                    warn!(interface = %dev.name, "Failed to stop userspace backend: {e}");
                }
                if link_exists(&dev.name).await {
                    command::run("ip", &["link", "del", "dev", &dev.name], None).await?;
                }
                Ok(())
            }
            Self::Detached(ref dev) => {
                if let Ok(mut applied) = dev.applied.lock() {
                    *applied = None;
                }
                Ok(())
            }
        }
    }

    async fn configure_inner(&self, config: &DeviceConfig) -> Result<(), TunnelError> {
        if let Self::Detached(ref dev) = *self {
            debug!(interface = %dev.name, peers = config.peers.len(), "Recording detached tunnel configuration");
            if let Ok(mut applied) = dev.applied.lock() {
                *applied = Some(config.clone());
            }
            return Ok(());
        }
        let rendered = config.render();
        command::run(
            "wg",
            &["syncconf", self.name(), "/dev/stdin"],
            Some(rendered.expose_secret().as_bytes()),
        )
        .await?;
        info!(interface = %self.name(), peers = config.peers.len(), "Synchronized tunnel peers");
        Ok(())
    }
}

impl TunnelDriver for TunnelDevice {
    fn name(&self) -> &str {
        match *self {
            Self::Kernel(ref dev) => &dev.name,
            Self::Userspace(ref dev) => &dev.name,
            Self::Detached(ref dev) => &dev.name,
        }
    }

    fn start(&self) -> BoxFuture<'_, Result<(), TunnelError>> {
        Box::pin(self.start_inner())
    }

    fn stop(&self) -> BoxFuture<'_, Result<(), TunnelError>> {
        Box::pin(self.stop_inner())
    }

    fn configure<'a>(&'a self, config: &'a DeviceConfig) -> BoxFuture<'a, Result<(), TunnelError>> {
        Box::pin(self.configure_inner(config))
    }
}

async fn link_exists(name: &str) -> bool {
    command::run("ip", &["link", "show", "dev", name], None)
        .await
        .is_ok()
}

async fn set_link_up(name: &str) -> Result<(), TunnelError> {
    command::run("ip", &["link", "set", "up", "dev", name], None).await?;
    Ok(())
}

async fn wait_for_link(name: &str, timeout: Duration) -> Result<(), TunnelError> {
    let start = Instant::now();
    while !link_exists(name).await {
        if start.elapsed() > timeout {
            return Err(TunnelError::LinkTimeout(name.to_string()));
        }
        sleep(Duration::from_millis(100)).await;
    }
    Ok(())
}
