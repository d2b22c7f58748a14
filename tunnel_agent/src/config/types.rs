//! Configuration data types for the tunnel agent.

use core::time::Duration;
use std::path::{Component, Path, PathBuf};

use serde::Deserialize;
use tunlease_common::{BackendKind, DEFAULT_USERSPACE_BINARY};

/// The local tunnel interface.
#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct InterfaceConfig {
    #[serde(default = "default_interface")]
    pub name: String,
    #[serde(default)]
    pub backend: BackendKind,
    #[serde(default = "default_userspace_binary")]
    pub userspace_binary: String,
    /// Generated on first start if absent. Relative paths are resolved relative to the config file.
    #[serde(default = "default_private_key_path")]
    pub private_key_path: String,
    #[serde(default)]
    pub listen_port: Option<u16>,
}

impl Default for InterfaceConfig {
    fn default() -> Self {
        Self {
            name: default_interface(),
            backend: BackendKind::default(),
            userspace_binary: default_userspace_binary(),
            private_key_path: default_private_key_path(),
            listen_port: None,
        }
    }
}

/// Reachability probe strategy.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ProbeKind {
    /// `health` / `ok` datagram exchange with the server's health responder.
    #[default]
    Udp,
    /// ICMP echo request / reply.
    Icmp,
}

#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct HealthConfig {
    #[serde(default)]
    pub probe: ProbeKind,
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
    /// Consecutive failed probes that trigger a renewal.
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
    #[serde(default = "default_icmp_timeout_ms")]
    pub icmp_timeout_ms: u64,
}

impl HealthConfig {
    /// Never shorter than one second.
    pub const fn interval(&self) -> Duration {
        if self.interval_secs == 0 {
            Duration::from_secs(1)
        } else {
            Duration::from_secs(self.interval_secs)
        }
    }

    pub const fn icmp_timeout(&self) -> Duration {
        Duration::from_millis(self.icmp_timeout_ms)
    }
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            probe: ProbeKind::default(),
            interval_secs: default_interval_secs(),
            failure_threshold: default_failure_threshold(),
            icmp_timeout_ms: default_icmp_timeout_ms(),
        }
    }
}

/// One candidate lease server.
#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct ServerEntry {
    /// Key of the applied configuration for this server.
    pub name: String,
    /// Base URL of the lease endpoint, e.g. `https://vpn.example.com:8443`.
    pub lease_url: String,
    /// `host:port` of the health responder, or a bare address for ICMP probes.
    pub probe_address: String,
}

/// Root config structure for the tunnel agent.
#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct AgentConfig {
    #[serde(default)]
    pub interface: InterfaceConfig,
    #[serde(default)]
    pub health: HealthConfig,
    /// Candidates in preference order.
    #[serde(default)]
    pub servers: Vec<ServerEntry>,
}

fn default_interface() -> String {
    "tl0".to_string()
}

fn default_userspace_binary() -> String {
    DEFAULT_USERSPACE_BINARY.to_string()
}

fn default_private_key_path() -> String {
    "./agent.key".to_string()
}

const fn default_interval_secs() -> u64 {
    5
}

const fn default_failure_threshold() -> u32 {
    3
}

const fn default_icmp_timeout_ms() -> u64 {
    1000
}

/// Resolves a path relative to the config file's directory unless it is absolute.
pub fn resolve_config_relative_paths(config_path: &Path, relative_path: &str) -> PathBuf {
    let path = Path::new(relative_path);
    let resolved = if path.is_absolute() {
        path.to_path_buf()
    } else {
        config_path
            .parent()
            .map_or_else(|| path.to_path_buf(), |d| d.join(path))
    };

    let mut result = PathBuf::new();
    for component in resolved.components() {
        use Component as C;
        match component {
            C::Normal(c) => result.push(c),
            C::ParentDir => {
                result.pop();
            }
            C::CurDir => {}
            C::RootDir | C::Prefix(_) => result.push(component),
        }
    }
    result
}
