//! Configuration data types for the lease server.
//!
//! This module contains all the data structures used for configuration,
//! including HTTP listener, address pool, tunnel, persistence and authentication settings.

use alloc::sync::Arc;
use core::{net::Ipv4Addr, time::Duration};
use std::path::{Component, Path, PathBuf};

use ipnet::{IpNet, Ipv4Net};
use secrecy::{ExposeSecret as _, SecretString};
use serde::Deserialize;
use tunlease_common::{BackendKind, DEFAULT_USERSPACE_BINARY};

/// HTTP server binding configuration section.
#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub(crate) struct HttpConfig {
    /// TCP port for the lease endpoint.
    pub port: u16,
    /// Bind address for the HTTP listener.
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Optional TLS configuration for serving HTTPS.
    #[serde(default)]
    pub tls: Option<TlsConfig>,
}

/// TLS configuration for the HTTP server.
///
/// Paths in the config are interpreted relative to the config file when not absolute.
#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub(crate) struct TlsConfig {
    #[serde(default = "relative_cert_path")]
    pub cert_path: String,
    #[serde(default = "relative_key_path")]
    pub key_path: String,
    /// Whether TLS is enabled. When false the server will serve plain HTTP even if the
    /// `tls` table is present. Defaults to true.
    #[serde(default = "do_enable")]
    pub enable: bool,
}

/// The subnet addresses are leased from.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
pub(crate) struct PoolConfig {
    /// Written as the server's own address plus mask, e.g. `10.90.0.1/20`.
    /// The host part is reserved as the gateway.
    pub prefix: Ipv4Net,
}

impl PoolConfig {
    pub(crate) fn gateway(&self) -> Ipv4Addr {
        self.prefix.addr()
    }
}

/// The server's own tunnel interface.
#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub(crate) struct TunnelConfig {
    #[serde(default = "default_interface")]
    pub interface: String,
    #[serde(default)]
    pub backend: BackendKind,
    #[serde(default = "default_userspace_binary")]
    pub userspace_binary: String,
    #[serde(default = "default_private_key_path")]
    pub private_key_path: String,
    #[serde(default = "default_listen_port")]
    pub listen_port: u16,
    /// Public `host:port` agents should send tunnel traffic to.
    pub endpoint: String,
    /// Subnets agents route through the tunnel. Defaults to the pool network.
    #[serde(default)]
    pub allowed_ips: Vec<IpNet>,
}

/// UDP health responder.
#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub(crate) struct HealthConfig {
    #[serde(default = "default_health_port")]
    pub port: u16,
    #[serde(default = "default_bind")]
    pub bind: String,
    #[serde(default = "do_enable")]
    pub enable: bool,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            port: default_health_port(),
            bind: default_bind(),
            enable: do_enable(),
        }
    }
}

/// Lease persistence and reclamation.
#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub(crate) struct LeasesConfig {
    /// Path to the lease file. Relative paths are resolved relative to the config file.
    #[serde(default = "default_lease_path")]
    pub path: String,
    #[serde(default = "default_reclaim_interval_secs")]
    pub reclaim_interval_secs: u64,
}

impl LeasesConfig {
    /// Never shorter than one second.
    pub(crate) const fn reclaim_interval(&self) -> Duration {
        if self.reclaim_interval_secs == 0 {
            Duration::from_secs(1)
        } else {
            Duration::from_secs(self.reclaim_interval_secs)
        }
    }
}

impl Default for LeasesConfig {
    fn default() -> Self {
        Self {
            path: default_lease_path(),
            reclaim_interval_secs: default_reclaim_interval_secs(),
        }
    }
}

/// A bearer token accepted in static mode.
#[derive(Debug, Deserialize, Clone)]
pub(crate) struct StaticToken {
    pub token: Arc<SecretString>,
    /// Owner identity the token authenticates as.
    pub owner: String,
    /// Lease lifetime granted to this token, in seconds.
    #[serde(default = "default_static_lifetime_secs")]
    pub lifetime_secs: u64,
}

impl PartialEq for StaticToken {
    fn eq(&self, other: &Self) -> bool {
        self.token.expose_secret() == other.token.expose_secret()
            && self.owner == other.owner
            && self.lifetime_secs == other.lifetime_secs
    }
}

/// How bearer tokens are validated.
#[derive(Debug, Deserialize, Clone)]
#[serde(tag = "mode", rename_all = "lowercase")]
pub(crate) enum AuthConfig {
    /// RFC 7662 token introspection against the identity provider.
    Introspection {
        url: String,
        client_id: String,
        client_secret: Arc<SecretString>,
    },
    /// A fixed token table, for closed deployments and tests.
    Static {
        #[serde(default)]
        tokens: Vec<StaticToken>,
    },
}

impl PartialEq for AuthConfig {
    fn eq(&self, other: &Self) -> bool {
        use AuthConfig as AC;
        match (self, other) {
            (
                &AC::Introspection {
                    url: ref u1,
                    client_id: ref c1,
                    client_secret: ref s1,
                },
                &AC::Introspection {
                    url: ref u2,
                    client_id: ref c2,
                    client_secret: ref s2,
                },
            ) => u1 == u2 && c1 == c2 && s1.expose_secret() == s2.expose_secret(),
            (&AC::Static { tokens: ref t1 }, &AC::Static { tokens: ref t2 }) => t1 == t2,
            _ => false,
        }
    }
}

/// Root config structure for the lease server.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub(crate) struct ServerConfig {
    pub server: HttpConfig,
    pub pool: PoolConfig,
    pub tunnel: TunnelConfig,
    #[serde(default)]
    pub health: HealthConfig,
    #[serde(default)]
    pub leases: LeasesConfig,
    pub auth: AuthConfig,
}

impl ServerConfig {
    /// Subnets handed to agents in lease responses.
    pub(crate) fn allowed_ips(&self) -> Vec<IpNet> {
        if self.tunnel.allowed_ips.is_empty() {
            vec![IpNet::V4(self.pool.prefix.trunc())]
        } else {
            self.tunnel.allowed_ips.clone()
        }
    }
}

fn default_bind() -> String {
    "0.0.0.0".to_string()
}

fn relative_cert_path() -> String {
    "./tls_cert.pem".to_string()
}

fn relative_key_path() -> String {
    "./tls_key.pem".to_string()
}

const fn do_enable() -> bool {
    true
}

fn default_interface() -> String {
    "wg0".to_string()
}

fn default_userspace_binary() -> String {
    DEFAULT_USERSPACE_BINARY.to_string()
}

fn default_private_key_path() -> String {
    "./server.key".to_string()
}

const fn default_listen_port() -> u16 {
    51820
}

const fn default_health_port() -> u16 {
    51821
}

fn default_lease_path() -> String {
    "./leases/leases.txt".to_string()
}

const fn default_reclaim_interval_secs() -> u64 {
    60
}

const fn default_static_lifetime_secs() -> u64 {
    24 * 60 * 60
}

/// Resolves a path to an absolute one.
///
/// If the path is absolute, returns it as-is. If relative, joins it with the
/// config file's parent directory and normalizes the result to remove redundant
/// components like `./`.
pub(crate) fn resolve_config_relative_paths(config_path: &Path, relative_path: &str) -> PathBuf {
    let path = Path::new(relative_path);
    let resolved = if path.is_absolute() {
        path.to_path_buf()
    } else {
        config_path
            .parent()
            .map_or_else(|| path.to_path_buf(), |d| d.join(path))
    };

    // We can't use canonicalize() because the file might not exist yet
    normalize_path(&resolved)
}

fn normalize_path(path: &Path) -> PathBuf {
    let mut result = PathBuf::new();
    for component in path.components() {
        use Component as C;
        match component {
            C::Normal(c) => {
                result.push(c);
            }
            C::ParentDir => {
                result.pop();
            }
            C::CurDir => {}
            C::RootDir | C::Prefix(_) => {
                result.push(component);
            }
        }
    }
    result
}
