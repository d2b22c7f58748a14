//! Protocol types for agent-server communication.
//!
//! - The lease exchange is JSON over HTTP: `POST /newPeerLease` with a bearer token.
//! - The health probe is a single UDP datagram exchange with literal ASCII payloads.

use core::{net::Ipv4Addr, time::Duration};
use std::collections::BTreeSet;

use ipnet::{IpNet, Ipv4Net};
use serde::{Deserialize, Serialize};

/// Path of the lease endpoint on the lease server.
pub const LEASE_PATH: &str = "/newPeerLease";

/// Payload an agent sends to probe a server's health responder.
pub const HEALTH_PROBE: &[u8] = b"health";

/// Payload a healthy server answers a [`HEALTH_PROBE`] with.
pub const HEALTH_OK: &[u8] = b"ok";

/// Value of [`LeaseResponse::status`] for a granted lease.
pub const STATUS_SUCCESS: &str = "success";

/// Keepalive applied to peers when none is configured.
pub const DEFAULT_KEEPALIVE: Duration = Duration::from_secs(25);

/// Body of a lease request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaseRequest {
    /// Base64 encoded public key of the requesting agent.
    #[serde(rename = "PubKey")]
    pub pub_key: String,
}

/// Body of a successful lease response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaseResponse {
    #[serde(rename = "Status")]
    pub status: String,
    /// The leased address, always a `/32`.
    #[serde(rename = "IP")]
    pub ip: Ipv4Net,
    /// The server's own address inside the tunnel.
    #[serde(rename = "ServerWireguardIP")]
    pub server_wireguard_ip: Ipv4Addr,
    /// Subnets the agent should route through the tunnel.
    #[serde(rename = "AllowedIPs")]
    pub allowed_ips: Vec<IpNet>,
    /// Base64 encoded public key of the server.
    #[serde(rename = "PubKey")]
    pub pub_key: String,
    /// Public `host:port` the server's tunnel listens on.
    #[serde(rename = "Endpoint")]
    pub endpoint: String,
}

impl LeaseResponse {
    /// Describe the server as a peer the agent can install on its interface.
    #[must_use]
    pub fn server_peer(&self) -> PeerConfig {
        PeerConfig {
            public_key: self.pub_key.clone(),
            preshared_key: None,
            endpoint: Some(self.endpoint.clone()),
            allowed_subnets: self.allowed_ips.iter().copied().collect(),
            keepalive: DEFAULT_KEEPALIVE,
        }
    }
}

/// Configuration of one tunnel peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerConfig {
    pub public_key: String,
    pub preshared_key: Option<String>,
    /// `host:port` to send encrypted traffic to, if known.
    pub endpoint: Option<String>,
    pub allowed_subnets: BTreeSet<IpNet>,
    pub keepalive: Duration,
}

impl PeerConfig {
    /// A peer reachable only through a single host address, as the server installs its agents.
    #[must_use]
    pub fn single_host(public_key: &str, address: Ipv4Addr) -> Self {
        Self {
            public_key: public_key.to_string(),
            preshared_key: None,
            endpoint: None,
            allowed_subnets: BTreeSet::from([IpNet::V4(Ipv4Net::from(address))]),
            keepalive: DEFAULT_KEEPALIVE,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lease_request_uses_wire_field_names() {
        let req = LeaseRequest {
            pub_key: "abc=".to_string(),
        };
        assert_eq!(
            serde_json::to_string(&req).unwrap(),
            r#"{"PubKey":"abc="}"#
        );
    }

    #[test]
    fn lease_response_parses_wire_format() {
        let body = r#"{
            "Status": "success",
            "IP": "10.90.0.2/32",
            "ServerWireguardIP": "10.90.0.1",
            "AllowedIPs": ["10.90.0.0/20", "192.168.10.0/24"],
            "PubKey": "c2VydmVy",
            "Endpoint": "vpn.example.com:51820"
        }"#;
        let resp: LeaseResponse = serde_json::from_str(body).unwrap();
        assert_eq!(resp.status, STATUS_SUCCESS);
        assert_eq!(resp.ip, "10.90.0.2/32".parse::<Ipv4Net>().unwrap());
        assert_eq!(resp.server_wireguard_ip, Ipv4Addr::new(10, 90, 0, 1));

        let peer = resp.server_peer();
        assert_eq!(peer.endpoint.as_deref(), Some("vpn.example.com:51820"));
        assert_eq!(peer.allowed_subnets.len(), 2);
        assert_eq!(peer.keepalive, DEFAULT_KEEPALIVE);
    }

    #[test]
    fn lease_response_rejects_missing_fields() {
        let body = r#"{"Status":"success","IP":"10.90.0.2/32"}"#;
        assert!(serde_json::from_str::<LeaseResponse>(body).is_err());
    }

    #[test]
    fn single_host_peer_is_restricted_to_slash_32() {
        let peer = PeerConfig::single_host("key", Ipv4Addr::new(10, 0, 0, 7));
        let subnets: Vec<_> = peer.allowed_subnets.iter().map(ToString::to_string).collect();
        assert_eq!(subnets, vec!["10.0.0.7/32".to_string()]);
    }
}
