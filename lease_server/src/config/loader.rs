//! Configuration loading utilities for the lease server.

use std::path::Path;

use eyre::WrapErr as _;
use tokio::fs;

use crate::config::ServerConfig;

/// Reads and parses the server config from a TOML file.
///
/// # Errors
///
/// Returns an error if the config file cannot be read or parsed.
pub(crate) async fn load<P: AsRef<Path>>(path: P) -> eyre::Result<ServerConfig> {
    let path_ref = path.as_ref();
    let content = fs::read_to_string(path_ref).await.wrap_err(format!(
        "Failed to read config file at: {}",
        path_ref.display()
    ))?;
    let config: ServerConfig = toml::from_str(&content).wrap_err(format!(
        "Failed to parse config as TOML at: {}",
        path_ref.display()
    ))?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use core::net::Ipv4Addr;
    use std::{env, fs};

    use secrecy::ExposeSecret as _;
    use tunlease_common::BackendKind;

    use super::*;
    use crate::config::{AuthConfig, resolve_config_relative_paths};

    const MINIMAL: &str = r#"
        [server]
        port = 9090

        [pool]
        prefix = "10.90.0.1/20"

        [tunnel]
        endpoint = "vpn.example.com:51820"

        [auth]
        mode = "static"

        [[auth.tokens]]
        token = "t0ken"
        owner = "alice"
    "#;

    #[tokio::test]
    async fn load_server_config_file() {
        let tmp = env::temp_dir().join("tunlease_test_server_config.toml");
        fs::write(&tmp, MINIMAL).unwrap();
        let cfg = load(&tmp).await.unwrap();

        assert_eq!(cfg.server.port, 9090);
        assert_eq!(cfg.server.bind, "0.0.0.0");
        assert!(cfg.server.tls.is_none());
        assert_eq!(cfg.pool.gateway(), Ipv4Addr::new(10, 90, 0, 1));
        assert_eq!(cfg.tunnel.interface, "wg0");
        assert_eq!(cfg.tunnel.backend, BackendKind::Kernel);
        assert_eq!(cfg.tunnel.listen_port, 51820);
        assert_eq!(cfg.health.port, 51821);
        assert_eq!(cfg.leases.reclaim_interval_secs, 60);
        assert_eq!(
            cfg.allowed_ips(),
            vec!["10.90.0.0/20".parse::<ipnet::IpNet>().unwrap()],
            "allowed ips should default to the pool network"
        );

        let AuthConfig::Static { ref tokens } = cfg.auth else {
            panic!("expected static auth");
        };
        let token = tokens.first().unwrap();
        assert_eq!(token.token.expose_secret(), "t0ken");
        assert_eq!(token.owner, "alice");
        assert_eq!(token.lifetime_secs, 86_400);
    }

    #[tokio::test]
    async fn load_server_config_missing_file() {
        let tmp = env::temp_dir().join("tunlease_does_not_exist.toml");
        let res = load(&tmp).await;
        assert!(res.is_err(), "Expected error for missing file");
    }

    #[tokio::test]
    async fn load_server_config_invalid_toml() {
        let tmp = env::temp_dir().join("tunlease_invalid.toml");
        fs::write(&tmp, "not valid toml").unwrap();
        let res = load(&tmp).await;
        assert!(res.is_err(), "Expected error for invalid TOML");
    }

    #[test]
    fn introspection_and_tunnel_values_deserialize() {
        let toml_str = r#"
            [server]
            port = 8443
            bind = "::1"

            [server.tls]
            cert_path = "certs/cert.pem"

            [pool]
            prefix = "10.10.10.1/29"

            [tunnel]
            interface = "tl0"
            backend = "detached"
            endpoint = "203.0.113.5:51820"
            allowed_ips = ["10.10.10.0/29", "192.168.0.0/16"]

            [health]
            port = 7000

            [leases]
            path = "/var/lib/tunlease/leases.txt"
            reclaim_interval_secs = 5

            [auth]
            mode = "introspection"
            url = "https://idp.example.com/oauth2/introspect"
            client_id = "tunlease"
            client_secret = "s3cret"
        "#;
        let cfg: ServerConfig = toml::from_str(toml_str).expect("Failed to parse TOML");
        let tls = cfg.server.tls.as_ref().expect("tls should be present");
        assert_eq!(tls.cert_path, "certs/cert.pem");
        assert_eq!(tls.key_path, "./tls_key.pem");
        assert!(tls.enable);
        assert_eq!(cfg.tunnel.backend, BackendKind::Detached);
        assert_eq!(cfg.allowed_ips().len(), 2);
        assert_eq!(cfg.health.port, 7000);
        assert_eq!(cfg.leases.reclaim_interval().as_secs(), 5);
        assert!(matches!(cfg.auth, AuthConfig::Introspection { ref client_id, .. } if client_id == "tunlease"));
    }

    #[test]
    fn unknown_auth_mode_is_rejected() {
        let toml_str = MINIMAL.replace(r#"mode = "static""#, r#"mode = "oidc""#);
        assert!(toml::from_str::<ServerConfig>(&toml_str).is_err());
    }

    #[test]
    fn relative_paths_resolve_next_to_config() {
        let cfg = Path::new("/etc/tunlease/server.toml");
        assert_eq!(
            resolve_config_relative_paths(cfg, "./leases/leases.txt"),
            Path::new("/etc/tunlease/leases/leases.txt")
        );
        assert_eq!(
            resolve_config_relative_paths(cfg, "../keys/server.key"),
            Path::new("/etc/keys/server.key")
        );
        assert_eq!(
            resolve_config_relative_paths(cfg, "/var/lib/leases.txt"),
            Path::new("/var/lib/leases.txt")
        );
    }
}
