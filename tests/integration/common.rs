//! Common utilities for integration tests.
//!
//! Spawns the built binaries against temporary configs and waits for them to come up.

use std::{
    net::{TcpListener, TcpStream, UdpSocket},
    path::{Path, PathBuf},
    process::{Child, Command, Stdio},
    time::{Duration, Instant},
};

/// Environment variable that quiets the spawned binaries' logging.
const INTEGRATION_TEST_ENV: &str = "TUNLEASE_INTEGRATION_TEST";

pub fn get_free_port() -> u16 {
    TcpListener::bind("127.0.0.1:0")
        .expect("failed to bind to address")
        .local_addr()
        .unwrap()
        .port()
}

pub fn get_free_udp_port() -> u16 {
    UdpSocket::bind("127.0.0.1:0")
        .expect("failed to bind to address")
        .local_addr()
        .unwrap()
        .port()
}

/// Guard that kills and waits on a child process when dropped.
pub struct KillOnDrop(pub Child);

impl Drop for KillOnDrop {
    fn drop(&mut self) {
        drop(self.0.kill());
        drop(self.0.wait());
    }
}

/// A fresh, empty directory for one test.
pub fn test_dir(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("tunlease_it_{name}_{}", std::process::id()));
    drop(std::fs::remove_dir_all(&dir));
    std::fs::create_dir_all(&dir).expect("failed to create test dir");
    dir
}

/// Lease server config with a detached tunnel, static tokens and the given pool.
pub fn server_config(http_port: u16, health_port: u16, pool: &str) -> String {
    format!(
        r#"
        [server]
        port = {http_port}
        bind = "127.0.0.1"

        [pool]
        prefix = "{pool}"

        [tunnel]
        backend = "detached"
        endpoint = "vpn.example.com:51820"

        [health]
        port = {health_port}
        bind = "127.0.0.1"

        [leases]
        reclaim_interval_secs = 1

        [auth]
        mode = "static"

        [[auth.tokens]]
        token = "t-alice"
        owner = "alice"

        [[auth.tokens]]
        token = "t-bob"
        owner = "bob"
        "#
    )
}

/// Write `config_toml` into `dir` and spawn `lease_server serve` with it.
pub fn spawn_lease_server(dir: &Path, config_toml: &str) -> Child {
    let config_path = dir.join("lease_server.toml");
    std::fs::write(&config_path, config_toml).expect("failed to write config");

    Command::new(env!("CARGO_BIN_EXE_lease_server"))
        .args(["serve", "--config", config_path.to_str().unwrap()])
        .env(INTEGRATION_TEST_ENV, "1")
        .stdout(Stdio::null())
        .spawn()
        .expect("failed to start lease_server")
}

/// Write `config_toml` into `dir` and run the tunnel agent with `args` plus `--config`.
pub fn run_tunnel_agent(dir: &Path, config_toml: &str, args: &[&str]) -> std::process::Output {
    let config_path = dir.join("tunnel_agent.toml");
    std::fs::write(&config_path, config_toml).expect("failed to write config");

    Command::new(env!("CARGO_BIN_EXE_tunnel_agent"))
        .args(args)
        .args(["--config", config_path.to_str().unwrap()])
        .env(INTEGRATION_TEST_ENV, "1")
        .output()
        .expect("failed to run tunnel_agent")
}

/// Block until a TCP listener is accepting on `127.0.0.1:port` or timeout.
pub async fn wait_for_listening(port: u16, timeout_secs: u64) {
    let start = Instant::now();
    while TcpStream::connect(("127.0.0.1", port)).is_err() {
        assert!(
            start.elapsed() <= Duration::from_secs(timeout_secs),
            "server did not start within timeout"
        );
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
}
