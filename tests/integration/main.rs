//! Uses the single integration test approach.
//!
//! This improves parallelism when running the tests, and reduces the number of binaries that have to be built (and linked)
#![expect(clippy::unwrap_used, reason = "This is not problematic in tests")]

mod common;
mod leases;

use std::time::Duration;

use tokio::net::UdpSocket;

use common::{
    KillOnDrop, get_free_port, get_free_udp_port, run_tunnel_agent, server_config,
    spawn_lease_server, test_dir, wait_for_listening,
};

#[tokio::test]
async fn test_health_responder_answers_probe() {
    let dir = test_dir("health");
    let http_port = get_free_port();
    let health_port = get_free_udp_port();
    let _server = KillOnDrop(spawn_lease_server(
        &dir,
        &server_config(http_port, health_port, "10.90.0.1/20"),
    ));
    wait_for_listening(http_port, 5).await;

    let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    socket.connect(("127.0.0.1", health_port)).await.unwrap();

    socket.send(b"hello").await.unwrap();
    socket.send(b"health").await.unwrap();
    let mut buf = [0u8; 16];
    let len = tokio::time::timeout(Duration::from_secs(2), socket.recv(&mut buf))
        .await
        .expect("no health reply")
        .unwrap();
    // Only the probe is answered.
    assert_eq!(&buf[..len], b"ok");
    assert!(
        tokio::time::timeout(Duration::from_millis(300), socket.recv(&mut buf))
            .await
            .is_err()
    );
}

#[tokio::test]
async fn test_agent_probe_reports_server_health() {
    let dir = test_dir("agent_probe");
    let http_port = get_free_port();
    let health_port = get_free_udp_port();
    let _server = KillOnDrop(spawn_lease_server(
        &dir,
        &server_config(http_port, health_port, "10.90.0.1/20"),
    ));
    wait_for_listening(http_port, 5).await;

    let dead_port = get_free_udp_port();
    let agent_config = format!(
        r#"
        [[servers]]
        name = "down"
        lease_url = "http://127.0.0.1:{dead_port}"
        probe_address = "127.0.0.1:{dead_port}"

        [[servers]]
        name = "local"
        lease_url = "http://127.0.0.1:{http_port}"
        probe_address = "127.0.0.1:{health_port}"
        "#
    );
    let output = run_tunnel_agent(&dir, &agent_config, &["probe"]);
    assert!(output.status.success(), "probe failed: {output:?}");
    let stdout = String::from_utf8(output.stdout).unwrap();
    assert!(stdout.contains("local\tudp://127.0.0.1:"), "{stdout}");
    assert!(stdout.lines().any(|l| l.starts_with("local") && l.ends_with("\thealthy")), "{stdout}");
    assert!(stdout.lines().any(|l| l.starts_with("down") && l.contains("unhealthy")), "{stdout}");

    let only_dead = format!(
        r#"
        [[servers]]
        name = "down"
        lease_url = "http://127.0.0.1:{dead_port}"
        probe_address = "127.0.0.1:{dead_port}"
        "#
    );
    let output = run_tunnel_agent(&dir, &only_dead, &["probe"]);
    assert!(!output.status.success(), "no healthy server must fail the probe");
    drop(std::fs::remove_dir_all(&dir));
}
