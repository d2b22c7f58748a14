//! Integration tests for the lease endpoint.

use std::sync::Once;

use reqwest::{Client, StatusCode};
use serde_json::{Value, json};

use crate::common::{
    KillOnDrop, get_free_port, get_free_udp_port, server_config, spawn_lease_server, test_dir,
    wait_for_listening,
};

// Base64 of 32 byte keys.
const KEY_A: &str = "AQEBAQEBAQEBAQEBAQEBAQEBAQEBAQEBAQEBAQEBAQE=";
const KEY_B: &str = "AgICAgICAgICAgICAgICAgICAgICAgICAgICAgICAgI=";

static INIT_RUSTLS: Once = Once::new();

fn client() -> Client {
    INIT_RUSTLS.call_once(|| {
        rustls_openssl::default_provider()
            .install_default()
            .expect("failed to install default rustls provider");
    });
    Client::new()
}

async fn request_lease(client: &Client, port: u16, token: &str, key: &str) -> reqwest::Response {
    client
        .post(format!("http://127.0.0.1:{port}/newPeerLease"))
        .bearer_auth(token)
        .json(&json!({ "PubKey": key }))
        .send()
        .await
        .unwrap()
}

#[tokio::test]
async fn test_lease_is_granted_and_sticky() {
    let dir = test_dir("leases_sticky");
    let port = get_free_port();
    let _server = KillOnDrop(spawn_lease_server(
        &dir,
        &server_config(port, get_free_udp_port(), "10.90.0.1/20"),
    ));
    wait_for_listening(port, 5).await;
    let client = client();

    let resp = request_lease(&client, port, "t-alice", KEY_A).await;
    assert_eq!(resp.status(), StatusCode::OK);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["Status"], "success");
    assert_eq!(body["IP"], "10.90.0.2/32");
    assert_eq!(body["ServerWireguardIP"], "10.90.0.1");
    assert_eq!(body["AllowedIPs"], json!(["10.90.0.0/20"]));
    assert_eq!(body["Endpoint"], "vpn.example.com:51820");
    assert!(body["PubKey"].as_str().is_some_and(|k| k.len() == 44));

    let bob: Value = request_lease(&client, port, "t-bob", KEY_B)
        .await
        .json()
        .await
        .unwrap();
    assert_eq!(bob["IP"], "10.90.0.3/32");

    // Same owner, new key: same address.
    let again: Value = request_lease(&client, port, "t-alice", KEY_B)
        .await
        .json()
        .await
        .unwrap();
    assert_eq!(again["IP"], "10.90.0.2/32");

    let leases = std::fs::read_to_string(dir.join("leases").join("leases.txt")).unwrap();
    assert_eq!(leases.lines().count(), 2, "{leases}");
    assert!(leases.lines().any(|l| l.starts_with("alice ") && l.contains(KEY_B)), "{leases}");
    drop(std::fs::remove_dir_all(&dir));
}

#[tokio::test]
async fn test_lease_rejections() {
    let dir = test_dir("leases_reject");
    let port = get_free_port();
    // A /30 leaves room for exactly one agent next to the gateway.
    let _server = KillOnDrop(spawn_lease_server(
        &dir,
        &server_config(port, get_free_udp_port(), "10.90.0.1/30"),
    ));
    wait_for_listening(port, 5).await;
    let client = client();

    let resp = request_lease(&client, port, "t-mallory", KEY_A).await;
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

    let resp = client
        .post(format!("http://127.0.0.1:{port}/newPeerLease"))
        .json(&json!({ "PubKey": KEY_A }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

    let resp = request_lease(&client, port, "t-alice", "not-a-key").await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

    let resp = request_lease(&client, port, "t-alice", KEY_A).await;
    assert_eq!(resp.status(), StatusCode::OK);
    let resp = request_lease(&client, port, "t-bob", KEY_B).await;
    assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
    drop(std::fs::remove_dir_all(&dir));
}

#[tokio::test]
async fn test_leases_survive_restart() {
    let dir = test_dir("leases_restart");
    let port = get_free_port();
    let config = server_config(port, get_free_udp_port(), "10.90.0.1/20");
    let client = client();

    {
        let _server = KillOnDrop(spawn_lease_server(&dir, &config));
        wait_for_listening(port, 5).await;
        assert_eq!(
            request_lease(&client, port, "t-bob", KEY_B).await.status(),
            StatusCode::OK
        );
    }

    let _server = KillOnDrop(spawn_lease_server(&dir, &config));
    wait_for_listening(port, 5).await;
    // Bob's persisted lease still holds .2, so alice gets the next address.
    let alice: Value = request_lease(&client, port, "t-alice", KEY_A)
        .await
        .json()
        .await
        .unwrap();
    assert_eq!(alice["IP"], "10.90.0.3/32");
    drop(std::fs::remove_dir_all(&dir));
}
