use core::net::{IpAddr, SocketAddr};
use std::path::Path;

use eyre::WrapErr as _;
use tokio::{net, signal};
use tracing::warn;

use crate::{
    app::{self, AppState},
    config::TlsConfig,
    http::{router, tls::setup_tls_config},
};

/// Creates a future that resolves when SIGTERM or Ctrl-C is received.
pub(crate) async fn shutdown_signal() {
    #[cfg(unix)]
    {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = sigterm.recv() => {}
                    _ = signal::ctrl_c() => {}
                }
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler, only Ctrl-C will stop the server: {e}");
                drop(signal::ctrl_c().await);
            }
        }
    }
    #[cfg(not(unix))]
    {
        drop(signal::ctrl_c().await);
    }
}

/// Start the HTTP server with optional TLS.
pub(crate) async fn start_server(
    app_state: AppState,
    addr: SocketAddr,
    tls_opt: Option<&TlsConfig>,
    config_path: &Path,
) -> eyre::Result<()> {
    let app = router::create_app(app_state);

    match tls_opt {
        Some(tls_cfg) => {
            let rustls_cfg = setup_tls_config(tls_cfg, config_path, addr).await?;
            let server = axum_server::bind_rustls(addr, rustls_cfg).serve(app.into_make_service());
            tokio::select! {
                res = server => res?,
                () = shutdown_signal() => {
                    tracing::info!("Received shutdown, shutting down");
                }
            }
        }
        None => {
            tracing::info!("Listening on http://{}", addr);
            let listener = net::TcpListener::bind(addr)
                .await
                .wrap_err(format!("Failed to bind lease endpoint on {addr}"))?;
            let server = axum::serve(listener, app);
            tokio::select! {
                res = server => res?,
                () = shutdown_signal() => {
                    tracing::info!("Received shutdown, shutting down");
                }
            }
        }
    }

    Ok(())
}

/// Initialize the state and serve until a shutdown signal arrives.
///
/// # Errors
///
/// Returns an error if the configuration cannot be loaded, the tunnel or the
/// lease file cannot be initialized, TLS setup fails, or the server cannot bind.
pub(crate) async fn start(
    config_path: &Path,
    port_override: Option<u16>,
    bind_override: Option<&str>,
) -> eyre::Result<()> {
    let (app_state, config) = app::initialize_state(config_path).await?;

    // Apply optional overrides from CLI/tests
    let listen_port = port_override.unwrap_or(config.server.port);
    let bind_str = bind_override.unwrap_or(&config.server.bind);
    let listen_ip: IpAddr = bind_str
        .parse()
        .wrap_err(format!("Invalid bind address: {bind_str}"))?;

    let tls_opt = match config.server.tls {
        Some(ref tls_cfg @ TlsConfig { enable: true, .. }) => Some(tls_cfg),
        _ => None,
    };

    start_server(
        app_state,
        SocketAddr::from((listen_ip, listen_port)),
        tls_opt,
        config_path,
    )
    .await
}
