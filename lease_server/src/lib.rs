//! Library entry for the `lease_server` binary.
//!
//! Exposes `inner_main` so a workspace-level shim binary can call into the server logic.
//!
//! The server leases tunnel addresses to authenticated agents, keeps its tunnel
//! interface's peer table in line with the live leases, and answers health probes.
#![cfg_attr(
    test,
    expect(clippy::unwrap_used, reason = "This is not problematic in tests")
)]

extern crate alloc;
extern crate core;

pub mod app;
pub mod auth;
pub mod cli;
pub mod config;
pub mod health;
pub mod http;
pub mod run;

use std::{fs, sync::Once};

#[cfg(unix)]
use nix::sys::stat;
use eyre::{Result, WrapErr as _};
use tracing::{Instrument as _, info};
use tunlease_common::init_tracing;

use cli::{Cli, Command};

static INIT_RUSTLS: Once = Once::new();

/// Install the process-wide rustls crypto provider. Subsequent calls are ignored.
///
/// # Panics
///
/// Panics if the OpenSSL crypto provider cannot be installed.
pub(crate) fn install_crypto_provider() {
    INIT_RUSTLS.call_once(|| {
        rustls_openssl::default_provider()
            .install_default()
            .expect("failed to install default rustls provider");
    });
}

/// The lease server's main function; can be called from a shim binary.
///
/// # Errors
///
/// Returns an error if the server fails to start.
///
/// # Panics
///
/// Panics if the OpenSSL crypto provider cannot be installed.
pub async fn inner_main(invocation: Cli) -> Result<()> {
    match invocation.command {
        Command::Serve(args) => {
            // Lease and key files are owner-only
            #[cfg(unix)]
            stat::umask(stat::Mode::S_IRWXG | stat::Mode::S_IRWXO);

            let config = &args.config;
            let config_path =
                fs::canonicalize(config).wrap_err(format!("Config file not found at: {config}"))?;

            init_tracing(args.log_format);

            let startup_span = tracing::info_span!("lease_server.startup", ?config_path, pid = ?std::process::id(), version = env!("CARGO_PKG_VERSION"));

            install_crypto_provider();

            info!(parent: &startup_span, "Starting lease server");

            run::start(&config_path, args.port, args.bind.as_deref())
                .instrument(startup_span)
                .await?;
            Ok(())
        }
    }
}
