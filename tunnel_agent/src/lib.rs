//! Library entry for the `tunnel_agent` binary.
//!
//! Exposes `inner_main` so a workspace-level shim binary can call into the agent logic.
//!
//! The agent keeps a tunnel interface attached to a healthy lease server: it
//! probes the active server, and once the probes keep failing it leases an
//! address from the next healthy candidate and reconfigures the interface.
#![cfg_attr(
    test,
    expect(clippy::unwrap_used, reason = "This is not problematic in tests")
)]

extern crate alloc;
extern crate core;

pub mod cli;
pub mod config;
pub mod device;
pub mod health;
pub mod lease_client;
pub mod netcfg;
pub mod run;
pub mod trigger;

use std::{fs, sync::Once};

use eyre::{Result, WrapErr as _};
#[cfg(unix)]
use nix::sys::stat;
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

/// The tunnel agent's main function; can be called from a shim binary.
///
/// # Errors
///
/// Returns an error if the configuration or token cannot be read, or the agent fails to start.
///
/// # Panics
///
/// Panics if the OpenSSL crypto provider cannot be installed.
pub async fn inner_main(invocation: Cli) -> Result<()> {
    match invocation.command {
        Command::Up(args) => {
            // The generated key file is owner-only
            #[cfg(unix)]
            stat::umask(stat::Mode::S_IRWXG | stat::Mode::S_IRWXO);

            let config = &args.config;
            let config_path =
                fs::canonicalize(config).wrap_err(format!("Config file not found at: {config}"))?;

            init_tracing(args.log_format);

            let token = run::read_token(args.token, args.token_file.as_deref()).await?;

            let startup_span = tracing::info_span!("tunnel_agent.startup", ?config_path, pid = ?std::process::id(), version = env!("CARGO_PKG_VERSION"));

            install_crypto_provider();

            info!(parent: &startup_span, "Starting tunnel agent");

            run::start_agent(&config_path, token)
                .instrument(startup_span)
                .await
        }
        Command::Probe(args) => {
            let config = &args.config;
            let config_path =
                fs::canonicalize(config).wrap_err(format!("Config file not found at: {config}"))?;

            init_tracing(args.log_format);

            run::probe(&config_path).await
        }
    }
}
