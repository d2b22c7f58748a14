//! Command-line interface definitions for the lease server.

use std::env;

use clap::{Parser, Subcommand};
use tunlease_common::LogFormat;

/// Top-level command-line interface definition.
#[derive(Debug, Parser)]
#[command(name = "lease_server")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = env!("CARGO_PKG_DESCRIPTION"))]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

/// Available subcommands for the lease server.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Serve the lease endpoint and the health responder.
    Serve(ServeArgs),
}

/// Arguments for the serve command.
#[derive(Debug, Parser)]
pub struct ServeArgs {
    /// Path to the configuration file
    #[arg(short, long, default_value = "lease_server.toml", env = "TUNLEASE_SERVER_CONFIG")]
    pub config: String,

    /// Optional override for the listen port (overrides port in config)
    #[arg(long)]
    pub port: Option<u16>,

    /// Optional override for the bind address (overrides bind in config)
    #[arg(long)]
    pub bind: Option<String>,

    /// Log output format
    #[arg(long, value_enum, default_value_t)]
    pub log_format: LogFormat,
}
