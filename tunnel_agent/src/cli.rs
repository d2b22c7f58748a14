//! Command-line interface definitions for the tunnel agent.

use std::env;

use clap::{Parser, Subcommand};
use tunlease_common::LogFormat;

/// Top-level command-line interface definition.
#[derive(Debug, Parser)]
#[command(name = "tunnel_agent")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = env!("CARGO_PKG_DESCRIPTION"))]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

/// Available subcommands for the tunnel agent.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Lease an address from a healthy server and keep the tunnel attached.
    Up(UpArgs),

    /// Probe every configured server once and report the results.
    Probe(ProbeArgs),
}

/// Arguments for the up command.
#[derive(Debug, Parser)]
pub struct UpArgs {
    /// Path to the configuration file
    #[arg(short, long, default_value = "tunnel_agent.toml", env = "TUNLEASE_AGENT_CONFIG")]
    pub config: String,

    /// Bearer token presented to the lease servers
    #[arg(long, env = "TUNLEASE_TOKEN", hide_env_values = true, conflicts_with = "token_file")]
    pub token: Option<String>,

    /// Read the bearer token from this file instead
    #[arg(long)]
    pub token_file: Option<String>,

    /// Log output format
    #[arg(long, value_enum, default_value_t)]
    pub log_format: LogFormat,
}

/// Arguments for the probe command.
#[derive(Debug, Parser)]
pub struct ProbeArgs {
    /// Path to the configuration file
    #[arg(short, long, default_value = "tunnel_agent.toml", env = "TUNLEASE_AGENT_CONFIG")]
    pub config: String,

    /// Log output format
    #[arg(long, value_enum, default_value_t)]
    pub log_format: LogFormat,
}
