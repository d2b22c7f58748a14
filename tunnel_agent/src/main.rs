//! Shim binary that calls into the `tunlease_agent` library's `inner_main`.

use clap::Parser as _;
use eyre::Result;
use tunlease_agent::cli::Cli;

#[tokio::main]
async fn main() -> Result<()> {
    tunlease_agent::inner_main(Cli::parse()).await
}
