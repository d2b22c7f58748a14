//! Shim binary that calls into the `tunlease_server` library's `inner_main`.

use clap::Parser as _;
use eyre::Result;
use tunlease_server::cli::Cli;

#[tokio::main]
async fn main() -> Result<()> {
    tunlease_server::inner_main(Cli::parse()).await
}
