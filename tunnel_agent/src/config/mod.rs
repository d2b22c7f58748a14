//! Configuration management for the tunnel agent: loading the TOML config file.

mod loader;
mod types;

pub use loader::*;
pub use types::*;
