//! Configuration management for the lease server: loading the TOML config file.

mod loader;
mod types;

pub(crate) use loader::*;
pub(crate) use types::*;
