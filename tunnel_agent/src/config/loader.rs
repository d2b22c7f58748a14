//! Configuration loading utilities for the tunnel agent.

use std::path::Path;

use eyre::WrapErr as _;
use tokio::fs;

use crate::config::AgentConfig;

/// Reads, parses and validates the agent config from a TOML file.
///
/// # Errors
///
/// Returns an error if the file cannot be read or parsed, lists no servers,
/// repeats a server name, or has a zero failure threshold.
pub async fn load<P: AsRef<Path>>(path: P) -> eyre::Result<AgentConfig> {
    let path_ref = path.as_ref();
    let content = fs::read_to_string(path_ref).await.wrap_err(format!(
        "Failed to read config file at: {}",
        path_ref.display()
    ))?;
    let config: AgentConfig = toml::from_str(&content).wrap_err(format!(
        "Failed to parse config as TOML at: {}",
        path_ref.display()
    ))?;
    validate(&config).wrap_err(format!("Invalid config at: {}", path_ref.display()))?;
    Ok(config)
}

fn validate(config: &AgentConfig) -> eyre::Result<()> {
    if config.servers.is_empty() {
        eyre::bail!("at least one [[servers]] entry is required");
    }
    if config.health.failure_threshold == 0 {
        eyre::bail!("health.failure_threshold must be at least 1");
    }
    for (idx, server) in config.servers.iter().enumerate() {
        if config
            .servers
            .iter()
            .skip(idx + 1)
            .any(|other| other.name == server.name)
        {
            eyre::bail!("duplicate server name: {}", server.name);
        }
    }
    Ok(())
}
