//! Host network configuration: interface addresses and routes.

use futures::future::BoxFuture;
use ipnet::IpNet;
use thiserror::Error as ThisError;
use tunlease_common::command::{self, CommandError};

#[derive(Debug, ThisError)]
pub enum NetConfigError {
    #[error(transparent)]
    Command(#[from] CommandError),
}

/// Address and route manipulation on a named interface.
pub trait NetConfigurator: Send + Sync {
    fn add_address<'a>(&'a self, interface: &'a str, address: IpNet) -> BoxFuture<'a, Result<(), NetConfigError>>;

    fn remove_address<'a>(&'a self, interface: &'a str, address: IpNet) -> BoxFuture<'a, Result<(), NetConfigError>>;

    /// Route `network` through `interface`, replacing an existing route to it.
    fn add_route<'a>(&'a self, interface: &'a str, network: IpNet) -> BoxFuture<'a, Result<(), NetConfigError>>;

    fn remove_route<'a>(&'a self, interface: &'a str, network: IpNet) -> BoxFuture<'a, Result<(), NetConfigError>>;
}

/// Applies changes with iproute2's `ip`.
#[derive(Debug, Clone, Copy, Default)]
pub struct IpCommand;

fn address_args(verb: &'static str, interface: &str, address: IpNet) -> Vec<String> {
    vec![
        "address".to_string(),
        verb.to_string(),
        address.to_string(),
        "dev".to_string(),
        interface.to_string(),
    ]
}

fn route_args(verb: &'static str, interface: &str, network: IpNet) -> Vec<String> {
    // `ip` refuses routes with host bits set.
    vec![
        "route".to_string(),
        verb.to_string(),
        network.trunc().to_string(),
        "dev".to_string(),
        interface.to_string(),
    ]
}

async fn ip(args: Vec<String>) -> Result<(), NetConfigError> {
    let args: Vec<&str> = args.iter().map(String::as_str).collect();
    command::run("ip", &args, None).await?;
    Ok(())
}

impl NetConfigurator for IpCommand {
    fn add_address<'a>(&'a self, interface: &'a str, address: IpNet) -> BoxFuture<'a, Result<(), NetConfigError>> {
        Box::pin(ip(address_args("add", interface, address)))
    }

    fn remove_address<'a>(&'a self, interface: &'a str, address: IpNet) -> BoxFuture<'a, Result<(), NetConfigError>> {
        Box::pin(ip(address_args("del", interface, address)))
    }

    fn add_route<'a>(&'a self, interface: &'a str, network: IpNet) -> BoxFuture<'a, Result<(), NetConfigError>> {
        Box::pin(ip(route_args("replace", interface, network)))
    }

    fn remove_route<'a>(&'a self, interface: &'a str, network: IpNet) -> BoxFuture<'a, Result<(), NetConfigError>> {
        Box::pin(ip(route_args("del", interface, network)))
    }
}
