//! `husk network` — Create, list, and remove container networks.

use clap::{Args, Subcommand};
use husk_common::config::HuskConfig;
use husk_common::constants::BRIDGE_DRIVER;
use husk_network::{HostNet, NetworkContext};

/// Arguments for the `network` command.
#[derive(Args, Debug)]
pub struct NetworkArgs {
    /// Network operation.
    #[command(subcommand)]
    pub action: NetworkAction,
}

/// Network operations.
#[derive(Subcommand, Debug)]
pub enum NetworkAction {
    /// Create a network.
    Create {
        /// Network driver.
        #[arg(long, default_value = BRIDGE_DRIVER)]
        driver: String,
        /// IPv4 subnet in CIDR notation; its first host becomes the gateway.
        #[arg(long)]
        subnet: String,
        /// Network name, also the bridge device name.
        name: String,
    },
    /// List networks.
    #[command(alias = "ls")]
    List,
    /// Remove a network.
    #[command(alias = "rm")]
    Remove {
        /// Network name.
        name: String,
    },
}

/// Executes the `network` command.
///
/// # Errors
///
/// Returns an error if the registry cannot be loaded or the operation fails.
pub fn execute(config: &HuskConfig, args: NetworkArgs) -> anyhow::Result<()> {
    let context = NetworkContext::new(config, HostNet::system());
    context.init()?;
    match args.action {
        NetworkAction::Create {
            driver,
            subnet,
            name,
        } => {
            let network = context.create_network(&driver, &subnet, &name)?;
            eprintln!("network {} created on {}", network.name, network.ip_range);
        }
        NetworkAction::List => print!("{}", context.list_network()),
        NetworkAction::Remove { name } => {
            context.delete_network(&name)?;
            eprintln!("network {name} removed");
        }
    }
    Ok(())
}
