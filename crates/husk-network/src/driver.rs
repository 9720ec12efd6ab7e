//! The network driver contract and the host adapters drivers work through.

use std::sync::Arc;

use husk_common::error::Result;
use husk_core::namespace::network::{HostNetns, NetnsOps};
use ipnetwork::Ipv4Network;

use crate::firewall::{Firewall, Iptables};
use crate::link::{IpCommand, LinkOps};
use crate::network::{Endpoint, Network};

/// Kernel-facing adapters shared by the drivers and the network context.
#[derive(Clone)]
pub struct HostNet {
    /// Link, address, and route operations.
    pub links: Arc<dyn LinkOps>,
    /// NAT rule operations.
    pub firewall: Arc<dyn Firewall>,
    /// Network namespace entry.
    pub netns: Arc<dyn NetnsOps>,
}

impl HostNet {
    /// Adapters that act on the running system.
    #[must_use]
    pub fn system() -> Self {
        Self {
            links: Arc::new(IpCommand),
            firewall: Arc::new(Iptables),
            netns: Arc::new(HostNetns),
        }
    }
}

impl std::fmt::Debug for HostNet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostNet").finish_non_exhaustive()
    }
}

/// A kind of network (bridge, ...).
pub trait NetworkDriver: Send + Sync {
    /// Driver name as stored in network records.
    fn name(&self) -> &'static str;

    /// Materializes network `name` on the host.
    ///
    /// `ip_range` carries the already-reserved gateway as its address.
    ///
    /// # Errors
    ///
    /// Returns an error if any host step fails; no rollback is attempted.
    fn create(&self, ip_range: Ipv4Network, name: &str) -> Result<Network>;

    /// Removes the host side of `network`.
    ///
    /// # Errors
    ///
    /// Returns an error if the network's device does not exist or cannot be
    /// removed.
    fn delete(&self, network: &Network) -> Result<()>;

    /// Wires `endpoint` to `network`, recording the device on the endpoint.
    ///
    /// # Errors
    ///
    /// Returns an error if any step fails; partial state is left in place.
    fn connect(&self, network: &Network, endpoint: &mut Endpoint) -> Result<()>;

    /// Undoes [`NetworkDriver::connect`] for `endpoint`.
    ///
    /// # Errors
    ///
    /// Returns an error if the device exists but cannot be removed.
    fn disconnect(&self, network: &Network, endpoint: &Endpoint) -> Result<()>;
}
