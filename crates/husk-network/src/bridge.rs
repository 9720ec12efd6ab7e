//! Linux bridge driver.
//!
//! A network is a bridge device named after the network, holding the
//! gateway address, with a masquerade rule so containers reach the outside.
//! Each endpoint gets a veth pair whose host end is enslaved to the bridge.

use std::sync::Arc;

use husk_common::constants::BRIDGE_DRIVER;
use husk_common::error::Result;
use ipnetwork::Ipv4Network;

use crate::driver::{HostNet, NetworkDriver};
use crate::firewall::{Firewall, Rule};
use crate::link::LinkOps;
use crate::network::{Endpoint, Network, VethPair};

/// Driver for bridge networks.
pub struct BridgeDriver {
    links: Arc<dyn LinkOps>,
    firewall: Arc<dyn Firewall>,
}

impl std::fmt::Debug for BridgeDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BridgeDriver").finish_non_exhaustive()
    }
}

impl BridgeDriver {
    /// Creates a driver acting through `host`.
    #[must_use]
    pub fn new(host: &HostNet) -> Self {
        Self {
            links: Arc::clone(&host.links),
            firewall: Arc::clone(&host.firewall),
        }
    }

    fn ensure_bridge(&self, name: &str) -> Result<()> {
        if self.links.exists(name)? {
            tracing::debug!(bridge = name, "bridge already exists");
            return Ok(());
        }
        self.links.add_bridge(name)?;
        tracing::info!(bridge = name, "bridge created");
        Ok(())
    }
}

impl NetworkDriver for BridgeDriver {
    fn name(&self) -> &'static str {
        BRIDGE_DRIVER
    }

    fn create(&self, ip_range: Ipv4Network, name: &str) -> Result<Network> {
        let network = Network {
            name: name.to_string(),
            ip_range,
            driver: BRIDGE_DRIVER.to_string(),
        };
        self.ensure_bridge(name)
            .map_err(|e| e.in_step(format!("create bridge {name}")))?;
        self.links
            .replace_addr(name, &ip_range)
            .map_err(|e| e.in_step(format!("assign {ip_range} to {name}")))?;
        self.links
            .set_up(name)
            .map_err(|e| e.in_step(format!("bring up {name}")))?;
        self.firewall
            .ensure(&Rule::masquerade(&network.subnet(), name))
            .map_err(|e| e.in_step(format!("masquerade {}", network.subnet())))?;
        Ok(network)
    }

    fn delete(&self, network: &Network) -> Result<()> {
        self.links
            .delete(&network.name)
            .map_err(|e| e.in_step(format!("delete bridge {}", network.name)))?;
        self.firewall
            .remove_if_present(&Rule::masquerade(&network.subnet(), &network.name))?;
        tracing::info!(bridge = %network.name, "bridge deleted");
        Ok(())
    }

    fn connect(&self, network: &Network, endpoint: &mut Endpoint) -> Result<()> {
        let pair = VethPair::for_endpoint(&endpoint.id, &network.name);
        self.links
            .add_veth(&pair)
            .map_err(|e| e.in_step(format!("add veth {}", pair.name)))?;
        endpoint.device = Some(pair.clone());
        self.links
            .set_up(&pair.name)
            .map_err(|e| e.in_step(format!("bring up {}", pair.name)))?;
        tracing::debug!(veth = %pair.name, peer = %pair.peer_name, bridge = %network.name, "veth attached");
        Ok(())
    }

    fn disconnect(&self, network: &Network, endpoint: &Endpoint) -> Result<()> {
        let pair = endpoint
            .device
            .clone()
            .unwrap_or_else(|| VethPair::for_endpoint(&endpoint.id, &network.name));
        if self.links.exists(&pair.name)? {
            self.links.delete(&pair.name)?;
            tracing::debug!(veth = %pair.name, "veth removed");
        }
        Ok(())
    }
}
