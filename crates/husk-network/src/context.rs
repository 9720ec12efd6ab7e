//! The network registry and the operations that span IPAM, drivers, and
//! records.

use std::collections::{BTreeMap, HashMap};
use std::fmt::Write as _;
use std::net::{IpAddr, Ipv4Addr};
use std::sync::{Arc, PoisonError, RwLock};

use husk_common::config::HuskConfig;
use husk_common::error::{HuskError, Result};
use husk_common::types::ContainerInfo;
use husk_core::namespace::network::run_in_netns;
use ipnetwork::{IpNetwork, Ipv4Network};

use crate::bridge::BridgeDriver;
use crate::driver::{HostNet, NetworkDriver};
use crate::firewall::{Rule, parse_port_mappings};
use crate::ipam::Ipam;
use crate::link::LinkOps;
use crate::network::{Endpoint, Network, NetworkStore, VethPair, validate_name};

/// Registry of drivers and networks plus the state they persist to.
pub struct NetworkContext {
    drivers: RwLock<HashMap<String, Arc<dyn NetworkDriver>>>,
    networks: RwLock<BTreeMap<String, Arc<Network>>>,
    store: NetworkStore,
    ipam: Ipam,
    host: HostNet,
}

impl std::fmt::Debug for NetworkContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NetworkContext")
            .field("store", &self.store)
            .field("ipam", &self.ipam)
            .finish_non_exhaustive()
    }
}

impl NetworkContext {
    /// Creates an empty context storing state under `config`.
    ///
    /// Call [`NetworkContext::init`] before use.
    #[must_use]
    pub fn new(config: &HuskConfig, host: HostNet) -> Self {
        Self {
            drivers: RwLock::new(HashMap::new()),
            networks: RwLock::new(BTreeMap::new()),
            store: NetworkStore::new(config.network_dir()),
            ipam: Ipam::new(config.ipam_file()),
            host,
        }
    }

    /// Registers the bridge driver and loads every stored network.
    ///
    /// Unreadable records are logged and skipped.
    ///
    /// # Errors
    ///
    /// Returns an error if the records directory cannot be created or listed.
    pub fn init(&self) -> Result<()> {
        self.register_driver(Arc::new(BridgeDriver::new(&self.host)));
        self.store.ensure_dir()?;
        let loaded = self.store.load_all()?;
        let mut networks = self.networks.write().unwrap_or_else(PoisonError::into_inner);
        for network in loaded {
            let _ = networks.insert(network.name.clone(), Arc::new(network));
        }
        tracing::debug!(networks = networks.len(), "network registry loaded");
        Ok(())
    }

    /// Makes `driver` available under its name, replacing any previous one.
    pub fn register_driver(&self, driver: Arc<dyn NetworkDriver>) {
        let name = driver.name().to_string();
        let _ = self
            .drivers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name, driver);
    }

    /// Looks up a registered network.
    ///
    /// # Errors
    ///
    /// Returns [`HuskError::NotFound`] if no such network exists.
    pub fn network(&self, name: &str) -> Result<Arc<Network>> {
        self.networks
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
            .ok_or_else(|| HuskError::NotFound {
                kind: "network",
                id: name.to_string(),
            })
    }

    /// Every registered network, ordered by name.
    pub fn networks(&self) -> Vec<Arc<Network>> {
        self.networks
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect()
    }

    fn driver(&self, name: &str) -> Result<Arc<dyn NetworkDriver>> {
        self.drivers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
            .ok_or_else(|| HuskError::NotFound {
                kind: "network driver",
                id: name.to_string(),
            })
    }

    /// Creates network `name` over `subnet` with `driver`.
    ///
    /// The first host address of the subnet becomes the gateway. If the
    /// driver or the record write fails, the gateway is released and nothing
    /// is registered.
    ///
    /// # Errors
    ///
    /// Returns an error if the name is invalid or taken, the driver is
    /// unknown, the subnet is not an IPv4 CIDR, or any step fails.
    pub fn create_network(&self, driver: &str, subnet: &str, name: &str) -> Result<Arc<Network>> {
        validate_name(name)?;
        let subnet = parse_subnet(subnet)?;
        let driver = self.driver(driver)?;

        let mut networks = self.networks.write().unwrap_or_else(PoisonError::into_inner);
        if networks.contains_key(name) {
            return Err(HuskError::AlreadyExists {
                kind: "network",
                id: name.to_string(),
            });
        }

        let gateway = self.ipam.allocate(&subnet)?;
        let ip_range = with_address(&subnet, gateway)?;
        let network = match driver.create(ip_range, name) {
            Ok(network) => network,
            Err(e) => return Err(e.with_cleanup(self.ipam.release(&subnet, gateway))),
        };
        if let Err(e) = self.store.dump(&network) {
            let cleanup = driver
                .delete(&network)
                .and(self.ipam.release(&subnet, gateway));
            return Err(e.in_step("write network record").with_cleanup(cleanup));
        }

        let network = Arc::new(network);
        let _ = networks.insert(name.to_string(), Arc::clone(&network));
        tracing::info!(network = name, ip_range = %network.ip_range, driver = driver.name(), "network created");
        Ok(network)
    }

    /// Renders the registry as a table.
    pub fn list_network(&self) -> String {
        let mut out = format!("{:<16}{:<20}{}\n", "NAME", "IP RANGE", "DRIVER");
        for network in self.networks() {
            let _ = writeln!(
                out,
                "{:<16}{:<20}{}",
                network.name,
                network.ip_range.to_string(),
                network.driver
            );
        }
        out
    }

    /// Deletes network `name`.
    ///
    /// Steps run in order (release gateway, driver delete, remove record)
    /// and stop at the first failure, which leaves host state partially
    /// removed. A gateway that is already free is tolerated so a failed
    /// delete can be retried.
    ///
    /// # Errors
    ///
    /// Returns [`HuskError::NotFound`] for an unknown network, otherwise the
    /// failing step wrapped in [`HuskError::Step`].
    pub fn delete_network(&self, name: &str) -> Result<()> {
        let mut networks = self.networks.write().unwrap_or_else(PoisonError::into_inner);
        let network = networks.get(name).cloned().ok_or_else(|| HuskError::NotFound {
            kind: "network",
            id: name.to_string(),
        })?;
        let driver = self.driver(&network.driver)?;

        let released = self
            .ipam
            .release_if_allocated(&network.subnet(), network.gateway())
            .map_err(|e| e.in_step("release gateway"))?;
        if !released {
            // An earlier delete released it and then failed further on.
            tracing::warn!(network = name, gateway = %network.gateway(), "gateway was already free");
        }
        driver
            .delete(&network)
            .map_err(|e| e.in_step("driver delete"))?;
        self.store
            .remove(name)
            .map_err(|e| e.in_step("remove network record"))?;
        let _ = networks.remove(name);
        tracing::info!(network = name, "network deleted");
        Ok(())
    }

    /// Attaches the container described by `info` to `network_name`.
    ///
    /// Allocates an address, wires the veth pair, moves the peer into the
    /// container's network namespace, configures it there, and installs the
    /// port forwards. On failure everything already done is undone.
    ///
    /// # Errors
    ///
    /// Returns the first failing step. If undoing fails as well the result is
    /// a [`HuskError::Cleanup`].
    pub fn connect(&self, network_name: &str, info: &ContainerInfo) -> Result<Endpoint> {
        let network = self.network(network_name)?;
        let driver = self.driver(&network.driver)?;
        let ip = self.ipam.allocate(&network.subnet())?;
        let mut endpoint = Endpoint::new(
            &info.id,
            Arc::clone(&network),
            ip,
            info.port_mapping.clone(),
        );

        let mut progress = Progress::default();
        match self.attach(driver.as_ref(), &mut endpoint, info.pid, &mut progress) {
            Ok(()) => {
                tracing::info!(
                    endpoint = %endpoint.id,
                    ip = %endpoint.ip_address,
                    network = %network.name,
                    "container connected"
                );
                Ok(endpoint)
            }
            Err(e) => {
                tracing::warn!(endpoint = %endpoint.id, error = %e, "connect failed, rolling back");
                Err(e.with_cleanup(self.rollback(driver.as_ref(), &endpoint, &progress)))
            }
        }
    }

    fn attach(
        &self,
        driver: &dyn NetworkDriver,
        endpoint: &mut Endpoint,
        pid: u32,
        progress: &mut Progress,
    ) -> Result<()> {
        let network = Arc::clone(&endpoint.network);
        driver
            .connect(&network, endpoint)
            .map_err(|e| e.in_step("driver connect"))?;
        progress.wired = true;

        let pair = endpoint
            .device
            .clone()
            .unwrap_or_else(|| VethPair::for_endpoint(&endpoint.id, &network.name));
        self.host
            .links
            .set_netns(&pair.peer_name, pid)
            .map_err(|e| e.in_step("move peer into container"))?;

        let links = self.host.links.as_ref();
        let address = endpoint.interface_address();
        let gateway = network.gateway();
        let mac = run_in_netns(self.host.netns.as_ref(), pid, || {
            configure_peer(links, &pair.peer_name, &address, gateway)
        })
        .map_err(|e| e.in_step("configure container interface"))?;
        endpoint.mac_address = Some(mac);

        for forward in parse_port_mappings(&endpoint.port_mapping) {
            let rule = Rule::dnat(forward, endpoint.ip_address);
            self.host
                .firewall
                .append(&rule)
                .map_err(|e| e.in_step("install port forward"))?;
            progress.forwards.push(rule);
        }
        Ok(())
    }

    fn rollback(&self, driver: &dyn NetworkDriver, endpoint: &Endpoint, progress: &Progress) -> Result<()> {
        let mut first_error = None;
        let mut note = |result: Result<()>| {
            if let Err(e) = result {
                tracing::error!(endpoint = %endpoint.id, error = %e, "rollback step failed");
                if first_error.is_none() {
                    first_error = Some(e);
                }
            }
        };
        for rule in &progress.forwards {
            note(self.host.firewall.delete(rule));
        }
        if progress.wired {
            note(driver.disconnect(&endpoint.network, endpoint));
        }
        note(
            self.ipam
                .release(&endpoint.network.subnet(), endpoint.ip_address),
        );
        first_error.map_or(Ok(()), Err)
    }

    /// Detaches `endpoint`: removes its port forwards and veth pair and
    /// releases its address.
    ///
    /// Every step is attempted even when an earlier one fails.
    ///
    /// # Errors
    ///
    /// Returns the first failure.
    pub fn disconnect(&self, endpoint: &Endpoint) -> Result<()> {
        let driver = self.driver(&endpoint.network.driver)?;
        let mut first_error = None;
        let mut note = |step: &str, result: Result<()>| {
            if let Err(e) = result {
                tracing::warn!(endpoint = %endpoint.id, step, error = %e, "disconnect step failed");
                if first_error.is_none() {
                    first_error = Some(e.in_step(step));
                }
            }
        };
        for forward in parse_port_mappings(&endpoint.port_mapping) {
            let rule = Rule::dnat(forward, endpoint.ip_address);
            note("remove port forward", self.host.firewall.remove_if_present(&rule));
        }
        note(
            "driver disconnect",
            driver.disconnect(&endpoint.network, endpoint),
        );
        note(
            "release address",
            self.ipam
                .release(&endpoint.network.subnet(), endpoint.ip_address),
        );
        match first_error {
            Some(e) => Err(e),
            None => {
                tracing::info!(endpoint = %endpoint.id, "container disconnected");
                Ok(())
            }
        }
    }

    /// Rebuilds the endpoint recorded in `info`, if it was connected.
    ///
    /// # Errors
    ///
    /// Returns an error if the recorded network no longer exists or the
    /// recorded address is not IPv4.
    pub fn endpoint_of(&self, info: &ContainerInfo) -> Result<Option<Endpoint>> {
        let (Some(name), Some(ip)) = (&info.network, info.ip_address) else {
            return Ok(None);
        };
        let IpAddr::V4(ip) = ip else {
            return Err(HuskError::Config {
                message: format!("container {} has a non-IPv4 address {ip}", info.id),
            });
        };
        let network = self.network(name)?;
        let mut endpoint = Endpoint::new(&info.id, Arc::clone(&network), ip, info.port_mapping.clone());
        endpoint.device = Some(VethPair::for_endpoint(&endpoint.id, &network.name));
        Ok(Some(endpoint))
    }
}

/// What a partially completed connect has installed.
#[derive(Debug, Default)]
struct Progress {
    wired: bool,
    forwards: Vec<Rule>,
}

/// Configures the container end of the pair; runs inside the container's
/// network namespace.
fn configure_peer(
    links: &dyn LinkOps,
    peer: &str,
    address: &Ipv4Network,
    gateway: Ipv4Addr,
) -> Result<String> {
    links.replace_addr(peer, address)?;
    links.set_up(peer)?;
    links.set_up("lo")?;
    links.add_default_route(peer, gateway)?;
    links.mac_address(peer)
}

fn parse_subnet(subnet: &str) -> Result<Ipv4Network> {
    match subnet.parse::<IpNetwork>() {
        Ok(IpNetwork::V4(net)) => Ok(net),
        Ok(IpNetwork::V6(_)) => Err(HuskError::Config {
            message: format!("only IPv4 subnets are supported: {subnet}"),
        }),
        Err(e) => Err(HuskError::Config {
            message: format!("invalid subnet {subnet:?}: {e}"),
        }),
    }
}

fn with_address(subnet: &Ipv4Network, ip: Ipv4Addr) -> Result<Ipv4Network> {
    Ipv4Network::new(ip, subnet.prefix()).map_err(|e| HuskError::Config {
        message: format!("invalid address {ip} for {subnet}: {e}"),
    })
}
