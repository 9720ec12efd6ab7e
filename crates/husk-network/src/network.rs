//! Network and endpoint model, and the on-disk network records.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use husk_common::constants::{VETH_ID_LEN, VETH_PEER_PREFIX};
use husk_common::error::{HuskError, Result};
use husk_common::types::ContainerId;
use ipnetwork::Ipv4Network;
use nix::fcntl::{Flock, FlockArg};
use serde::{Deserialize, Serialize};

/// Longest interface name the kernel accepts (`IFNAMSIZ - 1`).
const MAX_IFNAME_LEN: usize = 15;

/// A named layer-2 network.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Network {
    /// Network name, also the bridge device name.
    pub name: String,
    /// Gateway address with the subnet prefix, e.g. `192.168.10.1/24`.
    pub ip_range: Ipv4Network,
    /// Name of the driver that manages the network.
    pub driver: String,
}

impl Network {
    /// Address of the network's gateway.
    #[must_use]
    pub fn gateway(&self) -> Ipv4Addr {
        self.ip_range.ip()
    }

    /// The subnet with its network address, e.g. `192.168.10.0/24`.
    #[must_use]
    pub fn subnet(&self) -> Ipv4Network {
        Ipv4Network::new(self.ip_range.network(), self.ip_range.prefix()).unwrap_or(self.ip_range)
    }
}

/// Checks that `name` can be used as a network (and bridge device) name.
///
/// # Errors
///
/// Returns [`HuskError::Config`] if the name is empty, too long for an
/// interface, hidden, or contains characters invalid in device or file names.
pub fn validate_name(name: &str) -> Result<()> {
    let invalid = name.is_empty()
        || name.len() > MAX_IFNAME_LEN
        || name.starts_with('.')
        || name
            .chars()
            .any(|c| c == '/' || c == ':' || c.is_whitespace() || c.is_control());
    if invalid {
        return Err(HuskError::Config {
            message: format!("invalid network name: {name:?}"),
        });
    }
    Ok(())
}

/// The two ends of a virtual ethernet cable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VethPair {
    /// Host-side end, attached to the bridge.
    pub name: String,
    /// Container-side end.
    pub peer_name: String,
    /// Bridge the host end is enslaved to.
    pub master: String,
}

impl VethPair {
    /// Derives the pair for `endpoint_id` on `bridge`.
    ///
    /// Endpoints whose IDs share the first [`VETH_ID_LEN`] characters map to
    /// the same device names.
    #[must_use]
    pub fn for_endpoint(endpoint_id: &str, bridge: &str) -> Self {
        let short: String = endpoint_id.chars().take(VETH_ID_LEN).collect();
        Self {
            peer_name: format!("{VETH_PEER_PREFIX}{short}"),
            name: short,
            master: bridge.to_string(),
        }
    }
}

/// One container's attachment to a network.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    /// `<container-id>-<network-name>`.
    pub id: String,
    /// The veth pair, once the driver has wired it.
    pub device: Option<VethPair>,
    /// Address allocated to the container.
    pub ip_address: Ipv4Addr,
    /// MAC address of the container-side interface, once configured.
    pub mac_address: Option<String>,
    /// The network this endpoint belongs to.
    pub network: Arc<Network>,
    /// Requested `hostPort:containerPort` mappings.
    pub port_mapping: Vec<String>,
}

impl Endpoint {
    /// Creates an endpoint for `container` on `network`.
    #[must_use]
    pub fn new(
        container: &ContainerId,
        network: Arc<Network>,
        ip_address: Ipv4Addr,
        port_mapping: Vec<String>,
    ) -> Self {
        Self {
            id: format!("{}-{}", container, network.name),
            device: None,
            ip_address,
            mac_address: None,
            network,
            port_mapping,
        }
    }

    /// The container address with the network prefix, e.g. `192.168.10.2/24`.
    #[must_use]
    pub fn interface_address(&self) -> Ipv4Network {
        Ipv4Network::new(self.ip_address, self.network.ip_range.prefix())
            .unwrap_or(self.network.ip_range)
    }
}

/// Directory of network records, one JSON file per network.
#[derive(Debug)]
pub struct NetworkStore {
    dir: PathBuf,
    lock: Mutex<()>,
}

impl NetworkStore {
    /// Creates a store rooted at `dir`.
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            lock: Mutex::new(()),
        }
    }

    /// Directory holding the records.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Creates the records directory if missing.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created.
    pub fn ensure_dir(&self) -> Result<()> {
        std::fs::create_dir_all(&self.dir).map_err(|e| HuskError::Io {
            path: self.dir.clone(),
            source: e,
        })
    }

    /// Writes the record of `network`, replacing any previous one.
    ///
    /// # Errors
    ///
    /// Returns an error if the record cannot be serialized or written.
    pub fn dump(&self, network: &Network) -> Result<()> {
        validate_name(&network.name)?;
        let json = serde_json::to_vec_pretty(network)?;
        self.locked(|| {
            let path = self.dir.join(&network.name);
            let tmp = self.dir.join(format!(".{}.tmp", network.name));
            let io_err = |path: &Path| {
                let path = path.to_path_buf();
                move |e: std::io::Error| HuskError::Io { path, source: e }
            };
            let mut file = File::create(&tmp).map_err(io_err(&tmp))?;
            file.write_all(&json).map_err(io_err(&tmp))?;
            file.sync_all().map_err(io_err(&tmp))?;
            std::fs::rename(&tmp, &path).map_err(io_err(&path))?;
            tracing::debug!(network = %network.name, path = %path.display(), "network record written");
            Ok(())
        })
    }

    /// Reads the record at `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed, or if the name
    /// it carries differs from its file name.
    pub fn load(path: &Path) -> Result<Network> {
        let content = std::fs::read_to_string(path).map_err(|e| HuskError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;
        let network: Network = serde_json::from_str(&content)?;
        let file_name = path.file_name().map(|n| n.to_string_lossy());
        if file_name.as_deref() != Some(network.name.as_str()) {
            return Err(HuskError::Config {
                message: format!(
                    "record {} describes network {:?}",
                    path.display(),
                    network.name
                ),
            });
        }
        Ok(network)
    }

    /// Loads every record in the directory.
    ///
    /// Hidden files are ignored. Records that fail to load are logged and
    /// skipped.
    ///
    /// # Errors
    ///
    /// Returns an error only if the directory itself cannot be listed.
    pub fn load_all(&self) -> Result<Vec<Network>> {
        let entries = std::fs::read_dir(&self.dir).map_err(|e| HuskError::Io {
            path: self.dir.clone(),
            source: e,
        })?;
        let mut networks = Vec::new();
        for entry in entries.flatten() {
            let path = entry.path();
            let hidden = entry.file_name().to_string_lossy().starts_with('.');
            if hidden || !path.is_file() {
                continue;
            }
            match Self::load(&path) {
                Ok(network) => networks.push(network),
                Err(e) => {
                    tracing::error!(path = %path.display(), error = %e, "skipping network record");
                }
            }
        }
        networks.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(networks)
    }

    /// Deletes the record of `name`; a missing record is not an error.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be removed.
    pub fn remove(&self, name: &str) -> Result<()> {
        validate_name(name)?;
        self.locked(|| {
            let path = self.dir.join(name);
            match std::fs::remove_file(&path) {
                Ok(()) => Ok(()),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
                Err(e) => Err(HuskError::Io { path, source: e }),
            }
        })
    }

    /// Runs `f` holding the process mutex and an exclusive lock on
    /// `<dir>/.lock`.
    fn locked<T>(&self, f: impl FnOnce() -> Result<T>) -> Result<T> {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        self.ensure_dir()?;
        let lock_path = self.dir.join(".lock");
        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(false)
            .open(&lock_path)
            .map_err(|e| HuskError::Io {
                path: lock_path.clone(),
                source: e,
            })?;
        let _flock = Flock::lock(file, FlockArg::LockExclusive)
            .map_err(|(_, errno)| HuskError::kernel(format!("flock {}", lock_path.display()), errno))?;
        f()
    }
}
