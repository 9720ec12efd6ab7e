//! Domain primitive types used across the husk workspace.

use std::fmt;
use std::net::IpAddr;

use serde::{Deserialize, Serialize};

/// Length of generated container identifiers.
const CONTAINER_ID_LEN: usize = 12;

/// Unique identifier for a container instance.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContainerId(String);

impl ContainerId {
    /// Creates a new container ID from a string value.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generates a random 12-character hexadecimal container ID.
    #[must_use]
    pub fn generate() -> Self {
        let mut id = uuid::Uuid::new_v4().simple().to_string();
        id.truncate(CONTAINER_ID_LEN);
        Self(id)
    }

    /// Returns the inner string representation.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ContainerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Resource limits for one container, one optional value per cgroup axis.
///
/// Values are written verbatim to the kernel control files, so they use the
/// kernel's own syntax (`"100m"` for memory, `"512"` for shares, `"0-1"` for
/// a cpu set). `None` and the empty string both mean "no limit for this
/// axis".
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceConfig {
    /// Memory limit, e.g. `"100m"`.
    pub memory_limit: Option<String>,
    /// Relative CPU weight in cgroup v1 shares, e.g. `"512"`.
    pub cpu_share: Option<String>,
    /// CPUs the container may run on, e.g. `"0-1"`.
    pub cpu_set: Option<String>,
}

impl ResourceConfig {
    /// Sets the memory limit.
    #[must_use]
    pub fn with_memory_limit(mut self, limit: impl Into<String>) -> Self {
        self.memory_limit = Some(limit.into());
        self
    }

    /// Sets the CPU share.
    #[must_use]
    pub fn with_cpu_share(mut self, share: impl Into<String>) -> Self {
        self.cpu_share = Some(share.into());
        self
    }

    /// Sets the CPU set.
    #[must_use]
    pub fn with_cpu_set(mut self, set: impl Into<String>) -> Self {
        self.cpu_set = Some(set.into());
        self
    }

    /// Returns the memory limit when one is configured.
    #[must_use]
    pub fn memory_limit(&self) -> Option<&str> {
        non_empty(self.memory_limit.as_deref())
    }

    /// Returns the CPU share when one is configured.
    #[must_use]
    pub fn cpu_share(&self) -> Option<&str> {
        non_empty(self.cpu_share.as_deref())
    }

    /// Returns the CPU set when one is configured.
    #[must_use]
    pub fn cpu_set(&self) -> Option<&str> {
        non_empty(self.cpu_set.as_deref())
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

/// Lifecycle state of a container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContainerStatus {
    /// The init process is alive.
    Running,
    /// The init process has exited.
    Stopped,
}

impl fmt::Display for ContainerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Running => write!(f, "running"),
            Self::Stopped => write!(f, "stopped"),
        }
    }
}

/// Persistent record describing one launched container.
///
/// The network layer only needs `id`, `pid`, and `port_mapping`; the
/// remaining fields let teardown find the cgroup and endpoint again.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerInfo {
    /// Container identifier.
    pub id: ContainerId,
    /// Human-readable name, defaults to the ID.
    pub name: String,
    /// Host PID of the container's init process.
    pub pid: u32,
    /// Command line executed inside the container.
    pub command: Vec<String>,
    /// RFC 3339 creation timestamp.
    pub created_at: String,
    /// Current lifecycle state.
    pub status: ContainerStatus,
    /// Requested `hostPort:containerPort` mappings.
    #[serde(default)]
    pub port_mapping: Vec<String>,
    /// Network the container is attached to, if any.
    #[serde(default)]
    pub network: Option<String>,
    /// Address allocated on `network`.
    #[serde(default)]
    pub ip_address: Option<IpAddr>,
    /// Hierarchy-relative cgroup path.
    #[serde(default)]
    pub cgroup_path: Option<String>,
    /// `hostDir:containerDir` bind mount, if any.
    #[serde(default)]
    pub volume: Option<String>,
}

impl ContainerInfo {
    /// Creates a running-container record with no network attachment.
    #[must_use]
    pub fn new(id: ContainerId, name: impl Into<String>, pid: u32, command: Vec<String>) -> Self {
        Self {
            id,
            name: name.into(),
            pid,
            command,
            created_at: chrono::Utc::now().to_rfc3339(),
            status: ContainerStatus::Running,
            port_mapping: Vec::new(),
            network: None,
            ip_address: None,
            cgroup_path: None,
            volume: None,
        }
    }

    /// Sets the requested port mappings.
    #[must_use]
    pub fn with_port_mapping(mut self, port_mapping: Vec<String>) -> Self {
        self.port_mapping = port_mapping;
        self
    }
}
