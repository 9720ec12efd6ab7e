//! System-wide constants and default paths.

/// Default directory for runtime state (network records, IPAM, container records).
pub const DEFAULT_RUN_DIR: &str = "/var/run/husk";

/// Default directory for image roots and overlay layers.
pub const DEFAULT_DATA_DIR: &str = "/var/lib/husk";

/// Environment variable overriding the run directory.
pub const RUN_DIR_ENV: &str = "HUSK_ROOT";

/// Parent directory of every container cgroup, relative to each hierarchy root.
pub const CGROUP_PARENT: &str = "husk";

/// Mount table consulted to locate cgroup hierarchies.
pub const MOUNTINFO_PATH: &str = "/proc/self/mountinfo";

/// File descriptor number on which the init process receives its command.
pub const HANDSHAKE_FD: i32 = 3;

/// Subcommand the host re-executes itself with inside new namespaces.
pub const INIT_SUBCOMMAND: &str = "init";

/// Path of the running executable, used to re-enter as the init process.
pub const SELF_EXE: &str = "/proc/self/exe";

/// Name of the temporary directory that parks the old root during `pivot_root`.
pub const PIVOT_DIR: &str = ".pivot_root";

/// Size cap for the container's `/dev` tmpfs.
pub const DEV_TMPFS_SIZE: &str = "65536k";

/// Name of the bridge network driver.
pub const BRIDGE_DRIVER: &str = "bridge";

/// Maximum number of endpoint-ID characters used in a veth name.
pub const VETH_ID_LEN: usize = 5;

/// Prefix of the container-side veth end.
pub const VETH_PEER_PREFIX: &str = "cif-";

/// Name of the per-container record file.
pub const CONTAINER_RECORD: &str = "config.json";

/// Application name used in CLI output.
pub const APP_NAME: &str = "husk";
