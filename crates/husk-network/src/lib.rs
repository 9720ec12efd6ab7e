//! # husk-network
//!
//! Bridge networking for husk containers.
//!
//! - **IPAM**: per-subnet address bitmaps persisted as JSON, guarded by a
//!   process mutex and an exclusive `flock(2)`.
//! - **Model**: [`Network`] records on disk, [`Endpoint`]s built per
//!   connection, and the [`NetworkDriver`] contract.
//! - **Bridge**: a Linux bridge with masquerade, veth pairs into container
//!   namespaces, and DNAT port forwards.
//! - **Context**: [`NetworkContext`] ties the registry, IPAM, and drivers
//!   together and sequences create/delete/connect/disconnect.
//!
//! Links are managed through `ip` (iproute2) and NAT through `iptables`,
//! both behind traits so the sequencing can be tested without privileges.

#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

pub mod bridge;
pub mod context;
pub mod driver;
pub mod firewall;
pub mod ipam;
pub mod link;
pub mod network;

pub use bridge::BridgeDriver;
pub use context::NetworkContext;
pub use driver::{HostNet, NetworkDriver};
pub use firewall::{Firewall, Iptables, PortForward, Rule};
pub use ipam::Ipam;
pub use link::{IpCommand, LinkOps};
pub use network::{Endpoint, Network, NetworkStore, VethPair};
