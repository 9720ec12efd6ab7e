//! Link, address, and route management.
//!
//! [`IpCommand`] drives iproute2. Commands inherit the network namespace of
//! the calling thread, so the same adapter configures host links and, from
//! inside [`husk_core::namespace::network::run_in_netns`], container links.

use std::net::Ipv4Addr;
use std::process::Command;

use husk_common::error::{HuskError, Result};
use ipnetwork::Ipv4Network;

use crate::network::VethPair;

/// Kernel link operations needed by the bridge driver.
pub trait LinkOps: Send + Sync {
    /// Returns whether a link called `name` exists.
    ///
    /// # Errors
    ///
    /// Returns an error if the lookup itself fails.
    fn exists(&self, name: &str) -> Result<bool>;

    /// Creates a bridge device.
    ///
    /// # Errors
    ///
    /// Returns an error if the device cannot be created.
    fn add_bridge(&self, name: &str) -> Result<()>;

    /// Creates a veth pair with its host end enslaved to `pair.master`.
    ///
    /// # Errors
    ///
    /// Returns an error if the pair cannot be created or attached.
    fn add_veth(&self, pair: &VethPair) -> Result<()>;

    /// Assigns `addr` to `name`, replacing an identical existing assignment.
    ///
    /// # Errors
    ///
    /// Returns an error if the address cannot be set.
    fn replace_addr(&self, name: &str, addr: &Ipv4Network) -> Result<()>;

    /// Brings `name` up.
    ///
    /// # Errors
    ///
    /// Returns an error if the link does not exist or cannot be brought up.
    fn set_up(&self, name: &str) -> Result<()>;

    /// Moves `name` into the network namespace of process `pid`.
    ///
    /// # Errors
    ///
    /// Returns an error if the move fails.
    fn set_netns(&self, name: &str, pid: u32) -> Result<()>;

    /// Adds a default route via `gateway` out of `dev`.
    ///
    /// # Errors
    ///
    /// Returns an error if the route cannot be added.
    fn add_default_route(&self, dev: &str, gateway: Ipv4Addr) -> Result<()>;

    /// Reads the hardware address of `name`.
    ///
    /// # Errors
    ///
    /// Returns an error if the link does not exist.
    fn mac_address(&self, name: &str) -> Result<String>;

    /// Deletes `name`.
    ///
    /// # Errors
    ///
    /// Returns an error if the link does not exist or cannot be deleted.
    fn delete(&self, name: &str) -> Result<()>;
}

/// [`LinkOps`] backed by the `ip` binary.
#[derive(Debug, Clone, Copy, Default)]
pub struct IpCommand;

impl IpCommand {
    /// Runs `ip` with `args`, returning its standard output.
    fn run(args: &[&str]) -> Result<String> {
        let output = Command::new("ip")
            .args(args)
            .output()
            .map_err(|e| HuskError::Command {
                program: "ip",
                args: args.join(" "),
                stderr: e.to_string(),
            })?;
        if !output.status.success() {
            return Err(HuskError::Command {
                program: "ip",
                args: args.join(" "),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        tracing::trace!(args = %args.join(" "), "ip");
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

impl LinkOps for IpCommand {
    fn exists(&self, name: &str) -> Result<bool> {
        match Self::run(&["link", "show", "dev", name]) {
            Ok(_) => Ok(true),
            Err(HuskError::Command { stderr, .. }) if stderr.contains("does not exist") => Ok(false),
            Err(e) => Err(e),
        }
    }

    fn add_bridge(&self, name: &str) -> Result<()> {
        Self::run(&["link", "add", "name", name, "type", "bridge"]).map(drop)
    }

    fn add_veth(&self, pair: &VethPair) -> Result<()> {
        Self::run(&[
            "link", "add", "name", &pair.name, "type", "veth", "peer", "name", &pair.peer_name,
        ])?;
        Self::run(&["link", "set", "dev", &pair.name, "master", &pair.master]).map(drop)
    }

    fn replace_addr(&self, name: &str, addr: &Ipv4Network) -> Result<()> {
        Self::run(&["addr", "replace", &addr.to_string(), "dev", name]).map(drop)
    }

    fn set_up(&self, name: &str) -> Result<()> {
        Self::run(&["link", "set", "dev", name, "up"]).map(drop)
    }

    fn set_netns(&self, name: &str, pid: u32) -> Result<()> {
        Self::run(&["link", "set", "dev", name, "netns", &pid.to_string()]).map(drop)
    }

    fn add_default_route(&self, dev: &str, gateway: Ipv4Addr) -> Result<()> {
        Self::run(&[
            "route",
            "add",
            "default",
            "via",
            &gateway.to_string(),
            "dev",
            dev,
        ])
        .map(drop)
    }

    fn mac_address(&self, name: &str) -> Result<String> {
        let output = Self::run(&["-o", "link", "show", "dev", name])?;
        parse_mac(&output).ok_or_else(|| HuskError::NotFound {
            kind: "mac address",
            id: name.to_string(),
        })
    }

    fn delete(&self, name: &str) -> Result<()> {
        Self::run(&["link", "delete", "dev", name]).map(drop)
    }
}

/// Extracts the `link/ether` address from `ip -o link show` output.
fn parse_mac(output: &str) -> Option<String> {
    let mut words = output.split_whitespace();
    let _ = words.find(|w| *w == "link/ether")?;
    words.next().map(str::to_string)
}
