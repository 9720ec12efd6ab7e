//! NAT rules: bridge masquerade and port-forward DNAT.

use std::fmt;
use std::net::Ipv4Addr;
use std::process::Command;
use std::str::FromStr;

use husk_common::error::{HuskError, Result};
use ipnetwork::Ipv4Network;

/// One iptables rule, addressed by table and chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rule {
    /// Table, e.g. `nat`.
    pub table: &'static str,
    /// Chain, e.g. `POSTROUTING`.
    pub chain: &'static str,
    /// Match and target arguments.
    pub spec: Vec<String>,
}

impl Rule {
    /// Masquerades traffic leaving `subnet` through any device but `bridge`.
    #[must_use]
    pub fn masquerade(subnet: &Ipv4Network, bridge: &str) -> Self {
        let source = subnet.to_string();
        Self {
            table: "nat",
            chain: "POSTROUTING",
            spec: [
                "-s",
                source.as_str(),
                "!",
                "-o",
                bridge,
                "-j",
                "MASQUERADE",
            ]
            .map(String::from)
            .to_vec(),
        }
    }

    /// Forwards TCP `forward.host_port` to `ip:forward.container_port`.
    #[must_use]
    pub fn dnat(forward: PortForward, ip: Ipv4Addr) -> Self {
        Self {
            table: "nat",
            chain: "PREROUTING",
            spec: vec![
                "-p".to_string(),
                "tcp".to_string(),
                "-m".to_string(),
                "tcp".to_string(),
                "--dport".to_string(),
                forward.host_port.to_string(),
                "-j".to_string(),
                "DNAT".to_string(),
                "--to-destination".to_string(),
                format!("{ip}:{}", forward.container_port),
            ],
        }
    }

    /// Full argument list for `iptables` with `action` (`-A`, `-C`, `-D`).
    #[must_use]
    pub fn args(&self, action: &str) -> Vec<String> {
        let mut args = vec![
            "-t".to_string(),
            self.table.to_string(),
            action.to_string(),
            self.chain.to_string(),
        ];
        args.extend(self.spec.iter().cloned());
        args
    }
}

impl fmt::Display for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "-t {} {} {}", self.table, self.chain, self.spec.join(" "))
    }
}

/// A `hostPort:containerPort` mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortForward {
    /// Port exposed on the host.
    pub host_port: u16,
    /// Port inside the container.
    pub container_port: u16,
}

impl FromStr for PortForward {
    type Err = HuskError;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = || HuskError::Config {
            message: format!("port mapping must be hostPort:containerPort, got {s:?}"),
        };
        let (host, container) = s.split_once(':').ok_or_else(invalid)?;
        Ok(Self {
            host_port: host.trim().parse().map_err(|_| invalid())?,
            container_port: container.trim().parse().map_err(|_| invalid())?,
        })
    }
}

/// Parses `mappings`, logging and skipping malformed entries.
#[must_use]
pub fn parse_port_mappings(mappings: &[String]) -> Vec<PortForward> {
    mappings
        .iter()
        .filter_map(|m| match m.parse() {
            Ok(forward) => Some(forward),
            Err(e) => {
                tracing::warn!(mapping = %m, error = %e, "skipping port mapping");
                None
            }
        })
        .collect()
}

/// Packet filter operations.
pub trait Firewall: Send + Sync {
    /// Returns whether `rule` is installed.
    ///
    /// # Errors
    ///
    /// Returns an error if the check cannot be performed.
    fn exists(&self, rule: &Rule) -> Result<bool>;

    /// Appends `rule` to its chain.
    ///
    /// # Errors
    ///
    /// Returns an error if the rule cannot be installed.
    fn append(&self, rule: &Rule) -> Result<()>;

    /// Deletes `rule` from its chain.
    ///
    /// # Errors
    ///
    /// Returns an error if the rule cannot be removed.
    fn delete(&self, rule: &Rule) -> Result<()>;

    /// Appends `rule` unless it is already installed.
    ///
    /// # Errors
    ///
    /// Returns an error if the check or the append fails.
    fn ensure(&self, rule: &Rule) -> Result<()> {
        if self.exists(rule)? {
            tracing::debug!(rule = %rule, "rule already present");
            return Ok(());
        }
        self.append(rule)
    }

    /// Deletes `rule` if it is installed.
    ///
    /// # Errors
    ///
    /// Returns an error if the check or the delete fails.
    fn remove_if_present(&self, rule: &Rule) -> Result<()> {
        if self.exists(rule)? {
            self.delete(rule)
        } else {
            Ok(())
        }
    }
}

/// [`Firewall`] backed by the `iptables` binary.
#[derive(Debug, Clone, Copy, Default)]
pub struct Iptables;

impl Iptables {
    fn run(args: &[String]) -> Result<std::process::Output> {
        Command::new("iptables")
            .args(args)
            .output()
            .map_err(|e| HuskError::Command {
                program: "iptables",
                args: args.join(" "),
                stderr: e.to_string(),
            })
    }

    fn run_checked(args: &[String]) -> Result<()> {
        let output = Self::run(args)?;
        if !output.status.success() {
            return Err(HuskError::Command {
                program: "iptables",
                args: args.join(" "),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(())
    }
}

impl Firewall for Iptables {
    fn exists(&self, rule: &Rule) -> Result<bool> {
        let args = rule.args("-C");
        let output = Self::run(&args)?;
        match output.status.code() {
            Some(0) => Ok(true),
            // "Bad rule (does a matching rule exist in that chain?)"
            Some(1) => Ok(false),
            _ => Err(HuskError::Command {
                program: "iptables",
                args: args.join(" "),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            }),
        }
    }

    fn append(&self, rule: &Rule) -> Result<()> {
        Self::run_checked(&rule.args("-A"))?;
        tracing::info!(rule = %rule, "iptables rule added");
        Ok(())
    }

    fn delete(&self, rule: &Rule) -> Result<()> {
        Self::run_checked(&rule.args("-D"))?;
        tracing::info!(rule = %rule, "iptables rule removed");
        Ok(())
    }
}
