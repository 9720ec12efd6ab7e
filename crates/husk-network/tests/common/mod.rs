//! In-memory kernel doubles shared by the network integration tests.

#![allow(dead_code, clippy::unwrap_used, clippy::expect_used)]

use std::collections::{BTreeMap, HashMap};
use std::fs::File;
use std::net::Ipv4Addr;
use std::os::fd::{AsRawFd, BorrowedFd, OwnedFd, RawFd};
use std::sync::{Arc, Mutex};

use husk_common::config::HuskConfig;
use husk_common::error::{HuskError, Result};
use husk_core::namespace::network::NetnsOps;
use husk_network::{Firewall, HostNet, LinkOps, NetworkContext, Rule, VethPair};
use ipnetwork::Ipv4Network;

fn injected(op: &str) -> HuskError {
    HuskError::Command {
        program: "fake",
        args: op.to_string(),
        stderr: "injected failure".into(),
    }
}

// ── network namespaces ──────────────────────────────────────────────

/// Tracks the namespace of the (single) worker thread by labelling fds.
pub struct FakeNetns {
    current: Mutex<String>,
    labels: Mutex<HashMap<RawFd, String>>,
}

impl FakeNetns {
    pub fn new() -> Self {
        Self {
            current: Mutex::new("host".into()),
            labels: Mutex::new(HashMap::new()),
        }
    }

    pub fn current(&self) -> String {
        self.current.lock().unwrap().clone()
    }

    fn labelled(&self, label: String) -> OwnedFd {
        let fd = OwnedFd::from(File::open("/dev/null").unwrap());
        let _ = self.labels.lock().unwrap().insert(fd.as_raw_fd(), label);
        fd
    }
}

impl NetnsOps for FakeNetns {
    fn open_current(&self) -> Result<OwnedFd> {
        Ok(self.labelled(self.current()))
    }

    fn open_for_pid(&self, pid: u32) -> Result<OwnedFd> {
        Ok(self.labelled(format!("pid:{pid}")))
    }

    fn enter(&self, ns: BorrowedFd<'_>) -> Result<()> {
        let label = self.labels.lock().unwrap()[&ns.as_raw_fd()].clone();
        *self.current.lock().unwrap() = label;
        Ok(())
    }
}

// ── links ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default)]
pub struct Link {
    pub kind: &'static str,
    pub up: bool,
    pub addrs: Vec<Ipv4Network>,
    pub master: Option<String>,
    pub netns: Option<u32>,
}

/// Link table whose log lines are tagged with the namespace they ran in.
pub struct FakeLinks {
    netns: Arc<FakeNetns>,
    links: Mutex<BTreeMap<String, Link>>,
    log: Mutex<Vec<String>>,
    fail_on: Mutex<Option<&'static str>>,
}

impl FakeLinks {
    pub fn new(netns: Arc<FakeNetns>) -> Self {
        Self {
            netns,
            links: Mutex::new(BTreeMap::new()),
            log: Mutex::new(Vec::new()),
            fail_on: Mutex::new(None),
        }
    }

    pub fn fail_on(&self, op: Option<&'static str>) {
        *self.fail_on.lock().unwrap() = op;
    }

    pub fn link(&self, name: &str) -> Option<Link> {
        self.links.lock().unwrap().get(name).cloned()
    }

    pub fn log(&self) -> Vec<String> {
        self.log.lock().unwrap().clone()
    }

    fn record(&self, op: &'static str, detail: String) -> Result<()> {
        self.log
            .lock()
            .unwrap()
            .push(format!("[{}] {op} {detail}", self.netns.current()));
        if *self.fail_on.lock().unwrap() == Some(op) {
            return Err(injected(op));
        }
        Ok(())
    }

    fn with_link<T>(&self, name: &str, f: impl FnOnce(&mut Link) -> T) -> Result<T> {
        if name == "lo" {
            return Ok(f(&mut Link::default()));
        }
        self.links
            .lock()
            .unwrap()
            .get_mut(name)
            .map(f)
            .ok_or_else(|| HuskError::NotFound {
                kind: "link",
                id: name.to_string(),
            })
    }
}

impl LinkOps for FakeLinks {
    fn exists(&self, name: &str) -> Result<bool> {
        Ok(self.links.lock().unwrap().contains_key(name))
    }

    fn add_bridge(&self, name: &str) -> Result<()> {
        self.record("add_bridge", name.to_string())?;
        let _ = self.links.lock().unwrap().insert(
            name.to_string(),
            Link {
                kind: "bridge",
                ..Link::default()
            },
        );
        Ok(())
    }

    fn add_veth(&self, pair: &VethPair) -> Result<()> {
        self.record("add_veth", format!("{} {}", pair.name, pair.peer_name))?;
        let mut links = self.links.lock().unwrap();
        let _ = links.insert(
            pair.name.clone(),
            Link {
                kind: "veth",
                master: Some(pair.master.clone()),
                ..Link::default()
            },
        );
        let _ = links.insert(
            pair.peer_name.clone(),
            Link {
                kind: "veth",
                ..Link::default()
            },
        );
        Ok(())
    }

    fn replace_addr(&self, name: &str, addr: &Ipv4Network) -> Result<()> {
        self.record("replace_addr", format!("{name} {addr}"))?;
        self.with_link(name, |link| {
            link.addrs.retain(|a| a != addr);
            link.addrs.push(*addr);
        })
    }

    fn set_up(&self, name: &str) -> Result<()> {
        self.record("set_up", name.to_string())?;
        self.with_link(name, |link| link.up = true)
    }

    fn set_netns(&self, name: &str, pid: u32) -> Result<()> {
        self.record("set_netns", format!("{name} {pid}"))?;
        self.with_link(name, |link| link.netns = Some(pid))
    }

    fn add_default_route(&self, dev: &str, gateway: Ipv4Addr) -> Result<()> {
        self.record("add_default_route", format!("{dev} via {gateway}"))
    }

    fn mac_address(&self, name: &str) -> Result<String> {
        self.record("mac_address", name.to_string())?;
        Ok("02:42:c0:a8:0a:02".into())
    }

    fn delete(&self, name: &str) -> Result<()> {
        self.record("delete", name.to_string())?;
        let mut links = self.links.lock().unwrap();
        if links.remove(name).is_none() {
            return Err(HuskError::NotFound {
                kind: "link",
                id: name.to_string(),
            });
        }
        // The kernel removes both ends of a veth pair together.
        let peer = format!("cif-{name}");
        let _ = links.remove(&peer);
        Ok(())
    }
}

// ── firewall ────────────────────────────────────────────────────────

#[derive(Default)]
pub struct FakeFirewall {
    rules: Mutex<Vec<Rule>>,
    fail_append: Mutex<bool>,
}

impl FakeFirewall {
    pub fn rules(&self) -> Vec<String> {
        self.rules
            .lock()
            .unwrap()
            .iter()
            .map(|r| r.args("-A").join(" "))
            .collect()
    }

    pub fn fail_append(&self, fail: bool) {
        *self.fail_append.lock().unwrap() = fail;
    }
}

impl Firewall for FakeFirewall {
    fn exists(&self, rule: &Rule) -> Result<bool> {
        Ok(self.rules.lock().unwrap().contains(rule))
    }

    fn append(&self, rule: &Rule) -> Result<()> {
        if *self.fail_append.lock().unwrap() {
            return Err(injected("append"));
        }
        self.rules.lock().unwrap().push(rule.clone());
        Ok(())
    }

    fn delete(&self, rule: &Rule) -> Result<()> {
        let mut rules = self.rules.lock().unwrap();
        let index = rules
            .iter()
            .position(|r| r == rule)
            .ok_or_else(|| injected("delete missing rule"))?;
        let _ = rules.remove(index);
        Ok(())
    }
}

// ── fixture ─────────────────────────────────────────────────────────

pub struct Fixture {
    pub dir: tempfile::TempDir,
    pub config: HuskConfig,
    pub netns: Arc<FakeNetns>,
    pub links: Arc<FakeLinks>,
    pub firewall: Arc<FakeFirewall>,
}

impl Fixture {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let config = HuskConfig::from_root(dir.path());
        let netns = Arc::new(FakeNetns::new());
        let links = Arc::new(FakeLinks::new(Arc::clone(&netns)));
        Self {
            dir,
            config,
            netns,
            links,
            firewall: Arc::new(FakeFirewall::default()),
        }
    }

    pub fn host(&self) -> HostNet {
        HostNet {
            links: self.links.clone(),
            firewall: self.firewall.clone(),
            netns: self.netns.clone(),
        }
    }

    /// A freshly initialized context over this fixture's state.
    pub fn context(&self) -> NetworkContext {
        let ctx = NetworkContext::new(&self.config, self.host());
        ctx.init().unwrap();
        ctx
    }
}
