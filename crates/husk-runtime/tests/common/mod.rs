//! Host doubles for launcher tests: real directories in a temp root, recorded
//! mounts, fake processes, and a network stack that only keeps books.

#![allow(dead_code, clippy::unwrap_used, clippy::expect_used)]

use std::collections::HashMap;
use std::convert::Infallible;
use std::fs::File;
use std::net::Ipv4Addr;
use std::os::fd::{BorrowedFd, OwnedFd};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use husk_common::config::HuskConfig;
use husk_common::error::{HuskError, Result};
use husk_core::cgroup::MountTable;
use husk_core::filesystem::MountSyscalls;
use husk_core::namespace::handshake;
use husk_core::namespace::network::NetnsOps;
use husk_network::{Firewall, HostNet, LinkOps, NetworkContext, Rule, VethPair};
use husk_runtime::{InitProcess, Launcher, ProcessOps};
use ipnetwork::Ipv4Network;
use nix::mount::MsFlags;

pub const PID: u32 = 4242;

fn injected(what: &str) -> HuskError {
    HuskError::Command {
        program: "fake",
        args: what.to_string(),
        stderr: "injected failure".into(),
    }
}

// ── mounts ──────────────────────────────────────────────────────────

/// Creates directories for real, records mount and unmount calls.
#[derive(Default)]
pub struct Mounts {
    log: Mutex<Vec<String>>,
}

impl Mounts {
    pub fn log(&self) -> Vec<String> {
        self.log.lock().unwrap().clone()
    }
}

impl MountSyscalls for Mounts {
    fn mount(
        &self,
        _source: Option<&str>,
        target: &Path,
        fstype: Option<&str>,
        _flags: MsFlags,
        _data: Option<&str>,
    ) -> Result<()> {
        self.log
            .lock()
            .unwrap()
            .push(format!("mount {} {}", fstype.unwrap_or_default(), target.display()));
        Ok(())
    }

    /// Leaves `target` empty, as the mount point looks once detached.
    fn umount_detach(&self, target: &Path) -> Result<()> {
        self.log
            .lock()
            .unwrap()
            .push(format!("umount {}", target.display()));
        if target.is_dir() {
            std::fs::remove_dir_all(target).unwrap();
            std::fs::create_dir(target).unwrap();
        }
        Ok(())
    }

    fn pivot_root(&self, _new_root: &Path, _put_old: &Path) -> Result<()> {
        Err(injected("pivot_root"))
    }

    fn chdir(&self, _dir: &Path) -> Result<()> {
        Err(injected("chdir"))
    }

    fn create_dir(&self, dir: &Path) -> Result<()> {
        std::fs::create_dir_all(dir).map_err(|e| HuskError::Io {
            path: dir.to_path_buf(),
            source: e,
        })
    }

    fn remove_dir(&self, dir: &Path) -> Result<()> {
        std::fs::remove_dir(dir).map_err(|e| HuskError::Io {
            path: dir.to_path_buf(),
            source: e,
        })
    }

    fn current_dir(&self) -> Result<PathBuf> {
        Err(injected("current_dir"))
    }

    fn exec(&self, _program: &Path, _args: &[String]) -> Result<Infallible> {
        Err(injected("exec"))
    }
}

// ── processes ───────────────────────────────────────────────────────

/// Hands out [`PID`] and keeps the read end of each handshake pipe.
#[derive(Default)]
pub struct Processes {
    readers: Mutex<HashMap<u32, OwnedFd>>,
    rootfs: Mutex<Option<PathBuf>>,
    env: Mutex<Vec<String>>,
    killed: Mutex<Vec<u32>>,
    fail_spawn: Mutex<bool>,
}

impl Processes {
    /// The command the init process would have received.
    pub fn received(&self, pid: u32) -> Result<Vec<String>> {
        let reader = self.readers.lock().unwrap().remove(&pid).unwrap();
        handshake::read_command(File::from(reader))
    }

    pub fn rootfs(&self) -> Option<PathBuf> {
        self.rootfs.lock().unwrap().clone()
    }

    pub fn env(&self) -> Vec<String> {
        self.env.lock().unwrap().clone()
    }

    pub fn killed(&self) -> Vec<u32> {
        self.killed.lock().unwrap().clone()
    }

    pub fn fail_spawn(&self, fail: bool) {
        *self.fail_spawn.lock().unwrap() = fail;
    }
}

impl ProcessOps for Processes {
    fn spawn(&self, rootfs: &Path, env: &[String]) -> Result<InitProcess> {
        if *self.fail_spawn.lock().unwrap() {
            return Err(injected("clone"));
        }
        let (reader, writer) = nix::unistd::pipe().unwrap();
        let _ = self.readers.lock().unwrap().insert(PID, reader);
        *self.rootfs.lock().unwrap() = Some(rootfs.to_path_buf());
        *self.env.lock().unwrap() = env.to_vec();
        Ok(InitProcess {
            pid: PID,
            handshake: writer,
        })
    }

    fn kill(&self, pid: u32) -> Result<()> {
        self.killed.lock().unwrap().push(pid);
        Ok(())
    }

    fn wait(&self, _pid: u32) -> Result<Option<i32>> {
        Ok(Some(0))
    }
}

// ── network ─────────────────────────────────────────────────────────

/// Link table that accepts everything and remembers which links exist.
#[derive(Default)]
pub struct Links {
    links: Mutex<Vec<String>>,
    fail_route: Mutex<bool>,
}

impl Links {
    pub fn names(&self) -> Vec<String> {
        self.links.lock().unwrap().clone()
    }

    pub fn fail_route(&self, fail: bool) {
        *self.fail_route.lock().unwrap() = fail;
    }
}

impl LinkOps for Links {
    fn exists(&self, name: &str) -> Result<bool> {
        Ok(self.links.lock().unwrap().iter().any(|l| l == name))
    }

    fn add_bridge(&self, name: &str) -> Result<()> {
        self.links.lock().unwrap().push(name.to_string());
        Ok(())
    }

    fn add_veth(&self, pair: &VethPair) -> Result<()> {
        let mut links = self.links.lock().unwrap();
        links.push(pair.name.clone());
        links.push(pair.peer_name.clone());
        Ok(())
    }

    fn replace_addr(&self, _name: &str, _addr: &Ipv4Network) -> Result<()> {
        Ok(())
    }

    fn set_up(&self, _name: &str) -> Result<()> {
        Ok(())
    }

    fn set_netns(&self, _name: &str, _pid: u32) -> Result<()> {
        Ok(())
    }

    fn add_default_route(&self, _dev: &str, _gateway: Ipv4Addr) -> Result<()> {
        if *self.fail_route.lock().unwrap() {
            return Err(injected("route"));
        }
        Ok(())
    }

    fn mac_address(&self, _name: &str) -> Result<String> {
        Ok("02:42:c0:a8:0a:02".into())
    }

    fn delete(&self, name: &str) -> Result<()> {
        let peer = format!("cif-{name}");
        self.links.lock().unwrap().retain(|l| l != name && *l != peer);
        Ok(())
    }
}

#[derive(Default)]
pub struct Rules {
    rules: Mutex<Vec<Rule>>,
}

impl Rules {
    pub fn rendered(&self) -> Vec<String> {
        self.rules.lock().unwrap().iter().map(ToString::to_string).collect()
    }
}

impl Firewall for Rules {
    fn exists(&self, rule: &Rule) -> Result<bool> {
        Ok(self.rules.lock().unwrap().contains(rule))
    }

    fn append(&self, rule: &Rule) -> Result<()> {
        self.rules.lock().unwrap().push(rule.clone());
        Ok(())
    }

    fn delete(&self, rule: &Rule) -> Result<()> {
        self.rules.lock().unwrap().retain(|r| r != rule);
        Ok(())
    }
}

/// Namespace switching that never leaves the host.
pub struct StayHome;

impl NetnsOps for StayHome {
    fn open_current(&self) -> Result<OwnedFd> {
        Ok(OwnedFd::from(File::open("/dev/null").unwrap()))
    }

    fn open_for_pid(&self, _pid: u32) -> Result<OwnedFd> {
        self.open_current()
    }

    fn enter(&self, _ns: BorrowedFd<'_>) -> Result<()> {
        Ok(())
    }
}

// ── fixture ─────────────────────────────────────────────────────────

pub struct Host {
    pub dir: tempfile::TempDir,
    pub config: HuskConfig,
    pub image: PathBuf,
    pub cgroup_root: PathBuf,
    pub mounts: Arc<Mounts>,
    pub processes: Arc<Processes>,
    pub links: Arc<Links>,
    pub rules: Arc<Rules>,
}

impl Host {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let config = HuskConfig::from_root(dir.path());
        let image = config.images_dir().join("busybox");
        std::fs::create_dir_all(image.join("bin")).unwrap();
        let cgroup_root = dir.path().join("cgroup");
        std::fs::create_dir_all(&cgroup_root).unwrap();
        Self {
            dir,
            config,
            image,
            cgroup_root,
            mounts: Arc::default(),
            processes: Arc::default(),
            links: Arc::default(),
            rules: Arc::default(),
        }
    }

    /// A launcher over this host; every call sees the same state.
    pub fn launcher(&self) -> Launcher {
        let host = HostNet {
            links: self.links.clone(),
            firewall: self.rules.clone(),
            netns: Arc::new(StayHome),
        };
        let network = NetworkContext::new(&self.config, host);
        network.init().unwrap();
        let table = format!(
            "31 22 0:27 / {} rw - cgroup2 cgroup2 rw,nsdelegate\n",
            self.cgroup_root.display()
        );
        Launcher::with_parts(
            self.config.clone(),
            network,
            self.mounts.clone(),
            self.processes.clone(),
            Arc::new(MountTable::parse(&table)),
        )
    }
}
