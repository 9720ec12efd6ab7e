//! Launch and teardown of containers.
//!
//! `run` brings a container up in a fixed order: overlay workspace and
//! optional volume, cloned init process, cgroup limits, optional network
//! attachment, command handshake, record. A failure after the clone kills the init process and
//! undoes whatever was already set up.

use std::net::IpAddr;
use std::os::fd::OwnedFd;
use std::path::PathBuf;
use std::sync::Arc;

use husk_common::config::HuskConfig;
use husk_common::constants::CGROUP_PARENT;
use husk_common::error::{HuskError, Result};
use husk_common::types::{ContainerId, ContainerInfo, ContainerStatus, ResourceConfig};
use husk_core::cgroup::{CgroupManager, MountTable};
use husk_core::filesystem::{HostSyscalls, MountSyscalls};
use husk_core::namespace::handshake;
use husk_network::{Endpoint, HostNet, NetworkContext};

use crate::process::{HostProcesses, ProcessOps};
use crate::record::{self, ContainerStore};
use crate::workspace::{Volume, Workspace};

/// Everything `husk run` asks for.
#[derive(Debug, Clone, Default)]
pub struct RunRequest {
    /// Container name; defaults to the generated ID.
    pub name: Option<String>,
    /// Unpacked image root used as the read-only lower layer.
    pub image: PathBuf,
    /// Program and arguments to execute inside the container.
    pub command: Vec<String>,
    /// Extra `KEY=VALUE` environment entries.
    pub env: Vec<String>,
    /// Resource limits for the container's cgroup.
    pub resources: ResourceConfig,
    /// Network to attach to, if any.
    pub network: Option<String>,
    /// `hostPort:containerPort` forwards, used only with a network.
    pub port_mapping: Vec<String>,
    /// `hostDir:containerDir` to bind-mount into the rootfs.
    pub volume: Option<String>,
    /// Return once the container is started instead of waiting for it.
    pub detach: bool,
}

/// How a `run` ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    /// The container keeps running in the background.
    Detached(ContainerInfo),
    /// The container ran in the foreground and has been torn down.
    Exited {
        /// Final record of the container.
        info: ContainerInfo,
        /// Exit code of the init process, if it could be observed.
        code: Option<i32>,
    },
}

/// Parts of a container that exist so far and must be undone on failure.
struct Staged {
    workspace: Workspace,
    cgroup: Option<CgroupManager>,
    endpoint: Option<Endpoint>,
}

/// Launches, stops, and tears down containers.
pub struct Launcher {
    config: HuskConfig,
    records: ContainerStore,
    network: NetworkContext,
    mounts: Arc<dyn MountSyscalls + Send + Sync>,
    processes: Arc<dyn ProcessOps>,
    cgroups: Arc<MountTable>,
}

impl std::fmt::Debug for Launcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Launcher")
            .field("config", &self.config)
            .field("network", &self.network)
            .finish_non_exhaustive()
    }
}

impl Launcher {
    /// A launcher acting on the running system.
    ///
    /// # Errors
    ///
    /// Returns an error if the network registry or the cgroup mount table
    /// cannot be loaded.
    pub fn system(config: HuskConfig) -> Result<Self> {
        let network = NetworkContext::new(&config, HostNet::system());
        network.init()?;
        Ok(Self::with_parts(
            config,
            network,
            Arc::new(HostSyscalls),
            Arc::new(HostProcesses::default()),
            MountTable::current()?,
        ))
    }

    /// A launcher over explicit host adapters.
    #[must_use]
    pub fn with_parts(
        config: HuskConfig,
        network: NetworkContext,
        mounts: Arc<dyn MountSyscalls + Send + Sync>,
        processes: Arc<dyn ProcessOps>,
        cgroups: Arc<MountTable>,
    ) -> Self {
        let records = ContainerStore::new(config.containers_dir());
        Self {
            config,
            records,
            network,
            mounts,
            processes,
            cgroups,
        }
    }

    /// The network registry containers are attached through.
    #[must_use]
    pub const fn network(&self) -> &NetworkContext {
        &self.network
    }

    /// The container record store.
    #[must_use]
    pub const fn records(&self) -> &ContainerStore {
        &self.records
    }

    /// Launches a container.
    ///
    /// In the foreground the call returns after the container has exited
    /// and been torn down; detached, it returns once the command has been
    /// handed to the init process.
    ///
    /// # Errors
    ///
    /// Returns a configuration error before any side effect for an unusable
    /// request. A later failure is returned after the partial container has
    /// been removed; if that removal fails too the result is a
    /// [`HuskError::Cleanup`].
    pub fn run(&self, req: &RunRequest) -> Result<RunOutcome> {
        let _ = handshake::encode(&req.command)?;
        validate_env(&req.env)?;
        let volume = req.volume.as_deref().map(str::parse::<Volume>).transpose()?;
        let id = ContainerId::generate();
        let name = req.name.clone().unwrap_or_else(|| id.as_str().to_string());
        record::validate_name(&name)?;
        if self.records.contains(&name) {
            return Err(HuskError::AlreadyExists {
                kind: "container",
                id: name,
            });
        }
        if let Some(network) = &req.network {
            let _ = self.network.network(network)?;
        }

        let volume_spec = volume.as_ref().map(ToString::to_string);
        let workspace = Workspace::new(&self.config, &req.image, &name).with_volume(volume);
        workspace
            .create(self.mounts.as_ref())
            .map_err(|e| e.in_step("create workspace"))?;
        let init = match self.processes.spawn(workspace.rootfs(), &req.env) {
            Ok(init) => init,
            Err(e) => {
                let cleanup = workspace.destroy(self.mounts.as_ref());
                return Err(e.in_step("spawn init process").with_cleanup(cleanup));
            }
        };

        let mut info = ContainerInfo::new(id, name, init.pid, req.command.clone())
            .with_port_mapping(req.port_mapping.clone());
        info.volume = volume_spec;
        let mut staged = Staged {
            workspace,
            cgroup: None,
            endpoint: None,
        };
        if let Err(e) = self.start(&mut info, init.handshake, req, &mut staged) {
            tracing::error!(container = %info.name, error = %e, "launch failed, removing container");
            let killed = self.kill_and_reap(info.pid);
            let removed = self.teardown(&info, &staged);
            return Err(e.with_cleanup(killed.and(removed)));
        }
        tracing::info!(
            container = %info.name,
            id = %info.id,
            pid = info.pid,
            detach = req.detach,
            "container started"
        );

        if req.detach {
            return Ok(RunOutcome::Detached(info));
        }
        let waited = self.processes.wait(info.pid);
        info.status = ContainerStatus::Stopped;
        let removed = self.teardown(&info, &staged);
        let code = match waited {
            Ok(code) => code,
            Err(e) => return Err(e.with_cleanup(removed)),
        };
        removed?;
        tracing::info!(container = %info.name, code, "container exited");
        Ok(RunOutcome::Exited { info, code })
    }

    fn start(
        &self,
        info: &mut ContainerInfo,
        handshake: OwnedFd,
        req: &RunRequest,
        staged: &mut Staged,
    ) -> Result<()> {
        let manager = CgroupManager::with_mounts(
            PathBuf::from(CGROUP_PARENT).join(info.id.as_str()),
            Arc::clone(&self.cgroups),
        )?;
        info.cgroup_path = Some(manager.path().display().to_string());
        let manager = staged.cgroup.insert(manager);
        manager.apply(info.pid).into_result()?;
        manager.set(&req.resources).into_result()?;

        if let Some(network) = &req.network {
            let endpoint = self
                .network
                .connect(network, info)
                .map_err(|e| e.in_step(format!("connect to {network}")))?;
            info.network = Some(network.clone());
            info.ip_address = Some(IpAddr::V4(endpoint.ip_address));
            staged.endpoint = Some(endpoint);
        }

        handshake::send(handshake, &info.command).map_err(|e| e.in_step("send command"))?;
        self.records
            .dump(info)
            .map_err(|e| e.in_step("write container record"))
    }

    /// Kills container `name` and removes everything it owned.
    ///
    /// # Errors
    ///
    /// Returns [`HuskError::NotFound`] for an unknown container, otherwise
    /// the first teardown failure; the remaining steps still run.
    pub fn stop(&self, name: &str) -> Result<ContainerInfo> {
        let mut info = self.records.load(name)?;
        self.kill_and_reap(info.pid)?;
        info.status = ContainerStatus::Stopped;

        let endpoint = match self.network.endpoint_of(&info) {
            Ok(endpoint) => endpoint,
            Err(e) => {
                tracing::warn!(container = name, error = %e, "network of container is gone");
                None
            }
        };
        let cgroup = info
            .cgroup_path
            .as_deref()
            .map(|path| CgroupManager::with_mounts(path, Arc::clone(&self.cgroups)))
            .transpose()?;
        let volume = match info.volume.as_deref().map(str::parse::<Volume>).transpose() {
            Ok(volume) => volume,
            Err(e) => {
                tracing::warn!(container = name, error = %e, "recorded volume is unusable");
                None
            }
        };
        let staged = Staged {
            workspace: Workspace::existing(&self.config, &info.name).with_volume(volume),
            cgroup,
            endpoint,
        };
        self.teardown(&info, &staged)?;
        tracing::info!(container = name, "container stopped");
        Ok(info)
    }

    fn kill_and_reap(&self, pid: u32) -> Result<()> {
        self.processes.kill(pid)?;
        let _ = self.processes.wait(pid)?;
        Ok(())
    }

    /// Disconnects, destroys the cgroup, removes the workspace, and deletes
    /// the record, continuing past failures. Cgroup removal failures are
    /// only logged.
    fn teardown(&self, info: &ContainerInfo, staged: &Staged) -> Result<()> {
        let mut first_error = None;
        let mut note = |step: &str, result: Result<()>| {
            if let Err(e) = result {
                tracing::error!(container = %info.name, step, error = %e, "teardown step failed");
                if first_error.is_none() {
                    first_error = Some(e.in_step(step));
                }
            }
        };
        if let Some(endpoint) = &staged.endpoint {
            note("disconnect", self.network.disconnect(endpoint));
        }
        if let Some(cgroup) = &staged.cgroup {
            cgroup.destroy().warn_failures();
        }
        note(
            "remove workspace",
            staged.workspace.destroy(self.mounts.as_ref()),
        );
        note("remove record", self.records.remove(&info.name));
        first_error.map_or(Ok(()), Err)
    }
}

fn validate_env(env: &[String]) -> Result<()> {
    for entry in env {
        match entry.split_once('=') {
            Some((key, _)) if !key.is_empty() => {}
            _ => {
                return Err(HuskError::Config {
                    message: format!("environment entry must be KEY=VALUE, got {entry:?}"),
                });
            }
        }
    }
    Ok(())
}
