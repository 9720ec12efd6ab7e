//! The in-container init sequence.
//!
//! Runs as the first process of the new PID namespace, with the merged
//! container rootfs as its working directory: switches the root, mounts
//! fresh `/proc` and `/dev`, and replaces itself with the user program.

use std::convert::Infallible;
use std::path::PathBuf;

use husk_common::error::{HuskError, Result};

use super::handshake;
use crate::filesystem::MountSyscalls;
use crate::filesystem::mount::{mount_dev, mount_proc};
use crate::filesystem::pivot_root::switch_root;

/// Drives the init sequence through a [`MountSyscalls`] implementation.
pub struct ContainerInit<'a> {
    sys: &'a dyn MountSyscalls,
}

impl<'a> ContainerInit<'a> {
    /// Creates an init driver over `sys`.
    #[must_use]
    pub fn new(sys: &'a dyn MountSyscalls) -> Self {
        Self { sys }
    }

    /// Reads the command from the handshake descriptor and runs it.
    ///
    /// # Errors
    ///
    /// See [`ContainerInit::run`]; also fails if the handshake read fails.
    pub fn run_from_handshake(&self) -> Result<Infallible> {
        let command = handshake::read_inherited()?;
        tracing::debug!(?command, "command received from host");
        self.run(&command)
    }

    /// Enters the working directory as the new root and execs `command`.
    ///
    /// Only returns on failure.
    ///
    /// # Errors
    ///
    /// An empty `command` is a configuration error raised before any mount.
    /// Otherwise returns the first failing step of the root switch, the
    /// pseudo-filesystem mounts, executable resolution, or `execv(2)`.
    pub fn run(&self, command: &[String]) -> Result<Infallible> {
        let Some(program) = command.first() else {
            return Err(HuskError::Config {
                message: "container command is empty".into(),
            });
        };

        let root = self.sys.current_dir()?;
        switch_root(self.sys, &root)?;
        mount_proc(self.sys)?;
        mount_dev(self.sys)?;

        let path = resolve(program)?;
        tracing::info!(program = %path.display(), "executing container command");
        self.sys.exec(&path, command)
    }
}

/// Looks `program` up on the container's `PATH`.
fn resolve(program: &str) -> Result<PathBuf> {
    which::which(program).map_err(|e| {
        tracing::error!(program, error = %e, "executable lookup failed");
        HuskError::NotFound {
            kind: "executable",
            id: program.to_string(),
        }
    })
}
