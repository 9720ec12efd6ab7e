//! Filesystem management for container isolation.
//!
//! Provides the `pivot_root` root switch, the `/proc` and `/dev` pseudo
//! filesystems, and the overlay mount that assembles a container rootfs.
//! Every kernel call goes through [`MountSyscalls`], so the sequences in this
//! module can run against a recording double in tests.

pub mod mount;
pub mod overlayfs;
pub mod pivot_root;

#[cfg(test)]
pub(crate) mod recording;

use std::convert::Infallible;
use std::ffi::CString;
use std::os::unix::ffi::OsStrExt;
use std::path::{Path, PathBuf};

use husk_common::error::{HuskError, Result};
use nix::mount::{MntFlags, MsFlags};

/// The kernel operations used to build and enter a container root.
pub trait MountSyscalls {
    /// `mount(2)`.
    ///
    /// # Errors
    ///
    /// Returns [`HuskError::Kernel`] naming the mount target on failure.
    fn mount(
        &self,
        source: Option<&str>,
        target: &Path,
        fstype: Option<&str>,
        flags: MsFlags,
        data: Option<&str>,
    ) -> Result<()>;

    /// `umount2(2)` with `MNT_DETACH`.
    ///
    /// # Errors
    ///
    /// Returns [`HuskError::Kernel`] on failure.
    fn umount_detach(&self, target: &Path) -> Result<()>;

    /// `pivot_root(2)`.
    ///
    /// # Errors
    ///
    /// Returns [`HuskError::Kernel`] on failure.
    fn pivot_root(&self, new_root: &Path, put_old: &Path) -> Result<()>;

    /// `chdir(2)`.
    ///
    /// # Errors
    ///
    /// Returns [`HuskError::Kernel`] on failure.
    fn chdir(&self, dir: &Path) -> Result<()>;

    /// Creates `dir` and any missing parents.
    ///
    /// # Errors
    ///
    /// Returns [`HuskError::Io`] on failure.
    fn create_dir(&self, dir: &Path) -> Result<()>;

    /// Removes the empty directory `dir`.
    ///
    /// # Errors
    ///
    /// Returns [`HuskError::Io`] on failure.
    fn remove_dir(&self, dir: &Path) -> Result<()>;

    /// Current working directory of the calling process.
    ///
    /// # Errors
    ///
    /// Returns [`HuskError::Io`] if it cannot be determined.
    fn current_dir(&self) -> Result<PathBuf>;

    /// Replaces the process image with `program`, keeping the environment.
    ///
    /// Only returns on failure.
    ///
    /// # Errors
    ///
    /// Returns [`HuskError::Kernel`] if `execv(2)` fails.
    fn exec(&self, program: &Path, args: &[String]) -> Result<Infallible>;
}

/// [`MountSyscalls`] backed by the real kernel.
#[derive(Debug, Clone, Copy, Default)]
pub struct HostSyscalls;

impl MountSyscalls for HostSyscalls {
    fn mount(
        &self,
        source: Option<&str>,
        target: &Path,
        fstype: Option<&str>,
        flags: MsFlags,
        data: Option<&str>,
    ) -> Result<()> {
        nix::mount::mount(source, target, fstype, flags, data)
            .map_err(|e| HuskError::kernel(format!("mount {}", target.display()), e))
    }

    fn umount_detach(&self, target: &Path) -> Result<()> {
        nix::mount::umount2(target, MntFlags::MNT_DETACH)
            .map_err(|e| HuskError::kernel(format!("umount {}", target.display()), e))
    }

    fn pivot_root(&self, new_root: &Path, put_old: &Path) -> Result<()> {
        nix::unistd::pivot_root(new_root, put_old).map_err(|e| HuskError::kernel("pivot_root", e))
    }

    fn chdir(&self, dir: &Path) -> Result<()> {
        nix::unistd::chdir(dir).map_err(|e| HuskError::kernel(format!("chdir {}", dir.display()), e))
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
        std::env::current_dir().map_err(|e| HuskError::Io {
            path: PathBuf::from("."),
            source: e,
        })
    }

    fn exec(&self, program: &Path, args: &[String]) -> Result<Infallible> {
        let path = to_cstring(program.as_os_str().as_bytes())?;
        let argv = args
            .iter()
            .map(|a| to_cstring(a.as_bytes()))
            .collect::<Result<Vec<_>>>()?;
        nix::unistd::execv(&path, &argv).map_err(|e| HuskError::kernel("execv", e))
    }
}

fn to_cstring(bytes: &[u8]) -> Result<CString> {
    CString::new(bytes).map_err(|_| HuskError::Config {
        message: format!(
            "argument contains a NUL byte: {}",
            String::from_utf8_lossy(bytes)
        ),
    })
}
