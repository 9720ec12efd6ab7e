//! The per-axis subsystem contract.
//!
//! A subsystem knows which [`ResourceConfig`] field it enforces and which
//! control file receives it; directory handling, membership, and removal
//! are shared by every variant.

use std::io::ErrorKind;
use std::path::Path;

use husk_common::error::{HuskError, Result};
use husk_common::types::ResourceConfig;

use super::mountinfo::{CgroupVersion, Hierarchy};

/// One cgroup resource axis.
pub trait Subsystem: Send + Sync {
    /// Controller name as it appears in the mount options (`memory`, `cpu`, `cpuset`).
    fn name(&self) -> &'static str;

    /// The limit this subsystem enforces, if `res` configures one.
    fn limit<'a>(&self, res: &'a ResourceConfig) -> Option<&'a str>;

    /// Control file and value that express `limit` on a hierarchy of `version`.
    ///
    /// # Errors
    ///
    /// Returns an error if `limit` cannot be expressed on that version.
    fn control(&self, version: CgroupVersion, limit: &str) -> Result<(&'static str, String)>;

    /// Hook run on a freshly resolved cgroup directory before it is used.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be made usable.
    fn prepare(&self, _hierarchy: &Hierarchy, _dir: &Path) -> Result<()> {
        Ok(())
    }

    /// Writes this subsystem's limit for the cgroup at `path`.
    ///
    /// Does nothing, not even directory creation, when `res` leaves the
    /// axis unset. Returns whether a control file was written.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created or the control
    /// file cannot be written.
    fn set(&self, hierarchy: &Hierarchy, path: &Path, res: &ResourceConfig) -> Result<bool> {
        let Some(limit) = self.limit(res) else {
            return Ok(false);
        };
        let dir = hierarchy.cgroup_dir(path, true)?;
        delegate_controller(hierarchy, &dir, self.name());
        self.prepare(hierarchy, &dir)?;
        let (file, value) = self.control(hierarchy.version(), limit)?;
        write_control(&dir.join(file), &value)?;
        tracing::debug!(subsystem = self.name(), file, value = %value, "cgroup limit set");
        Ok(true)
    }

    /// Moves `pid` into the cgroup at `path`, creating it if absent.
    ///
    /// Writing a PID that is already a member leaves membership unchanged.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created or the membership
    /// file cannot be written.
    fn apply(&self, hierarchy: &Hierarchy, path: &Path, pid: u32) -> Result<()> {
        let dir = hierarchy.cgroup_dir(path, true)?;
        delegate_controller(hierarchy, &dir, self.name());
        self.prepare(hierarchy, &dir)?;
        let procs = match hierarchy.version() {
            CgroupVersion::V1 => "tasks",
            CgroupVersion::V2 => "cgroup.procs",
        };
        write_control(&dir.join(procs), &pid.to_string())?;
        tracing::debug!(subsystem = self.name(), pid, "process attached to cgroup");
        Ok(())
    }

    /// Removes the cgroup at `path`.
    ///
    /// A cgroup that no longer exists counts as removed.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory exists but cannot be removed.
    fn remove(&self, hierarchy: &Hierarchy, path: &Path) -> Result<()> {
        let dir = hierarchy.root().join(path);
        let removed = match std::fs::remove_dir(&dir) {
            // cgroupfs directories look non-empty to userspace but rmdir
            // succeeds on them; a plain directory needs the recursive form.
            Err(e) if e.kind() == ErrorKind::DirectoryNotEmpty => std::fs::remove_dir_all(&dir),
            other => other,
        };
        match removed {
            Ok(()) => {
                tracing::debug!(subsystem = self.name(), path = %dir.display(), "cgroup removed");
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(HuskError::Io {
                path: dir,
                source: e,
            }),
        }
    }
}

/// Enables `controller` in `cgroup.subtree_control` of every ancestor of
/// `dir` below the v2 root, so the controller's files appear in `dir`.
///
/// Best-effort: a controller that is already enabled, or one the kernel
/// refuses to delegate, only produces a debug event.
fn delegate_controller(hierarchy: &Hierarchy, dir: &Path, controller: &str) {
    if hierarchy.version() != CgroupVersion::V2 {
        return;
    }
    let root = hierarchy.root();
    let mut ancestors: Vec<&Path> = dir
        .ancestors()
        .skip(1)
        .take_while(|p| p.starts_with(root))
        .collect();
    ancestors.reverse();
    for ancestor in ancestors {
        let file = ancestor.join("cgroup.subtree_control");
        if !file.exists() {
            continue;
        }
        if let Err(e) = write_control(&file, &format!("+{controller}")) {
            tracing::debug!(controller, path = %file.display(), error = %e, "controller not delegated");
        }
    }
}

/// Writes `value` to a cgroup control file.
///
/// # Errors
///
/// Returns an error if the write fails.
pub fn write_control(file: &Path, value: &str) -> Result<()> {
    std::fs::write(file, value).map_err(|e| HuskError::Io {
        path: file.to_path_buf(),
        source: e,
    })
}

/// Reads a cgroup control file, trimming the trailing newline.
///
/// # Errors
///
/// Returns an error if the read fails.
pub fn read_control(file: &Path) -> Result<String> {
    std::fs::read_to_string(file)
        .map(|s| s.trim().to_string())
        .map_err(|e| HuskError::Io {
            path: file.to_path_buf(),
            source: e,
        })
}
