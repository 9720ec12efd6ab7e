//! `OverlayFS` mount for a container's writable root.
//!
//! The image directory is the read-only lower layer; writes land in a
//! per-container upper directory.

use std::path::{Path, PathBuf};

use husk_common::error::{HuskError, Result};
use nix::mount::MsFlags;

use super::MountSyscalls;

/// Layout of one overlay mount.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OverlayMount {
    /// Read-only lower layers, bottom to top.
    pub lower_dirs: Vec<PathBuf>,
    /// Writable upper layer directory.
    pub upper_dir: PathBuf,
    /// Work directory required by `OverlayFS`.
    pub work_dir: PathBuf,
    /// Final merged mount point.
    pub merged_dir: PathBuf,
}

impl OverlayMount {
    /// Builds the `lowerdir=…,upperdir=…,workdir=…` option string.
    ///
    /// Lower layers are listed top-most first, as the kernel expects.
    ///
    /// # Errors
    ///
    /// Returns [`HuskError::Config`] if there is no lower layer or a path
    /// contains a character the option syntax cannot carry.
    pub fn options(&self) -> Result<String> {
        if self.lower_dirs.is_empty() {
            return Err(HuskError::Config {
                message: "overlay mount needs at least one lower layer".into(),
            });
        }
        let all = self
            .lower_dirs
            .iter()
            .chain([&self.upper_dir, &self.work_dir]);
        for dir in all {
            let text = dir.to_string_lossy();
            if text.contains([',', ':']) {
                return Err(HuskError::Config {
                    message: format!("overlay path may not contain ',' or ':': {text}"),
                });
            }
        }
        let lowers = self
            .lower_dirs
            .iter()
            .rev()
            .map(|p| p.display().to_string())
            .collect::<Vec<_>>()
            .join(":");
        Ok(format!(
            "lowerdir={},upperdir={},workdir={}",
            lowers,
            self.upper_dir.display(),
            self.work_dir.display()
        ))
    }

    /// Creates the upper, work, and merged directories and mounts the overlay.
    ///
    /// # Errors
    ///
    /// Returns an error if directory creation or the `mount(2)` syscall fails.
    pub fn mount(&self, sys: &dyn MountSyscalls) -> Result<()> {
        let options = self.options()?;
        for dir in [&self.upper_dir, &self.work_dir, &self.merged_dir] {
            sys.create_dir(dir)?;
        }
        sys.mount(
            Some("overlay"),
            &self.merged_dir,
            Some("overlay"),
            MsFlags::empty(),
            Some(&options),
        )
        .map_err(|e| e.in_step("mount overlay"))?;
        tracing::info!(merged = %self.merged_dir.display(), "overlayfs mounted");
        Ok(())
    }

    /// Lazily detaches the merged mount.
    ///
    /// # Errors
    ///
    /// Returns an error if the unmount syscall fails.
    pub fn unmount(&self, sys: &dyn MountSyscalls) -> Result<()> {
        sys.umount_detach(&self.merged_dir)
            .map_err(|e| e.in_step("unmount overlay"))?;
        tracing::info!(path = %self.merged_dir.display(), "overlayfs unmounted");
        Ok(())
    }

    /// Mount point of the merged view.
    #[must_use]
    pub fn merged(&self) -> &Path {
        &self.merged_dir
    }
}
