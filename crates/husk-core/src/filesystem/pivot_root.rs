//! Secure root filesystem switching via `pivot_root(2)`.
//!
//! More secure than `chroot` because it actually changes the root mount
//! point rather than just the process's view of `/`. The old root is parked
//! under [`PIVOT_DIR`] inside the new root, detached, and removed.

use std::path::{Path, PathBuf};

use husk_common::constants::PIVOT_DIR;
use husk_common::error::{HuskError, Result};
use nix::mount::MsFlags;

use super::MountSyscalls;

/// Makes `new_root` the filesystem root of the calling process.
///
/// Mount propagation is turned private first so nothing done here leaks
/// into the host mount table. `new_root` is bind-mounted onto itself because
/// `pivot_root(2)` requires the new root to be a mount point.
///
/// # Errors
///
/// Returns an error naming the first step that failed. Removing the emptied
/// parking directory is not fatal and is only logged.
pub fn switch_root(sys: &dyn MountSyscalls, new_root: &Path) -> Result<()> {
    sys.mount(
        None,
        Path::new("/"),
        None,
        MsFlags::MS_PRIVATE | MsFlags::MS_REC,
        None,
    )
    .map_err(|e| e.in_step("make / private"))?;

    sys.mount(
        Some(root_str(new_root)?),
        new_root,
        Some("bind"),
        MsFlags::MS_BIND | MsFlags::MS_REC,
        None,
    )
    .map_err(|e| e.in_step("bind new root"))?;

    let put_old = new_root.join(PIVOT_DIR);
    sys.create_dir(&put_old)
        .map_err(|e| e.in_step("create pivot dir"))?;
    sys.pivot_root(new_root, &put_old)?;
    sys.chdir(Path::new("/"))?;

    let parked: PathBuf = Path::new("/").join(PIVOT_DIR);
    sys.umount_detach(&parked)
        .map_err(|e| e.in_step("detach old root"))?;
    if let Err(e) = sys.remove_dir(&parked) {
        tracing::warn!(path = %parked.display(), error = %e, "failed to remove old root mount point");
    }

    tracing::info!(new_root = %new_root.display(), "root switched");
    Ok(())
}

fn root_str(root: &Path) -> Result<&str> {
    root.to_str().ok_or_else(|| HuskError::Config {
        message: format!("root path is not valid UTF-8: {}", root.display()),
    })
}
