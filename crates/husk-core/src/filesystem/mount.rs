//! Pseudo-filesystem mounts inside a freshly switched root.

use std::path::Path;

use husk_common::constants::DEV_TMPFS_SIZE;
use husk_common::error::Result;
use nix::mount::MsFlags;

use super::MountSyscalls;

/// Mounts a fresh `proc` filesystem on `/proc`.
///
/// The mount reflects the container's own PID namespace.
///
/// # Errors
///
/// Returns an error if the `mount(2)` syscall fails.
pub fn mount_proc(sys: &dyn MountSyscalls) -> Result<()> {
    let flags = MsFlags::MS_NOEXEC | MsFlags::MS_NOSUID | MsFlags::MS_NODEV;
    sys.mount(Some("proc"), Path::new("/proc"), Some("proc"), flags, None)
        .map_err(|e| e.in_step("mount /proc"))?;
    tracing::debug!("/proc mounted");
    Ok(())
}

/// Mounts a size-capped `tmpfs` on `/dev`.
///
/// # Errors
///
/// Returns an error if the `mount(2)` syscall fails.
pub fn mount_dev(sys: &dyn MountSyscalls) -> Result<()> {
    let flags = MsFlags::MS_NOSUID | MsFlags::MS_STRICTATIME;
    let data = format!("mode=755,size={DEV_TMPFS_SIZE}");
    sys.mount(Some("tmpfs"), Path::new("/dev"), Some("tmpfs"), flags, Some(&data))
        .map_err(|e| e.in_step("mount /dev"))?;
    tracing::debug!(options = %data, "/dev mounted");
    Ok(())
}
