//! Per-container root filesystem.
//!
//! The image directory is the read-only lower layer of an overlay mount;
//! the container's writes land in `<overlay>/<name>/upper` and the merged
//! view is mounted at `<mnt>/<name>`. An optional host directory is
//! bind-mounted into the merged view.

use std::fmt;
use std::path::{Component, Path, PathBuf};
use std::str::FromStr;

use husk_common::config::HuskConfig;
use husk_common::error::{HuskError, Result};
use husk_core::filesystem::MountSyscalls;
use husk_core::filesystem::overlayfs::OverlayMount;
use nix::mount::MsFlags;

/// A host directory shared with the container, `hostDir:containerDir`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Volume {
    /// Directory on the host; created if missing.
    pub host: PathBuf,
    /// Absolute path inside the container.
    pub container: PathBuf,
}

impl FromStr for Volume {
    type Err = HuskError;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = |why: &str| HuskError::Config {
            message: format!("invalid volume {s:?}: {why}"),
        };
        let (host, container) = s
            .split_once(':')
            .ok_or_else(|| invalid("expected hostDir:containerDir"))?;
        if host.is_empty() || container.is_empty() {
            return Err(invalid("both directories are required"));
        }
        let container = PathBuf::from(container);
        let mut components = container.components();
        if components.next() != Some(Component::RootDir) {
            return Err(invalid("container directory must be absolute"));
        }
        let mut depth = 0;
        for component in components {
            if !matches!(component, Component::Normal(_)) {
                return Err(invalid("container directory may not contain '.' or '..'"));
            }
            depth += 1;
        }
        if depth == 0 {
            return Err(invalid("cannot mount over the container root"));
        }
        Ok(Self {
            host: PathBuf::from(host),
            container,
        })
    }
}

impl fmt::Display for Volume {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host.display(), self.container.display())
    }
}

/// The overlay layout of one container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Workspace {
    overlay: OverlayMount,
    layer_dir: PathBuf,
    volume: Option<Volume>,
}

impl Workspace {
    /// Lays out the workspace of container `name` over `image`.
    ///
    /// Nothing is created until [`Workspace::create`].
    #[must_use]
    pub fn new(config: &HuskConfig, image: &Path, name: &str) -> Self {
        let mut workspace = Self::existing(config, name);
        workspace.overlay.lower_dirs.push(image.to_path_buf());
        workspace
    }

    /// The workspace of an already launched container, enough to destroy
    /// it.
    #[must_use]
    pub fn existing(config: &HuskConfig, name: &str) -> Self {
        let layer_dir = config.overlay_dir().join(name);
        Self {
            overlay: OverlayMount {
                lower_dirs: Vec::new(),
                upper_dir: layer_dir.join("upper"),
                work_dir: layer_dir.join("work"),
                merged_dir: config.mnt_dir().join(name),
            },
            layer_dir,
            volume: None,
        }
    }

    /// Shares `volume` with the container.
    #[must_use]
    pub fn with_volume(mut self, volume: Option<Volume>) -> Self {
        self.volume = volume;
        self
    }

    /// The merged root the container process runs in.
    #[must_use]
    pub fn rootfs(&self) -> &Path {
        self.overlay.merged()
    }

    /// Creates the layer directories and mounts the overlay.
    ///
    /// A failed mount removes the directories it created.
    ///
    /// # Errors
    ///
    /// Returns an error if the image is missing, or a directory or the mount
    /// cannot be created.
    pub fn create(&self, sys: &dyn MountSyscalls) -> Result<()> {
        for lower in &self.overlay.lower_dirs {
            if !lower.is_dir() {
                return Err(HuskError::NotFound {
                    kind: "image",
                    id: lower.display().to_string(),
                });
            }
        }
        if let Err(e) = self.overlay.mount(sys) {
            return Err(e.with_cleanup(self.remove_dirs(sys)));
        }
        if let Some(volume) = &self.volume {
            if let Err(e) = self.mount_volume(sys, volume) {
                let cleanup = self
                    .overlay
                    .unmount(sys)
                    .and_then(|()| self.remove_dirs(sys));
                return Err(e.with_cleanup(cleanup));
            }
        }
        tracing::info!(rootfs = %self.rootfs().display(), "workspace created");
        Ok(())
    }

    /// Where `volume` appears on the host once mounted.
    fn volume_target(&self, volume: &Volume) -> PathBuf {
        self.rootfs()
            .join(volume.container.strip_prefix("/").unwrap_or(volume.container.as_path()))
    }

    fn mount_volume(&self, sys: &dyn MountSyscalls, volume: &Volume) -> Result<()> {
        let source = volume.host.to_str().ok_or_else(|| HuskError::Config {
            message: format!("volume path is not UTF-8: {}", volume.host.display()),
        })?;
        let target = self.volume_target(volume);
        sys.create_dir(&volume.host)?;
        sys.create_dir(&target)?;
        sys.mount(
            Some(source),
            &target,
            None,
            MsFlags::MS_BIND | MsFlags::MS_REC,
            None,
        )
        .map_err(|e| e.in_step(format!("bind volume {volume}")))?;
        tracing::info!(volume = %volume, target = %target.display(), "volume mounted");
        Ok(())
    }

    /// Unmounts the volume and the overlay, then deletes the container's
    /// layers.
    ///
    /// The image itself is left untouched.
    ///
    /// # Errors
    ///
    /// Returns an error if the unmount fails, in which case nothing is
    /// deleted, or if a directory cannot be removed.
    pub fn destroy(&self, sys: &dyn MountSyscalls) -> Result<()> {
        if let Some(volume) = &self.volume {
            sys.umount_detach(&self.volume_target(volume))
                .map_err(|e| e.in_step("unmount volume"))?;
        }
        self.overlay.unmount(sys)?;
        self.remove_dirs(sys)?;
        tracing::info!(rootfs = %self.rootfs().display(), "workspace removed");
        Ok(())
    }

    fn remove_dirs(&self, sys: &dyn MountSyscalls) -> Result<()> {
        if self.rootfs().exists() {
            sys.remove_dir(self.rootfs())?;
        }
        match std::fs::remove_dir_all(&self.layer_dir) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(HuskError::Io {
                path: self.layer_dir.clone(),
                source: e,
            }),
        }
    }
}
