//! Global configuration model for the husk runtime.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::constants;

/// Root configuration for the husk runtime.
///
/// Every on-disk location is derived from two directories so that tests
/// and alternative installations can relocate the whole tree at once.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HuskConfig {
    /// Volatile runtime state: network records, IPAM bitmaps, container records.
    pub run_dir: PathBuf,
    /// Persistent data: image roots and overlay layers.
    pub data_dir: PathBuf,
}

impl Default for HuskConfig {
    fn default() -> Self {
        Self {
            run_dir: PathBuf::from(constants::DEFAULT_RUN_DIR),
            data_dir: PathBuf::from(constants::DEFAULT_DATA_DIR),
        }
    }
}

impl HuskConfig {
    /// Places both the run and data directories under `root`.
    #[must_use]
    pub fn from_root(root: &Path) -> Self {
        Self {
            run_dir: root.join("run"),
            data_dir: root.join("data"),
        }
    }

    /// Directory holding one JSON record per network.
    #[must_use]
    pub fn network_dir(&self) -> PathBuf {
        self.run_dir.join("network").join("network")
    }

    /// File holding the IPAM allocation bitmaps.
    #[must_use]
    pub fn ipam_file(&self) -> PathBuf {
        self.run_dir.join("network").join("ipam").join("subnet.json")
    }

    /// Directory holding one sub-directory per container.
    #[must_use]
    pub fn containers_dir(&self) -> PathBuf {
        self.run_dir.join("containers")
    }

    /// Directory holding the merged root filesystem of each container.
    #[must_use]
    pub fn mnt_dir(&self) -> PathBuf {
        self.data_dir.join("mnt")
    }

    /// Directory holding the writable overlay layers of each container.
    #[must_use]
    pub fn overlay_dir(&self) -> PathBuf {
        self.data_dir.join("overlay")
    }

    /// Directory holding unpacked image roots, one per image name.
    #[must_use]
    pub fn images_dir(&self) -> PathBuf {
        self.data_dir.join("images")
    }

    /// Resolves an image argument: an existing path is used as is, anything
    /// else names a directory under [`HuskConfig::images_dir`].
    #[must_use]
    pub fn resolve_image(&self, image: &str) -> PathBuf {
        let direct = Path::new(image);
        if image.contains('/') || direct.exists() {
            return direct.to_path_buf();
        }
        self.images_dir().join(image)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_paths_live_under_system_dirs() {
        let cfg = HuskConfig::default();
        assert_eq!(
            cfg.network_dir(),
            PathBuf::from("/var/run/husk/network/network")
        );
        assert_eq!(
            cfg.ipam_file(),
            PathBuf::from("/var/run/husk/network/ipam/subnet.json")
        );
        assert_eq!(cfg.mnt_dir(), PathBuf::from("/var/lib/husk/mnt"));
    }

    #[test]
    fn from_root_relocates_everything() {
        let tmp = tempfile::tempdir().unwrap();
        let cfg = HuskConfig::from_root(tmp.path());
        assert!(cfg.network_dir().starts_with(tmp.path()));
        assert!(cfg.ipam_file().starts_with(tmp.path()));
        assert!(cfg.containers_dir().starts_with(tmp.path()));
        assert!(cfg.overlay_dir().starts_with(tmp.path()));
    }

    #[test]
    fn image_names_resolve_under_images_dir() {
        let tmp = tempfile::tempdir().unwrap();
        let cfg = HuskConfig::from_root(tmp.path());
        assert_eq!(cfg.resolve_image("busybox"), tmp.path().join("data/images/busybox"));
        assert_eq!(cfg.resolve_image("/srv/rootfs"), PathBuf::from("/srv/rootfs"));
    }
}
