//! Container records.
//!
//! Each launched container is described by `<containers>/<name>/config.json`
//! so that teardown can find its cgroup, network endpoint, and workspace
//! again without any daemon.

use std::path::{Path, PathBuf};

use husk_common::constants::CONTAINER_RECORD;
use husk_common::error::{HuskError, Result};
use husk_common::types::ContainerInfo;

/// Directory of container records.
#[derive(Debug, Clone)]
pub struct ContainerStore {
    dir: PathBuf,
}

impl ContainerStore {
    /// Creates a store rooted at `dir`.
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Path of the record for container `name`.
    #[must_use]
    pub fn record_path(&self, name: &str) -> PathBuf {
        self.dir.join(name).join(CONTAINER_RECORD)
    }

    /// Whether a record exists for `name`.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.record_path(name).is_file()
    }

    /// Writes the record of `info`, replacing any previous one.
    ///
    /// # Errors
    ///
    /// Returns an error if the name is unusable as a directory name or the
    /// record cannot be written.
    pub fn dump(&self, info: &ContainerInfo) -> Result<()> {
        validate_name(&info.name)?;
        let dir = self.dir.join(&info.name);
        std::fs::create_dir_all(&dir).map_err(|e| HuskError::Io {
            path: dir.clone(),
            source: e,
        })?;
        let path = dir.join(CONTAINER_RECORD);
        let json = serde_json::to_string_pretty(info)?;
        std::fs::write(&path, json).map_err(|e| HuskError::Io {
            path: path.clone(),
            source: e,
        })?;
        tracing::debug!(container = %info.name, path = %path.display(), "container record written");
        Ok(())
    }

    /// Reads the record of container `name`.
    ///
    /// # Errors
    ///
    /// Returns [`HuskError::NotFound`] if there is no record, or an error if
    /// it cannot be read or parsed.
    pub fn load(&self, name: &str) -> Result<ContainerInfo> {
        validate_name(name)?;
        let path = self.record_path(name);
        let content = match std::fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(HuskError::NotFound {
                    kind: "container",
                    id: name.to_string(),
                });
            }
            Err(e) => return Err(HuskError::Io { path, source: e }),
        };
        Ok(serde_json::from_str(&content)?)
    }

    /// Removes the record directory of `name`; a missing record is not an
    /// error.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory exists but cannot be removed.
    pub fn remove(&self, name: &str) -> Result<()> {
        validate_name(name)?;
        let dir = self.dir.join(name);
        match std::fs::remove_dir_all(&dir) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(HuskError::Io { path: dir, source: e }),
        }
    }
}

/// Checks that `name` can be used as a single path component.
///
/// # Errors
///
/// Returns [`HuskError::Config`] if it cannot.
pub fn validate_name(name: &str) -> Result<()> {
    let single = Path::new(name).components().count() == 1;
    if name.is_empty() || name.starts_with('.') || name.contains('/') || !single {
        return Err(HuskError::Config {
            message: format!("invalid container name {name:?}"),
        });
    }
    Ok(())
}
