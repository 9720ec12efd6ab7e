//! Cgroup hierarchy discovery from the process mount table.
//!
//! Each v1 subsystem lives on its own mount whose super options name the
//! controller (`rw,memory`); a v2 system has a single `cgroup2` mount.

use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};

use husk_common::constants::MOUNTINFO_PATH;
use husk_common::error::{HuskError, Result};

static CURRENT: OnceLock<Arc<MountTable>> = OnceLock::new();

/// Cgroup interface version of a resolved hierarchy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CgroupVersion {
    /// One hierarchy per controller.
    V1,
    /// Single unified hierarchy.
    V2,
}

/// A mounted cgroup hierarchy that serves one subsystem.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Hierarchy {
    root: PathBuf,
    version: CgroupVersion,
}

impl Hierarchy {
    /// Creates a hierarchy rooted at `root`.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>, version: CgroupVersion) -> Self {
        Self {
            root: root.into(),
            version,
        }
    }

    /// Mount point of the hierarchy.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Interface version of the hierarchy.
    #[must_use]
    pub const fn version(&self) -> CgroupVersion {
        self.version
    }

    /// Returns the absolute directory of the cgroup at `path`.
    ///
    /// With `auto_create` the directory and its parents are created when
    /// missing; otherwise a missing directory is an error.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory is missing and cannot (or may not)
    /// be created.
    pub fn cgroup_dir(&self, path: &Path, auto_create: bool) -> Result<PathBuf> {
        let dir = self.root.join(path);
        if dir.is_dir() {
            return Ok(dir);
        }
        if !auto_create {
            return Err(HuskError::NotFound {
                kind: "cgroup",
                id: dir.display().to_string(),
            });
        }
        std::fs::create_dir_all(&dir).map_err(|e| HuskError::Io {
            path: dir.clone(),
            source: e,
        })?;
        tracing::debug!(path = %dir.display(), "cgroup directory created");
        Ok(dir)
    }
}

#[derive(Debug, Clone)]
struct MountEntry {
    mount_point: PathBuf,
    fs_type: String,
    super_options: Vec<String>,
}

/// Parsed view of a `/proc/<pid>/mountinfo` table, restricted to cgroup mounts.
#[derive(Debug, Clone, Default)]
pub struct MountTable {
    entries: Vec<MountEntry>,
}

impl MountTable {
    /// Parses mountinfo text.
    ///
    /// Lines that do not follow the mountinfo layout are ignored.
    #[must_use]
    pub fn parse(content: &str) -> Self {
        let entries = content
            .lines()
            .filter_map(parse_line)
            .filter(|e| e.fs_type == "cgroup" || e.fs_type == "cgroup2")
            .collect();
        Self { entries }
    }

    /// Reads and parses the mount table at `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| HuskError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;
        Ok(Self::parse(&content))
    }

    /// Returns the calling process's cgroup mounts.
    ///
    /// The table is read once per process and cached; cgroup hierarchies are
    /// not expected to be remounted while the runtime is running.
    ///
    /// # Errors
    ///
    /// Returns an error if the mount table cannot be read.
    pub fn current() -> Result<Arc<Self>> {
        if let Some(table) = CURRENT.get() {
            return Ok(Arc::clone(table));
        }
        let table = Arc::new(Self::load(Path::new(MOUNTINFO_PATH))?);
        tracing::debug!(mounts = table.entries.len(), "cgroup mount table loaded");
        Ok(Arc::clone(CURRENT.get_or_init(|| table)))
    }

    /// Resolves the hierarchy serving `subsystem`.
    ///
    /// A v1 mount whose super options name the subsystem wins; otherwise
    /// the unified v2 mount is used if one exists.
    #[must_use]
    pub fn hierarchy(&self, subsystem: &str) -> Option<Hierarchy> {
        self.entries
            .iter()
            .find(|e| e.fs_type == "cgroup" && e.super_options.iter().any(|o| o == subsystem))
            .map(|e| Hierarchy::new(&e.mount_point, CgroupVersion::V1))
            .or_else(|| {
                self.entries
                    .iter()
                    .find(|e| e.fs_type == "cgroup2")
                    .map(|e| Hierarchy::new(&e.mount_point, CgroupVersion::V2))
            })
    }
}

fn parse_line(line: &str) -> Option<MountEntry> {
    let (pre, post) = line.split_once(" - ")?;
    let mount_point = pre.split(' ').nth(4)?;
    let mut post = post.split(' ');
    let fs_type = post.next()?;
    let _source = post.next()?;
    let super_options = post.next().unwrap_or_default();
    Some(MountEntry {
        mount_point: PathBuf::from(unescape(mount_point)),
        fs_type: fs_type.to_string(),
        super_options: super_options.split(',').map(str::to_string).collect(),
    })
}

/// Decodes the `\ooo` octal escapes the kernel uses for blanks in paths.
fn unescape(field: &str) -> String {
    let bytes = field.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'\\' {
            let code = field
                .get(i + 1..i + 4)
                .and_then(|oct| u8::from_str_radix(oct, 8).ok());
            if let Some(code) = code {
                out.push(code);
                i += 4;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}
