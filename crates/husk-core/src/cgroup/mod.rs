//! Cgroup resource management.
//!
//! A [`CgroupManager`] owns one hierarchy-relative path and fans every
//! request out to the registered [`Subsystem`]s. Each subsystem resolves
//! its own hierarchy through the process mount table, so v1 hosts (one
//! mount per controller) and v2 hosts (one unified mount) are both served.
//!
//! Fan-out never stops at the first failure: every subsystem is attempted
//! and the outcomes are collected in a [`FanOutReport`], which the caller
//! turns into a hard error or a warning.

pub mod cpu;
pub mod cpuset;
pub mod memory;
pub mod mountinfo;
pub mod subsystem;

use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use husk_common::error::{HuskError, Result, SubsystemFailure};
use husk_common::types::ResourceConfig;

pub use mountinfo::{CgroupVersion, Hierarchy, MountTable};
pub use subsystem::Subsystem;

/// The subsystems every container is placed under.
#[must_use]
pub fn default_subsystems() -> Vec<Box<dyn Subsystem>> {
    vec![
        Box::new(cpuset::CpusetSubsystem),
        Box::new(memory::MemorySubsystem),
        Box::new(cpu::CpuSubsystem),
    ]
}

/// Per-subsystem outcomes of one fan-out operation.
#[derive(Debug)]
#[must_use = "a fan-out report carries failures that must be inspected"]
pub struct FanOutReport {
    operation: &'static str,
    outcomes: Vec<(&'static str, Result<()>)>,
}

impl FanOutReport {
    fn new(operation: &'static str) -> Self {
        Self {
            operation,
            outcomes: Vec::new(),
        }
    }

    fn record(&mut self, subsystem: &'static str, outcome: Result<()>) {
        self.outcomes.push((subsystem, outcome));
    }

    /// Name of the fanned-out operation.
    pub const fn operation(&self) -> &'static str {
        self.operation
    }

    /// Returns `true` when every attempted subsystem succeeded.
    pub fn is_success(&self) -> bool {
        self.outcomes.iter().all(|(_, r)| r.is_ok())
    }

    /// Iterates over the subsystems that failed.
    pub fn failures(&self) -> impl Iterator<Item = (&'static str, &HuskError)> {
        self.outcomes
            .iter()
            .filter_map(|(name, r)| r.as_ref().err().map(|e| (*name, e)))
    }

    /// Names of the subsystems that were attempted, in order.
    pub fn attempted(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.outcomes.iter().map(|(name, _)| *name)
    }

    /// Logs each failure as a warning; for best-effort operations.
    pub fn warn_failures(&self) {
        for (subsystem, err) in self.failures() {
            tracing::warn!(operation = self.operation, subsystem, error = %err, "cgroup operation failed");
        }
    }

    /// Converts the report into a single result.
    ///
    /// # Errors
    ///
    /// Returns [`HuskError::FanOut`] listing every failed subsystem.
    pub fn into_result(self) -> Result<()> {
        let failures: Vec<_> = self
            .outcomes
            .into_iter()
            .filter_map(|(subsystem, r)| {
                r.err().map(|e| SubsystemFailure {
                    subsystem: subsystem.to_string(),
                    message: e.to_string(),
                })
            })
            .collect();
        if failures.is_empty() {
            Ok(())
        } else {
            Err(HuskError::FanOut {
                operation: self.operation,
                failures,
            })
        }
    }
}

/// Handle to one container's cgroup across all subsystems.
pub struct CgroupManager {
    path: PathBuf,
    mounts: Arc<MountTable>,
    subsystems: Vec<Box<dyn Subsystem>>,
}

impl std::fmt::Debug for CgroupManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CgroupManager")
            .field("path", &self.path)
            .field(
                "subsystems",
                &self.subsystems.iter().map(|s| s.name()).collect::<Vec<_>>(),
            )
            .finish_non_exhaustive()
    }
}

impl CgroupManager {
    /// Creates a manager for `path` using the host's cgroup mounts.
    ///
    /// # Errors
    ///
    /// Returns an error if `path` is not a plain relative path or the mount
    /// table cannot be read.
    pub fn new(path: impl Into<PathBuf>) -> Result<Self> {
        Self::with_mounts(path, MountTable::current()?)
    }

    /// Creates a manager for `path` resolved against an explicit mount table.
    ///
    /// # Errors
    ///
    /// Returns an error if `path` is not a plain relative path.
    pub fn with_mounts(path: impl Into<PathBuf>, mounts: Arc<MountTable>) -> Result<Self> {
        let path = path.into();
        validate_path(&path)?;
        Ok(Self {
            path,
            mounts,
            subsystems: default_subsystems(),
        })
    }

    /// Hierarchy-relative path of this cgroup.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Attaches `pid` to this cgroup in every subsystem.
    pub fn apply(&self, pid: u32) -> FanOutReport {
        let mut report = FanOutReport::new("apply");
        for subsystem in &self.subsystems {
            let outcome = self
                .hierarchy(subsystem.as_ref())
                .and_then(|h| subsystem.apply(&h, &self.path, pid));
            report.record(subsystem.name(), outcome);
        }
        tracing::info!(path = %self.path.display(), pid, ok = report.is_success(), "cgroup apply");
        report
    }

    /// Writes every limit `res` configures.
    ///
    /// Subsystems whose axis is unset are neither touched nor reported.
    pub fn set(&self, res: &ResourceConfig) -> FanOutReport {
        let mut report = FanOutReport::new("set");
        for subsystem in &self.subsystems {
            if subsystem.limit(res).is_none() {
                continue;
            }
            let outcome = self
                .hierarchy(subsystem.as_ref())
                .and_then(|h| subsystem.set(&h, &self.path, res).map(|_| ()));
            report.record(subsystem.name(), outcome);
        }
        tracing::info!(path = %self.path.display(), ok = report.is_success(), "cgroup limits set");
        report
    }

    /// Removes this cgroup from every subsystem.
    ///
    /// Already-removed directories count as success.
    pub fn destroy(&self) -> FanOutReport {
        let mut report = FanOutReport::new("destroy");
        for subsystem in &self.subsystems {
            let outcome = self
                .hierarchy(subsystem.as_ref())
                .and_then(|h| subsystem.remove(&h, &self.path));
            report.record(subsystem.name(), outcome);
        }
        tracing::info!(path = %self.path.display(), ok = report.is_success(), "cgroup destroyed");
        report
    }

    fn hierarchy(&self, subsystem: &dyn Subsystem) -> Result<Hierarchy> {
        self.mounts
            .hierarchy(subsystem.name())
            .ok_or_else(|| HuskError::NotFound {
                kind: "cgroup hierarchy",
                id: subsystem.name().to_string(),
            })
    }
}

fn validate_path(path: &Path) -> Result<()> {
    let plain = !path.as_os_str().is_empty()
        && path.components().all(|c| matches!(c, Component::Normal(_)));
    if plain {
        Ok(())
    } else {
        Err(HuskError::Config {
            message: format!("cgroup path must be relative and plain: {}", path.display()),
        })
    }
}
