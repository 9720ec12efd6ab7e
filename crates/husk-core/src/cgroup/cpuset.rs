//! CPU set control.
//!
//! On v1 a new cpuset cgroup starts with empty `cpuset.cpus` and
//! `cpuset.mems`, and the kernel refuses to attach tasks to it until both
//! are populated; [`CpusetSubsystem::prepare`] inherits them from the parent.

use std::path::Path;

use husk_common::error::Result;
use husk_common::types::ResourceConfig;

use super::mountinfo::{CgroupVersion, Hierarchy};
use super::subsystem::{Subsystem, read_control, write_control};

/// CPUs the container's process tree may run on.
#[derive(Debug, Clone, Copy, Default)]
pub struct CpusetSubsystem;

impl Subsystem for CpusetSubsystem {
    fn name(&self) -> &'static str {
        "cpuset"
    }

    fn limit<'a>(&self, res: &'a ResourceConfig) -> Option<&'a str> {
        res.cpu_set()
    }

    fn control(&self, _version: CgroupVersion, limit: &str) -> Result<(&'static str, String)> {
        Ok(("cpuset.cpus", limit.to_string()))
    }

    fn prepare(&self, hierarchy: &Hierarchy, dir: &Path) -> Result<()> {
        if hierarchy.version() == CgroupVersion::V2 {
            return Ok(());
        }
        inherit_from_parent(hierarchy.root(), dir, "cpuset.cpus")?;
        inherit_from_parent(hierarchy.root(), dir, "cpuset.mems")
    }
}

/// Copies `file` down from the nearest populated ancestor, walking upwards
/// no further than the hierarchy root.
fn inherit_from_parent(root: &Path, dir: &Path, file: &str) -> Result<()> {
    let target = dir.join(file);
    if !target.exists() || !read_control(&target)?.is_empty() {
        return Ok(());
    }
    let Some(parent) = dir.parent().filter(|p| p.starts_with(root)) else {
        return Ok(());
    };
    inherit_from_parent(root, parent, file)?;
    let value = read_control(&parent.join(file))?;
    if !value.is_empty() {
        write_control(&target, &value)?;
        tracing::debug!(file, value = %value, "cpuset inherited from parent");
    }
    Ok(())
}
