//! Memory resource control.
//!
//! Writes `memory.limit_in_bytes` on v1 and `memory.max` on v2. The value
//! is passed through untouched; both accept `k`/`m`/`g` suffixes.

use husk_common::error::Result;
use husk_common::types::ResourceConfig;

use super::mountinfo::CgroupVersion;
use super::subsystem::Subsystem;

/// Hard memory limit for the container's process tree.
#[derive(Debug, Clone, Copy, Default)]
pub struct MemorySubsystem;

impl Subsystem for MemorySubsystem {
    fn name(&self) -> &'static str {
        "memory"
    }

    fn limit<'a>(&self, res: &'a ResourceConfig) -> Option<&'a str> {
        res.memory_limit()
    }

    fn control(&self, version: CgroupVersion, limit: &str) -> Result<(&'static str, String)> {
        let file = match version {
            CgroupVersion::V1 => "memory.limit_in_bytes",
            CgroupVersion::V2 => "memory.max",
        };
        Ok((file, limit.to_string()))
    }
}
