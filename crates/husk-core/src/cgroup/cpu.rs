//! CPU share control.
//!
//! Shares are expressed in v1 units (`cpu.shares`, 2..=262144). On a v2
//! hierarchy they are converted to `cpu.weight` (1..=10000) with the same
//! linear mapping runc uses.

use husk_common::error::{HuskError, Result};
use husk_common::types::ResourceConfig;

use super::mountinfo::CgroupVersion;
use super::subsystem::Subsystem;

const MIN_SHARES: u64 = 2;
const MAX_SHARES: u64 = 262_144;
const MAX_WEIGHT: u64 = 10_000;

/// Relative CPU weight under contention.
#[derive(Debug, Clone, Copy, Default)]
pub struct CpuSubsystem;

impl Subsystem for CpuSubsystem {
    fn name(&self) -> &'static str {
        "cpu"
    }

    fn limit<'a>(&self, res: &'a ResourceConfig) -> Option<&'a str> {
        res.cpu_share()
    }

    fn control(&self, version: CgroupVersion, limit: &str) -> Result<(&'static str, String)> {
        match version {
            CgroupVersion::V1 => Ok(("cpu.shares", limit.to_string())),
            CgroupVersion::V2 => {
                let shares: u64 = limit.parse().map_err(|_| HuskError::Config {
                    message: format!("cpu share must be an integer, got {limit:?}"),
                })?;
                Ok(("cpu.weight", shares_to_weight(shares).to_string()))
            }
        }
    }
}

/// Maps v1 shares onto the v2 weight range.
#[must_use]
pub fn shares_to_weight(shares: u64) -> u64 {
    let shares = shares.clamp(MIN_SHARES, MAX_SHARES);
    1 + ((shares - MIN_SHARES) * (MAX_WEIGHT - 1)) / (MAX_SHARES - MIN_SHARES)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn converts_share_bounds() {
        assert_eq!(shares_to_weight(2), 1);
        assert_eq!(shares_to_weight(262_144), 10_000);
        assert_eq!(shares_to_weight(1024), 39);
    }

    #[test]
    fn clamps_out_of_range_shares() {
        assert_eq!(shares_to_weight(0), 1);
        assert_eq!(shares_to_weight(1_000_000), 10_000);
    }

    #[test]
    fn v1_passes_value_through() {
        let (file, value) = CpuSubsystem.control(CgroupVersion::V1, "512").unwrap();
        assert_eq!(file, "cpu.shares");
        assert_eq!(value, "512");
    }

    #[test]
    fn v2_rejects_non_numeric_share() {
        assert!(CpuSubsystem.control(CgroupVersion::V2, "lots").is_err());
    }
}
