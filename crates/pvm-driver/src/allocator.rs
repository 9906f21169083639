//! VMID allocation.

use crate::error::{CoreError, Result};
use pvm_api::VmId;
use rand::Rng;
use std::fmt;
use std::str::FromStr;

/// Picks the identifier of the VM about to be created.
pub trait VmIdAllocator: Send + Sync {
    fn allocate(&self) -> Result<VmId>;
}

/// Uniform random choice from a half-open range `[min, max)`.
///
/// The allocator does not ask the cluster whether the chosen VMID is free;
/// a collision surfaces as a rejected clone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RangeAllocator {
    min: u32,
    max: u32,
}

impl RangeAllocator {
    /// Parse a `<min>:<max>` range such as `"100:200"`.
    ///
    /// `min == max` is accepted here but yields an error on allocation,
    /// since the range holds no VMID.
    pub fn parse(range: &str) -> Result<Self> {
        let parts: Vec<&str> = range.split(':').collect();
        if parts.len() != 2 {
            return Err(CoreError::InvalidRange(format!(
                "'{range}' is not of the form <min>:<max>"
            )));
        }

        let bound = |s: &str| {
            s.trim()
                .parse::<u32>()
                .map_err(|e| CoreError::InvalidRange(format!("'{s}' in '{range}': {e}")))
        };
        let min = bound(parts[0])?;
        let max = bound(parts[1])?;

        if min > max {
            return Err(CoreError::InvalidRange(format!(
                "'{range}': lower bound exceeds upper bound"
            )));
        }
        Ok(Self { min, max })
    }

    pub fn min(&self) -> u32 {
        self.min
    }

    /// Exclusive upper bound.
    pub fn max(&self) -> u32 {
        self.max
    }
}

impl FromStr for RangeAllocator {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl fmt::Display for RangeAllocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.min, self.max)
    }
}

impl VmIdAllocator for RangeAllocator {
    fn allocate(&self) -> Result<VmId> {
        if self.min == self.max {
            return Err(CoreError::InvalidRange(format!("'{self}' is empty")));
        }
        let id = rand::thread_rng().gen_range(self.min..self.max);
        tracing::debug!(vmid = id, range = %self, "Allocated VMID");
        Ok(VmId::new(id))
    }
}

/// Always hands out the same VMID.
#[derive(Debug, Clone, Copy)]
pub struct FixedAllocator(pub VmId);

impl VmIdAllocator for FixedAllocator {
    fn allocate(&self) -> Result<VmId> {
        Ok(self.0)
    }
}
