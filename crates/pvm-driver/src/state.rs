//! VM state reporting.

use crate::error::Result;
use crate::locator::VmLocator;
use pvm_api::PowerState;
use std::fmt;

/// Machine state as reported to the orchestrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VmState {
    Running,
    Stopped,
    /// Reachable but neither running nor stopped. When the probe itself
    /// fails, [`probe`] and `Driver::state` return the error in the `Err` arm
    /// instead; callers report that as Unknown together with the error.
    Unknown,
}

impl fmt::Display for VmState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VmState::Running => write!(f, "Running"),
            VmState::Stopped => write!(f, "Stopped"),
            VmState::Unknown => write!(f, "Unknown"),
        }
    }
}

impl From<&PowerState> for VmState {
    fn from(power: &PowerState) -> Self {
        if power.is_running() {
            VmState::Running
        } else if power.is_stopped() {
            VmState::Stopped
        } else {
            VmState::Unknown
        }
    }
}

/// Probe the VM's power state.
///
/// An `Err` means the state is unknown because the VM could not be reached.
/// A reachable VM that is neither running nor stopped is `Ok(Unknown)`.
pub async fn probe(locator: &VmLocator) -> Result<VmState> {
    let vm = locator.fetch().await?;
    let power = vm.ping().await.inspect_err(|e| {
        tracing::debug!(vmid = %locator.vmid(), error = %e, "State probe failed");
    })?;

    let state = VmState::from(&power);
    if state == VmState::Unknown {
        tracing::debug!(vmid = %locator.vmid(), power = ?power, "Unrecognised power state");
    }
    Ok(state)
}
