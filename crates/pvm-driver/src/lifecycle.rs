//! Power and removal operations.
//!
//! Each orchestrator-level operation maps to an ordered list of remote calls
//! in a single table. The calls run one after another, each supervised to
//! completion, and the sequence stops at the first failure.

use crate::error::{CoreError, Result};
use crate::locator::VmLocator;
use crate::supervisor::TaskSupervisor;
use std::fmt;
use std::str::FromStr;

/// Operations the orchestrator can request on an existing VM.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Start,
    Stop,
    Restart,
    Kill,
    Remove,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Start => "start",
            Operation::Stop => "stop",
            Operation::Restart => "restart",
            Operation::Kill => "kill",
            Operation::Remove => "remove",
        }
    }

    /// Remote calls that implement this operation, in order.
    ///
    /// `Kill` issues the same graceful shutdown as `Stop`.
    pub fn remote_calls(&self) -> &'static [RemoteCall] {
        match self {
            Operation::Start => &[RemoteCall::PowerOn],
            Operation::Stop => &[RemoteCall::GracefulStop],
            Operation::Restart => &[RemoteCall::Reset],
            Operation::Kill => &[RemoteCall::GracefulStop],
            Operation::Remove => &[RemoteCall::GracefulStop, RemoteCall::Delete],
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Operation {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "start" => Ok(Operation::Start),
            "stop" => Ok(Operation::Stop),
            "restart" => Ok(Operation::Restart),
            "kill" => Ok(Operation::Kill),
            "remove" => Ok(Operation::Remove),
            other => Err(CoreError::InvalidOperation(other.to_string())),
        }
    }
}

/// A single state-changing call against the control plane.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteCall {
    PowerOn,
    GracefulStop,
    Reset,
    Delete,
}

impl RemoteCall {
    pub fn as_str(&self) -> &'static str {
        match self {
            RemoteCall::PowerOn => "start",
            RemoteCall::GracefulStop => "shutdown",
            RemoteCall::Reset => "reset",
            RemoteCall::Delete => "delete",
        }
    }
}

/// Runs [`Operation`]s against one VM.
pub struct LifecycleController<'a> {
    locator: &'a VmLocator,
    supervisor: &'a TaskSupervisor,
}

impl<'a> LifecycleController<'a> {
    pub fn new(locator: &'a VmLocator, supervisor: &'a TaskSupervisor) -> Self {
        Self {
            locator,
            supervisor,
        }
    }

    pub async fn execute(&self, op: Operation) -> Result<()> {
        tracing::info!(vmid = %self.locator.vmid(), operation = %op, "Executing operation");
        for call in op.remote_calls() {
            self.call(*call).await.inspect_err(|e| {
                tracing::warn!(
                    vmid = %self.locator.vmid(),
                    operation = %op,
                    call = call.as_str(),
                    error = %e,
                    "Operation aborted"
                );
            })?;
        }
        Ok(())
    }

    async fn call(&self, call: RemoteCall) -> Result<()> {
        let vm = self.locator.fetch().await?;
        let label = call.as_str();
        match call {
            RemoteCall::PowerOn => self.supervisor.run(label, vm.start()).await,
            RemoteCall::GracefulStop => self.supervisor.run(label, vm.stop()).await,
            RemoteCall::Reset => self.supervisor.run(label, vm.reset()).await,
            RemoteCall::Delete => self.supervisor.run(label, vm.delete()).await,
        }
    }
}
