use crate::error::Result;
use pvm_api::{Session, VirtualMachine, VmId};
use std::sync::Arc;

/// Where a VM lives. Handles are re-derived on every [`fetch`](Self::fetch)
/// so each step observes the VM's current configuration.
#[derive(Clone)]
pub struct VmLocator {
    session: Arc<dyn Session>,
    node: String,
    vmid: VmId,
}

impl VmLocator {
    pub fn new(session: Arc<dyn Session>, node: impl Into<String>, vmid: VmId) -> Self {
        Self {
            session,
            node: node.into(),
            vmid,
        }
    }

    pub fn vmid(&self) -> VmId {
        self.vmid
    }

    pub fn node(&self) -> &str {
        &self.node
    }

    /// Look the VM up again.
    pub async fn fetch(&self) -> Result<Arc<dyn VirtualMachine>> {
        let node = self.session.node(&self.node).await?;
        Ok(node.virtual_machine(self.vmid).await?)
    }
}
