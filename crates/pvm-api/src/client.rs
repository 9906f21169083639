//! Client traits implemented by a control-plane transport.

use crate::error::Result;
use crate::types::{
    CloneRequest, ClusterIdentity, Credentials, Endpoint, NetworkInterfaceReport, PowerState,
    TaskStatus, VmConfig, VmId,
};
use async_trait::async_trait;
use std::sync::Arc;

/// Entry point: turns credentials into an authenticated [`Session`].
#[async_trait]
pub trait ControlPlane: Send + Sync {
    /// Log in to the control plane at `endpoint`.
    ///
    /// # Errors
    /// [`ApiError::Transport`](crate::ApiError::Transport) when the host cannot
    /// be reached, [`ApiError::Auth`](crate::ApiError::Auth) when the
    /// credentials are refused.
    async fn connect(
        &self,
        endpoint: &Endpoint,
        credentials: &Credentials,
    ) -> Result<Arc<dyn Session>>;
}

/// An authenticated session.
#[async_trait]
pub trait Session: Send + Sync {
    /// Cluster name and software version.
    async fn cluster_identity(&self) -> Result<ClusterIdentity>;

    /// Look up a hypervisor node by name.
    async fn node(&self, name: &str) -> Result<Arc<dyn Node>>;
}

/// A hypervisor node.
#[async_trait]
pub trait Node: Send + Sync {
    fn name(&self) -> &str;

    /// Fetch a VM on this node. The returned handle carries a snapshot of the
    /// VM's configuration taken at lookup time.
    async fn virtual_machine(&self, id: VmId) -> Result<Arc<dyn VirtualMachine>>;
}

/// A handle to one VM.
#[async_trait]
pub trait VirtualMachine: Send + Sync {
    fn id(&self) -> VmId;

    /// Configuration as it was when this handle was fetched.
    fn config(&self) -> &VmConfig;

    /// Clone this VM (normally a template).
    async fn clone_vm(&self, request: &CloneRequest) -> Result<(VmId, Arc<dyn Task>)>;

    async fn start(&self) -> Result<Arc<dyn Task>>;

    /// Graceful shutdown.
    async fn stop(&self) -> Result<Arc<dyn Task>>;

    /// Hard reset.
    async fn reset(&self) -> Result<Arc<dyn Task>>;

    async fn delete(&self) -> Result<Arc<dyn Task>>;

    /// Grow `disk` to `size` (e.g. `"16G"`). Completes before returning.
    async fn resize_disk(&self, disk: &str, size: &str) -> Result<()>;

    /// Write one configuration key.
    async fn apply_config(&self, key: &str, value: &str) -> Result<Arc<dyn Task>>;

    /// Refresh and return the VM's power state.
    async fn ping(&self) -> Result<PowerState>;

    /// Liveness check of the in-guest agent.
    async fn agent_ping(&self) -> Result<()>;

    /// Network interfaces as reported by the in-guest agent.
    async fn agent_network_interfaces(&self) -> Result<Vec<NetworkInterfaceReport>>;
}

/// A submitted asynchronous operation.
#[async_trait]
pub trait Task: Send + Sync {
    /// Control-plane task identifier.
    fn id(&self) -> &str;

    /// Poll the current status once.
    async fn status(&self) -> Result<TaskStatus>;
}
