//! The orchestrator-facing driver.

use crate::allocator::VmIdAllocator;
use crate::config::DriverConfig;
use crate::connector::Connector;
use crate::credentials::{Ed25519KeyGenerator, KeyGenerator};
use crate::discovery::await_guest_ip;
use crate::error::{CoreError, Result};
use crate::lifecycle::{LifecycleController, Operation};
use crate::locator::VmLocator;
use crate::provisioner::{Provisioner, Stage};
use crate::state::{self, VmState};
use crate::supervisor::TaskSupervisor;
use pvm_api::{ControlPlane, VmId};
use std::sync::Arc;

/// Name under which the orchestrator knows this driver.
pub const DRIVER_NAME: &str = "proxmoxve";

/// Port of the container engine API on provisioned guests.
pub const ENGINE_PORT: u16 = 2376;

/// One driver instance manages exactly one VM.
///
/// Calls are expected to be serialized by the orchestrator; every method
/// that talks to the control plane takes `&mut self`.
pub struct Driver {
    config: DriverConfig,
    connector: Connector,
    supervisor: TaskSupervisor,
    allocator: Option<Box<dyn VmIdAllocator>>,
    key_generator: Box<dyn KeyGenerator>,
    vmid: Option<VmId>,
    ip: Option<String>,
    create_stage: Option<Stage>,
}

impl Driver {
    pub fn new(config: DriverConfig, control_plane: Arc<dyn ControlPlane>) -> Self {
        let connector = Connector::new(control_plane, config.endpoint(), config.credentials());
        Self {
            config,
            connector,
            supervisor: TaskSupervisor::default(),
            allocator: None,
            key_generator: Box::new(Ed25519KeyGenerator),
            vmid: None,
            ip: None,
            create_stage: None,
        }
    }

    pub fn with_key_generator(mut self, generator: impl KeyGenerator + 'static) -> Self {
        self.key_generator = Box::new(generator);
        self
    }

    /// Allocate VMIDs with `allocator` instead of the configured range.
    pub fn with_allocator(mut self, allocator: impl VmIdAllocator + 'static) -> Self {
        self.allocator = Some(Box::new(allocator));
        self
    }

    pub fn with_supervisor(mut self, supervisor: TaskSupervisor) -> Self {
        self.supervisor = supervisor;
        self
    }

    /// Attach to an already created VM.
    pub fn with_vmid(mut self, vmid: VmId) -> Self {
        self.vmid = Some(vmid);
        self
    }

    pub fn driver_name(&self) -> &'static str {
        DRIVER_NAME
    }

    pub fn machine_name(&self) -> &str {
        &self.config.machine_name
    }

    pub fn config(&self) -> &DriverConfig {
        &self.config
    }

    /// VMID this driver is bound to.
    pub fn vmid(&self) -> Option<VmId> {
        self.vmid
    }

    /// Where the last Create got to; `None` before any Create.
    pub fn create_stage(&self) -> Option<Stage> {
        self.create_stage
    }

    pub fn connector(&self) -> &Connector {
        &self.connector
    }

    pub fn connector_mut(&mut self) -> &mut Connector {
        &mut self.connector
    }

    /// Validate the Create options and log in.
    pub async fn pre_create_check(&mut self) -> Result<()> {
        self.config.validate_for_create()?;
        self.connector.session().await?;
        Ok(())
    }

    /// Clone, configure and boot a new VM, then wait for its address.
    ///
    /// The driver is bound to the new VMID as soon as the clone succeeds,
    /// even if a later stage fails, so the caller can still remove it.
    pub async fn create(&mut self) -> Result<()> {
        tracing::info!(machine = %self.config.machine_name, "Creating VM");

        let mut provisioner =
            Provisioner::new(&self.config, &self.supervisor, self.key_generator.as_ref());
        if let Some(allocator) = self.allocator.as_deref() {
            provisioner = provisioner.with_allocator(allocator);
        }

        let result = provisioner.run(&mut self.connector).await;
        self.create_stage = Some(provisioner.stage());
        if let Some(vmid) = provisioner.bound_vmid() {
            self.vmid = Some(vmid);
        }

        match result {
            Ok(ip) => {
                self.ip = Some(ip);
                Ok(())
            }
            Err(e) => {
                tracing::warn!(
                    machine = %self.config.machine_name,
                    stage = %provisioner.stage(),
                    vmid = ?self.vmid,
                    error = %e,
                    "Create failed"
                );
                Err(e)
            }
        }
    }

    async fn locator(&mut self) -> Result<VmLocator> {
        let vmid = self.vmid.ok_or(CoreError::Unbound)?;
        let session = self.connector.session().await?;
        Ok(VmLocator::new(
            session,
            self.config.effective_node().to_string(),
            vmid,
        ))
    }

    /// Run a named lifecycle operation (`start`, `stop`, `restart`, `kill`, `remove`).
    pub async fn operate_named(&mut self, name: &str) -> Result<()> {
        let op: Operation = name.parse()?;
        self.operate(op).await
    }

    pub async fn operate(&mut self, op: Operation) -> Result<()> {
        let locator = self.locator().await?;
        LifecycleController::new(&locator, &self.supervisor)
            .execute(op)
            .await?;
        if op != Operation::Start && op != Operation::Restart {
            self.ip = None;
        }
        Ok(())
    }

    pub async fn start(&mut self) -> Result<()> {
        self.operate(Operation::Start).await
    }

    pub async fn stop(&mut self) -> Result<()> {
        self.operate(Operation::Stop).await
    }

    pub async fn restart(&mut self) -> Result<()> {
        self.operate(Operation::Restart).await
    }

    /// Same graceful shutdown as [`stop`](Self::stop).
    pub async fn kill(&mut self) -> Result<()> {
        self.operate(Operation::Kill).await
    }

    /// Stop, then delete. A failed stop leaves the VM in place.
    pub async fn remove(&mut self) -> Result<()> {
        self.operate(Operation::Remove).await
    }

    /// Current machine state. `Err` means the state is unknown.
    pub async fn state(&mut self) -> Result<VmState> {
        let locator = self.locator().await?;
        state::probe(&locator).await
    }

    /// Address of the guest's primary NIC, asking the guest agent.
    pub async fn ip(&mut self) -> Result<String> {
        let locator = self.locator().await?;
        let ip = await_guest_ip(&locator, &self.supervisor).await?;
        self.ip = Some(ip.clone());
        Ok(ip)
    }

    /// Address found by the last Create or [`ip`](Self::ip) call.
    pub fn cached_ip(&self) -> Option<&str> {
        self.ip.as_deref()
    }

    /// Container engine URL, `tcp://<ip>:2376`.
    ///
    /// Fails with [`CoreError::NoIpAssigned`] rather than returning a URL
    /// without a host.
    pub async fn url(&mut self) -> Result<String> {
        let ip = self.ip().await?;
        Ok(format!("tcp://{ip}:{ENGINE_PORT}"))
    }

    pub async fn ssh_hostname(&mut self) -> Result<String> {
        self.ip().await
    }

    pub fn ssh_port(&self) -> u16 {
        self.config.guest_ssh_port
    }

    pub fn ssh_username(&self) -> &str {
        &self.config.guest_username
    }

    /// Guest password, for orchestrators that log in before keys are usable.
    pub fn ssh_password(&self) -> &str {
        &self.config.guest_password
    }

    pub fn ssh_key_path(&self) -> std::path::PathBuf {
        self.config.ssh_key_path()
    }

    pub fn net_bridge(&self) -> &str {
        &self.config.net_bridge
    }

    pub fn net_vlan_tag(&self) -> u16 {
        self.config.net_vlan_tag
    }
}
