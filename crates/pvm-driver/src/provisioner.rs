//! The Create workflow.
//!
//! ```text
//! Allocate ─▶ Clone ─▶ ResizeDisk ─▶ BaseConfig ─▶ NetworkConfig ─▶ NumaCpu
//!                                                                    │
//!              Ready ◀── AwaitIp ◀── Start ◀── Credentials ◀─────────┘
//! ```
//!
//! Stages run strictly in order. A failing stage ends the workflow where it
//! is; nothing is rolled back, so a partially configured VM stays behind for
//! the caller to inspect, repair or remove.

use crate::allocator::{RangeAllocator, VmIdAllocator};
use crate::batch::ConfigBatch;
use crate::config::DriverConfig;
use crate::connector::Connector;
use crate::credentials::{CredentialInjector, KeyGenerator};
use crate::discovery::await_guest_ip;
use crate::error::Result;
use crate::locator::VmLocator;
use crate::network::NetworkDescriptor;
use crate::supervisor::TaskSupervisor;
use pvm_api::{CloneRequest, VmId};
use std::fmt;

/// Disk that holds the guest's root filesystem.
pub const PRIMARY_DISK: &str = "scsi0";

/// Create workflow stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Stage {
    Allocate,
    Clone,
    ResizeDisk,
    BaseConfig,
    NetworkConfig,
    NumaCpu,
    Credentials,
    Start,
    AwaitIp,
    Ready,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Allocate => "allocate",
            Stage::Clone => "clone",
            Stage::ResizeDisk => "resize-disk",
            Stage::BaseConfig => "base-config",
            Stage::NetworkConfig => "network-config",
            Stage::NumaCpu => "numa-cpu",
            Stage::Credentials => "credentials",
            Stage::Start => "start",
            Stage::AwaitIp => "await-ip",
            Stage::Ready => "ready",
        };
        f.write_str(name)
    }
}

/// What to clone and where.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProvisioningRequest {
    pub template: VmId,
    pub node: String,
    pub pool: String,
    pub storage: String,
    pub format: String,
    pub new_id: VmId,
    pub name: String,
}

impl ProvisioningRequest {
    pub fn from_config(config: &DriverConfig, template: VmId, new_id: VmId) -> Self {
        Self {
            template,
            node: config.effective_node().to_string(),
            pool: config.pool.clone(),
            storage: config.storage.clone(),
            format: config.storage_type.clone(),
            new_id,
            name: config.machine_name.clone(),
        }
    }

    /// Always a full clone.
    pub fn clone_request(&self) -> CloneRequest {
        CloneRequest {
            new_id: self.new_id,
            name: self.name.clone(),
            full: true,
            pool: self.pool.clone(),
            storage: self.storage.clone(),
            format: self.format.clone(),
        }
    }
}

/// Settings written right after the disk resize.
pub fn base_config(config: &DriverConfig) -> ConfigBatch {
    ConfigBatch::new()
        .set("agent", "1")
        .set("autostart", "1")
        .set("memory", config.memory_mib().to_string())
        .set_if_present("sockets", config.cpu_sockets.as_str())
        .set_if_present("cores", config.cpu_cores.as_str())
        .set("kvm", "1")
        .set_if_present("citype", config.citype.as_str())
        .set_if_present("onboot", config.onboot.as_str())
        .set_if_present("protection", config.protection.as_str())
}

/// The `net0` rewrite; empty unless a bridge is configured.
pub fn network_config(config: &DriverConfig) -> ConfigBatch {
    if config.net_bridge.is_empty() {
        return ConfigBatch::new();
    }
    ConfigBatch::new().set("net0", NetworkDescriptor::from_config(config).build())
}

/// NUMA and CPU model overrides, each only when configured.
pub fn numa_cpu_config(config: &DriverConfig) -> ConfigBatch {
    ConfigBatch::new()
        .set_if_present("numa", config.numa.as_str())
        .set_if_present("cpu", config.cpu.as_str())
}

/// Drives one Create.
pub struct Provisioner<'a> {
    config: &'a DriverConfig,
    supervisor: &'a TaskSupervisor,
    allocator: Option<&'a dyn VmIdAllocator>,
    key_generator: &'a dyn KeyGenerator,
    stage: Stage,
    bound: Option<VmId>,
}

impl<'a> Provisioner<'a> {
    pub fn new(
        config: &'a DriverConfig,
        supervisor: &'a TaskSupervisor,
        key_generator: &'a dyn KeyGenerator,
    ) -> Self {
        Self {
            config,
            supervisor,
            allocator: None,
            key_generator,
            stage: Stage::Allocate,
            bound: None,
        }
    }

    /// Use `allocator` instead of the configured VMID range.
    pub fn with_allocator(mut self, allocator: &'a dyn VmIdAllocator) -> Self {
        self.allocator = Some(allocator);
        self
    }

    /// The stage that is running, or the one that failed.
    pub fn stage(&self) -> Stage {
        self.stage
    }

    /// VMID of the clone, once the clone task has succeeded.
    pub fn bound_vmid(&self) -> Option<VmId> {
        self.bound
    }

    fn enter(&mut self, stage: Stage) {
        tracing::debug!(stage = %stage, vmid = ?self.bound, "Entering create stage");
        self.stage = stage;
    }

    /// Run the workflow to completion and return the guest's IPv4 address.
    pub async fn run(&mut self, connector: &mut Connector) -> Result<String> {
        self.enter(Stage::Allocate);
        let new_id = match self.allocator {
            Some(allocator) => allocator.allocate()?,
            None => RangeAllocator::parse(&self.config.vmid_range)?.allocate()?,
        };
        let template = self.config.template_vmid()?;

        self.enter(Stage::Clone);
        let session = connector.session().await?;
        let request = ProvisioningRequest::from_config(self.config, template, new_id);
        tracing::debug!(template = %template, vmid = %new_id, node = %request.node, "Cloning template");

        let node = session.node(&request.node).await?;
        let template_vm = node.virtual_machine(template).await?;
        let (new_id, task) = template_vm.clone_vm(&request.clone_request()).await?;
        self.supervisor.wait(task.as_ref()).await?;
        self.bound = Some(new_id);
        tracing::info!(template = %template, vmid = %new_id, name = %request.name, "VM cloned");

        let locator = VmLocator::new(session, request.node.clone(), new_id);

        self.enter(Stage::ResizeDisk);
        let size = self.config.disk_size();
        locator.fetch().await?.resize_disk(PRIMARY_DISK, &size).await?;
        tracing::debug!(vmid = %new_id, disk = PRIMARY_DISK, size = %size, "Disk resized");

        self.enter(Stage::BaseConfig);
        base_config(self.config).apply(&locator, self.supervisor).await?;

        self.enter(Stage::NetworkConfig);
        network_config(self.config).apply(&locator, self.supervisor).await?;

        self.enter(Stage::NumaCpu);
        numa_cpu_config(self.config).apply(&locator, self.supervisor).await?;

        self.enter(Stage::Credentials);
        let key_path = self.config.ssh_key_path();
        CredentialInjector::new(self.key_generator, &key_path, &self.config.machine_name)
            .inject(&locator, self.supervisor)
            .await?;

        self.enter(Stage::Start);
        let vm = locator.fetch().await?;
        self.supervisor.run("start", vm.start()).await?;
        tracing::info!(vmid = %new_id, "VM started");

        self.enter(Stage::AwaitIp);
        let ip = await_guest_ip(&locator, self.supervisor).await?;

        self.enter(Stage::Ready);
        tracing::info!(vmid = %new_id, ip = %ip, "VM ready");
        Ok(ip)
    }
}
