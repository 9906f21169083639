//! Shared fixtures for driver tests against the simulated cluster.

#![allow(dead_code)]

use async_trait::async_trait;
use pvm_api::VmId;
use pvm_driver::{Driver, DriverConfig, FixedAllocator, KeyGenerator};
use pvm_sim::SimCluster;
use std::path::Path;

pub const TEMPLATE: VmId = VmId::new(9000);
pub const NEW_VM: VmId = VmId::new(150);
pub const RUNNING_VM: VmId = VmId::new(120);

pub const TEST_PUBLIC_KEY: &str = "ssh-ed25519 AAAAC3NzaC1lZDI1NTE5AAAAIFakeKeyForTests+x/y=";

/// Writes a fixed key pair instead of generating one.
pub struct FakeKeys;

#[async_trait]
impl KeyGenerator for FakeKeys {
    async fn generate(&self, path: &Path) -> pvm_driver::Result<()> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(path, "private").await?;
        tokio::fs::write(format!("{}.pub", path.display()), format!("{TEST_PUBLIC_KEY}\n"))
            .await?;
        Ok(())
    }
}

/// Create options matching [`cluster`].
pub fn config(store: &Path) -> DriverConfig {
    let mut config = DriverConfig::new("worker-1", store);
    config.host = "pve".into();
    config.password = "secret".into();
    config.vmid_range = "150:151".into();
    config.clone_vmid = TEMPLATE.to_string();
    config.net_bridge = "vmbr0".into();
    config
}

/// A cluster with template 9000 and running VM 120 on node `pve`.
pub fn cluster() -> SimCluster {
    SimCluster::new()
        .with_template(TEMPLATE, "pve")
        .with_running_vm(RUNNING_VM, "pve")
}

pub fn driver(sim: &SimCluster, config: DriverConfig) -> Driver {
    Driver::new(config, sim.control_plane())
        .with_key_generator(FakeKeys)
        .with_allocator(FixedAllocator(NEW_VM))
}
