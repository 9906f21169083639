//! # pvm-driver
//!
//! Provisioning driver for VMs on a hypervisor cluster.
//!
//! The driver clones a template into a new VM, configures it, injects SSH
//! credentials, boots it and reports the address its guest agent sees. After
//! creation it runs power operations and reports state for the orchestrator.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────┐
//! │                          Driver                               │
//! │  create() ──▶ Provisioner                                     │
//! │                 ├ VmIdAllocator   (random VMID in range)      │
//! │                 ├ Connector       (memoized session)          │
//! │                 ├ ConfigBatch     (one task per write)        │
//! │                 ├ CredentialInjector                          │
//! │                 └ discovery       (guest agent ▶ IPv4)        │
//! │  start/stop/restart/kill/remove ──▶ LifecycleController       │
//! │  state() ──▶ state::probe                                     │
//! │                                                               │
//! │  every mutation ──▶ TaskSupervisor (5s poll, 300s timeout)    │
//! └───────────────────────────────────────────────────────────────┘
//!                               │ pvm-api traits
//!                               ▼
//!                ControlPlane ─▶ Session ─▶ Node ─▶ VirtualMachine
//! ```
//!
//! ## Quick Start
//!
//! ```ignore
//! use pvm_driver::{Driver, DriverConfig};
//!
//! # async fn example(control_plane: std::sync::Arc<dyn pvm_api::ControlPlane>) -> pvm_driver::Result<()> {
//! let config = DriverConfig::from_env("worker-1", "/var/lib/pvm");
//! let mut driver = Driver::new(config, control_plane);
//!
//! driver.pre_create_check().await?;
//! driver.create().await?;
//! println!("engine at {}", driver.url().await?);
//!
//! driver.remove().await?;
//! # Ok(())
//! # }
//! ```

mod allocator;
mod batch;
mod config;
mod connector;
mod credentials;
mod discovery;
mod driver;
mod error;
mod lifecycle;
mod locator;
mod network;
mod provisioner;
mod state;
mod supervisor;

pub use allocator::{FixedAllocator, RangeAllocator, VmIdAllocator};
pub use batch::ConfigBatch;
pub use config::DriverConfig;
pub use connector::Connector;
pub use credentials::{
    decode_key_blob, encode_key_blob, merge_keys, read_public_key, tag_key, CredentialInjector,
    Ed25519KeyGenerator, KeyGenerator,
};
pub use discovery::{await_guest_ip, select_address};
pub use driver::{Driver, DRIVER_NAME, ENGINE_PORT};
pub use error::{ConnectionFailure, CoreError, Result};
pub use lifecycle::{LifecycleController, Operation, RemoteCall};
pub use locator::VmLocator;
pub use network::NetworkDescriptor;
pub use provisioner::{
    base_config, network_config, numa_cpu_config, Provisioner, ProvisioningRequest, Stage,
    PRIMARY_DISK,
};
pub use state::{probe as probe_state, VmState};
pub use supervisor::{
    TaskSupervisor, AGENT_POLL_INTERVAL, AGENT_TIMEOUT, TASK_POLL_INTERVAL, TASK_TIMEOUT,
};
