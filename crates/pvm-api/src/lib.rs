//! # pvm-api
//!
//! Control-plane client contract for the pvm provisioning driver.
//!
//! The driver never talks HTTP itself. Everything it needs from the
//! hypervisor cluster is expressed by the traits in this crate:
//!
//! ```text
//! ControlPlane::connect ──▶ Session ──▶ Node ──▶ VirtualMachine ──▶ Task
//!                           │                     │
//!                           └ cluster_identity()  ├ clone_vm / start / stop / reset / delete
//!                                                 ├ apply_config / resize_disk
//!                                                 ├ ping (power state)
//!                                                 └ agent_ping / agent_network_interfaces
//! ```
//!
//! A transport crate (REST client, simulator, ...) implements these traits
//! and hands an `Arc<dyn ControlPlane>` to the driver.
//!
//! ## Features
//!
//! - **Object-safe async traits**: every handle is an `Arc<dyn ...>`
//! - **Snapshot handles**: a [`VirtualMachine`] carries the configuration read
//!   when it was looked up; callers re-fetch it to observe changes
//! - **Guest agent reports**: [`NetworkInterfaceReport`] deserialises the
//!   agent's `network-get-interfaces` JSON shape

mod client;
mod error;
mod types;

pub use client::{ControlPlane, Node, Session, Task, VirtualMachine};
pub use error::{ApiError, Result};
pub use types::{
    AddressFamily, CloneRequest, ClusterIdentity, Credentials, Endpoint, IpAddressReport,
    NetworkInterfaceReport, PowerState, TaskStatus, VmConfig, VmId,
};
