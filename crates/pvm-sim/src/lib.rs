//! # pvm-sim
//!
//! An in-memory hypervisor cluster that implements the `pvm-api` traits.
//!
//! The simulator keeps a log of every call the driver makes, completes tasks
//! after a configurable number of status polls, and lets tests inject faults
//! per operation: a refused submission, a task that ends in failure, or a
//! task that never finishes.
//!
//! ## Quick Start
//!
//! ```
//! use pvm_sim::{Call, FaultMode, FaultOp, SimCluster};
//! use pvm_api::VmId;
//!
//! let sim = SimCluster::new()
//!     .with_template(VmId::new(9000), "pve")
//!     .with_task_latency(2);
//!
//! // The next "stop" task will end with an error exit status.
//! sim.inject(FaultOp::Stop, FaultMode::FailTask);
//!
//! let control_plane = sim.control_plane();
//! # let _ = control_plane;
//! assert!(sim.calls().is_empty());
//! ```

mod cluster;
mod handles;

pub use cluster::{lease_for, mac_for, Call, FaultMode, FaultOp, GuestNetwork, SimCluster};
