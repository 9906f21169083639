//! Power operations, state and address reporting on an existing VM.

mod common;

use common::{cluster, config, driver, RUNNING_VM, TEMPLATE};
use pvm_api::{AddressFamily, ApiError, IpAddressReport, NetworkInterfaceReport, PowerState};
use pvm_driver::{CoreError, Driver, Operation, VmState};
use pvm_sim::{mac_for, Call, FaultMode, FaultOp, GuestNetwork};

fn attached(sim: &pvm_sim::SimCluster, store: &std::path::Path) -> Driver {
    driver(sim, config(store)).with_vmid(RUNNING_VM)
}

#[tokio::test(start_paused = true)]
async fn test_kill_issues_same_calls_as_stop() {
    let dir = tempfile::tempdir().unwrap();
    let sim = cluster();
    let mut driver = attached(&sim, dir.path());

    driver.stop().await.unwrap();
    let stop_calls = sim.mutating_calls();
    assert_eq!(sim.power_state(RUNNING_VM), Some(PowerState::Stopped));

    sim.clear_calls();
    sim.set_power(RUNNING_VM, PowerState::Running);
    driver.kill().await.unwrap();

    assert_eq!(sim.mutating_calls(), stop_calls);
    assert_eq!(stop_calls, [Call::Stop(RUNNING_VM)]);
}

#[tokio::test(start_paused = true)]
async fn test_start_and_restart() {
    let dir = tempfile::tempdir().unwrap();
    let sim = cluster();
    sim.set_power(RUNNING_VM, PowerState::Stopped);
    let mut driver = attached(&sim, dir.path());

    driver.start().await.unwrap();
    driver.restart().await.unwrap();

    assert_eq!(
        sim.mutating_calls(),
        [Call::Start(RUNNING_VM), Call::Reset(RUNNING_VM)]
    );
    assert_eq!(sim.power_state(RUNNING_VM), Some(PowerState::Running));
}

#[tokio::test(start_paused = true)]
async fn test_remove_stops_then_deletes() {
    let dir = tempfile::tempdir().unwrap();
    let sim = cluster();
    let mut driver = attached(&sim, dir.path());

    driver.remove().await.unwrap();

    assert_eq!(
        sim.mutating_calls(),
        [Call::Stop(RUNNING_VM), Call::Delete(RUNNING_VM)]
    );
    assert!(!sim.vm_exists(RUNNING_VM));
    assert_eq!(sim.vm_ids(), [TEMPLATE]);
}

#[tokio::test(start_paused = true)]
async fn test_failed_stop_prevents_delete() {
    let dir = tempfile::tempdir().unwrap();
    let sim = cluster();
    sim.inject(FaultOp::Stop, FaultMode::FailTask);
    let mut driver = attached(&sim, dir.path());

    let err = driver.remove().await.unwrap_err();

    assert!(matches!(err, CoreError::TaskFailed { .. }));
    assert_eq!(sim.mutating_calls(), [Call::Stop(RUNNING_VM)]);
    assert!(sim.vm_exists(RUNNING_VM));

    sim.clear_faults();
    driver.remove().await.unwrap();
    assert!(!sim.vm_exists(RUNNING_VM));
}

#[tokio::test(start_paused = true)]
async fn test_rejected_stop_surfaces_api_error() {
    let dir = tempfile::tempdir().unwrap();
    let sim = cluster();
    sim.inject(FaultOp::Stop, FaultMode::Reject);
    let mut driver = attached(&sim, dir.path());

    let err = driver.stop().await.unwrap_err();
    assert!(matches!(err, CoreError::Api(ApiError::Rejected(_))));
}

#[tokio::test(start_paused = true)]
async fn test_unknown_operation_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let sim = cluster();
    let mut driver = attached(&sim, dir.path());

    let err = driver.operate_named("pause").await.unwrap_err();

    assert!(matches!(err, CoreError::InvalidOperation(op) if op == "pause"));
    assert!(sim.calls().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_operate_named() {
    let dir = tempfile::tempdir().unwrap();
    let sim = cluster();
    let mut driver = attached(&sim, dir.path());

    driver.operate_named("restart").await.unwrap();
    assert_eq!(sim.mutating_calls(), [Call::Reset(RUNNING_VM)]);
}

#[tokio::test(start_paused = true)]
async fn test_unbound_driver_refuses_operations() {
    let dir = tempfile::tempdir().unwrap();
    let sim = cluster();
    let mut driver = driver(&sim, config(dir.path()));

    assert!(matches!(driver.start().await, Err(CoreError::Unbound)));
    assert!(matches!(driver.state().await, Err(CoreError::Unbound)));
    assert!(sim.calls().is_empty());
    assert!(Operation::Kill.remote_calls() == Operation::Stop.remote_calls());
}

#[tokio::test(start_paused = true)]
async fn test_state_reporting() {
    let dir = tempfile::tempdir().unwrap();
    let sim = cluster();
    let mut driver = attached(&sim, dir.path());

    assert_eq!(driver.state().await.unwrap(), VmState::Running);

    sim.set_power(RUNNING_VM, PowerState::Stopped);
    assert_eq!(driver.state().await.unwrap(), VmState::Stopped);

    sim.set_power(RUNNING_VM, PowerState::Other("paused".into()));
    assert_eq!(driver.state().await.unwrap(), VmState::Unknown);
}

#[tokio::test(start_paused = true)]
async fn test_unreachable_state_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let sim = cluster();
    sim.inject(FaultOp::Ping, FaultMode::Unreachable);
    let mut driver = attached(&sim, dir.path());

    let err = driver.state().await.unwrap_err();
    assert!(matches!(err, CoreError::Api(ApiError::Transport(_))));
}

#[tokio::test(start_paused = true)]
async fn test_unreachable_agent_is_not_retried() {
    let dir = tempfile::tempdir().unwrap();
    let sim = cluster();
    sim.inject(FaultOp::AgentPing, FaultMode::Unreachable);
    let mut driver = attached(&sim, dir.path());
    let started = tokio::time::Instant::now();

    let err = driver.ip().await.unwrap_err();

    assert!(matches!(err, CoreError::Api(ApiError::Transport(_))));
    assert_eq!(started.elapsed(), std::time::Duration::ZERO);
    let pings = sim
        .calls()
        .iter()
        .filter(|c| matches!(c, Call::AgentPing(_)))
        .count();
    assert_eq!(pings, 1);
}

#[tokio::test(start_paused = true)]
async fn test_revoked_session_is_not_refreshed() {
    let dir = tempfile::tempdir().unwrap();
    let sim = cluster();
    let mut driver = attached(&sim, dir.path());

    driver.state().await.unwrap();
    sim.revoke_sessions();

    let err = driver.state().await.unwrap_err();
    assert!(matches!(err, CoreError::Api(ApiError::Auth(_))));
    let logins = |sim: &pvm_sim::SimCluster| {
        sim.calls()
            .iter()
            .filter(|c| matches!(c, Call::Connect { .. }))
            .count()
    };
    assert_eq!(logins(&sim), 1);

    driver.connector_mut().reconnect().await.unwrap();
    assert_eq!(driver.state().await.unwrap(), VmState::Running);
    assert_eq!(logins(&sim), 2);
}

#[tokio::test(start_paused = true)]
async fn test_ip_and_url() {
    let dir = tempfile::tempdir().unwrap();
    let sim = cluster();
    let mut driver = attached(&sim, dir.path());

    assert_eq!(driver.ip().await.unwrap(), "10.0.0.120");
    assert_eq!(driver.url().await.unwrap(), "tcp://10.0.0.120:2376");
    assert_eq!(driver.ssh_hostname().await.unwrap(), "10.0.0.120");
    assert_eq!(driver.ssh_port(), 22);
    assert_eq!(driver.ssh_username(), "docker");
    assert_eq!(driver.ssh_password(), "");
    assert_eq!(driver.driver_name(), "proxmoxve");
    assert_eq!(driver.machine_name(), "worker-1");
    assert_eq!(driver.net_bridge(), "vmbr0");
    assert_eq!(driver.net_vlan_tag(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_stop_clears_cached_ip() {
    let dir = tempfile::tempdir().unwrap();
    let sim = cluster();
    let mut driver = attached(&sim, dir.path());

    driver.ip().await.unwrap();
    assert!(driver.cached_ip().is_some());
    driver.stop().await.unwrap();
    assert_eq!(driver.cached_ip(), None);
}

#[tokio::test(start_paused = true)]
async fn test_blank_address_yields_no_url() {
    let dir = tempfile::tempdir().unwrap();
    let sim = cluster().with_guest_network(GuestNetwork::Custom(vec![NetworkInterfaceReport {
        name: "eth0".into(),
        hardware_address: mac_for(RUNNING_VM).to_lowercase(),
        ip_addresses: vec![IpAddressReport {
            address: String::new(),
            family: AddressFamily::Ipv4,
            prefix: None,
        }],
    }]));
    let mut driver = attached(&sim, dir.path());

    let err = driver.url().await.unwrap_err();
    assert!(matches!(err, CoreError::NoIpAssigned { vmid } if vmid == RUNNING_VM));
    assert_eq!(driver.cached_ip(), None);
}
