//! Simulated cluster state and the test-facing control surface.

use crate::handles::SimControlPlane;
use pvm_api::{
    AddressFamily, ApiError, CloneRequest, ControlPlane, Credentials, IpAddressReport,
    NetworkInterfaceReport, PowerState, TaskStatus, VmConfig, VmId,
};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};
use uuid::Uuid;

pub(crate) type Shared = Arc<Mutex<ClusterState>>;

pub(crate) fn lock(shared: &Shared) -> MutexGuard<'_, ClusterState> {
    shared.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// A call the driver made against the simulated cluster.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Connect { principal: String },
    ClusterIdentity,
    Node(String),
    Lookup(VmId),
    Clone { template: VmId, request: CloneRequest },
    Start(VmId),
    Stop(VmId),
    Reset(VmId),
    Delete(VmId),
    ResizeDisk { vm: VmId, disk: String, size: String },
    ApplyConfig { vm: VmId, key: String, value: String },
    Ping(VmId),
    AgentPing(VmId),
    AgentInterfaces(VmId),
}

impl Call {
    /// Calls that change cluster state.
    pub fn is_mutation(&self) -> bool {
        matches!(
            self,
            Call::Clone { .. }
                | Call::Start(_)
                | Call::Stop(_)
                | Call::Reset(_)
                | Call::Delete(_)
                | Call::ResizeDisk { .. }
                | Call::ApplyConfig { .. }
        )
    }
}

/// Operation a fault can be attached to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum FaultOp {
    Clone,
    Start,
    Stop,
    Reset,
    Delete,
    ResizeDisk,
    /// A configuration write of the given key.
    ApplyConfig(String),
    Ping,
    AgentPing,
    AgentInterfaces,
}

/// How an operation misbehaves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultMode {
    /// The submission itself is refused.
    Reject,
    /// The call fails with a transport error.
    Unreachable,
    /// The task is accepted and later stops with an error exit status.
    FailTask,
    /// The task is accepted and never reaches a terminal state.
    HangTask,
}

/// What the guest agent reports once a cloned VM is running.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GuestNetwork {
    /// Loopback plus one NIC carrying the VM's MAC with an IPv4 lease.
    Dhcp,
    /// The VM's NIC only carries link-local IPv6.
    Ipv6Only,
    /// A NIC whose MAC does not belong to the VM.
    Unmatched,
    /// Exactly these interfaces.
    Custom(Vec<NetworkInterfaceReport>),
}

#[derive(Debug)]
pub(crate) struct VmRecord {
    pub(crate) node: String,
    pub(crate) config: BTreeMap<String, String>,
    pub(crate) power: PowerState,
    /// Agent pings left before the agent answers; `None` while not booted or never.
    pub(crate) agent_polls_left: Option<u32>,
}

impl VmRecord {
    pub(crate) fn snapshot(&self) -> VmConfig {
        VmConfig {
            net0: self.config.get("net0").cloned().unwrap_or_default(),
            sshkeys: self.config.get("sshkeys").cloned().unwrap_or_default(),
        }
    }
}

#[derive(Debug)]
enum TaskOutcome {
    Succeed,
    Fail(String),
    Hang,
}

#[derive(Debug)]
pub(crate) enum Effect {
    Clone {
        node: String,
        template: VmId,
        request: CloneRequest,
    },
    Power { vm: VmId, state: PowerState },
    Delete(VmId),
    Config { vm: VmId, key: String, value: String },
}

#[derive(Debug)]
struct TaskRecord {
    polls_left: u32,
    outcome: TaskOutcome,
    effect: Option<Effect>,
    finished: Option<TaskStatus>,
}

#[derive(Debug)]
pub(crate) struct ClusterState {
    pub(crate) name: String,
    pub(crate) version: String,
    pub(crate) credentials: Credentials,
    pub(crate) reachable: bool,
    pub(crate) session_generation: u64,
    pub(crate) nodes: BTreeSet<String>,
    pub(crate) vms: BTreeMap<VmId, VmRecord>,
    tasks: HashMap<String, TaskRecord>,
    pub(crate) faults: HashMap<FaultOp, FaultMode>,
    pub(crate) calls: Vec<Call>,
    task_latency: u32,
    guest_network: GuestNetwork,
    agent_boot_polls: Option<u32>,
}

impl ClusterState {
    pub(crate) fn record(&mut self, call: Call) {
        tracing::trace!(?call, "sim call");
        self.calls.push(call);
    }

    /// Apply a fault that acts on the call itself rather than on a task.
    pub(crate) fn check_fault(&self, op: &FaultOp, what: &str) -> Result<(), ApiError> {
        match self.faults.get(op) {
            Some(FaultMode::Reject) => Err(ApiError::Rejected(format!("{what} refused"))),
            Some(FaultMode::Unreachable) => {
                Err(ApiError::Transport(format!("{what}: connection reset")))
            }
            _ => Ok(()),
        }
    }

    /// Register a task for `op`, honouring any injected fault.
    pub(crate) fn submit(
        &mut self,
        op: FaultOp,
        node: &str,
        vm: VmId,
        kind: &str,
        effect: Effect,
    ) -> Result<String, ApiError> {
        self.check_fault(&op, &format!("{kind} of VM {vm}"))?;
        let outcome = match self.faults.get(&op) {
            Some(FaultMode::FailTask) => TaskOutcome::Fail(format!("{kind} failed: simulated")),
            Some(FaultMode::HangTask) => TaskOutcome::Hang,
            _ => TaskOutcome::Succeed,
        };

        let id = format!(
            "UPID:{node}:{}:{kind}:{vm}:{}:",
            Uuid::new_v4().simple(),
            self.credentials.principal()
        );
        self.tasks.insert(
            id.clone(),
            TaskRecord {
                polls_left: self.task_latency,
                outcome,
                effect: Some(effect),
                finished: None,
            },
        );
        Ok(id)
    }

    pub(crate) fn poll_task(&mut self, id: &str) -> Result<TaskStatus, ApiError> {
        let task = self
            .tasks
            .get_mut(id)
            .ok_or_else(|| ApiError::NotFound(format!("task {id}")))?;

        if let Some(status) = &task.finished {
            return Ok(status.clone());
        }

        let (status, effect) = match &task.outcome {
            TaskOutcome::Hang => return Ok(TaskStatus::Running),
            _ if task.polls_left > 0 => {
                task.polls_left -= 1;
                return Ok(TaskStatus::Running);
            }
            TaskOutcome::Succeed => (
                TaskStatus::Stopped {
                    exit_status: "OK".into(),
                },
                task.effect.take(),
            ),
            TaskOutcome::Fail(message) => (
                TaskStatus::Stopped {
                    exit_status: message.clone(),
                },
                None,
            ),
        };
        task.finished = Some(status.clone());

        if let Some(effect) = effect {
            self.apply(effect);
        }
        Ok(status)
    }

    fn apply(&mut self, effect: Effect) {
        match effect {
            Effect::Clone {
                node,
                template,
                request,
            } => {
                let mut config = self
                    .vms
                    .get(&template)
                    .map(|t| t.config.clone())
                    .unwrap_or_default();
                config.remove("template");
                config.insert("name".into(), request.name.clone());
                let net0 = config.get("net0").cloned().unwrap_or_default();
                config.insert("net0".into(), with_mac(&net0, &mac_for(request.new_id)));
                self.vms.insert(
                    request.new_id,
                    VmRecord {
                        node,
                        config,
                        power: PowerState::Stopped,
                        agent_polls_left: None,
                    },
                );
            }
            Effect::Power { vm, state } => {
                let boot_polls = self.agent_boot_polls;
                if let Some(record) = self.vms.get_mut(&vm) {
                    record.agent_polls_left = if state.is_running() {
                        boot_polls
                    } else {
                        None
                    };
                    record.power = state;
                }
            }
            Effect::Delete(vm) => {
                self.vms.remove(&vm);
            }
            Effect::Config { vm, key, value } => {
                if let Some(record) = self.vms.get_mut(&vm) {
                    let value = if key == "net0" {
                        let current = record.config.get("net0").cloned().unwrap_or_default();
                        let mac = mac_in(&current).unwrap_or_else(|| mac_for(vm));
                        with_mac(&value, &mac)
                    } else {
                        value
                    };
                    record.config.insert(key, value);
                }
            }
        }
    }

    pub(crate) fn agent_ping(&mut self, vm: VmId) -> Result<(), ApiError> {
        let record = self
            .vms
            .get_mut(&vm)
            .ok_or_else(|| ApiError::NotFound(format!("VM {vm}")))?;
        if !record.power.is_running() {
            return Err(ApiError::Agent(format!("VM {vm} is not running")));
        }
        match record.agent_polls_left {
            Some(0) => Ok(()),
            Some(n) => {
                record.agent_polls_left = Some(n - 1);
                Err(ApiError::Agent("QEMU guest agent is not running".into()))
            }
            None => Err(ApiError::Agent("QEMU guest agent is not running".into())),
        }
    }

    pub(crate) fn agent_interfaces(
        &self,
        vm: VmId,
    ) -> Result<Vec<NetworkInterfaceReport>, ApiError> {
        let record = self
            .vms
            .get(&vm)
            .ok_or_else(|| ApiError::NotFound(format!("VM {vm}")))?;
        if record.agent_polls_left != Some(0) {
            return Err(ApiError::Agent("QEMU guest agent is not running".into()));
        }

        let mac = record
            .config
            .get("net0")
            .and_then(|n| mac_in(n))
            .unwrap_or_else(|| mac_for(vm))
            .to_lowercase();

        let loopback = NetworkInterfaceReport {
            name: "lo".into(),
            hardware_address: "00:00:00:00:00:00".into(),
            ip_addresses: vec![ip("127.0.0.1", AddressFamily::Ipv4, 8)],
        };
        let link_local = ip("fe80::be24:11ff:fe00:1", AddressFamily::Ipv6, 64);

        Ok(match &self.guest_network {
            GuestNetwork::Dhcp => vec![
                loopback,
                NetworkInterfaceReport {
                    name: "eth0".into(),
                    hardware_address: mac,
                    ip_addresses: vec![link_local, ip(&lease_for(vm), AddressFamily::Ipv4, 24)],
                },
            ],
            GuestNetwork::Ipv6Only => vec![
                loopback,
                NetworkInterfaceReport {
                    name: "eth0".into(),
                    hardware_address: mac,
                    ip_addresses: vec![link_local],
                },
            ],
            GuestNetwork::Unmatched => vec![
                loopback,
                NetworkInterfaceReport {
                    name: "eth0".into(),
                    hardware_address: "de:ad:be:ef:00:01".into(),
                    ip_addresses: vec![ip(&lease_for(vm), AddressFamily::Ipv4, 24)],
                },
            ],
            GuestNetwork::Custom(ifaces) => ifaces.clone(),
        })
    }
}

fn ip(address: &str, family: AddressFamily, prefix: u8) -> IpAddressReport {
    IpAddressReport {
        address: address.into(),
        family,
        prefix: Some(prefix),
    }
}

/// Deterministic MAC for a VM id.
pub fn mac_for(vm: VmId) -> String {
    let id = vm.get();
    format!(
        "BC:24:11:{:02X}:{:02X}:{:02X}",
        (id >> 16) & 0xff,
        (id >> 8) & 0xff,
        id & 0xff
    )
}

/// Deterministic IPv4 lease for a VM id.
pub fn lease_for(vm: VmId) -> String {
    let id = vm.get();
    format!("10.{}.{}.{}", (id >> 16) & 0xff, (id >> 8) & 0xff, id & 0xff)
}

/// MAC embedded in a stored descriptor such as `virtio=BC:24:11:00:00:96,bridge=vmbr0`.
fn mac_in(net0: &str) -> Option<String> {
    let first = net0.split(',').next()?;
    let (_, value) = first.split_once('=')?;
    (value.len() == 17 && value.matches(':').count() == 5).then(|| value.to_string())
}

/// Rewrite a descriptor into the stored `<model>=<mac>,...` form.
fn with_mac(net0: &str, mac: &str) -> String {
    let mut parts = net0.split(',');
    let first = parts.next().unwrap_or_default();
    let model = match first.split_once('=') {
        Some(("model", model)) => model,
        Some((model, _)) => model,
        None => "virtio",
    };
    let rest: Vec<&str> = parts.collect();
    if rest.is_empty() {
        format!("{model}={mac}")
    } else {
        format!("{model}={mac},{}", rest.join(","))
    }
}

/// Handle to a simulated cluster.
///
/// Cloning the handle shares the same cluster.
#[derive(Debug, Clone)]
pub struct SimCluster {
    shared: Shared,
}

impl Default for SimCluster {
    fn default() -> Self {
        Self::new()
    }
}

impl SimCluster {
    /// A reachable cluster with one node `pve`, user `root@pam` / `secret`,
    /// tasks finishing on their second poll and the guest agent answering on
    /// its second ping.
    pub fn new() -> Self {
        let state = ClusterState {
            name: "sim-cluster".into(),
            version: "8.2.4".into(),
            credentials: Credentials {
                username: "root".into(),
                password: "secret".into(),
                realm: "pam".into(),
            },
            reachable: true,
            session_generation: 0,
            nodes: BTreeSet::from(["pve".to_string()]),
            vms: BTreeMap::new(),
            tasks: HashMap::new(),
            faults: HashMap::new(),
            calls: Vec::new(),
            task_latency: 1,
            guest_network: GuestNetwork::Dhcp,
            agent_boot_polls: Some(1),
        };
        Self {
            shared: Arc::new(Mutex::new(state)),
        }
    }

    /// Accept only these credentials.
    pub fn with_credentials(self, username: &str, password: &str, realm: &str) -> Self {
        lock(&self.shared).credentials = Credentials {
            username: username.into(),
            password: password.into(),
            realm: realm.into(),
        };
        self
    }

    pub fn with_identity(self, name: &str, version: &str) -> Self {
        {
            let mut state = lock(&self.shared);
            state.name = name.into();
            state.version = version.into();
        }
        self
    }

    pub fn with_node(self, name: &str) -> Self {
        lock(&self.shared).nodes.insert(name.into());
        self
    }

    /// Add a stopped template VM on `node` with a virtio NIC on `vmbr0`.
    pub fn with_template(self, id: VmId, node: &str) -> Self {
        {
            let mut state = lock(&self.shared);
            state.nodes.insert(node.into());
            let config = BTreeMap::from([
                ("name".to_string(), format!("template-{id}")),
                ("template".to_string(), "1".to_string()),
                ("net0".to_string(), format!("virtio={},bridge=vmbr0", mac_for(id))),
            ]);
            state.vms.insert(
                id,
                VmRecord {
                    node: node.into(),
                    config,
                    power: PowerState::Stopped,
                    agent_polls_left: None,
                },
            );
        }
        self
    }

    /// Add a running VM on `node` whose guest agent already answers.
    pub fn with_running_vm(self, id: VmId, node: &str) -> Self {
        {
            let mut state = lock(&self.shared);
            state.nodes.insert(node.into());
            let config = BTreeMap::from([
                ("name".to_string(), format!("vm-{id}")),
                ("net0".to_string(), format!("virtio={},bridge=vmbr0", mac_for(id))),
            ]);
            state.vms.insert(
                id,
                VmRecord {
                    node: node.into(),
                    config,
                    power: PowerState::Running,
                    agent_polls_left: Some(0),
                },
            );
        }
        self
    }

    /// Set a configuration key on an existing VM without recording a call.
    pub fn with_vm_config(self, id: VmId, key: &str, value: &str) -> Self {
        if let Some(record) = lock(&self.shared).vms.get_mut(&id) {
            record.config.insert(key.into(), value.into());
        }
        self
    }

    /// Number of `Running` polls a task reports before finishing.
    pub fn with_task_latency(self, polls: u32) -> Self {
        lock(&self.shared).task_latency = polls;
        self
    }

    pub fn with_guest_network(self, network: GuestNetwork) -> Self {
        lock(&self.shared).guest_network = network;
        self
    }

    /// Failed agent pings after power-on before the agent answers.
    /// `None` means the agent never comes up.
    pub fn with_agent_boot_polls(self, polls: Option<u32>) -> Self {
        lock(&self.shared).agent_boot_polls = polls;
        self
    }

    /// The control-plane entry point to hand to the driver.
    pub fn control_plane(&self) -> Arc<dyn ControlPlane> {
        Arc::new(SimControlPlane::new(self.shared.clone()))
    }

    /// Make `op` misbehave until [`clear_faults`](Self::clear_faults).
    pub fn inject(&self, op: FaultOp, mode: FaultMode) {
        lock(&self.shared).faults.insert(op, mode);
    }

    pub fn clear_faults(&self) {
        lock(&self.shared).faults.clear();
    }

    /// Simulate the host going away (or coming back).
    pub fn set_reachable(&self, reachable: bool) {
        lock(&self.shared).reachable = reachable;
    }

    /// Invalidate every session handed out so far.
    pub fn revoke_sessions(&self) {
        lock(&self.shared).session_generation += 1;
    }

    pub fn set_power(&self, id: VmId, power: PowerState) {
        if let Some(record) = lock(&self.shared).vms.get_mut(&id) {
            record.power = power;
        }
    }

    pub fn calls(&self) -> Vec<Call> {
        lock(&self.shared).calls.clone()
    }

    /// Only the calls that change cluster state, in order.
    pub fn mutating_calls(&self) -> Vec<Call> {
        lock(&self.shared)
            .calls
            .iter()
            .filter(|c| c.is_mutation())
            .cloned()
            .collect()
    }

    pub fn clear_calls(&self) {
        lock(&self.shared).calls.clear();
    }

    /// Total task status polls served.
    pub fn vm_exists(&self, id: VmId) -> bool {
        lock(&self.shared).vms.contains_key(&id)
    }

    pub fn power_state(&self, id: VmId) -> Option<PowerState> {
        lock(&self.shared).vms.get(&id).map(|r| r.power.clone())
    }

    pub fn config_value(&self, id: VmId, key: &str) -> Option<String> {
        lock(&self.shared)
            .vms
            .get(&id)
            .and_then(|r| r.config.get(key).cloned())
    }

    /// Identifiers of every VM, templates included.
    pub fn vm_ids(&self) -> Vec<VmId> {
        lock(&self.shared).vms.keys().copied().collect()
    }
}
