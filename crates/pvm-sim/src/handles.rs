//! `pvm-api` trait implementations over the shared cluster state.

use crate::cluster::{lock, Call, ClusterState, Effect, FaultOp, Shared};
use async_trait::async_trait;
use pvm_api::{
    ApiError, CloneRequest, ClusterIdentity, ControlPlane, Credentials, Endpoint,
    NetworkInterfaceReport, Node, PowerState, Result, Session, Task, TaskStatus, VirtualMachine,
    VmConfig, VmId,
};
use std::sync::{Arc, MutexGuard};

/// Lock the cluster on behalf of a session of the given generation.
fn guard(shared: &Shared, generation: u64) -> Result<MutexGuard<'_, ClusterState>> {
    let state = lock(shared);
    if !state.reachable {
        return Err(ApiError::Transport("no route to host".into()));
    }
    if state.session_generation != generation {
        return Err(ApiError::Auth("authentication ticket expired".into()));
    }
    Ok(state)
}

pub(crate) struct SimControlPlane {
    shared: Shared,
}

impl SimControlPlane {
    pub(crate) fn new(shared: Shared) -> Self {
        Self { shared }
    }
}

#[async_trait]
impl ControlPlane for SimControlPlane {
    async fn connect(
        &self,
        endpoint: &Endpoint,
        credentials: &Credentials,
    ) -> Result<Arc<dyn Session>> {
        let mut state = lock(&self.shared);
        if !state.reachable {
            return Err(ApiError::Transport(format!(
                "connect to {} failed: no route to host",
                endpoint.api_url()
            )));
        }
        state.record(Call::Connect {
            principal: credentials.principal(),
        });
        if *credentials != state.credentials {
            return Err(ApiError::Auth(format!(
                "authentication failure for {}",
                credentials.principal()
            )));
        }
        tracing::debug!(endpoint = %endpoint, "sim session opened");
        Ok(Arc::new(SimSession {
            shared: self.shared.clone(),
            generation: state.session_generation,
        }))
    }
}

struct SimSession {
    shared: Shared,
    generation: u64,
}

#[async_trait]
impl Session for SimSession {
    async fn cluster_identity(&self) -> Result<ClusterIdentity> {
        let mut state = guard(&self.shared, self.generation)?;
        state.record(Call::ClusterIdentity);
        Ok(ClusterIdentity {
            name: state.name.clone(),
            version: state.version.clone(),
        })
    }

    async fn node(&self, name: &str) -> Result<Arc<dyn Node>> {
        let mut state = guard(&self.shared, self.generation)?;
        state.record(Call::Node(name.to_string()));
        if !state.nodes.contains(name) {
            return Err(ApiError::NotFound(format!("node '{name}'")));
        }
        Ok(Arc::new(SimNode {
            shared: self.shared.clone(),
            generation: self.generation,
            name: name.to_string(),
        }))
    }
}

struct SimNode {
    shared: Shared,
    generation: u64,
    name: String,
}

#[async_trait]
impl Node for SimNode {
    fn name(&self) -> &str {
        &self.name
    }

    async fn virtual_machine(&self, id: VmId) -> Result<Arc<dyn VirtualMachine>> {
        let mut state = guard(&self.shared, self.generation)?;
        state.record(Call::Lookup(id));
        let config = match state.vms.get(&id) {
            Some(record) if record.node == self.name => record.snapshot(),
            _ => {
                return Err(ApiError::NotFound(format!(
                    "VM {id} on node '{}'",
                    self.name
                )))
            }
        };
        Ok(Arc::new(SimVm {
            shared: self.shared.clone(),
            generation: self.generation,
            node: self.name.clone(),
            id,
            config,
        }))
    }
}

struct SimVm {
    shared: Shared,
    generation: u64,
    node: String,
    id: VmId,
    config: VmConfig,
}

impl SimVm {
    fn submit(&self, call: Call, op: FaultOp, kind: &str, effect: Effect) -> Result<Arc<dyn Task>> {
        let mut state = guard(&self.shared, self.generation)?;
        state.record(call);
        let id = state.submit(op, &self.node, self.id, kind, effect)?;
        Ok(Arc::new(SimTask {
            shared: self.shared.clone(),
            generation: self.generation,
            id,
        }))
    }

    fn power(&self, call: Call, op: FaultOp, kind: &str, power: PowerState) -> Result<Arc<dyn Task>> {
        let effect = Effect::Power {
            vm: self.id,
            state: power,
        };
        self.submit(call, op, kind, effect)
    }
}

#[async_trait]
impl VirtualMachine for SimVm {
    fn id(&self) -> VmId {
        self.id
    }

    fn config(&self) -> &VmConfig {
        &self.config
    }

    async fn clone_vm(&self, request: &CloneRequest) -> Result<(VmId, Arc<dyn Task>)> {
        {
            let state = guard(&self.shared, self.generation)?;
            if state.vms.contains_key(&request.new_id) {
                return Err(ApiError::Rejected(format!(
                    "VM {} already exists",
                    request.new_id
                )));
            }
        }
        let task = self.submit(
            Call::Clone {
                template: self.id,
                request: request.clone(),
            },
            FaultOp::Clone,
            "qmclone",
            Effect::Clone {
                node: self.node.clone(),
                template: self.id,
                request: request.clone(),
            },
        )?;
        Ok((request.new_id, task))
    }

    async fn start(&self) -> Result<Arc<dyn Task>> {
        self.power(Call::Start(self.id), FaultOp::Start, "qmstart", PowerState::Running)
    }

    async fn stop(&self) -> Result<Arc<dyn Task>> {
        self.power(Call::Stop(self.id), FaultOp::Stop, "qmstop", PowerState::Stopped)
    }

    async fn reset(&self) -> Result<Arc<dyn Task>> {
        self.power(Call::Reset(self.id), FaultOp::Reset, "qmreset", PowerState::Running)
    }

    async fn delete(&self) -> Result<Arc<dyn Task>> {
        self.submit(
            Call::Delete(self.id),
            FaultOp::Delete,
            "qmdestroy",
            Effect::Delete(self.id),
        )
    }

    async fn resize_disk(&self, disk: &str, size: &str) -> Result<()> {
        let mut state = guard(&self.shared, self.generation)?;
        state.record(Call::ResizeDisk {
            vm: self.id,
            disk: disk.to_string(),
            size: size.to_string(),
        });
        state.check_fault(&FaultOp::ResizeDisk, &format!("resize of {disk}"))?;
        if let Some(record) = state.vms.get_mut(&self.id) {
            record.config.insert(format!("{disk}-size"), size.to_string());
        }
        Ok(())
    }

    async fn apply_config(&self, key: &str, value: &str) -> Result<Arc<dyn Task>> {
        self.submit(
            Call::ApplyConfig {
                vm: self.id,
                key: key.to_string(),
                value: value.to_string(),
            },
            FaultOp::ApplyConfig(key.to_string()),
            "qmconfig",
            Effect::Config {
                vm: self.id,
                key: key.to_string(),
                value: value.to_string(),
            },
        )
    }

    async fn ping(&self) -> Result<PowerState> {
        let mut state = guard(&self.shared, self.generation)?;
        state.record(Call::Ping(self.id));
        state.check_fault(&FaultOp::Ping, &format!("status of VM {}", self.id))?;
        state
            .vms
            .get(&self.id)
            .map(|r| r.power.clone())
            .ok_or_else(|| ApiError::NotFound(format!("VM {}", self.id)))
    }

    async fn agent_ping(&self) -> Result<()> {
        let mut state = guard(&self.shared, self.generation)?;
        state.record(Call::AgentPing(self.id));
        state.check_fault(&FaultOp::AgentPing, "guest-ping")?;
        state.agent_ping(self.id)
    }

    async fn agent_network_interfaces(&self) -> Result<Vec<NetworkInterfaceReport>> {
        let mut state = guard(&self.shared, self.generation)?;
        state.record(Call::AgentInterfaces(self.id));
        state.check_fault(&FaultOp::AgentInterfaces, "network-get-interfaces")?;
        state.agent_interfaces(self.id)
    }
}

struct SimTask {
    shared: Shared,
    generation: u64,
    id: String,
}

#[async_trait]
impl Task for SimTask {
    fn id(&self) -> &str {
        &self.id
    }

    async fn status(&self) -> Result<TaskStatus> {
        let mut state = guard(&self.shared, self.generation)?;
        state.poll_task(&self.id)
    }
}
