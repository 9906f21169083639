//! Data exchanged with the control plane.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::num::ParseIntError;
use std::str::FromStr;

/// Cluster-scoped numeric identifier of a virtual machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VmId(u32);

impl VmId {
    /// Wrap a raw identifier.
    pub const fn new(id: u32) -> Self {
        Self(id)
    }

    /// The raw identifier.
    pub const fn get(self) -> u32 {
        self.0
    }
}

impl fmt::Display for VmId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u32> for VmId {
    fn from(id: u32) -> Self {
        Self(id)
    }
}

impl FromStr for VmId {
    type Err = ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim().parse().map(Self)
    }
}

/// Where the control plane listens.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
}

impl Endpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Base URL of the JSON API on this endpoint.
    pub fn api_url(&self) -> String {
        format!("https://{}:{}/api2/json", self.host, self.port)
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Login material for one session.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
    pub realm: String,
}

impl Credentials {
    /// `user@realm`, the form the control plane expects.
    pub fn principal(&self) -> String {
        format!("{}@{}", self.username, self.realm)
    }
}

// Keep the password out of logs.
impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("realm", &self.realm)
            .finish()
    }
}

/// Name and version reported by the cluster, used to validate a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterIdentity {
    pub name: String,
    pub version: String,
}

/// Parameters of a clone submitted against a template VM.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CloneRequest {
    /// Identifier the clone will receive.
    #[serde(rename = "newid")]
    pub new_id: VmId,
    /// Display name of the clone.
    pub name: String,
    /// Full (detached) clone rather than a linked one.
    pub full: bool,
    /// Resource pool; empty means none.
    #[serde(skip_serializing_if = "String::is_empty", default)]
    pub pool: String,
    /// Target storage; empty means the template's.
    #[serde(skip_serializing_if = "String::is_empty", default)]
    pub storage: String,
    /// Disk format (`qcow2`, `raw`); empty means the template's.
    #[serde(skip_serializing_if = "String::is_empty", default)]
    pub format: String,
}

/// Observed status of an asynchronous task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskStatus {
    /// Still executing.
    Running,
    /// Finished; `exit_status` is `"OK"` on success, an error text otherwise.
    Stopped { exit_status: String },
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Stopped { .. })
    }

    pub fn is_success(&self) -> bool {
        matches!(self, TaskStatus::Stopped { exit_status } if exit_status == "OK")
    }
}

/// Power state reported for a VM.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PowerState {
    Running,
    Stopped,
    /// Anything else the control plane reports (paused, suspended, ...).
    Other(String),
}

impl PowerState {
    pub fn is_running(&self) -> bool {
        matches!(self, PowerState::Running)
    }

    pub fn is_stopped(&self) -> bool {
        matches!(self, PowerState::Stopped)
    }
}

impl From<&str> for PowerState {
    fn from(s: &str) -> Self {
        match s {
            "running" => PowerState::Running,
            "stopped" => PowerState::Stopped,
            other => PowerState::Other(other.to_string()),
        }
    }
}

/// The parts of a VM's configuration the driver reads back.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VmConfig {
    /// Primary network descriptor, e.g. `virtio=BC:24:11:AA:BB:CC,bridge=vmbr0`.
    #[serde(default)]
    pub net0: String,
    /// Cloud-init authorized keys, percent-encoded as stored.
    #[serde(default)]
    pub sshkeys: String,
}

/// Address family of an address reported by the guest agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AddressFamily {
    Ipv4,
    Ipv6,
    #[serde(other)]
    Unknown,
}

/// One address on a guest interface.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IpAddressReport {
    #[serde(rename = "ip-address")]
    pub address: String,
    #[serde(rename = "ip-address-type")]
    pub family: AddressFamily,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prefix: Option<u8>,
}

/// A guest network interface as reported by the in-guest agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkInterfaceReport {
    #[serde(default)]
    pub name: String,
    #[serde(rename = "hardware-address", default)]
    pub hardware_address: String,
    #[serde(rename = "ip-addresses", default)]
    pub ip_addresses: Vec<IpAddressReport>,
}

impl NetworkInterfaceReport {
    /// First non-empty IPv4 address on this interface, in reported order.
    pub fn first_ipv4(&self) -> Option<&str> {
        self.ip_addresses
            .iter()
            .find(|ip| ip.family == AddressFamily::Ipv4 && !ip.address.is_empty())
            .map(|ip| ip.address.as_str())
    }
}
