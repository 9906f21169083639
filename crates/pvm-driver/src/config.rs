//! Driver configuration.
//!
//! Configuration is loaded from `PROXMOXVE_*` environment variables with the
//! defaults the orchestrator's flag loader would apply.

use crate::error::CoreError;
use pvm_api::{Credentials, Endpoint, VmId};
use std::path::PathBuf;

/// Every option the driver consumes.
///
/// String-valued VM options use the empty string for "keep whatever the
/// template has"; those keys are never written.
#[derive(Debug, Clone)]
pub struct DriverConfig {
    /// Name of the machine being managed; also the clone's display name.
    pub machine_name: String,
    /// Directory the orchestrator keeps per-machine state in.
    pub store_path: PathBuf,

    /// Control-plane host.
    pub host: String,
    /// Control-plane port.
    pub port: u16,
    /// Node to create the VM on; empty means `host`.
    pub node: String,
    pub username: String,
    pub password: String,
    /// Authentication realm (`pam`, `pve`, ...).
    pub realm: String,
    /// Resource pool the clone joins; empty means none.
    pub pool: String,

    /// VMID range as `<min>:<max>`, upper bound exclusive.
    pub vmid_range: String,
    /// VMID of the template to clone.
    pub clone_vmid: String,

    /// Storage to create the clone's volumes on; empty means the template's.
    pub storage: String,
    /// Disk format (`qcow2`, `raw`); empty means the template's.
    pub storage_type: String,
    /// Primary disk size in GB.
    pub disk_size_gb: u32,
    /// SCSI controller model.
    pub scsi_controller: String,
    /// Extra attributes of the primary SCSI disk. Accepted for compatibility;
    /// clones keep the template's disk definition.
    pub scsi_attributes: String,

    /// Memory in GB (written to the VM in MiB).
    pub memory_gb: u32,
    pub cpu_sockets: String,
    pub cpu_cores: String,
    /// Emulated CPU model.
    pub cpu: String,
    pub numa: String,
    /// Start the VM when its host boots (`0`, `1`, empty).
    pub onboot: String,
    /// Protect the VM and its disks from removal (`0`, `1`, empty).
    pub protection: String,
    /// Cloud-init configuration format.
    pub citype: String,

    pub net_model: String,
    /// Bridge for `net0`; empty leaves the template's NIC untouched.
    pub net_bridge: String,
    /// VLAN tag; 0 means untagged.
    pub net_vlan_tag: u16,
    pub net_firewall: String,
    pub net_mtu: String,

    pub guest_username: String,
    pub guest_password: String,
    pub guest_ssh_port: u16,

    /// Verbose driver logging.
    pub debug: bool,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            machine_name: String::new(),
            store_path: PathBuf::from("/tmp/pvm"),
            host: "192.168.1.253".into(),
            port: 8006,
            node: String::new(),
            username: "root".into(),
            password: String::new(),
            realm: "pam".into(),
            pool: String::new(),
            vmid_range: String::new(),
            clone_vmid: String::new(),
            storage: String::new(),
            storage_type: String::new(),
            disk_size_gb: 16,
            scsi_controller: "virtio-scsi-pci".into(),
            scsi_attributes: String::new(),
            memory_gb: 8,
            cpu_sockets: String::new(),
            cpu_cores: String::new(),
            cpu: String::new(),
            numa: String::new(),
            onboot: String::new(),
            protection: String::new(),
            citype: "nocloud".into(),
            net_model: "virtio".into(),
            net_bridge: String::new(),
            net_vlan_tag: 0,
            net_firewall: String::new(),
            net_mtu: String::new(),
            guest_username: "docker".into(),
            guest_password: String::new(),
            guest_ssh_port: 22,
            debug: false,
        }
    }
}

fn env_string(key: &str, default: String) -> String {
    std::env::var(key).unwrap_or(default)
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

impl DriverConfig {
    /// Defaults for the given machine.
    pub fn new(machine_name: impl Into<String>, store_path: impl Into<PathBuf>) -> Self {
        Self {
            machine_name: machine_name.into(),
            store_path: store_path.into(),
            ..Self::default()
        }
    }

    /// Load configuration from environment variables.
    ///
    /// | Variable | Default |
    /// |----------|---------|
    /// | `PROXMOXVE_PROXMOX_HOST` | `192.168.1.253` |
    /// | `PROXMOXVE_PROXMOX_PORT` | `8006` |
    /// | `PROXMOXVE_PROXMOX_NODE` | host |
    /// | `PROXMOXVE_PROXMOX_USER_NAME` | `root` |
    /// | `PROXMOXVE_PROXMOX_USER_PASSWORD` | |
    /// | `PROXMOXVE_PROXMOX_REALM` | `pam` |
    /// | `PROXMOXVE_PROXMOX_POOL` | |
    /// | `PROXMOXVE_VM_VMID_RANGE` | |
    /// | `PROXMOXVE_VM_CLONE_VMID` | |
    /// | `PROXMOXVE_VM_STORAGE_PATH` | |
    /// | `PROXMOXVE_VM_STORAGE_TYPE` | |
    /// | `PROXMOXVE_VM_STORAGE_SIZE` | `16` |
    /// | `PROXMOXVE_VM_SCSI_CONTROLLER` | `virtio-scsi-pci` |
    /// | `PROXMOXVE_VM_SCSI_ATTRIBUTES` | |
    /// | `PROXMOXVE_VM_MEMORY` | `8` |
    /// | `PROXMOXVE_VM_CPU_SOCKETS` | |
    /// | `PROXMOXVE_VM_CPU_CORES` | |
    /// | `PROXMOXVE_VM_CPU` | |
    /// | `PROXMOXVE_VM_NUMA` | |
    /// | `PROXMOXVE_VM_START_ONBOOT` | |
    /// | `PROXMOXVE_VM_PROTECTION` | |
    /// | `PROXMOXVE_VM_CITYPE` | `nocloud` |
    /// | `PROXMOXVE_VM_NET_MODEL` | `virtio` |
    /// | `PROXMOXVE_VM_NET_BRIDGE` | |
    /// | `PROXMOXVE_VM_NET_TAG` | `0` |
    /// | `PROXMOXVE_VM_NET_FIREWALL` | |
    /// | `PROXMOXVE_VM_NET_MTU` | |
    /// | `PROXMOXVE_SSH_USERNAME` | `docker` |
    /// | `PROXMOXVE_SSH_PASSWORD` | |
    /// | `PROXMOXVE_SSH_PORT` | `22` |
    /// | `PROXMOXVE_DEBUG_DRIVER` | `false` |
    pub fn from_env(machine_name: impl Into<String>, store_path: impl Into<PathBuf>) -> Self {
        let d = Self::new(machine_name, store_path);

        Self {
            host: env_string("PROXMOXVE_PROXMOX_HOST", d.host),
            port: env_parse("PROXMOXVE_PROXMOX_PORT", d.port),
            node: env_string("PROXMOXVE_PROXMOX_NODE", d.node),
            username: env_string("PROXMOXVE_PROXMOX_USER_NAME", d.username),
            password: env_string("PROXMOXVE_PROXMOX_USER_PASSWORD", d.password),
            realm: env_string("PROXMOXVE_PROXMOX_REALM", d.realm),
            pool: env_string("PROXMOXVE_PROXMOX_POOL", d.pool),
            vmid_range: env_string("PROXMOXVE_VM_VMID_RANGE", d.vmid_range),
            clone_vmid: env_string("PROXMOXVE_VM_CLONE_VMID", d.clone_vmid),
            storage: env_string("PROXMOXVE_VM_STORAGE_PATH", d.storage),
            storage_type: env_string("PROXMOXVE_VM_STORAGE_TYPE", d.storage_type).to_lowercase(),
            disk_size_gb: env_parse("PROXMOXVE_VM_STORAGE_SIZE", d.disk_size_gb),
            scsi_controller: env_string("PROXMOXVE_VM_SCSI_CONTROLLER", d.scsi_controller),
            scsi_attributes: env_string("PROXMOXVE_VM_SCSI_ATTRIBUTES", d.scsi_attributes),
            memory_gb: env_parse("PROXMOXVE_VM_MEMORY", d.memory_gb),
            cpu_sockets: env_string("PROXMOXVE_VM_CPU_SOCKETS", d.cpu_sockets),
            cpu_cores: env_string("PROXMOXVE_VM_CPU_CORES", d.cpu_cores),
            cpu: env_string("PROXMOXVE_VM_CPU", d.cpu),
            numa: env_string("PROXMOXVE_VM_NUMA", d.numa),
            onboot: env_string("PROXMOXVE_VM_START_ONBOOT", d.onboot),
            protection: env_string("PROXMOXVE_VM_PROTECTION", d.protection),
            citype: env_string("PROXMOXVE_VM_CITYPE", d.citype),
            net_model: env_string("PROXMOXVE_VM_NET_MODEL", d.net_model),
            net_bridge: env_string("PROXMOXVE_VM_NET_BRIDGE", d.net_bridge),
            net_vlan_tag: env_parse("PROXMOXVE_VM_NET_TAG", d.net_vlan_tag),
            net_firewall: env_string("PROXMOXVE_VM_NET_FIREWALL", d.net_firewall),
            net_mtu: env_string("PROXMOXVE_VM_NET_MTU", d.net_mtu),
            guest_username: env_string("PROXMOXVE_SSH_USERNAME", d.guest_username),
            guest_password: env_string("PROXMOXVE_SSH_PASSWORD", d.guest_password),
            guest_ssh_port: env_parse("PROXMOXVE_SSH_PORT", d.guest_ssh_port),
            debug: std::env::var("PROXMOXVE_DEBUG_DRIVER")
                .map(|v| v != "false" && v != "0" && !v.is_empty())
                .unwrap_or(d.debug),
            ..d
        }
    }

    /// Node the VM lives on: the configured node, or the host name.
    pub fn effective_node(&self) -> &str {
        if self.node.is_empty() {
            &self.host
        } else {
            &self.node
        }
    }

    pub fn endpoint(&self) -> Endpoint {
        Endpoint::new(self.host.clone(), self.port)
    }

    pub fn credentials(&self) -> Credentials {
        Credentials {
            username: self.username.clone(),
            password: self.password.clone(),
            realm: self.realm.clone(),
        }
    }

    /// The template VMID to clone from.
    pub fn template_vmid(&self) -> Result<VmId, CoreError> {
        if self.clone_vmid.trim().is_empty() {
            return Err(CoreError::Config("clone VMID is required".into()));
        }
        self.clone_vmid
            .parse()
            .map_err(|e| CoreError::Config(format!("clone VMID '{}': {e}", self.clone_vmid)))
    }

    /// Check the options Create cannot do without.
    pub fn validate_for_create(&self) -> Result<(), CoreError> {
        if self.vmid_range.trim().is_empty() {
            return Err(CoreError::Config("VMID range is required".into()));
        }
        self.template_vmid()?;
        Ok(())
    }

    /// Memory as written to the VM, in MiB.
    pub fn memory_mib(&self) -> u64 {
        u64::from(self.memory_gb) * 1024
    }

    /// Primary disk size in the control plane's notation, e.g. `16G`.
    pub fn disk_size(&self) -> String {
        format!("{}G", self.disk_size_gb)
    }

    /// Where the driver's SSH private key lives; the public half is `<path>.pub`.
    pub fn ssh_key_path(&self) -> PathBuf {
        self.store_path
            .join("machines")
            .join(&self.machine_name)
            .join("id_ed25519")
    }
}
