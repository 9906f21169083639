//! Error types for pvm-driver.

use pvm_api::{ApiError, VmId};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Result type alias for pvm-driver operations.
pub type Result<T> = std::result::Result<T, CoreError>;

/// Which side of a login attempt failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionFailure {
    /// Host unreachable, TLS or socket failure.
    Transport,
    /// The control plane refused the credentials.
    Auth,
}

impl fmt::Display for ConnectionFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionFailure::Transport => write!(f, "transport"),
            ConnectionFailure::Auth => write!(f, "authentication"),
        }
    }
}

/// Errors that can occur while provisioning or operating a VM.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Could not establish a control-plane session
    #[error("{kind} failure connecting to control plane: {message}")]
    Connection {
        kind: ConnectionFailure,
        message: String,
    },

    /// VMID range missing or malformed
    #[error("invalid VMID range: {0}")]
    InvalidRange(String),

    /// A task reached a terminal state other than success
    #[error("task {task} failed: {exit_status}")]
    TaskFailed { task: String, exit_status: String },

    /// A task did not reach a terminal state in time
    #[error("task {task} did not finish within {timeout:?}")]
    TaskTimeout { task: String, timeout: Duration },

    /// The guest agent never answered
    #[error("guest agent of VM {vmid} unavailable after {timeout:?}{}", .last_error.as_deref().map(|e| format!(": {e}")).unwrap_or_default())]
    AgentUnavailable {
        vmid: VmId,
        timeout: Duration,
        last_error: Option<String>,
    },

    /// The guest reported no IPv4 address on the VM's primary NIC
    #[error("no IPv4 address assigned to the primary interface of VM {vmid}")]
    NoIpAssigned { vmid: VmId },

    /// Operation outside the supported set
    #[error("invalid operation: {0}")]
    InvalidOperation(String),

    /// A configuration write failed; earlier writes of the batch stay applied
    #[error("applying '{key}' failed after {applied} successful writes: {source}")]
    ConfigApply {
        key: String,
        applied: usize,
        #[source]
        source: Box<CoreError>,
    },

    /// Error reported by the control plane
    #[error("control plane error: {0}")]
    Api(#[from] ApiError),

    /// No VMID is bound to this driver yet
    #[error("invalid VMID: no VM is bound to this driver")]
    Unbound,

    /// Missing or malformed driver option
    #[error("configuration error: {0}")]
    Config(String),

    /// SSH key pair could not be generated
    #[error("SSH key generation failed: {0}")]
    KeyGeneration(String),

    /// Stored SSH key blob could not be decoded
    #[error("malformed SSH key blob: {0}")]
    KeyEncoding(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl CoreError {
    /// The error at the root of a [`CoreError::ConfigApply`] chain.
    pub fn root(&self) -> &CoreError {
        match self {
            CoreError::ConfigApply { source, .. } => source.root(),
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_error_names_kind() {
        let err = CoreError::Connection {
            kind: ConnectionFailure::Auth,
            message: "bad password".into(),
        };
        assert_eq!(
            err.to_string(),
            "authentication failure connecting to control plane: bad password"
        );
    }

    #[test]
    fn test_agent_unavailable_message() {
        let err = CoreError::AgentUnavailable {
            vmid: VmId::new(101),
            timeout: Duration::from_secs(300),
            last_error: Some("agent not running".into()),
        };
        assert_eq!(
            err.to_string(),
            "guest agent of VM 101 unavailable after 300s: agent not running"
        );

        let err = CoreError::AgentUnavailable {
            vmid: VmId::new(101),
            timeout: Duration::from_secs(300),
            last_error: None,
        };
        assert_eq!(err.to_string(), "guest agent of VM 101 unavailable after 300s");
    }

    #[test]
    fn test_config_apply_root() {
        let err = CoreError::ConfigApply {
            key: "memory".into(),
            applied: 2,
            source: Box::new(CoreError::TaskFailed {
                task: "UPID:pve:1".into(),
                exit_status: "out of memory".into(),
            }),
        };
        assert!(matches!(err.root(), CoreError::TaskFailed { .. }));
        assert!(err.to_string().contains("after 2 successful writes"));
    }
}
