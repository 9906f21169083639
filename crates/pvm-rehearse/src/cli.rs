use clap::{Parser, Subcommand, ValueEnum};
use pvm_sim::{FaultMode, FaultOp, GuestNetwork};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "pvm-rehearse",
    about = "Run pvm driver operations against a simulated cluster"
)]
pub struct Cli {
    /// Machine name
    #[arg(long, default_value = "rehearsal", env = "PVM_MACHINE_NAME")]
    pub machine: String,

    /// Directory for per-machine state (SSH keys)
    #[arg(long, env = "PVM_STORE_PATH")]
    pub store: Option<PathBuf>,

    /// Verbose driver logging
    #[arg(short, long)]
    pub debug: bool,

    /// Make an operation misbehave, e.g. `stop=fail`, `config.memory=hang`
    #[arg(long = "fault", value_parser = parse_fault)]
    pub faults: Vec<(FaultOp, FaultMode)>,

    /// What the guest agent reports
    #[arg(long, value_enum, default_value_t = GuestMode::Dhcp)]
    pub guest_network: GuestMode,

    /// The guest agent never answers
    #[arg(long)]
    pub silent_agent: bool,

    /// Status polls before a task finishes
    #[arg(long, default_value_t = 1)]
    pub task_latency: u32,

    /// Task poll interval in milliseconds
    #[arg(long, default_value_t = 5000)]
    pub poll_interval_ms: u64,

    /// VMID of the pre-existing running VM used by lifecycle commands
    #[arg(long, default_value_t = 100)]
    pub vmid: u32,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Clone, configure and boot a new VM
    Create,
    /// Power on the VM
    Start,
    /// Gracefully shut the VM down
    Stop,
    /// Hard reset
    Restart,
    /// Same as stop
    Kill,
    /// Stop and delete the VM
    Remove,
    /// Report the VM's state
    State,
    /// Report the guest's IPv4 address
    Ip,
    /// Report the container engine URL
    Url,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuestMode {
    Dhcp,
    Ipv6Only,
    Unmatched,
}

impl From<GuestMode> for GuestNetwork {
    fn from(mode: GuestMode) -> Self {
        match mode {
            GuestMode::Dhcp => GuestNetwork::Dhcp,
            GuestMode::Ipv6Only => GuestNetwork::Ipv6Only,
            GuestMode::Unmatched => GuestNetwork::Unmatched,
        }
    }
}

/// Parse `<op>=<mode>`.
fn parse_fault(s: &str) -> Result<(FaultOp, FaultMode), String> {
    let (op, mode) = s
        .split_once('=')
        .ok_or_else(|| format!("expected <op>=<mode>, got '{s}'"))?;

    let op = match op {
        "clone" => FaultOp::Clone,
        "start" => FaultOp::Start,
        "stop" => FaultOp::Stop,
        "reset" => FaultOp::Reset,
        "delete" => FaultOp::Delete,
        "resize" => FaultOp::ResizeDisk,
        "ping" => FaultOp::Ping,
        "agent-ping" => FaultOp::AgentPing,
        "agent-interfaces" => FaultOp::AgentInterfaces,
        other => match other.strip_prefix("config.") {
            Some(key) if !key.is_empty() => FaultOp::ApplyConfig(key.to_string()),
            _ => return Err(format!("unknown operation '{other}'")),
        },
    };

    let mode = match mode {
        "reject" => FaultMode::Reject,
        "unreachable" => FaultMode::Unreachable,
        "fail" => FaultMode::FailTask,
        "hang" => FaultMode::HangTask,
        other => return Err(format!("unknown fault mode '{other}'")),
    };

    Ok((op, mode))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_fault() {
        assert_eq!(
            parse_fault("stop=fail").unwrap(),
            (FaultOp::Stop, FaultMode::FailTask)
        );
        assert_eq!(
            parse_fault("config.memory=hang").unwrap(),
            (FaultOp::ApplyConfig("memory".into()), FaultMode::HangTask)
        );
        assert!(parse_fault("stop").is_err());
        assert!(parse_fault("config.=fail").is_err());
        assert!(parse_fault("stop=explode").is_err());
    }

    #[test]
    fn test_cli_parses() {
        let cli = Cli::try_parse_from([
            "pvm-rehearse",
            "--fault",
            "clone=reject",
            "--guest-network",
            "ipv6-only",
            "create",
        ])
        .unwrap();
        assert_eq!(cli.command, Command::Create);
        assert_eq!(cli.faults, [(FaultOp::Clone, FaultMode::Reject)]);
        assert_eq!(cli.guest_network, GuestMode::Ipv6Only);
    }
}
