//! Guest IP discovery through the in-guest agent.

use crate::error::{CoreError, Result};
use crate::locator::VmLocator;
use crate::supervisor::TaskSupervisor;
use pvm_api::NetworkInterfaceReport;

/// Pick the IPv4 address of the interface whose hardware address appears in
/// the VM's `net0` descriptor.
///
/// Matching is a case-insensitive substring test. Interfaces reporting no
/// hardware address are skipped. The first IPv4 address of the first matching
/// interface wins.
pub fn select_address(net0: &str, interfaces: &[NetworkInterfaceReport]) -> Option<String> {
    let net0 = net0.to_lowercase();
    interfaces
        .iter()
        .filter(|iface| !iface.hardware_address.is_empty())
        .filter(|iface| net0.contains(&iface.hardware_address.to_lowercase()))
        .find_map(|iface| iface.first_ipv4().map(str::to_string))
}

/// Wait for the guest agent, then report the primary NIC's IPv4 address.
///
/// # Errors
///
/// - [`CoreError::AgentUnavailable`] if the agent never answered
/// - [`CoreError::NoIpAssigned`] if no matching interface carries IPv4
/// - [`CoreError::Api`] if a call other than an agent ping failed, or the
///   ping failed for a reason other than the agent itself
pub async fn await_guest_ip(locator: &VmLocator, supervisor: &TaskSupervisor) -> Result<String> {
    let vm = locator.fetch().await?;
    supervisor.wait_for_agent(vm.as_ref()).await?;

    // The NIC may have been rewritten since the handle was taken.
    let vm = locator.fetch().await?;
    let interfaces = vm.agent_network_interfaces().await?;

    match select_address(&vm.config().net0, &interfaces) {
        Some(ip) => {
            tracing::debug!(vmid = %locator.vmid(), ip = %ip, "Guest IP discovered");
            Ok(ip)
        }
        None => {
            tracing::warn!(
                vmid = %locator.vmid(),
                interfaces = interfaces.len(),
                "No IPv4 address on primary interface"
            );
            Err(CoreError::NoIpAssigned {
                vmid: locator.vmid(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pvm_api::{AddressFamily, IpAddressReport};

    fn iface(mac: &str, ips: &[(&str, AddressFamily)]) -> NetworkInterfaceReport {
        NetworkInterfaceReport {
            name: "eth0".into(),
            hardware_address: mac.into(),
            ip_addresses: ips
                .iter()
                .map(|(address, family)| IpAddressReport {
                    address: address.to_string(),
                    family: *family,
                    prefix: Some(24),
                })
                .collect(),
        }
    }

    const NET0: &str = "virtio=BC:24:11:00:00:96,bridge=vmbr0";

    #[test]
    fn test_matches_mac_case_insensitively() {
        let ifaces = [
            iface("00:00:00:00:00:00", &[("127.0.0.1", AddressFamily::Ipv4)]),
            iface(
                "bc:24:11:00:00:96",
                &[
                    ("fe80::1", AddressFamily::Ipv6),
                    ("10.0.0.150", AddressFamily::Ipv4),
                ],
            ),
        ];
        assert_eq!(select_address(NET0, &ifaces).as_deref(), Some("10.0.0.150"));
    }

    #[test]
    fn test_ipv6_only_yields_none() {
        let ifaces = [iface("bc:24:11:00:00:96", &[("fe80::1", AddressFamily::Ipv6)])];
        assert_eq!(select_address(NET0, &ifaces), None);
    }

    #[test]
    fn test_skips_empty_hardware_address() {
        let ifaces = [
            iface("", &[("192.168.0.9", AddressFamily::Ipv4)]),
            iface("bc:24:11:00:00:96", &[("10.0.0.150", AddressFamily::Ipv4)]),
        ];
        assert_eq!(select_address(NET0, &ifaces).as_deref(), Some("10.0.0.150"));
    }

    #[test]
    fn test_unmatched_mac_yields_none() {
        let ifaces = [iface("de:ad:be:ef:00:01", &[("10.0.0.150", AddressFamily::Ipv4)])];
        assert_eq!(select_address(NET0, &ifaces), None);
    }

    #[test]
    fn test_blank_ipv4_is_ignored() {
        let blank = [iface("bc:24:11:00:00:96", &[("", AddressFamily::Ipv4)])];
        assert_eq!(select_address(NET0, &blank), None);

        let ifaces = [iface(
            "bc:24:11:00:00:96",
            &[("", AddressFamily::Ipv4), ("10.0.0.150", AddressFamily::Ipv4)],
        )];
        assert_eq!(select_address(NET0, &ifaces).as_deref(), Some("10.0.0.150"));
    }

    #[test]
    fn test_first_ipv4_wins() {
        let ifaces = [iface(
            "bc:24:11:00:00:96",
            &[
                ("10.0.0.150", AddressFamily::Ipv4),
                ("10.0.0.151", AddressFamily::Ipv4),
            ],
        )];
        assert_eq!(select_address(NET0, &ifaces).as_deref(), Some("10.0.0.150"));
    }
}
