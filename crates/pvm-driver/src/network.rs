//! Primary NIC descriptor.

use crate::config::DriverConfig;

/// The VM's first network interface, rendered as the control plane's
/// comma-separated `key=value` list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkDescriptor {
    pub model: String,
    pub bridge: String,
    /// 0 means untagged.
    pub vlan_tag: u16,
    pub firewall: String,
    pub mtu: String,
}

impl NetworkDescriptor {
    pub fn from_config(config: &DriverConfig) -> Self {
        Self {
            model: config.net_model.clone(),
            bridge: config.net_bridge.clone(),
            vlan_tag: config.net_vlan_tag,
            firewall: config.net_firewall.clone(),
            mtu: config.net_mtu.clone(),
        }
    }

    /// `model=<m>,bridge=<b>` followed by `tag`, `firewall` and `mtu` when set.
    pub fn build(&self) -> String {
        let mut out = format!("model={},bridge={}", self.model, self.bridge);
        if self.vlan_tag != 0 {
            out.push_str(&format!(",tag={}", self.vlan_tag));
        }
        if !self.firewall.is_empty() {
            out.push_str(&format!(",firewall={}", self.firewall));
        }
        if !self.mtu.is_empty() {
            out.push_str(&format!(",mtu={}", self.mtu));
        }
        out
    }
}
