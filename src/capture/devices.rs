use std::net::IpAddr;

use ipnetwork::IpNetwork;
use log::{debug, warn};
use pcap::Device;
use serde::Serialize;

/// Device name libpcap uses for "every interface" on Linux.
pub const ANY_DEVICE: &str = "any";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InterfaceAddress {
    /// Address in CIDR notation when the netmask is known.
    pub network: String,
    pub broadcast: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InterfaceInfo {
    pub name: String,
    pub description: String,
    pub addresses: Vec<InterfaceAddress>,
    pub is_loopback: bool,
    pub is_up: bool,
}

impl InterfaceInfo {
    fn from_device(device: Device) -> Self {
        let addresses = device
            .addresses
            .iter()
            .map(|address| InterfaceAddress {
                network: render_address(address.addr, address.netmask),
                broadcast: address.broadcast_addr.map(|b| b.to_string()),
            })
            .collect();

        InterfaceInfo {
            is_loopback: device.flags.is_loopback(),
            is_up: device.flags.is_up(),
            description: device.desc.unwrap_or_default(),
            name: device.name,
            addresses,
        }
    }
}

/// Lists capture-capable interfaces in the order libpcap reports them.
///
/// Enumeration failures are logged and produce an empty list.
pub fn list_interfaces() -> Vec<InterfaceInfo> {
    match Device::list() {
        Ok(devices) => {
            debug!("Found {} capture devices", devices.len());
            devices.into_iter().map(InterfaceInfo::from_device).collect()
        }
        Err(e) => {
            warn!("Failed to list capture devices: {}", e);
            Vec::new()
        }
    }
}

/// First interface that is up and not a loopback, falling back to `any`.
pub fn pick_default(interfaces: &[InterfaceInfo]) -> String {
    interfaces
        .iter()
        .find(|iface| iface.is_up && !iface.is_loopback && iface.name != ANY_DEVICE)
        .map(|iface| iface.name.clone())
        .unwrap_or_else(|| ANY_DEVICE.to_string())
}

fn render_address(addr: IpAddr, netmask: Option<IpAddr>) -> String {
    netmask
        .and_then(|mask| IpNetwork::with_netmask(addr, mask).ok())
        .map(|network| network.to_string())
        .unwrap_or_else(|| addr.to_string())
}
