//! Address allocation on subnets.

use std::collections::HashSet;
use std::net::IpAddr;

use lbaas_core::{Port, Subnet};

/// Fixed IPs already held by a port on `subnet`.
pub fn allocated_addresses<'a>(
    subnet: &Subnet,
    ports: impl IntoIterator<Item = &'a Port>,
) -> HashSet<IpAddr> {
    ports
        .into_iter()
        .flat_map(|p| p.fixed_ips.iter())
        .filter(|ip| ip.subnet_id == subnet.id)
        .filter_map(|ip| ip.ip_address.parse().ok())
        .collect()
}

/// Addresses automatic allocation must skip: everything allocated plus the
/// gateway. The gateway itself can still be claimed by asking for it.
pub fn addresses_in_use<'a>(subnet: &Subnet, ports: impl IntoIterator<Item = &'a Port>) -> HashSet<IpAddr> {
    let mut used = allocated_addresses(subnet, ports);
    if let Some(gateway) = subnet.gateway_ip.as_deref().and_then(|g| g.parse().ok()) {
        used.insert(gateway);
    }
    used
}

/// Lowest host address in the subnet's CIDR that is not in `used`.
pub fn next_free_address(subnet: &Subnet, used: &HashSet<IpAddr>) -> Option<IpAddr> {
    subnet.cidr.hosts().find(|ip| !used.contains(ip))
}

/// Random locally administered MAC in the `fa:16:3e` range.
pub fn random_mac() -> String {
    let tail: [u8; 3] = rand::random();
    format!("fa:16:3e:{:02x}:{:02x}:{:02x}", tail[0], tail[1], tail[2])
}

/// Random 128-bit identifier in 8-4-4-4-12 form.
pub fn new_id() -> String {
    let raw = hex::encode(rand::random::<[u8; 16]>());
    format!(
        "{}-{}-{}-{}-{}",
        &raw[0..8],
        &raw[8..12],
        &raw[12..16],
        &raw[16..20],
        &raw[20..32]
    )
}
