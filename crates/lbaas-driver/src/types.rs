//! Appliance-side object model.
//!
//! These are the concrete configuration objects the reconciler writes.
//! Names are already environment-prefixed and addresses already carry
//! their `%rd` suffix by the time they reach a driver.

use serde::{Deserialize, Serialize};

// ── System ────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SystemInfo {
    pub device_name: String,
    /// Software version, e.g. `12.1.2`.
    pub version: String,
    pub platform: String,
    pub serial_number: String,
    /// Provisioned modules (e.g. `ltm`).
    pub provisioned: Vec<String>,
    /// Extra management memory provisioned, in MB.
    pub provision_extramb: u32,
    /// Whether the device participates in a failover device group.
    pub ha_enabled: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceInfo {
    pub name: String,
    pub management_address: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SyncStatus {
    InSync,
    ChangesPending,
    Disconnected,
    Standalone,
    Unknown(String),
}

/// Raw counters used for the capacity score.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapacityMetrics {
    pub throughput: u64,
    pub active_connections: u64,
    pub ssl_tps: u64,
    pub node_count: u64,
    pub ssl_profiles: u64,
    pub tenants: u64,
    pub tunnels: u64,
    pub vlans: u64,
    pub route_domains: u64,
}

// ── Networking ────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Vlan {
    pub name: String,
    /// 802.1q tag; `0` for untagged (flat) networks.
    pub tag: u32,
    pub interface: Option<String>,
    pub description: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TunnelProfile {
    Vxlan,
    Gre,
}

impl TunnelProfile {
    pub fn as_str(&self) -> &'static str {
        match self {
            TunnelProfile::Vxlan => "vxlan",
            TunnelProfile::Gre => "gre",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tunnel {
    pub name: String,
    pub profile: TunnelProfile,
    pub key: u32,
    pub local_address: String,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FdbRecord {
    pub mac: String,
    pub endpoint: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelfIp {
    pub name: String,
    /// Address with route domain, no mask.
    pub address: String,
    pub prefix_len: u8,
    pub vlan: String,
    pub floating: bool,
    pub traffic_group: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnatTranslation {
    pub name: String,
    pub address: String,
    pub traffic_group: String,
}

// ── Local traffic ─────────────────────────────────────────────────

/// Load-balancing method as the appliance names it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ApplianceLbMethod {
    RoundRobin,
    LeastConnectionsMember,
    LeastConnectionsNode,
    RatioMember,
    RatioLeastConnectionsMember,
}

impl ApplianceLbMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            ApplianceLbMethod::RoundRobin => "round-robin",
            ApplianceLbMethod::LeastConnectionsMember => "least-connections-member",
            ApplianceLbMethod::LeastConnectionsNode => "least-connections-node",
            ApplianceLbMethod::RatioMember => "ratio-member",
            ApplianceLbMethod::RatioLeastConnectionsMember => "ratio-least-connections-member",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "round-robin" => ApplianceLbMethod::RoundRobin,
            "least-connections-member" => ApplianceLbMethod::LeastConnectionsMember,
            "least-connections-node" => ApplianceLbMethod::LeastConnectionsNode,
            "ratio-member" => ApplianceLbMethod::RatioMember,
            "ratio-least-connections-member" => ApplianceLbMethod::RatioLeastConnectionsMember,
            _ => return None,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppliancePool {
    pub name: String,
    pub description: String,
    pub lb_method: ApplianceLbMethod,
    /// Attached monitor names, in attachment order.
    pub monitors: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolMember {
    /// Address with route domain.
    pub address: String,
    pub port: u16,
    pub ratio: u32,
    pub enabled: bool,
}

impl PoolMember {
    /// Appliance member name, `addr:port`.
    pub fn name(&self) -> String {
        format!("{}:{}", self.address, self.port)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MonitorKind {
    GatewayIcmp,
    Tcp,
    Http,
    Https,
}

impl MonitorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MonitorKind::GatewayIcmp => "gateway-icmp",
            MonitorKind::Tcp => "tcp",
            MonitorKind::Http => "http",
            MonitorKind::Https => "https",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Monitor {
    pub name: String,
    pub kind: MonitorKind,
    pub interval: u32,
    pub timeout: u32,
    pub send: Option<String>,
    pub recv: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VirtualServerKind {
    Standard,
    FastL4,
    /// Wildcard IP forwarder (no pool).
    IpForwarding,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IpProtocol {
    Tcp,
    Udp,
    Any,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SnatSetting {
    None,
    Automap,
    Pool(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VirtualServer {
    pub name: String,
    pub description: String,
    /// Destination address with route domain.
    pub destination: String,
    pub port: u16,
    pub mask: String,
    pub ip_protocol: IpProtocol,
    pub kind: VirtualServerKind,
    pub pool: Option<String>,
    pub enabled: bool,
    pub profiles: Vec<String>,
    pub persistence: Option<String>,
    pub fallback_persistence: Option<String>,
    /// `(rule name, priority)`.
    pub rules: Vec<(String, u32)>,
    /// `0` means unlimited.
    pub connection_limit: u32,
    pub vlans: Vec<String>,
    pub snat: SnatSetting,
    /// Traffic group of the virtual address (ARP owner).
    pub traffic_group: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IRule {
    pub name: String,
    pub body: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UniversalPersistence {
    pub name: String,
    pub rule: String,
    pub timeout_secs: u32,
}

/// Pool counters as read from the appliance.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppliancePoolStats {
    pub bytes_in: u64,
    pub bytes_out: u64,
    pub active_connections: u64,
    pub total_connections: u64,
    /// Member name (`addr:port`) → monitor reports up.
    pub member_up: Vec<(String, bool)>,
}
