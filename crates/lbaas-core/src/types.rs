//! Domain types for load-balancing objects and the networks they live on.
//!
//! These mirror the control plane's records. They are serialized as JSON
//! both in the plugin-side store and on the plugin↔agent RPC boundary.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Unique identifier for a pool (and therefore a logical service).
pub type PoolId = String;

/// Opaque tenant identifier.
pub type TenantId = String;

// ── Status ────────────────────────────────────────────────────────

/// Provisioning status shared by every load-balancing object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    #[default]
    PendingCreate,
    PendingUpdate,
    PendingDelete,
    Active,
    Inactive,
    Error,
    Created,
}

impl Status {
    pub fn as_str(&self) -> &'static str {
        match self {
            Status::PendingCreate => "pending_create",
            Status::PendingUpdate => "pending_update",
            Status::PendingDelete => "pending_delete",
            Status::Active => "active",
            Status::Inactive => "inactive",
            Status::Error => "error",
            Status::Created => "created",
        }
    }

    /// Whether the object still has work queued against it.
    pub fn is_pending(&self) -> bool {
        matches!(
            self,
            Status::PendingCreate | Status::PendingUpdate | Status::PendingDelete
        )
    }

    /// Terminal status for a live object after a successful reconcile.
    pub fn settled(admin_state_up: bool) -> Self {
        if admin_state_up {
            Status::Active
        } else {
            Status::Inactive
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Enumerations ──────────────────────────────────────────────────

/// Load-balancing method requested for a pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum LbMethod {
    #[default]
    RoundRobin,
    LeastConnections,
    SourceIp,
    Ratio,
    RatioLeastConnections,
}

/// Traffic protocol of a pool or VIP.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum Protocol {
    #[default]
    Tcp,
    Udp,
    Http,
    Https,
    Icmp,
}

impl Protocol {
    pub fn is_http(&self) -> bool {
        matches!(self, Protocol::Http | Protocol::Https)
    }
}

/// Session persistence mode of a VIP.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PersistenceType {
    SourceIp,
    HttpCookie,
    AppCookie,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionPersistence {
    #[serde(rename = "type")]
    pub kind: PersistenceType,
    /// Only meaningful for `app_cookie`.
    #[serde(default)]
    pub cookie_name: Option<String>,
}

/// Health monitor probe type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum MonitorType {
    Ping,
    Tcp,
    Http,
    Https,
}

/// L2 segmentation type of a network.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NetworkType {
    Flat,
    Vlan,
    Vxlan,
    Gre,
}

impl NetworkType {
    pub fn is_tunnel(&self) -> bool {
        matches!(self, NetworkType::Vxlan | NetworkType::Gre)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            NetworkType::Flat => "flat",
            NetworkType::Vlan => "vlan",
            NetworkType::Vxlan => "vxlan",
            NetworkType::Gre => "gre",
        }
    }
}

// ── Load-balancing objects ────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pool {
    pub id: PoolId,
    pub tenant_id: TenantId,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub lb_method: LbMethod,
    #[serde(default)]
    pub protocol: Protocol,
    #[serde(default = "default_true")]
    pub admin_state_up: bool,
    #[serde(default)]
    pub status: Status,
    pub subnet_id: String,
    #[serde(default)]
    pub vip_id: Option<String>,
    /// Monitors associated with this pool, in association order.
    #[serde(default)]
    pub health_monitor_ids: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Vip {
    pub id: String,
    pub tenant_id: TenantId,
    pub pool_id: PoolId,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub address: String,
    pub protocol: Protocol,
    pub protocol_port: u16,
    #[serde(default = "default_true")]
    pub admin_state_up: bool,
    /// `-1` or `0` means unlimited.
    #[serde(default = "default_connection_limit")]
    pub connection_limit: i64,
    #[serde(default)]
    pub session_persistence: Option<SessionPersistence>,
    pub subnet_id: String,
    #[serde(default)]
    pub port_id: Option<String>,
    #[serde(default)]
    pub status: Status,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Member {
    pub id: String,
    pub tenant_id: TenantId,
    pub pool_id: PoolId,
    pub address: String,
    pub protocol_port: u16,
    #[serde(default = "default_weight")]
    pub weight: u32,
    #[serde(default = "default_true")]
    pub admin_state_up: bool,
    #[serde(default)]
    pub status: Status,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthMonitor {
    pub id: String,
    pub tenant_id: TenantId,
    #[serde(rename = "type")]
    pub kind: MonitorType,
    pub delay: u32,
    pub timeout: u32,
    pub max_retries: u32,
    #[serde(default)]
    pub url_path: Option<String>,
    #[serde(default)]
    pub http_method: Option<String>,
    #[serde(default)]
    pub expected_codes: Option<String>,
    #[serde(default = "default_true")]
    pub admin_state_up: bool,
    /// Status of this monitor's association with the pool being serviced.
    #[serde(default)]
    pub status: Status,
}

// ── Networking ────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Network {
    pub id: String,
    #[serde(default)]
    pub tenant_id: TenantId,
    pub network_type: NetworkType,
    #[serde(default)]
    pub physical_network: Option<String>,
    #[serde(default)]
    pub segmentation_id: Option<u32>,
    #[serde(default)]
    pub shared: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Subnet {
    pub id: String,
    pub tenant_id: TenantId,
    pub network_id: String,
    pub cidr: ipnet::IpNet,
    #[serde(default)]
    pub gateway_ip: Option<String>,
    #[serde(default)]
    pub shared: bool,
}

impl Subnet {
    /// Whether a bare address (no `%rd` suffix) falls inside this subnet.
    pub fn contains(&self, address: &str) -> bool {
        address
            .parse::<std::net::IpAddr>()
            .map(|ip| self.cidr.contains(&ip))
            .unwrap_or(false)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FixedIp {
    pub subnet_id: String,
    pub ip_address: String,
}

/// An allocated address record on the control plane.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Port {
    pub id: String,
    #[serde(default)]
    pub name: String,
    pub network_id: String,
    pub tenant_id: TenantId,
    #[serde(default)]
    pub mac_address: String,
    pub fixed_ips: Vec<FixedIp>,
    /// Owner identifier (hash of the owning agent host for agent ports).
    #[serde(default)]
    pub device_id: String,
    #[serde(default)]
    pub device_owner: String,
    #[serde(default)]
    pub binding_host: Option<String>,
    #[serde(default)]
    pub allowed_address_pairs: Vec<String>,
}

impl Port {
    pub fn subnet_id(&self) -> Option<&str> {
        self.fixed_ips.first().map(|ip| ip.subnet_id.as_str())
    }

    pub fn first_ip(&self) -> Option<&str> {
        self.fixed_ips.first().map(|ip| ip.ip_address.as_str())
    }
}

// ── Statistics ────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PoolStats {
    pub bytes_in: u64,
    pub bytes_out: u64,
    pub active_connections: u64,
    pub total_connections: u64,
    /// Per-member operating status keyed by member id.
    #[serde(default)]
    pub members: std::collections::HashMap<String, Status>,
}

fn default_true() -> bool {
    true
}

fn default_weight() -> u32 {
    1
}

fn default_connection_limit() -> i64 {
    -1
}
