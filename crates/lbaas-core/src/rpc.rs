//! Plugin ↔ agent RPC contract.
//!
//! The plugin casts `AgentRequest`s one-way to the agent that owns a pool.
//! The agent calls back into the plugin through `PluginApi` to fetch
//! service views, allocate addresses, and report terminal statuses.
//!
//! The wire format is self-describing JSON: `{"method": "...", "args": {...}}`.

use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::service::LogicalService;
use crate::types::*;

// ── Plugin → agent ───────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "method", content = "args", rename_all = "snake_case")]
pub enum AgentRequest {
    CreateVip {
        vip: Vip,
        service: LogicalService,
    },
    UpdateVip {
        old_vip: Vip,
        vip: Vip,
        service: LogicalService,
    },
    DeleteVip {
        vip: Vip,
        service: LogicalService,
    },
    CreatePool {
        pool: Pool,
        service: LogicalService,
    },
    UpdatePool {
        old_pool: Pool,
        pool: Pool,
        service: LogicalService,
    },
    DeletePool {
        pool: Pool,
        service: LogicalService,
    },
    CreateMember {
        member: Member,
        service: LogicalService,
    },
    UpdateMember {
        old_member: Member,
        member: Member,
        service: LogicalService,
    },
    DeleteMember {
        member: Member,
        service: LogicalService,
    },
    CreatePoolHealthMonitor {
        health_monitor: HealthMonitor,
        pool_id: PoolId,
        service: LogicalService,
    },
    UpdateHealthMonitor {
        old_health_monitor: HealthMonitor,
        health_monitor: HealthMonitor,
        pool_id: PoolId,
        service: LogicalService,
    },
    DeletePoolHealthMonitor {
        health_monitor: HealthMonitor,
        pool_id: PoolId,
        service: LogicalService,
    },
    AgentUpdated {
        admin_state_up: bool,
    },
    TunnelUpdate {
        tunnel_ip: String,
        tunnel_type: NetworkType,
    },
    AddFdbEntries {
        fdb_entries: FdbEntries,
    },
    RemoveFdbEntries {
        fdb_entries: FdbEntries,
    },
    UpdateFdbEntries {
        fdb_entries: FdbUpdate,
    },
    ReloadPool {
        pool_id: PoolId,
    },
    GetPoolStats {
        pool: Pool,
        service: LogicalService,
    },
    Sync {
        pool_id: PoolId,
    },
}

impl AgentRequest {
    /// Operation name as used for logging and request serialization.
    pub fn operation(&self) -> &'static str {
        match self {
            AgentRequest::CreateVip { .. } => "create_vip",
            AgentRequest::UpdateVip { .. } => "update_vip",
            AgentRequest::DeleteVip { .. } => "delete_vip",
            AgentRequest::CreatePool { .. } => "create_pool",
            AgentRequest::UpdatePool { .. } => "update_pool",
            AgentRequest::DeletePool { .. } => "delete_pool",
            AgentRequest::CreateMember { .. } => "create_member",
            AgentRequest::UpdateMember { .. } => "update_member",
            AgentRequest::DeleteMember { .. } => "delete_member",
            AgentRequest::CreatePoolHealthMonitor { .. } => "create_pool_health_monitor",
            AgentRequest::UpdateHealthMonitor { .. } => "update_health_monitor",
            AgentRequest::DeletePoolHealthMonitor { .. } => "delete_pool_health_monitor",
            AgentRequest::AgentUpdated { .. } => "agent_updated",
            AgentRequest::TunnelUpdate { .. } => "tunnel_update",
            AgentRequest::AddFdbEntries { .. } => "add_fdb_entries",
            AgentRequest::RemoveFdbEntries { .. } => "remove_fdb_entries",
            AgentRequest::UpdateFdbEntries { .. } => "update_fdb_entries",
            AgentRequest::ReloadPool { .. } => "reload_pool",
            AgentRequest::GetPoolStats { .. } => "get_pool_stats",
            AgentRequest::Sync { .. } => "sync",
        }
    }

    /// The pool this request targets, if any.
    pub fn pool_id(&self) -> Option<&str> {
        match self {
            AgentRequest::CreateVip { service, .. }
            | AgentRequest::UpdateVip { service, .. }
            | AgentRequest::DeleteVip { service, .. }
            | AgentRequest::CreatePool { service, .. }
            | AgentRequest::UpdatePool { service, .. }
            | AgentRequest::DeletePool { service, .. }
            | AgentRequest::CreateMember { service, .. }
            | AgentRequest::UpdateMember { service, .. }
            | AgentRequest::DeleteMember { service, .. }
            | AgentRequest::GetPoolStats { service, .. } => Some(service.pool_id()),
            AgentRequest::CreatePoolHealthMonitor { pool_id, .. }
            | AgentRequest::UpdateHealthMonitor { pool_id, .. }
            | AgentRequest::DeletePoolHealthMonitor { pool_id, .. }
            | AgentRequest::ReloadPool { pool_id }
            | AgentRequest::Sync { pool_id } => Some(pool_id),
            _ => None,
        }
    }
}

/// L2 population forwarding entries: network id → per-network records.
pub type FdbEntries = HashMap<String, FdbNetwork>;

/// All-zero MAC marking a flooding entry for a VTEP.
pub const FLOODING_MAC: &str = "00:00:00:00:00:00";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FdbNetwork {
    pub segment_id: u32,
    pub network_type: NetworkType,
    /// VTEP address → `(mac, ip)` records reachable through it.
    pub ports: HashMap<String, Vec<(String, String)>>,
}

/// An FDB move: records in `before` are replaced by records in `after`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FdbUpdate {
    pub before: FdbEntries,
    pub after: FdbEntries,
}

// ── Agent → plugin ───────────────────────────────────────────────

/// A pool known to the plugin, as listed for resync.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolRef {
    pub pool_id: PoolId,
    pub tenant_id: TenantId,
    #[serde(default)]
    pub agent_host: Option<String>,
}

/// Request to allocate a port (address record) on a subnet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortRequest {
    pub subnet_id: String,
    pub name: String,
    /// Specific address to claim instead of the next free one.
    #[serde(default)]
    pub fixed_address: Option<String>,
    #[serde(default)]
    pub device_id: String,
    #[serde(default)]
    pub binding_host: Option<String>,
}

/// Periodic agent state report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentStateReport {
    pub binary: String,
    pub host: String,
    pub topic: String,
    pub agent_type: String,
    pub l2_population: bool,
    pub configurations: AgentConfigurations,
    /// Set on the first report after start only.
    #[serde(default)]
    pub start_flag: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AgentConfigurations {
    pub environment_prefix: String,
    pub environment_group_number: u32,
    pub global_routed_mode: bool,
    pub tunnel_types: Vec<String>,
    pub bridge_mappings: HashMap<String, String>,
    pub common_networks: HashMap<String, String>,
    pub services: usize,
    pub request_queue_depth: usize,
    pub environment_capacity_score: f64,
    pub icontrol_endpoints: HashMap<String, ApplianceEndpoint>,
    pub tunneling_ips: Vec<String>,
    pub device_drivers: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ApplianceEndpoint {
    pub device_name: String,
    pub platform: String,
    pub version: String,
    pub serial_number: String,
}

#[derive(Debug, Error)]
pub enum RpcError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("remote error: {0}")]
    Remote(String),
}

pub type RpcResult<T> = Result<T, RpcError>;

/// Callbacks the agent issues against the plugin.
#[async_trait]
pub trait PluginApi: Send + Sync {
    async fn get_service_by_pool_id(
        &self,
        pool_id: &str,
        global_routed_mode: bool,
    ) -> RpcResult<Option<LogicalService>>;

    async fn get_active_pools(&self, host: &str) -> RpcResult<Vec<PoolRef>>;
    async fn get_pending_pools(&self, host: &str) -> RpcResult<Vec<PoolRef>>;
    async fn get_all_pools(&self, host: &str) -> RpcResult<Vec<PoolRef>>;

    async fn get_port_by_name(&self, name: &str) -> RpcResult<Vec<Port>>;
    async fn create_port_on_subnet(&self, request: PortRequest) -> RpcResult<Port>;
    async fn create_port_on_subnet_with_specific_ip(
        &self,
        mut request: PortRequest,
        ip_address: &str,
    ) -> RpcResult<Port> {
        request.fixed_address = Some(ip_address.to_string());
        self.create_port_on_subnet(request).await
    }
    async fn delete_port_by_name(&self, name: &str) -> RpcResult<()>;
    async fn allocate_fixed_address_on_subnet(
        &self,
        subnet_id: &str,
        port_id: &str,
    ) -> RpcResult<String>;
    async fn deallocate_fixed_address_on_subnet(
        &self,
        subnet_id: &str,
        port_id: &str,
        address: &str,
    ) -> RpcResult<()>;
    async fn add_allowed_address(&self, port_id: &str, address: &str) -> RpcResult<()>;
    async fn remove_allowed_address(&self, port_id: &str, address: &str) -> RpcResult<()>;

    async fn update_vip_status(
        &self,
        vip_id: &str,
        status: Status,
        description: Option<String>,
    ) -> RpcResult<()>;
    async fn update_pool_status(
        &self,
        pool_id: &str,
        status: Status,
        description: Option<String>,
    ) -> RpcResult<()>;
    async fn update_member_status(
        &self,
        member_id: &str,
        status: Status,
        description: Option<String>,
    ) -> RpcResult<()>;
    async fn update_health_monitor_status(
        &self,
        monitor_id: &str,
        pool_id: &str,
        status: Status,
        description: Option<String>,
    ) -> RpcResult<()>;
    async fn update_pool_stats(&self, pool_id: &str, stats: PoolStats) -> RpcResult<()>;

    async fn vip_destroyed(&self, vip_id: &str) -> RpcResult<()>;
    async fn pool_destroyed(&self, pool_id: &str) -> RpcResult<()>;
    async fn member_destroyed(&self, member_id: &str) -> RpcResult<()>;
    async fn health_monitor_destroyed(&self, monitor_id: &str, pool_id: &str) -> RpcResult<()>;

    async fn report_state(&self, report: AgentStateReport) -> RpcResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::fixtures;

    #[test]
    fn request_wire_format_is_method_and_args() {
        let request = AgentRequest::ReloadPool {
            pool_id: "p1".into(),
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["method"], "reload_pool");
        assert_eq!(json["args"]["pool_id"], "p1");
        assert_eq!(request.operation(), "reload_pool");
    }

    #[test]
    fn pool_id_comes_from_service_or_args() {
        let service = fixtures::service();
        let member = service.members[0].member.clone();
        let request = AgentRequest::CreateMember { member, service };
        assert_eq!(request.pool_id(), Some("p1"));
        assert_eq!(request.operation(), "create_member");

        let request = AgentRequest::AgentUpdated { admin_state_up: true };
        assert_eq!(request.pool_id(), None);
    }
}
