//! Agent → plugin callbacks over the state store.
//!
//! Every callback is a short synchronous store transaction; address
//! allocation is additionally serialized so two agents never receive the
//! same address.

use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use lbaas_core::rpc::{AgentStateReport, PoolRef, PortRequest};
use lbaas_core::{
    FixedIp, LogicalService, PluginApi, Pool, PoolStats, Port, RpcResult, Status,
};
use lbaas_state::{AgentRecord, StateStore};
use lbaas_scheduler::epoch_secs;
use tracing::{debug, info};

use crate::address::{addresses_in_use, allocated_addresses, new_id, next_free_address, random_mac};
use crate::assembler::ServiceAssembler;
use crate::error::{PluginError, PluginResult};

/// Owner recorded on ports the plugin allocates for agents.
pub const DEVICE_OWNER: &str = "network:lbaas";

pub struct PluginCallbacks {
    state: StateStore,
    assembler: Arc<ServiceAssembler>,
    allocation: Mutex<()>,
}

impl PluginCallbacks {
    pub fn new(state: StateStore, assembler: Arc<ServiceAssembler>) -> Self {
        Self {
            state,
            assembler,
            allocation: Mutex::new(()),
        }
    }

    // ── Pools by host ──────────────────────────────────────────────

    fn bound_pools(&self, host: &str) -> PluginResult<Vec<Pool>> {
        let Some(agent) = self.state.get_agent_by_host(host)? else {
            debug!(%host, "unknown agent host");
            return Ok(Vec::new());
        };
        let mut pools = Vec::new();
        for binding in self.state.bindings_for_agent(&agent.id)? {
            if let Some(pool) = self.state.get_pool(&binding.pool_id)? {
                pools.push(pool);
            }
        }
        Ok(pools)
    }

    fn pool_refs(&self, host: &str, filter: impl Fn(&Pool) -> bool) -> PluginResult<Vec<PoolRef>> {
        Ok(self
            .bound_pools(host)?
            .into_iter()
            .filter(|p| filter(p))
            .map(|p| PoolRef {
                pool_id: p.id,
                tenant_id: p.tenant_id,
                agent_host: Some(host.to_string()),
            })
            .collect())
    }

    // ── Ports and addresses ────────────────────────────────────────

    /// Allocate a port on a subnet. A port with the same name already on
    /// that subnet is returned as is.
    pub fn create_port(&self, request: PortRequest) -> PluginResult<Port> {
        let _guard = self.allocation.lock().unwrap_or_else(PoisonError::into_inner);

        if let Some(existing) = self
            .state
            .ports_by_name(&request.name)?
            .into_iter()
            .find(|p| p.subnet_id() == Some(request.subnet_id.as_str()))
        {
            return Ok(existing);
        }

        let subnet = self
            .state
            .get_subnet(&request.subnet_id)?
            .ok_or_else(|| PluginError::not_found("subnet", &request.subnet_id))?;
        let ports = self.state.list_ports()?;
        let address = match request.fixed_address.as_deref() {
            Some(wanted) => {
                let ip: std::net::IpAddr = wanted
                    .parse()
                    .map_err(|_| PluginError::Invalid(format!("bad address {wanted}")))?;
                if !subnet.cidr.contains(&ip) {
                    return Err(PluginError::Invalid(format!(
                        "{wanted} is outside {}",
                        subnet.cidr
                    )));
                }
                // Only other ports block an explicit request; the gateway self-IP
                // claims the subnet gateway address this way.
                if allocated_addresses(&subnet, &ports).contains(&ip) {
                    return Err(PluginError::AddressInUse {
                        subnet_id: subnet.id.clone(),
                        address: wanted.to_string(),
                    });
                }
                ip
            }
            None => next_free_address(&subnet, &addresses_in_use(&subnet, &ports))
                .ok_or_else(|| PluginError::AddressExhausted(subnet.id.clone()))?,
        };

        let port = Port {
            id: new_id(),
            name: request.name,
            network_id: subnet.network_id.clone(),
            tenant_id: subnet.tenant_id.clone(),
            mac_address: random_mac(),
            fixed_ips: vec![FixedIp {
                subnet_id: subnet.id.clone(),
                ip_address: address.to_string(),
            }],
            device_id: request.device_id,
            device_owner: DEVICE_OWNER.to_string(),
            binding_host: request.binding_host,
            allowed_address_pairs: Vec::new(),
        };
        self.state.put_port(&port)?;
        info!(port = %port.name, subnet_id = %subnet.id, %address, "port allocated");
        Ok(port)
    }

    pub fn delete_ports_named(&self, name: &str) -> PluginResult<()> {
        let ports = self.state.ports_by_name(name)?;
        if ports.is_empty() {
            return Err(PluginError::not_found("port", name));
        }
        for port in ports {
            self.state.delete_port(&port.id)?;
            info!(port = %name, port_id = %port.id, "port released");
        }
        Ok(())
    }

    fn allocate_address(&self, subnet_id: &str, port_id: &str) -> PluginResult<String> {
        let _guard = self.allocation.lock().unwrap_or_else(PoisonError::into_inner);
        let mut port = self.port(port_id)?;
        let subnet = self
            .state
            .get_subnet(subnet_id)?
            .ok_or_else(|| PluginError::not_found("subnet", subnet_id))?;
        let used = addresses_in_use(&subnet, &self.state.list_ports()?);
        let address = next_free_address(&subnet, &used)
            .ok_or_else(|| PluginError::AddressExhausted(subnet.id.clone()))?
            .to_string();
        port.fixed_ips.push(FixedIp {
            subnet_id: subnet.id.clone(),
            ip_address: address.clone(),
        });
        self.state.put_port(&port)?;
        debug!(%port_id, %subnet_id, %address, "fixed address added");
        Ok(address)
    }

    fn deallocate_address(&self, subnet_id: &str, port_id: &str, address: &str) -> PluginResult<()> {
        let _guard = self.allocation.lock().unwrap_or_else(PoisonError::into_inner);
        let mut port = self.port(port_id)?;
        port.fixed_ips
            .retain(|ip| !(ip.subnet_id == subnet_id && ip.ip_address == address));
        self.state.put_port(&port)?;
        debug!(%port_id, %subnet_id, %address, "fixed address released");
        Ok(())
    }

    fn edit_allowed_addresses(&self, port_id: &str, edit: impl FnOnce(&mut Vec<String>)) -> PluginResult<()> {
        let mut port = self.port(port_id)?;
        edit(&mut port.allowed_address_pairs);
        self.state.put_port(&port)?;
        Ok(())
    }

    fn port(&self, port_id: &str) -> PluginResult<Port> {
        self.state
            .get_port(port_id)?
            .ok_or_else(|| PluginError::not_found("port", port_id))
    }

    // ── Status ─────────────────────────────────────────────────────

    fn set_pool_status(&self, pool_id: &str, status: Status, note: Option<&str>) -> PluginResult<()> {
        let mut pool = self
            .state
            .get_pool(pool_id)?
            .ok_or_else(|| PluginError::not_found("pool", pool_id))?;
        pool.status = status;
        self.state.put_pool(&pool)?;
        self.state.set_status_note("pool", pool_id, note)?;
        Ok(())
    }

    fn set_vip_status(&self, vip_id: &str, status: Status, note: Option<&str>) -> PluginResult<()> {
        let mut vip = self
            .state
            .get_vip(vip_id)?
            .ok_or_else(|| PluginError::not_found("vip", vip_id))?;
        vip.status = status;
        self.state.put_vip(&vip)?;
        self.state.set_status_note("vip", vip_id, note)?;
        Ok(())
    }

    fn set_member_status(&self, member_id: &str, status: Status, note: Option<&str>) -> PluginResult<()> {
        let mut member = self
            .state
            .get_member(member_id)?
            .ok_or_else(|| PluginError::not_found("member", member_id))?;
        member.status = status;
        self.state.put_member(&member)?;
        self.state.set_status_note("member", member_id, note)?;
        Ok(())
    }

    fn set_monitor_status(
        &self,
        monitor_id: &str,
        pool_id: &str,
        status: Status,
        note: Option<String>,
    ) -> PluginResult<()> {
        let mut assoc = self
            .state
            .get_pool_monitor(pool_id, monitor_id)?
            .ok_or_else(|| PluginError::not_found("pool health monitor", format!("{pool_id}:{monitor_id}")))?;
        assoc.status = status;
        assoc.status_description = note;
        self.state.put_pool_monitor(&assoc)?;
        Ok(())
    }

    fn record_stats(&self, pool_id: &str, stats: &PoolStats) -> PluginResult<()> {
        if self.state.get_pool(pool_id)?.is_none() {
            return Err(PluginError::not_found("pool", pool_id));
        }
        self.state.put_pool_stats(pool_id, stats)?;
        for (member_id, status) in &stats.members {
            let Some(mut member) = self.state.get_member(member_id)? else {
                continue;
            };
            if member.status.is_pending() || member.status == *status {
                continue;
            }
            member.status = *status;
            self.state.put_member(&member)?;
        }
        Ok(())
    }

    // ── Destroyed ──────────────────────────────────────────────────

    fn destroy_vip(&self, vip_id: &str) -> PluginResult<()> {
        let Some(vip) = self.state.get_vip(vip_id)? else {
            return Ok(());
        };
        if let Some(port_id) = vip.port_id.as_deref() {
            self.state.delete_port(port_id)?;
        }
        if let Some(mut pool) = self.state.get_pool(&vip.pool_id)? {
            if pool.vip_id.as_deref() == Some(vip_id) {
                pool.vip_id = None;
                self.state.put_pool(&pool)?;
            }
        }
        self.state.delete_vip(vip_id)?;
        self.state.set_status_note("vip", vip_id, None)?;
        info!(%vip_id, "vip removed");
        Ok(())
    }

    pub(crate) fn destroy_pool(&self, pool_id: &str) -> PluginResult<()> {
        if let Some(pool) = self.state.get_pool(pool_id)? {
            if let Some(vip_id) = pool.vip_id.as_deref() {
                self.destroy_vip(vip_id)?;
            }
        }
        for member in self.state.list_members_for_pool(pool_id)? {
            self.state.delete_member(&member.id)?;
        }
        self.state.delete_binding(pool_id)?;
        self.state.delete_pool(pool_id)?;
        self.state.set_status_note("pool", pool_id, None)?;
        info!(%pool_id, "pool removed");
        Ok(())
    }

    fn destroy_pool_monitor(&self, monitor_id: &str, pool_id: &str) -> PluginResult<()> {
        self.state.delete_pool_monitor(pool_id, monitor_id)?;
        if let Some(mut pool) = self.state.get_pool(pool_id)? {
            let before = pool.health_monitor_ids.len();
            pool.health_monitor_ids.retain(|id| id != monitor_id);
            if pool.health_monitor_ids.len() != before {
                self.state.put_pool(&pool)?;
            }
        }
        info!(%pool_id, %monitor_id, "pool health monitor removed");
        Ok(())
    }

    // ── Agent registration ─────────────────────────────────────────

    /// Register or refresh an agent from its state report.
    pub fn register(&self, report: &AgentStateReport, now: u64) -> PluginResult<AgentRecord> {
        let record = match self.state.get_agent_by_host(&report.host)? {
            Some(mut existing) => {
                existing.refresh(report, now);
                existing
            }
            None => {
                info!(host = %report.host, "agent registered");
                AgentRecord::from_report(report, now)
            }
        };
        self.state.put_agent(&record)?;
        debug!(
            host = %record.host,
            services = record.configurations.services,
            capacity = record.capacity_score(),
            "agent state reported"
        );
        Ok(record)
    }
}

#[async_trait]
impl PluginApi for PluginCallbacks {
    async fn get_service_by_pool_id(
        &self,
        pool_id: &str,
        global_routed_mode: bool,
    ) -> RpcResult<Option<LogicalService>> {
        Ok(self.assembler.assemble_with(pool_id, global_routed_mode)?)
    }

    async fn get_active_pools(&self, host: &str) -> RpcResult<Vec<PoolRef>> {
        Ok(self.pool_refs(host, |p| !p.status.is_pending())?)
    }

    async fn get_pending_pools(&self, host: &str) -> RpcResult<Vec<PoolRef>> {
        Ok(self.pool_refs(host, |p| p.status.is_pending())?)
    }

    async fn get_all_pools(&self, host: &str) -> RpcResult<Vec<PoolRef>> {
        Ok(self.pool_refs(host, |_| true)?)
    }

    async fn get_port_by_name(&self, name: &str) -> RpcResult<Vec<Port>> {
        Ok(self.state.ports_by_name(name).map_err(PluginError::from)?)
    }

    async fn create_port_on_subnet(&self, request: PortRequest) -> RpcResult<Port> {
        Ok(self.create_port(request)?)
    }

    async fn delete_port_by_name(&self, name: &str) -> RpcResult<()> {
        Ok(self.delete_ports_named(name)?)
    }

    async fn allocate_fixed_address_on_subnet(
        &self,
        subnet_id: &str,
        port_id: &str,
    ) -> RpcResult<String> {
        Ok(self.allocate_address(subnet_id, port_id)?)
    }

    async fn deallocate_fixed_address_on_subnet(
        &self,
        subnet_id: &str,
        port_id: &str,
        address: &str,
    ) -> RpcResult<()> {
        Ok(self.deallocate_address(subnet_id, port_id, address)?)
    }

    async fn add_allowed_address(&self, port_id: &str, address: &str) -> RpcResult<()> {
        Ok(self.edit_allowed_addresses(port_id, |pairs| {
            if !pairs.iter().any(|a| a == address) {
                pairs.push(address.to_string());
            }
        })?)
    }

    async fn remove_allowed_address(&self, port_id: &str, address: &str) -> RpcResult<()> {
        Ok(self.edit_allowed_addresses(port_id, |pairs| pairs.retain(|a| a != address))?)
    }

    async fn update_vip_status(
        &self,
        vip_id: &str,
        status: Status,
        description: Option<String>,
    ) -> RpcResult<()> {
        Ok(self.set_vip_status(vip_id, status, description.as_deref())?)
    }

    async fn update_pool_status(
        &self,
        pool_id: &str,
        status: Status,
        description: Option<String>,
    ) -> RpcResult<()> {
        Ok(self.set_pool_status(pool_id, status, description.as_deref())?)
    }

    async fn update_member_status(
        &self,
        member_id: &str,
        status: Status,
        description: Option<String>,
    ) -> RpcResult<()> {
        Ok(self.set_member_status(member_id, status, description.as_deref())?)
    }

    async fn update_health_monitor_status(
        &self,
        monitor_id: &str,
        pool_id: &str,
        status: Status,
        description: Option<String>,
    ) -> RpcResult<()> {
        Ok(self.set_monitor_status(monitor_id, pool_id, status, description)?)
    }

    async fn update_pool_stats(&self, pool_id: &str, stats: PoolStats) -> RpcResult<()> {
        Ok(self.record_stats(pool_id, &stats)?)
    }

    async fn vip_destroyed(&self, vip_id: &str) -> RpcResult<()> {
        Ok(self.destroy_vip(vip_id)?)
    }

    async fn pool_destroyed(&self, pool_id: &str) -> RpcResult<()> {
        Ok(self.destroy_pool(pool_id)?)
    }

    async fn member_destroyed(&self, member_id: &str) -> RpcResult<()> {
        self.state
            .delete_member(member_id)
            .map_err(PluginError::from)?;
        self.state
            .set_status_note("member", member_id, None)
            .map_err(PluginError::from)?;
        Ok(())
    }

    async fn health_monitor_destroyed(&self, monitor_id: &str, pool_id: &str) -> RpcResult<()> {
        Ok(self.destroy_pool_monitor(monitor_id, pool_id)?)
    }

    async fn report_state(&self, report: AgentStateReport) -> RpcResult<()> {
        self.register(&report, epoch_secs())?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::*;
    use lbaas_core::PluginConfig;

    fn callbacks(state: &StateStore) -> PluginCallbacks {
        let assembler = Arc::new(ServiceAssembler::new(state.clone(), &PluginConfig::default()));
        PluginCallbacks::new(state.clone(), assembler)
    }

    fn request(name: &str, subnet_id: &str) -> PortRequest {
        PortRequest {
            subnet_id: subnet_id.into(),
            name: name.into(),
            fixed_address: None,
            device_id: "dev".into(),
            binding_host: Some("agent-1".into()),
        }
    }

    #[tokio::test]
    async fn ports_take_lowest_free_address() {
        let state = StateStore::open_in_memory().unwrap();
        seed_web_service(&state);
        let mut s0 = state.get_subnet("s0").unwrap().unwrap();
        s0.gateway_ip = Some("10.0.0.1".into());
        state.put_subnet(&s0).unwrap();
        let cb = callbacks(&state);

        let a = cb.create_port_on_subnet(request("local-a", "s0")).await.unwrap();
        let b = cb.create_port_on_subnet(request("local-b", "s0")).await.unwrap();
        assert_eq!(a.first_ip(), Some("10.0.0.2"));
        assert_eq!(b.first_ip(), Some("10.0.0.3"));
        assert_eq!(a.network_id, "n0");
        assert_eq!(a.device_owner, DEVICE_OWNER);

        let again = cb.create_port_on_subnet(request("local-a", "s0")).await.unwrap();
        assert_eq!(again.id, a.id);
    }

    #[tokio::test]
    async fn specific_address_must_be_free_and_in_subnet() {
        let state = StateStore::open_in_memory().unwrap();
        seed_web_service(&state);
        let cb = callbacks(&state);

        let port = cb
            .create_port_on_subnet_with_specific_ip(request("snat-1", "s0"), "10.0.0.50")
            .await
            .unwrap();
        assert_eq!(port.first_ip(), Some("10.0.0.50"));

        let taken = cb
            .create_port_on_subnet_with_specific_ip(request("snat-2", "s0"), "10.0.0.100")
            .await;
        assert!(taken.is_err());
        let outside = cb
            .create_port_on_subnet_with_specific_ip(request("snat-3", "s0"), "10.9.9.9")
            .await;
        assert!(outside.is_err());
    }

    #[tokio::test]
    async fn gateway_address_can_be_claimed_once() {
        let state = StateStore::open_in_memory().unwrap();
        seed_web_service(&state);
        let mut s1 = state.get_subnet("s1").unwrap().unwrap();
        s1.gateway_ip = Some("10.0.1.1".into());
        state.put_subnet(&s1).unwrap();
        let cb = callbacks(&state);

        let gateway = cb
            .create_port_on_subnet_with_specific_ip(request("gw-s1", "s1"), "10.0.1.1")
            .await
            .unwrap();
        assert_eq!(gateway.first_ip(), Some("10.0.1.1"));

        let local = cb.create_port_on_subnet(request("local-a", "s1")).await.unwrap();
        assert_eq!(local.first_ip(), Some("10.0.1.2"));

        let again = cb
            .create_port_on_subnet_with_specific_ip(request("gw-other", "s1"), "10.0.1.1")
            .await;
        assert!(again.is_err());
    }

    #[tokio::test]
    async fn delete_by_name_reports_missing() {
        let state = StateStore::open_in_memory().unwrap();
        seed_web_service(&state);
        let cb = callbacks(&state);

        cb.create_port_on_subnet(request("local-a", "s0")).await.unwrap();
        cb.delete_port_by_name("local-a").await.unwrap();
        assert!(cb.get_port_by_name("local-a").await.unwrap().is_empty());
        assert!(matches!(
            cb.delete_port_by_name("local-a").await,
            Err(lbaas_core::RpcError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn fixed_and_allowed_addresses() {
        let state = StateStore::open_in_memory().unwrap();
        seed_web_service(&state);
        let cb = callbacks(&state);

        let address = cb.allocate_fixed_address_on_subnet("s0", "vip-port").await.unwrap();
        assert_eq!(address, "10.0.0.1");
        assert_eq!(state.get_port("vip-port").unwrap().unwrap().fixed_ips.len(), 2);
        cb.deallocate_fixed_address_on_subnet("s0", "vip-port", &address).await.unwrap();
        assert_eq!(state.get_port("vip-port").unwrap().unwrap().fixed_ips.len(), 1);

        cb.add_allowed_address("vip-port", "10.0.0.200").await.unwrap();
        cb.add_allowed_address("vip-port", "10.0.0.200").await.unwrap();
        let port = state.get_port("vip-port").unwrap().unwrap();
        assert_eq!(port.allowed_address_pairs, vec!["10.0.0.200".to_string()]);
        cb.remove_allowed_address("vip-port", "10.0.0.200").await.unwrap();
        assert!(state.get_port("vip-port").unwrap().unwrap().allowed_address_pairs.is_empty());
    }

    #[tokio::test]
    async fn status_updates_carry_descriptions() {
        let state = StateStore::open_in_memory().unwrap();
        seed_web_service(&state);
        let cb = callbacks(&state);

        cb.update_pool_status("p1", Status::Error, Some("vip: timed out".into()))
            .await
            .unwrap();
        assert_eq!(state.get_pool("p1").unwrap().unwrap().status, Status::Error);
        assert_eq!(
            state.status_note("pool", "p1").unwrap().as_deref(),
            Some("vip: timed out")
        );
        cb.update_pool_status("p1", Status::Active, None).await.unwrap();
        assert!(state.status_note("pool", "p1").unwrap().is_none());

        cb.update_health_monitor_status("m1", "p1", Status::Inactive, None)
            .await
            .unwrap();
        let assoc = state.get_pool_monitor("p1", "m1").unwrap().unwrap();
        assert_eq!(assoc.status, Status::Inactive);

        assert!(cb.update_member_status("nope", Status::Active, None).await.is_err());
    }

    #[tokio::test]
    async fn stats_update_member_operating_status() {
        let state = StateStore::open_in_memory().unwrap();
        seed_web_service(&state);
        let cb = callbacks(&state);

        let mut stats = PoolStats {
            bytes_in: 10,
            ..PoolStats::default()
        };
        stats.members.insert("mb1".into(), Status::Inactive);
        cb.update_pool_stats("p1", stats).await.unwrap();

        assert_eq!(state.get_pool_stats("p1").unwrap().unwrap().bytes_in, 10);
        assert_eq!(state.get_member("mb1").unwrap().unwrap().status, Status::Inactive);
        assert_eq!(state.get_member("mb2").unwrap().unwrap().status, Status::Active);
    }

    #[tokio::test]
    async fn destroyed_callbacks_remove_rows() {
        let state = StateStore::open_in_memory().unwrap();
        seed_web_service(&state);
        state.bind_pool_if_absent("p1", "agent-1", 1).unwrap();
        let cb = callbacks(&state);

        cb.health_monitor_destroyed("m1", "p1").await.unwrap();
        assert!(state.get_pool_monitor("p1", "m1").unwrap().is_none());
        assert!(state.get_pool("p1").unwrap().unwrap().health_monitor_ids.is_empty());
        // Shared monitors outlive their associations.
        assert!(state.get_health_monitor("m1").unwrap().is_some());

        cb.vip_destroyed("v1").await.unwrap();
        assert!(state.get_vip("v1").unwrap().is_none());
        assert!(state.get_port("vip-port").unwrap().is_none());
        assert!(state.get_pool("p1").unwrap().unwrap().vip_id.is_none());

        cb.member_destroyed("mb1").await.unwrap();
        cb.pool_destroyed("p1").await.unwrap();
        assert!(state.get_pool("p1").unwrap().is_none());
        assert!(state.get_member("mb2").unwrap().is_none());
        assert!(state.get_binding("p1").unwrap().is_none());

        // Repeated destroys are harmless.
        cb.pool_destroyed("p1").await.unwrap();
        cb.vip_destroyed("v1").await.unwrap();
    }

    #[tokio::test]
    async fn report_state_registers_then_refreshes() {
        let state = StateStore::open_in_memory().unwrap();
        let cb = callbacks(&state);

        cb.report_state(report("agent-1", &["192.0.2.10"])).await.unwrap();
        let first = state.get_agent_by_host("agent-1").unwrap().unwrap();
        assert!(first.admin_state_up);

        let mut operator = first.clone();
        operator.admin_state_up = false;
        state.put_agent(&operator).unwrap();

        let mut later = report("agent-1", &["192.0.2.11"]);
        later.start_flag = false;
        cb.report_state(later).await.unwrap();
        let refreshed = state.get_agent_by_host("agent-1").unwrap().unwrap();
        assert!(!refreshed.admin_state_up);
        assert_eq!(refreshed.tunneling_ips(), ["192.0.2.11".to_string()]);
        assert_eq!(refreshed.started_at, first.started_at);
    }

    #[tokio::test]
    async fn pools_are_listed_per_host_by_status() {
        let state = StateStore::open_in_memory().unwrap();
        seed_web_service(&state);
        let mut p2 = pool("p2");
        p2.status = Status::PendingCreate;
        state.put_pool(&p2).unwrap();
        register_agent(&state, "agent-1", &[]);
        state.bind_pool_if_absent("p1", "agent-1", 1).unwrap();
        state.bind_pool_if_absent("p2", "agent-1", 1).unwrap();
        let cb = callbacks(&state);

        let active = cb.get_active_pools("agent-1").await.unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].pool_id, "p1");
        assert_eq!(active[0].agent_host.as_deref(), Some("agent-1"));
        let pending = cb.get_pending_pools("agent-1").await.unwrap();
        assert_eq!(pending[0].pool_id, "p2");
        assert_eq!(cb.get_all_pools("agent-1").await.unwrap().len(), 2);
        assert!(cb.get_all_pools("agent-9").await.unwrap().is_empty());
    }
}
