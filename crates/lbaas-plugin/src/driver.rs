//! Plugin driver: control-plane mutations → store → bind → assemble → cast.
//!
//! Every mutation is written to the store first with a pending status, so
//! the agent's view and the control plane agree before the agent acts.
//! Terminal statuses arrive later through [`PluginCallbacks`].

use std::sync::Arc;

use lbaas_core::rpc::PortRequest;
use lbaas_core::{
    AgentRequest, HealthMonitor, LogicalService, Member, PluginConfig, Pool, PoolStats, Status,
    Vip,
};
use lbaas_scheduler::AgentScheduler;
use lbaas_state::{AgentRecord, PoolMonitorAssociation, StateStore};
use tracing::{info, warn};

use crate::assembler::ServiceAssembler;
use crate::callbacks::PluginCallbacks;
use crate::error::{PluginError, PluginResult};
use crate::transport::AgentTransport;

pub struct PluginDriver {
    state: StateStore,
    scheduler: AgentScheduler,
    assembler: Arc<ServiceAssembler>,
    callbacks: Arc<PluginCallbacks>,
    transport: Arc<dyn AgentTransport>,
}

impl PluginDriver {
    pub fn new(state: StateStore, config: PluginConfig, transport: Arc<dyn AgentTransport>) -> Self {
        let assembler = Arc::new(ServiceAssembler::new(state.clone(), &config));
        let callbacks = Arc::new(PluginCallbacks::new(state.clone(), Arc::clone(&assembler)));
        Self {
            scheduler: AgentScheduler::new(state.clone(), config),
            state,
            assembler,
            callbacks,
            transport,
        }
    }

    pub fn state(&self) -> &StateStore {
        &self.state
    }

    pub fn assembler(&self) -> &Arc<ServiceAssembler> {
        &self.assembler
    }

    /// The callback surface agents talk to.
    pub fn callbacks(&self) -> Arc<PluginCallbacks> {
        Arc::clone(&self.callbacks)
    }

    pub fn scheduler(&self) -> &AgentScheduler {
        &self.scheduler
    }

    // ── Pools ──────────────────────────────────────────────────────

    pub async fn create_pool(&self, mut pool: Pool) -> PluginResult<Pool> {
        self.require_subnet(&pool.subnet_id)?;
        if self.state.get_pool(&pool.id)?.is_some() {
            return Err(PluginError::Invalid(format!("pool {} already exists", pool.id)));
        }
        pool.status = Status::PendingCreate;
        pool.vip_id = None;
        pool.health_monitor_ids.clear();
        self.state.put_pool(&pool)?;

        let created = pool.clone();
        self.cast_for_pool(&pool.id, move |service| AgentRequest::CreatePool {
            pool: created,
            service,
        })
        .await?;
        Ok(pool)
    }

    /// Replace a pool's mutable fields. VIP and monitor links are kept.
    pub async fn update_pool(&self, mut pool: Pool) -> PluginResult<Pool> {
        let old_pool = self.pool(&pool.id)?;
        pool.tenant_id = old_pool.tenant_id.clone();
        pool.subnet_id = old_pool.subnet_id.clone();
        pool.vip_id = old_pool.vip_id.clone();
        pool.health_monitor_ids = old_pool.health_monitor_ids.clone();
        pool.status = Status::PendingUpdate;
        self.state.put_pool(&pool)?;

        let updated = pool.clone();
        self.cast_for_pool(&pool.id, move |service| AgentRequest::UpdatePool {
            old_pool,
            pool: updated,
            service,
        })
        .await?;
        Ok(pool)
    }

    /// Mark a pool for deletion. A pool no agent ever took is removed
    /// outright.
    pub async fn delete_pool(&self, pool_id: &str) -> PluginResult<()> {
        let mut pool = self.pool(pool_id)?;
        if self.state.get_binding(pool_id)?.is_none() {
            info!(%pool_id, "pool was never scheduled, removing directly");
            return self.callbacks.destroy_pool(pool_id);
        }
        pool.status = Status::PendingDelete;
        self.state.put_pool(&pool)?;
        self.cast_for_pool(pool_id, move |service| AgentRequest::DeletePool { pool, service })
            .await?;
        Ok(())
    }

    /// Ask the bound agent for fresh stats; returns the last recorded ones.
    pub async fn pool_stats(&self, pool_id: &str) -> PluginResult<PoolStats> {
        let pool = self.pool(pool_id)?;
        self.cast_for_pool(pool_id, move |service| AgentRequest::GetPoolStats { pool, service })
            .await?;
        Ok(self.state.get_pool_stats(pool_id)?.unwrap_or_default())
    }

    pub async fn reload_pool(&self, pool_id: &str) -> PluginResult<()> {
        let pool_id_owned = pool_id.to_string();
        self.cast_for_pool(pool_id, move |_| AgentRequest::ReloadPool {
            pool_id: pool_id_owned,
        })
        .await?;
        Ok(())
    }

    // ── VIPs ───────────────────────────────────────────────────────

    /// Create a VIP, allocating its address port on the VIP subnet.
    pub async fn create_vip(&self, mut vip: Vip) -> PluginResult<Vip> {
        let mut pool = self.pool(&vip.pool_id)?;
        if let Some(existing) = pool.vip_id.as_deref() {
            return Err(PluginError::Invalid(format!(
                "pool {} already has vip {existing}",
                pool.id
            )));
        }
        self.require_subnet(&vip.subnet_id)?;

        let port = self.callbacks.create_port(PortRequest {
            subnet_id: vip.subnet_id.clone(),
            name: format!("vip-{}", vip.id),
            fixed_address: Some(vip.address.clone()).filter(|a| !a.is_empty()),
            device_id: vip.id.clone(),
            binding_host: None,
        })?;
        vip.address = port.first_ip().unwrap_or_default().to_string();
        vip.port_id = Some(port.id);
        vip.status = Status::PendingCreate;
        self.state.put_vip(&vip)?;
        pool.vip_id = Some(vip.id.clone());
        self.state.put_pool(&pool)?;

        let created = vip.clone();
        self.cast_for_pool(&vip.pool_id, move |service| AgentRequest::CreateVip {
            vip: created,
            service,
        })
        .await?;
        Ok(vip)
    }

    /// Replace a VIP's mutable fields; address, port, and pool are kept.
    pub async fn update_vip(&self, mut vip: Vip) -> PluginResult<Vip> {
        let old_vip = self.vip(&vip.id)?;
        vip.tenant_id = old_vip.tenant_id.clone();
        vip.pool_id = old_vip.pool_id.clone();
        vip.subnet_id = old_vip.subnet_id.clone();
        vip.address = old_vip.address.clone();
        vip.port_id = old_vip.port_id.clone();
        vip.status = Status::PendingUpdate;
        self.state.put_vip(&vip)?;

        let updated = vip.clone();
        self.cast_for_pool(&vip.pool_id, move |service| AgentRequest::UpdateVip {
            old_vip,
            vip: updated,
            service,
        })
        .await?;
        Ok(vip)
    }

    pub async fn delete_vip(&self, vip_id: &str) -> PluginResult<()> {
        let mut vip = self.vip(vip_id)?;
        vip.status = Status::PendingDelete;
        self.state.put_vip(&vip)?;
        let pool_id = vip.pool_id.clone();
        self.cast_for_pool(&pool_id, move |service| AgentRequest::DeleteVip { vip, service })
            .await?;
        Ok(())
    }

    // ── Members ────────────────────────────────────────────────────

    pub async fn create_member(&self, mut member: Member) -> PluginResult<Member> {
        let pool = self.pool(&member.pool_id)?;
        if member.tenant_id.is_empty() {
            member.tenant_id = pool.tenant_id;
        }
        member.status = Status::PendingCreate;
        self.state.put_member(&member)?;

        let created = member.clone();
        self.cast_for_pool(&member.pool_id, move |service| AgentRequest::CreateMember {
            member: created,
            service,
        })
        .await?;
        Ok(member)
    }

    pub async fn update_member(&self, mut member: Member) -> PluginResult<Member> {
        let old_member = self.member(&member.id)?;
        member.tenant_id = old_member.tenant_id.clone();
        member.pool_id = old_member.pool_id.clone();
        member.address = old_member.address.clone();
        member.status = Status::PendingUpdate;
        self.state.put_member(&member)?;

        let updated = member.clone();
        self.cast_for_pool(&member.pool_id, move |service| AgentRequest::UpdateMember {
            old_member,
            member: updated,
            service,
        })
        .await?;
        Ok(member)
    }

    pub async fn delete_member(&self, member_id: &str) -> PluginResult<()> {
        let mut member = self.member(member_id)?;
        member.status = Status::PendingDelete;
        self.state.put_member(&member)?;
        let pool_id = member.pool_id.clone();
        self.cast_for_pool(&pool_id, move |service| AgentRequest::DeleteMember {
            member,
            service,
        })
        .await?;
        Ok(())
    }

    // ── Health monitors ────────────────────────────────────────────

    /// Monitors are tenant objects; nothing is cast until one is
    /// associated with a pool.
    pub fn create_health_monitor(&self, monitor: HealthMonitor) -> PluginResult<HealthMonitor> {
        if self.state.get_health_monitor(&monitor.id)?.is_some() {
            return Err(PluginError::Invalid(format!(
                "health monitor {} already exists",
                monitor.id
            )));
        }
        self.state.put_health_monitor(&monitor)?;
        Ok(monitor)
    }

    /// Update a monitor and push the change to every pool using it.
    pub async fn update_health_monitor(&self, mut monitor: HealthMonitor) -> PluginResult<HealthMonitor> {
        let old = self.monitor(&monitor.id)?;
        monitor.tenant_id = old.tenant_id.clone();
        monitor.kind = old.kind;
        self.state.put_health_monitor(&monitor)?;

        for pool_id in self.state.pools_for_monitor(&monitor.id)? {
            self.set_association_status(&pool_id, &monitor.id, Status::PendingUpdate)?;
            let (old_health_monitor, health_monitor) = (old.clone(), monitor.clone());
            let target = pool_id.clone();
            self.cast_for_pool(&pool_id, move |service| AgentRequest::UpdateHealthMonitor {
                old_health_monitor,
                health_monitor,
                pool_id: target,
                service,
            })
            .await?;
        }
        Ok(monitor)
    }

    pub fn delete_health_monitor(&self, monitor_id: &str) -> PluginResult<()> {
        self.monitor(monitor_id)?;
        let pools = self.state.pools_for_monitor(monitor_id)?;
        if !pools.is_empty() {
            return Err(PluginError::Invalid(format!(
                "health monitor {monitor_id} is in use by {}",
                pools.join(", ")
            )));
        }
        self.state.delete_health_monitor(monitor_id)?;
        Ok(())
    }

    pub async fn create_pool_health_monitor(&self, pool_id: &str, monitor_id: &str) -> PluginResult<()> {
        let mut pool = self.pool(pool_id)?;
        let mut monitor = self.monitor(monitor_id)?;
        if self.state.get_pool_monitor(pool_id, monitor_id)?.is_some() {
            return Err(PluginError::Invalid(format!(
                "health monitor {monitor_id} already associated with pool {pool_id}"
            )));
        }
        self.state
            .put_pool_monitor(&PoolMonitorAssociation::new(pool_id, monitor_id))?;
        pool.health_monitor_ids.push(monitor_id.to_string());
        self.state.put_pool(&pool)?;

        monitor.status = Status::PendingCreate;
        let target = pool_id.to_string();
        self.cast_for_pool(pool_id, move |service| AgentRequest::CreatePoolHealthMonitor {
            health_monitor: monitor,
            pool_id: target,
            service,
        })
        .await?;
        Ok(())
    }

    pub async fn delete_pool_health_monitor(&self, pool_id: &str, monitor_id: &str) -> PluginResult<()> {
        self.pool(pool_id)?;
        let mut monitor = self.monitor(monitor_id)?;
        self.set_association_status(pool_id, monitor_id, Status::PendingDelete)?;

        monitor.status = Status::PendingDelete;
        let target = pool_id.to_string();
        self.cast_for_pool(pool_id, move |service| AgentRequest::DeletePoolHealthMonitor {
            health_monitor: monitor,
            pool_id: target,
            service,
        })
        .await?;
        Ok(())
    }

    // ── Agents ─────────────────────────────────────────────────────

    /// Set an agent's administrative state and tell it.
    pub async fn update_agent(&self, agent_id: &str, admin_state_up: bool) -> PluginResult<AgentRecord> {
        let mut agent = self
            .state
            .get_agent(agent_id)?
            .ok_or_else(|| PluginError::not_found("agent", agent_id))?;
        agent.admin_state_up = admin_state_up;
        self.state.put_agent(&agent)?;
        self.transport
            .cast(&agent.host, AgentRequest::AgentUpdated { admin_state_up })
            .await?;
        info!(agent = %agent.host, admin_state_up, "agent admin state updated");
        Ok(agent)
    }

    // ── Helpers ────────────────────────────────────────────────────

    /// Bind the pool, assemble its view, and cast the built request to the
    /// bound agent.
    async fn cast_for_pool(
        &self,
        pool_id: &str,
        build: impl FnOnce(LogicalService) -> AgentRequest,
    ) -> PluginResult<AgentRecord> {
        let pool = self.pool(pool_id)?;
        let Some(agent) = self.scheduler.bind(&pool)? else {
            warn!(%pool_id, "no agent available, request not delivered");
            return Err(PluginError::NoAgent(pool_id.to_string()));
        };
        let service = self
            .assembler
            .assemble(pool_id)?
            .ok_or_else(|| PluginError::not_found("pool", pool_id))?;
        let request = build(service);
        info!(
            operation = request.operation(),
            %pool_id,
            tenant_id = %pool.tenant_id,
            agent = %agent.host,
            "casting to agent"
        );
        self.transport.cast(&agent.host, request).await?;
        Ok(agent)
    }

    fn set_association_status(&self, pool_id: &str, monitor_id: &str, status: Status) -> PluginResult<()> {
        let mut assoc = self.state.get_pool_monitor(pool_id, monitor_id)?.ok_or_else(|| {
            PluginError::not_found("pool health monitor", format!("{pool_id}:{monitor_id}"))
        })?;
        assoc.status = status;
        self.state.put_pool_monitor(&assoc)?;
        Ok(())
    }

    fn require_subnet(&self, subnet_id: &str) -> PluginResult<()> {
        match self.state.get_subnet(subnet_id)? {
            Some(_) => Ok(()),
            None => Err(PluginError::Invalid(format!("subnet {subnet_id} does not exist"))),
        }
    }

    fn pool(&self, pool_id: &str) -> PluginResult<Pool> {
        self.state
            .get_pool(pool_id)?
            .ok_or_else(|| PluginError::not_found("pool", pool_id))
    }

    fn vip(&self, vip_id: &str) -> PluginResult<Vip> {
        self.state
            .get_vip(vip_id)?
            .ok_or_else(|| PluginError::not_found("vip", vip_id))
    }

    fn member(&self, member_id: &str) -> PluginResult<Member> {
        self.state
            .get_member(member_id)?
            .ok_or_else(|| PluginError::not_found("member", member_id))
    }

    fn monitor(&self, monitor_id: &str) -> PluginResult<HealthMonitor> {
        self.state
            .get_health_monitor(monitor_id)?
            .ok_or_else(|| PluginError::not_found("health monitor", monitor_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::*;
    use crate::transport::LocalTransport;
    use tokio::sync::mpsc::UnboundedReceiver;

    fn driver() -> (PluginDriver, UnboundedReceiver<AgentRequest>) {
        let state = StateStore::open_in_memory().unwrap();
        state.put_network(&network("n0", lbaas_core::NetworkType::Vlan, 100)).unwrap();
        state.put_network(&network("n1", lbaas_core::NetworkType::Vlan, 101)).unwrap();
        state.put_subnet(&subnet("s0", "n0", "10.0.0.0/24")).unwrap();
        state.put_subnet(&subnet("s1", "n1", "10.0.1.0/24")).unwrap();
        register_agent(&state, "agent-1", &[]);
        let transport = Arc::new(LocalTransport::new());
        let rx = transport.register("agent-1");
        (PluginDriver::new(state, PluginConfig::default(), transport), rx)
    }

    #[tokio::test]
    async fn create_pool_binds_and_casts() {
        let (driver, mut rx) = driver();
        let created = driver.create_pool(pool("p1")).await.unwrap();
        assert_eq!(created.status, Status::PendingCreate);
        assert_eq!(driver.state().get_binding("p1").unwrap().unwrap().agent_id, "agent-1");

        match rx.recv().await.unwrap() {
            AgentRequest::CreatePool { pool, service } => {
                assert_eq!(pool.id, "p1");
                assert_eq!(service.pool.subnet.unwrap().id, "s1");
            }
            other => panic!("unexpected request {}", other.operation()),
        }
    }

    #[tokio::test]
    async fn create_pool_rejects_unknown_subnet() {
        let (driver, _rx) = driver();
        let mut p = pool("p1");
        p.subnet_id = "s9".into();
        assert!(matches!(driver.create_pool(p).await, Err(PluginError::Invalid(_))));
        assert!(driver.state().get_pool("p1").unwrap().is_none());
    }

    #[tokio::test]
    async fn no_agent_leaves_pool_pending() {
        let state = StateStore::open_in_memory().unwrap();
        state.put_subnet(&subnet("s1", "n1", "10.0.1.0/24")).unwrap();
        let driver = PluginDriver::new(state, PluginConfig::default(), Arc::new(LocalTransport::new()));

        let result = driver.create_pool(pool("p1")).await;
        assert!(matches!(result, Err(PluginError::NoAgent(_))));
        let stored = driver.state().get_pool("p1").unwrap().unwrap();
        assert_eq!(stored.status, Status::PendingCreate);
    }

    #[tokio::test]
    async fn vip_gets_an_allocated_port() {
        let (driver, mut rx) = driver();
        driver.create_pool(pool("p1")).await.unwrap();
        rx.recv().await.unwrap();

        let mut v = vip();
        v.address = String::new();
        v.port_id = None;
        let created = driver.create_vip(v).await.unwrap();
        assert_eq!(created.address, "10.0.0.1");
        let port_id = created.port_id.clone().unwrap();
        assert_eq!(driver.state().get_port(&port_id).unwrap().unwrap().name, "vip-v1");
        assert_eq!(driver.state().get_pool("p1").unwrap().unwrap().vip_id.as_deref(), Some("v1"));

        match rx.recv().await.unwrap() {
            AgentRequest::CreateVip { vip, service } => {
                assert_eq!(vip.address, "10.0.0.1");
                assert_eq!(service.vip.unwrap().port.unwrap().id, port_id);
            }
            other => panic!("unexpected request {}", other.operation()),
        }

        let second = driver.create_vip(vip()).await;
        assert!(matches!(second, Err(PluginError::Invalid(_))));
    }

    #[tokio::test]
    async fn member_updates_carry_old_and_new() {
        let (driver, mut rx) = driver();
        driver.create_pool(pool("p1")).await.unwrap();
        driver.create_member(member("mb1", "10.0.1.5")).await.unwrap();
        let mut heavier = member("mb1", "10.0.1.5");
        heavier.weight = 10;
        driver.update_member(heavier).await.unwrap();
        driver.delete_member("mb1").await.unwrap();

        let ops: Vec<AgentRequest> = (0..4).map(|_| rx.try_recv().unwrap()).collect();
        assert_eq!(ops[1].operation(), "create_member");
        match &ops[2] {
            AgentRequest::UpdateMember { old_member, member, service } => {
                assert_eq!(old_member.weight, 1);
                assert_eq!(member.weight, 10);
                assert_eq!(member.status, Status::PendingUpdate);
                assert!(service.uses_ratio());
            }
            other => panic!("unexpected request {}", other.operation()),
        }
        match &ops[3] {
            AgentRequest::DeleteMember { service, .. } => {
                assert_eq!(service.members[0].member.status, Status::PendingDelete);
            }
            other => panic!("unexpected request {}", other.operation()),
        }
    }

    #[tokio::test]
    async fn monitor_association_lifecycle() {
        let (driver, mut rx) = driver();
        driver.create_pool(pool("p1")).await.unwrap();
        driver.create_health_monitor(monitor("m1")).unwrap();
        driver.create_pool_health_monitor("p1", "m1").await.unwrap();
        assert!(driver.delete_health_monitor("m1").is_err());

        let mut slower = monitor("m1");
        slower.delay = 30;
        driver.update_health_monitor(slower).await.unwrap();
        driver.delete_pool_health_monitor("p1", "m1").await.unwrap();

        let ops: Vec<AgentRequest> = (0..4).map(|_| rx.try_recv().unwrap()).collect();
        let names: Vec<&str> = ops.iter().map(|r| r.operation()).collect();
        assert_eq!(
            names,
            vec![
                "create_pool",
                "create_pool_health_monitor",
                "update_health_monitor",
                "delete_pool_health_monitor"
            ]
        );
        match &ops[3] {
            AgentRequest::DeletePoolHealthMonitor { service, .. } => {
                assert_eq!(service.health_monitors[0].status, Status::PendingDelete);
            }
            other => panic!("unexpected request {}", other.operation()),
        }
    }

    #[tokio::test]
    async fn unscheduled_pool_is_deleted_directly() {
        let state = StateStore::open_in_memory().unwrap();
        state.put_pool(&pool("p1")).unwrap();
        state.put_member(&member("mb1", "10.0.1.5")).unwrap();
        let driver = PluginDriver::new(state, PluginConfig::default(), Arc::new(LocalTransport::new()));

        driver.delete_pool("p1").await.unwrap();
        assert!(driver.state().get_pool("p1").unwrap().is_none());
        assert!(driver.state().get_member("mb1").unwrap().is_none());
    }

    #[tokio::test]
    async fn delete_pool_marks_pending_and_casts() {
        let (driver, mut rx) = driver();
        driver.create_pool(pool("p1")).await.unwrap();
        driver.delete_pool("p1").await.unwrap();

        rx.recv().await.unwrap();
        match rx.recv().await.unwrap() {
            AgentRequest::DeletePool { pool, service } => {
                assert_eq!(pool.status, Status::PendingDelete);
                assert!(service.is_pool_deleting());
            }
            other => panic!("unexpected request {}", other.operation()),
        }
    }

    #[tokio::test]
    async fn agent_admin_state_is_cast() {
        let (driver, mut rx) = driver();
        let agent = driver.update_agent("agent-1", false).await.unwrap();
        assert!(!agent.admin_state_up);
        assert_eq!(
            rx.recv().await.unwrap(),
            AgentRequest::AgentUpdated { admin_state_up: false }
        );
    }
}
