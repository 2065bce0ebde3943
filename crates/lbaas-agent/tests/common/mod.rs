//! Shared fixtures for the agent integration tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use lbaas_cluster::{ClusterCoordinator, FixedFactory};
use lbaas_core::rpc::{AgentStateReport, PoolRef, PortRequest};
use lbaas_core::naming::{COMMON_FOLDER, LOCAL_ONLY_TRAFFIC_GROUP};
use lbaas_core::*;
use lbaas_driver::{ApplianceDriver, InMemoryAppliance, Journal, SelfIp};

// ── Plugin fake ──────────────────────────────────────────────────

/// Plugin callbacks backed by maps; every call is recorded as
/// `"<callback> <id> [<status>]"`.
#[derive(Default)]
pub struct RecordingPlugin {
    services: Mutex<HashMap<String, LogicalService>>,
    subnets: Mutex<HashMap<String, Subnet>>,
    ports: Mutex<HashMap<String, Port>>,
    calls: Mutex<Vec<String>>,
    reports: Mutex<Vec<AgentStateReport>>,
    stats: Mutex<HashMap<String, PoolStats>>,
}

impl RecordingPlugin {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Make every subnet `service` references known for port allocation,
    /// and serve `service` from `get_service_by_pool_id`.
    pub fn serve(&self, service: &LogicalService) {
        let mut subnets = self.subnets.lock().unwrap();
        let referenced = service
            .pool
            .subnet
            .iter()
            .chain(service.vip.iter().filter_map(|v| v.subnet.as_ref()))
            .chain(service.members.iter().filter_map(|m| m.subnet.as_ref()));
        for subnet in referenced {
            subnets.insert(subnet.id.clone(), subnet.clone());
        }
        self.services
            .lock()
            .unwrap()
            .insert(service.pool_id().to_string(), service.clone());
    }

    pub fn forget(&self, pool_id: &str) {
        self.services.lock().unwrap().remove(pool_id);
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn called(&self, entry: &str) -> bool {
        self.calls().iter().any(|c| c == entry)
    }

    pub fn port_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.ports.lock().unwrap().keys().cloned().collect();
        names.sort();
        names
    }

    pub fn reports(&self) -> Vec<AgentStateReport> {
        self.reports.lock().unwrap().clone()
    }

    pub fn stats(&self, pool_id: &str) -> Option<PoolStats> {
        self.stats.lock().unwrap().get(pool_id).cloned()
    }

    fn record(&self, entry: String) {
        self.calls.lock().unwrap().push(entry);
    }

    fn pools(&self) -> Vec<PoolRef> {
        let mut pools: Vec<PoolRef> = self
            .services
            .lock()
            .unwrap()
            .values()
            .map(|s| PoolRef {
                pool_id: s.pool_id().to_string(),
                tenant_id: s.tenant_id().to_string(),
                agent_host: Some("agent-1".into()),
            })
            .collect();
        pools.sort_by(|a, b| a.pool_id.cmp(&b.pool_id));
        pools
    }
}

#[async_trait]
impl PluginApi for RecordingPlugin {
    async fn get_service_by_pool_id(
        &self,
        pool_id: &str,
        _global_routed_mode: bool,
    ) -> RpcResult<Option<LogicalService>> {
        Ok(self.services.lock().unwrap().get(pool_id).cloned())
    }

    async fn get_active_pools(&self, _host: &str) -> RpcResult<Vec<PoolRef>> {
        self.record("get_active_pools".into());
        Ok(self.pools())
    }

    async fn get_pending_pools(&self, _host: &str) -> RpcResult<Vec<PoolRef>> {
        Ok(Vec::new())
    }

    async fn get_all_pools(&self, _host: &str) -> RpcResult<Vec<PoolRef>> {
        Ok(self.pools())
    }

    async fn get_port_by_name(&self, name: &str) -> RpcResult<Vec<Port>> {
        Ok(self.ports.lock().unwrap().get(name).cloned().into_iter().collect())
    }

    async fn create_port_on_subnet(&self, request: PortRequest) -> RpcResult<Port> {
        let subnet = self
            .subnets
            .lock()
            .unwrap()
            .get(&request.subnet_id)
            .cloned()
            .ok_or_else(|| RpcError::NotFound(format!("subnet {}", request.subnet_id)))?;
        let mut ports = self.ports.lock().unwrap();
        let address = match request.fixed_address.clone() {
            Some(address) => address,
            None => {
                let used = ports
                    .values()
                    .filter(|p| p.subnet_id() == Some(subnet.id.as_str()))
                    .count();
                subnet
                    .cidr
                    .hosts()
                    .nth(200 + used)
                    .ok_or_else(|| RpcError::Remote("subnet exhausted".into()))?
                    .to_string()
            }
        };
        let port = Port {
            id: format!("port-{}", request.name),
            name: request.name.clone(),
            network_id: subnet.network_id.clone(),
            tenant_id: subnet.tenant_id.clone(),
            mac_address: "fa:16:3e:00:00:01".into(),
            fixed_ips: vec![FixedIp {
                subnet_id: subnet.id.clone(),
                ip_address: address,
            }],
            device_id: request.device_id,
            device_owner: "network:f5lbaas".into(),
            binding_host: request.binding_host,
            allowed_address_pairs: Vec::new(),
        };
        ports.insert(request.name.clone(), port.clone());
        self.record(format!("create_port {}", request.name));
        Ok(port)
    }

    async fn delete_port_by_name(&self, name: &str) -> RpcResult<()> {
        self.record(format!("delete_port {name}"));
        self.ports
            .lock()
            .unwrap()
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| RpcError::NotFound(format!("port {name}")))
    }

    async fn allocate_fixed_address_on_subnet(
        &self,
        subnet_id: &str,
        _port_id: &str,
    ) -> RpcResult<String> {
        Err(RpcError::Remote(format!("no allocation on {subnet_id}")))
    }

    async fn deallocate_fixed_address_on_subnet(
        &self,
        _subnet_id: &str,
        _port_id: &str,
        _address: &str,
    ) -> RpcResult<()> {
        Ok(())
    }

    async fn add_allowed_address(&self, port_id: &str, address: &str) -> RpcResult<()> {
        self.record(format!("add_allowed_address {port_id} {address}"));
        Ok(())
    }

    async fn remove_allowed_address(&self, port_id: &str, address: &str) -> RpcResult<()> {
        self.record(format!("remove_allowed_address {port_id} {address}"));
        Ok(())
    }

    async fn update_vip_status(
        &self,
        vip_id: &str,
        status: Status,
        _description: Option<String>,
    ) -> RpcResult<()> {
        self.record(format!("update_vip_status {vip_id} {status}"));
        Ok(())
    }

    async fn update_pool_status(
        &self,
        pool_id: &str,
        status: Status,
        _description: Option<String>,
    ) -> RpcResult<()> {
        self.record(format!("update_pool_status {pool_id} {status}"));
        Ok(())
    }

    async fn update_member_status(
        &self,
        member_id: &str,
        status: Status,
        _description: Option<String>,
    ) -> RpcResult<()> {
        self.record(format!("update_member_status {member_id} {status}"));
        Ok(())
    }

    async fn update_health_monitor_status(
        &self,
        monitor_id: &str,
        _pool_id: &str,
        status: Status,
        _description: Option<String>,
    ) -> RpcResult<()> {
        self.record(format!("update_health_monitor_status {monitor_id} {status}"));
        Ok(())
    }

    async fn update_pool_stats(&self, pool_id: &str, stats: PoolStats) -> RpcResult<()> {
        self.record(format!("update_pool_stats {pool_id}"));
        self.stats.lock().unwrap().insert(pool_id.to_string(), stats);
        Ok(())
    }

    async fn vip_destroyed(&self, vip_id: &str) -> RpcResult<()> {
        self.record(format!("vip_destroyed {vip_id}"));
        Ok(())
    }

    async fn pool_destroyed(&self, pool_id: &str) -> RpcResult<()> {
        self.record(format!("pool_destroyed {pool_id}"));
        self.services.lock().unwrap().remove(pool_id);
        Ok(())
    }

    async fn member_destroyed(&self, member_id: &str) -> RpcResult<()> {
        self.record(format!("member_destroyed {member_id}"));
        Ok(())
    }

    async fn health_monitor_destroyed(&self, monitor_id: &str, pool_id: &str) -> RpcResult<()> {
        self.record(format!("health_monitor_destroyed {monitor_id} {pool_id}"));
        Ok(())
    }

    async fn report_state(&self, report: AgentStateReport) -> RpcResult<()> {
        self.reports.lock().unwrap().push(report);
        Ok(())
    }
}

// ── Clusters ─────────────────────────────────────────────────────

pub async fn standalone() -> (Arc<InMemoryAppliance>, Arc<ClusterCoordinator>) {
    standalone_with(|_| {}).await
}

/// A standalone device with `tune` applied to the scaffold config.
pub async fn standalone_with(
    tune: impl FnOnce(&mut AgentConfig),
) -> (Arc<InMemoryAppliance>, Arc<ClusterCoordinator>) {
    let dev = InMemoryAppliance::new("bigip1", Journal::new());
    let mut config = AgentConfig::scaffold("agent-1", &["bigip1"], HaType::Standalone);
    tune(&mut config);
    let factory = FixedFactory::new().with_driver(dev.clone());
    let cluster = ClusterCoordinator::connect(config, &factory).await.unwrap();
    (dev, Arc::new(cluster))
}

/// VTEP address of the device built by [`tunneled_standalone`].
pub const LOCAL_VTEP: &str = "192.168.100.11";

/// A standalone device carrying vxlan and gre, with its VTEP self-IP.
pub async fn tunneled_standalone() -> (Arc<InMemoryAppliance>, Arc<ClusterCoordinator>) {
    let dev = InMemoryAppliance::new("bigip1", Journal::new());
    dev.create_self_ip(
        COMMON_FOLDER,
        &SelfIp {
            name: "vtep".into(),
            address: LOCAL_VTEP.into(),
            prefix_len: 24,
            vlan: "/Common/underlay".into(),
            floating: false,
            traffic_group: LOCAL_ONLY_TRAFFIC_GROUP.into(),
        },
    )
    .await
    .unwrap();
    let mut config = AgentConfig::scaffold("agent-1", &["bigip1"], HaType::Standalone);
    config.tunnel_types = vec!["vxlan".into(), "gre".into()];
    config.vtep_selfip_name = Some("vtep".into());
    let factory = FixedFactory::new().with_driver(dev.clone());
    let cluster = ClusterCoordinator::connect(config, &factory).await.unwrap();
    (dev, Arc::new(cluster))
}

pub async fn pair(sync_mode: SyncMode) -> (Vec<Arc<InMemoryAppliance>>, Arc<ClusterCoordinator>) {
    let devs = InMemoryAppliance::cluster(&["bigip1", "bigip2"], "dg1", Journal::new());
    let mut config = AgentConfig::scaffold("agent-1", &["bigip1", "bigip2"], HaType::Pair);
    config.sync_mode = sync_mode;
    config.sync_backoff_secs = 0;
    let factory = devs
        .iter()
        .fold(FixedFactory::new(), |f, d| f.with_driver(d.clone()));
    let cluster = ClusterCoordinator::connect(config, &factory).await.unwrap();
    (devs, Arc::new(cluster))
}

// ── Services ─────────────────────────────────────────────────────

pub fn network(id: &str, segment: u32) -> Network {
    Network {
        id: id.into(),
        tenant_id: "t1".into(),
        network_type: NetworkType::Vlan,
        physical_network: Some("physnet1".into()),
        segmentation_id: Some(segment),
        shared: false,
    }
}

pub fn tunnel_network(id: &str, network_type: NetworkType, segment: u32) -> Network {
    Network {
        id: id.into(),
        tenant_id: "t1".into(),
        network_type,
        physical_network: None,
        segmentation_id: Some(segment),
        shared: false,
    }
}

pub fn subnet(id: &str, network_id: &str, cidr: &str) -> Subnet {
    Subnet {
        id: id.into(),
        tenant_id: "t1".into(),
        network_id: network_id.into(),
        cidr: cidr.parse().unwrap(),
        gateway_ip: None,
        shared: false,
    }
}

pub fn member(id: &str, address: &str, weight: u32) -> ServiceMember {
    ServiceMember {
        member: Member {
            id: id.into(),
            tenant_id: "t1".into(),
            pool_id: "p1".into(),
            address: address.into(),
            protocol_port: 80,
            weight,
            admin_state_up: true,
            status: Status::PendingCreate,
        },
        subnet: Some(subnet("s1", "n1", "10.0.1.0/24")),
        network: Some(network("n1", 101)),
        port: None,
        vxlan_vteps: vec![],
        gre_vteps: vec![],
    }
}

pub fn http_monitor() -> HealthMonitor {
    HealthMonitor {
        id: "m1".into(),
        tenant_id: "t1".into(),
        kind: MonitorType::Http,
        delay: 5,
        timeout: 16,
        max_retries: 3,
        url_path: Some("/health".into()),
        http_method: None,
        expected_codes: Some("200".into()),
        admin_state_up: true,
        status: Status::PendingCreate,
    }
}

/// Pool p1 of tenant t1: an HTTP VIP on 10.0.0.100:80, two members on
/// 10.0.1.0/24, one HTTP monitor.
pub fn web_service() -> LogicalService {
    let vip_subnet = subnet("s0", "n0", "10.0.0.0/24");
    LogicalService {
        pool: ServicePool {
            pool: Pool {
                id: "p1".into(),
                tenant_id: "t1".into(),
                name: "web".into(),
                description: String::new(),
                lb_method: LbMethod::RoundRobin,
                protocol: Protocol::Http,
                admin_state_up: true,
                status: Status::PendingCreate,
                subnet_id: "s1".into(),
                vip_id: Some("v1".into()),
                health_monitor_ids: vec!["m1".into()],
            },
            subnet: Some(subnet("s1", "n1", "10.0.1.0/24")),
            network: Some(network("n1", 101)),
        },
        vip: Some(ServiceVip {
            vip: Vip {
                id: "v1".into(),
                tenant_id: "t1".into(),
                pool_id: "p1".into(),
                name: "web-vip".into(),
                description: String::new(),
                address: "10.0.0.100".into(),
                protocol: Protocol::Http,
                protocol_port: 80,
                admin_state_up: true,
                connection_limit: -1,
                session_persistence: None,
                subnet_id: "s0".into(),
                port_id: Some("port-vip".into()),
                status: Status::PendingCreate,
            },
            subnet: Some(vip_subnet),
            network: Some(network("n0", 100)),
            port: None,
            vxlan_vteps: vec![],
            gre_vteps: vec![],
        }),
        members: vec![member("mb1", "10.0.1.5", 1), member("mb2", "10.0.1.6", 1)],
        health_monitors: vec![http_monitor()],
    }
}

/// Every object of `service` moved to `status`.
pub fn with_status(mut service: LogicalService, status: Status) -> LogicalService {
    service.pool.pool.status = status;
    if let Some(vip) = service.vip.as_mut() {
        vip.vip.status = status;
    }
    for member in &mut service.members {
        member.member.status = status;
    }
    for monitor in &mut service.health_monitors {
        monitor.status = status;
    }
    service
}

/// Replace every reference to the network with `network.id` in `service`.
pub fn move_to_network(service: &mut LogicalService, network: &Network) {
    let swap = |slot: &mut Option<Network>| {
        if slot.as_ref().is_some_and(|n| n.id == network.id) {
            *slot = Some(network.clone());
        }
    };
    swap(&mut service.pool.network);
    if let Some(vip) = service.vip.as_mut() {
        swap(&mut vip.network);
    }
    for member in &mut service.members {
        swap(&mut member.network);
    }
}

/// Give every subnet of `service` its `.1` address as gateway.
pub fn with_gateways(mut service: LogicalService) -> LogicalService {
    let gateway = |slot: &mut Option<Subnet>| {
        if let Some(subnet) = slot.as_mut() {
            subnet.gateway_ip = subnet.cidr.hosts().next().map(|ip| ip.to_string());
        }
    };
    gateway(&mut service.pool.subnet);
    if let Some(vip) = service.vip.as_mut() {
        gateway(&mut vip.subnet);
    }
    for member in &mut service.members {
        gateway(&mut member.subnet);
    }
    service
}
