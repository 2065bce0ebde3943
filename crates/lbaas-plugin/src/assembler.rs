//! Service assembler.
//!
//! Builds the [`LogicalService`] view of one pool from the store. Reads
//! only; the subnet cache is the only thing it writes.

use std::collections::BTreeSet;

use lbaas_core::{
    HealthMonitor, LogicalService, Member, Network, NetworkType, Pool, PluginConfig, Port,
    ServiceMember, ServicePool, ServiceVip,
};
use lbaas_state::{AgentRecord, StateStore};
use tracing::{debug, warn};

use crate::error::PluginResult;
use crate::subnet_cache::{CachedSubnet, SubnetCache};

pub struct ServiceAssembler {
    state: StateStore,
    subnets: SubnetCache,
}

/// Tunnel endpoints attached to a VIP or member.
#[derive(Debug, Default, PartialEq)]
struct Vteps {
    vxlan: Vec<String>,
    gre: Vec<String>,
}

impl ServiceAssembler {
    pub fn new(state: StateStore, config: &PluginConfig) -> Self {
        Self {
            state,
            subnets: SubnetCache::new(config.subnet_cache_ttl()),
        }
    }

    pub fn subnet_cache(&self) -> &SubnetCache {
        &self.subnets
    }

    /// The service view of `pool_id`, or `None` if the pool does not exist.
    pub fn assemble(&self, pool_id: &str) -> PluginResult<Option<LogicalService>> {
        self.assemble_with(pool_id, false)
    }

    /// As [`assemble`](Self::assemble). Agents in global routed mode build
    /// no tunnels, so their views carry no VTEP lists.
    pub fn assemble_with(
        &self,
        pool_id: &str,
        global_routed_mode: bool,
    ) -> PluginResult<Option<LogicalService>> {
        let Some(pool) = self.state.get_pool(pool_id)? else {
            debug!(%pool_id, "pool not found, nothing to assemble");
            return Ok(None);
        };
        let agents = if global_routed_mode {
            Vec::new()
        } else {
            self.state.list_agents()?
        };

        let (subnet, network) = split(self.subnets.get(&self.state, &pool.subnet_id)?);
        let vip = match pool.vip_id.as_deref() {
            Some(vip_id) => self.vip(vip_id, &agents)?,
            None => None,
        };
        let members = self
            .state
            .list_members_for_pool(pool_id)?
            .into_iter()
            .map(|member| self.member(member, &pool, &agents))
            .collect::<PluginResult<Vec<_>>>()?;
        let health_monitors = self.monitors(&pool)?;

        Ok(Some(LogicalService {
            pool: ServicePool {
                pool,
                subnet,
                network,
            },
            vip,
            members,
            health_monitors,
        }))
    }

    fn vip(&self, vip_id: &str, agents: &[AgentRecord]) -> PluginResult<Option<ServiceVip>> {
        let Some(mut vip) = self.state.get_vip(vip_id)? else {
            warn!(%vip_id, "pool references a missing vip");
            return Ok(None);
        };
        let port = match vip.port_id.as_deref() {
            Some(port_id) => self.state.get_port(port_id)?,
            None => None,
        };
        if let Some(address) = port.as_ref().and_then(Port::first_ip) {
            vip.address = address.to_string();
        }
        let (subnet, network) = split(self.subnets.get(&self.state, &vip.subnet_id)?);

        let vteps = match network.as_ref().filter(|n| n.network_type.is_tunnel()) {
            Some(network) => {
                let hosts: BTreeSet<String> = self
                    .state
                    .ports_on_network(&network.id)?
                    .into_iter()
                    .filter_map(|p| p.binding_host)
                    .collect();
                vteps_for(network, &hosts, agents)
            }
            None => Vteps::default(),
        };

        Ok(Some(ServiceVip {
            vip,
            subnet,
            network,
            port,
            vxlan_vteps: vteps.vxlan,
            gre_vteps: vteps.gre,
        }))
    }

    fn member(
        &self,
        member: Member,
        pool: &Pool,
        agents: &[AgentRecord],
    ) -> PluginResult<ServiceMember> {
        let (port, located) = self.resolve_member(&member, pool)?;
        let (subnet, network) = split(located);
        if subnet.is_none() {
            warn!(member_id = %member.id, address = %member.address, "member subnet unresolved");
        }

        let vteps = match (network.as_ref(), port.as_ref().and_then(|p| p.binding_host.as_ref())) {
            (Some(network), Some(host)) if network.network_type.is_tunnel() => {
                vteps_for(network, &BTreeSet::from([host.clone()]), agents)
            }
            _ => Vteps::default(),
        };

        Ok(ServiceMember {
            member,
            subnet,
            network,
            port,
            vxlan_vteps: vteps.vxlan,
            gre_vteps: vteps.gre,
        })
    }

    /// Locate a member's port and subnet, most specific source first:
    /// an allocation on the pool's subnet, one owned by the member's
    /// tenant, one on a shared network, then a CIDR scan of cached and
    /// finally of all subnets.
    fn resolve_member(
        &self,
        member: &Member,
        pool: &Pool,
    ) -> PluginResult<(Option<Port>, Option<CachedSubnet>)> {
        let ports = self.state.ports_by_fixed_ip(&member.address)?;

        let mut found = ports
            .iter()
            .find(|p| allocated_on(p, &member.address) == Some(pool.subnet_id.as_str()))
            .or_else(|| ports.iter().find(|p| p.tenant_id == member.tenant_id));
        if found.is_none() {
            for port in &ports {
                let shared = self
                    .state
                    .get_network(&port.network_id)?
                    .is_some_and(|n| n.shared);
                if shared {
                    found = Some(port);
                    break;
                }
            }
        }

        if let Some(port) = found {
            let located = match allocated_on(port, &member.address) {
                Some(subnet_id) => self.subnets.get(&self.state, subnet_id)?,
                None => None,
            };
            return Ok((Some(port.clone()), located));
        }

        if let Some(cached) = self.subnets.find_containing(&member.address) {
            return Ok((None, Some(cached)));
        }

        let mut candidates: Vec<_> = self
            .state
            .list_subnets()?
            .into_iter()
            .filter(|s| s.contains(&member.address))
            .collect();
        candidates.sort_by(|a, b| b.cidr.prefix_len().cmp(&a.cidr.prefix_len()));
        match candidates.first() {
            Some(subnet) => Ok((None, self.subnets.get(&self.state, &subnet.id)?)),
            None => Ok((None, None)),
        }
    }

    fn monitors(&self, pool: &Pool) -> PluginResult<Vec<HealthMonitor>> {
        let mut monitors = Vec::with_capacity(pool.health_monitor_ids.len());
        for monitor_id in &pool.health_monitor_ids {
            let Some(mut monitor) = self.state.get_health_monitor(monitor_id)? else {
                warn!(pool_id = %pool.id, %monitor_id, "pool references a missing health monitor");
                continue;
            };
            if let Some(assoc) = self.state.get_pool_monitor(&pool.id, monitor_id)? {
                monitor.status = assoc.status;
            }
            monitors.push(monitor);
        }
        Ok(monitors)
    }
}

/// Subnet id of the fixed IP on `port` that carries `address`.
fn allocated_on<'a>(port: &'a Port, address: &str) -> Option<&'a str> {
    port.fixed_ips
        .iter()
        .find(|ip| ip.ip_address == address)
        .map(|ip| ip.subnet_id.as_str())
}

fn split(cached: Option<CachedSubnet>) -> (Option<lbaas_core::Subnet>, Option<Network>) {
    match cached {
        Some(c) => (Some(c.subnet), c.network),
        None => (None, None),
    }
}

/// Tunnel endpoints reported by the agents on `hosts`, sorted and deduplicated.
fn vteps_for(network: &Network, hosts: &BTreeSet<String>, agents: &[AgentRecord]) -> Vteps {
    let endpoints: Vec<String> = agents
        .iter()
        .filter(|a| hosts.contains(&a.host))
        .flat_map(|a| a.tunneling_ips().iter().cloned())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();
    match network.network_type {
        NetworkType::Vxlan => Vteps {
            vxlan: endpoints,
            gre: Vec::new(),
        },
        NetworkType::Gre => Vteps {
            vxlan: Vec::new(),
            gre: endpoints,
        },
        _ => Vteps::default(),
    }
}
