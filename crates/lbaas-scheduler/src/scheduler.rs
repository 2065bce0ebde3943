//! Agent scheduler.
//!
//! Agents register through their periodic state report; an agent is
//! eligible while it is administratively up and its last heartbeat is
//! within `agent_down_secs`. Agents are grouped by
//! `environment_group_number`; a group's capacity is the highest score any
//! of its agents reports, and a group at 1.0 takes no new pools.

use std::collections::BTreeMap;
use std::time::{SystemTime, UNIX_EPOCH};

use lbaas_core::{Pool, PluginConfig};
use lbaas_state::{AgentRecord, PoolBinding, StateStore};
use rand::seq::SliceRandom;
use tracing::{debug, info, warn};

use crate::error::SchedulerResult;

/// Capacity at which a group stops accepting pools.
const FULL: f64 = 1.0;

pub struct AgentScheduler {
    state: StateStore,
    config: PluginConfig,
}

impl AgentScheduler {
    pub fn new(state: StateStore, config: PluginConfig) -> Self {
        Self { state, config }
    }

    pub fn state(&self) -> &StateStore {
        &self.state
    }

    /// The agent that should handle `pool`, binding it if it is unbound.
    ///
    /// Returns `None` when no eligible agent exists or every group is full.
    pub fn bind(&self, pool: &Pool) -> SchedulerResult<Option<AgentRecord>> {
        self.bind_at(pool, epoch_secs())
    }

    /// [`bind`](Self::bind) with an explicit clock.
    pub fn bind_at(&self, pool: &Pool, now: u64) -> SchedulerResult<Option<AgentRecord>> {
        if let Some(binding) = self.state.get_binding(&pool.id)? {
            return self.bound_agent(&binding, now);
        }

        let candidates = self.candidates(now)?;
        if candidates.is_empty() {
            warn!(pool_id = %pool.id, environment = ?self.config.environment_prefix, "no eligible agent");
            return Ok(None);
        }
        let groups = group_capacity(&candidates);

        let chosen = match self.tenant_affinity(pool, &candidates, &groups)? {
            Some(agent) => agent,
            None => match pick_least_loaded(&candidates, &groups) {
                Some(agent) => agent,
                None => {
                    warn!(pool_id = %pool.id, "every agent group is at capacity");
                    return Ok(None);
                }
            },
        };

        let (binding, created) = self.state.bind_pool_if_absent(&pool.id, &chosen.id, now)?;
        if !created {
            // Another bind committed first; its choice stands.
            debug!(pool_id = %pool.id, agent = %binding.agent_id, "pool bound concurrently");
            return self.bound_agent(&binding, now);
        }
        info!(
            pool_id = %pool.id,
            tenant_id = %pool.tenant_id,
            agent = %chosen.host,
            group = chosen.environment_group(),
            "pool scheduled"
        );
        Ok(Some(chosen))
    }

    /// Resolve an existing binding, failing over when the agent is dead.
    fn bound_agent(&self, binding: &PoolBinding, now: u64) -> SchedulerResult<Option<AgentRecord>> {
        let bound = self.state.get_agent(&binding.agent_id)?;
        if let Some(agent) = bound.as_ref().filter(|a| self.is_eligible(a, now)) {
            return Ok(Some(agent.clone()));
        }

        let peers: Vec<AgentRecord> = self
            .candidates(now)?
            .into_iter()
            .filter(|a| a.id != binding.agent_id)
            .filter(|a| {
                bound.as_ref().is_none_or(|b| {
                    a.environment_prefix() == b.environment_prefix()
                        && a.environment_group() == b.environment_group()
                })
            })
            .collect();
        let Some(peer) = peers.choose(&mut rand::thread_rng()).cloned() else {
            warn!(pool_id = %binding.pool_id, agent = %binding.agent_id, "bound agent is down and has no live peer");
            return Ok(None);
        };

        if self.config.rebind_on_failover {
            self.state.rebind_pool(&binding.pool_id, &peer.id, now)?;
            info!(pool_id = %binding.pool_id, from = %binding.agent_id, to = %peer.id, "pool rebound to live agent");
        } else {
            info!(pool_id = %binding.pool_id, from = %binding.agent_id, to = %peer.id, "failing over to live agent");
        }
        Ok(Some(peer))
    }

    /// An agent already hosting the pool's tenant, if its group has room.
    fn tenant_affinity(
        &self,
        pool: &Pool,
        candidates: &[AgentRecord],
        groups: &BTreeMap<u32, f64>,
    ) -> SchedulerResult<Option<AgentRecord>> {
        for agent in candidates {
            let capacity = groups
                .get(&agent.environment_group())
                .copied()
                .unwrap_or(FULL);
            if capacity >= FULL {
                continue;
            }
            if self.state.tenants_for_agent(&agent.id)?.contains(&pool.tenant_id) {
                debug!(pool_id = %pool.id, agent = %agent.host, "tenant affinity");
                return Ok(Some(agent.clone()));
            }
        }
        Ok(None)
    }

    /// Eligible agents in the configured environment, sorted by id.
    fn candidates(&self, now: u64) -> SchedulerResult<Vec<AgentRecord>> {
        let mut agents: Vec<AgentRecord> = self
            .state
            .list_agents()?
            .into_iter()
            .filter(|a| self.is_eligible(a, now))
            .filter(|a| {
                self.config
                    .environment_prefix
                    .as_deref()
                    .is_none_or(|env| a.environment_prefix() == env)
            })
            .collect();
        agents.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(agents)
    }

    fn is_eligible(&self, agent: &AgentRecord, now: u64) -> bool {
        agent.admin_state_up && agent.is_alive(now, self.config.agent_down_secs)
    }
}

/// Group number → highest capacity score among its agents.
fn group_capacity(agents: &[AgentRecord]) -> BTreeMap<u32, f64> {
    let mut groups: BTreeMap<u32, f64> = BTreeMap::new();
    for agent in agents {
        let score = groups.entry(agent.environment_group()).or_insert(0.0);
        *score = score.max(agent.capacity_score());
    }
    groups
}

/// A random agent from the least loaded group, unless that group is full.
fn pick_least_loaded(agents: &[AgentRecord], groups: &BTreeMap<u32, f64>) -> Option<AgentRecord> {
    let (&group, &capacity) = groups.iter().min_by(|a, b| a.1.total_cmp(b.1))?;
    if capacity >= FULL {
        return None;
    }
    let members: Vec<&AgentRecord> = agents
        .iter()
        .filter(|a| a.environment_group() == group)
        .collect();
    members.choose(&mut rand::thread_rng()).map(|a| (*a).clone())
}

/// Seconds since the Unix epoch.
pub fn epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use lbaas_core::rpc::{AgentConfigurations, AgentStateReport};
    use lbaas_core::{LbMethod, Protocol, Status};

    const NOW: u64 = 10_000;

    fn pool(id: &str, tenant: &str) -> Pool {
        Pool {
            id: id.into(),
            tenant_id: tenant.into(),
            name: id.into(),
            description: String::new(),
            lb_method: LbMethod::RoundRobin,
            protocol: Protocol::Http,
            admin_state_up: true,
            status: Status::PendingCreate,
            subnet_id: "s1".into(),
            vip_id: None,
            health_monitor_ids: vec![],
        }
    }

    fn register(state: &StateStore, host: &str, group: u32, score: f64, seen: u64) {
        let report = AgentStateReport {
            binary: "lbaas-agent".into(),
            host: host.into(),
            topic: "lbaas_agent".into(),
            agent_type: "Loadbalancer agent".into(),
            l2_population: true,
            configurations: AgentConfigurations {
                environment_prefix: "env".into(),
                environment_group_number: group,
                environment_capacity_score: score,
                ..Default::default()
            },
            start_flag: true,
        };
        state.put_agent(&AgentRecord::from_report(&report, seen)).unwrap();
    }

    fn scheduler(config: PluginConfig) -> AgentScheduler {
        AgentScheduler::new(StateStore::open_in_memory().unwrap(), config)
    }

    #[test]
    fn no_agents_means_no_binding() {
        let s = scheduler(PluginConfig::default());
        assert!(s.bind_at(&pool("p1", "t1"), NOW).unwrap().is_none());
        assert!(s.state().get_binding("p1").unwrap().is_none());
    }

    #[test]
    fn binding_is_sticky() {
        let s = scheduler(PluginConfig::default());
        register(s.state(), "a1", 1, 0.1, NOW);
        register(s.state(), "a2", 1, 0.1, NOW);

        let first = s.bind_at(&pool("p1", "t1"), NOW).unwrap().unwrap();
        for _ in 0..10 {
            let again = s.bind_at(&pool("p1", "t1"), NOW).unwrap().unwrap();
            assert_eq!(again.id, first.id);
        }
        assert_eq!(s.state().get_binding("p1").unwrap().unwrap().agent_id, first.id);
    }

    #[test]
    fn dead_agent_fails_over_without_rebinding() {
        let s = scheduler(PluginConfig::default());
        register(s.state(), "a1", 1, 0.1, NOW);
        s.state().bind_pool_if_absent("p1", "a1", NOW).unwrap();
        // a1 stops reporting; a2 in the same group is alive, a3 is in another group.
        register(s.state(), "a2", 1, 0.5, NOW + 100);
        register(s.state(), "a3", 2, 0.0, NOW + 100);

        let agent = s.bind_at(&pool("p1", "t1"), NOW + 100).unwrap().unwrap();
        assert_eq!(agent.id, "a2");
        assert_eq!(s.state().get_binding("p1").unwrap().unwrap().agent_id, "a1");
    }

    #[test]
    fn failover_rebinds_when_configured() {
        let s = scheduler(PluginConfig {
            rebind_on_failover: true,
            ..PluginConfig::default()
        });
        register(s.state(), "a1", 1, 0.1, NOW);
        s.state().bind_pool_if_absent("p1", "a1", NOW).unwrap();
        register(s.state(), "a2", 1, 0.1, NOW + 100);

        let agent = s.bind_at(&pool("p1", "t1"), NOW + 100).unwrap().unwrap();
        assert_eq!(agent.id, "a2");
        assert_eq!(s.state().get_binding("p1").unwrap().unwrap().agent_id, "a2");
    }

    #[test]
    fn admin_down_agent_is_not_eligible() {
        let s = scheduler(PluginConfig::default());
        register(s.state(), "a1", 1, 0.1, NOW);
        let mut a1 = s.state().get_agent("a1").unwrap().unwrap();
        a1.admin_state_up = false;
        s.state().put_agent(&a1).unwrap();

        assert!(s.bind_at(&pool("p1", "t1"), NOW).unwrap().is_none());
    }

    #[test]
    fn tenant_affinity_beats_lower_capacity() {
        let s = scheduler(PluginConfig::default());
        register(s.state(), "a1", 1, 0.6, NOW);
        register(s.state(), "a2", 2, 0.1, NOW);
        s.state().put_pool(&pool("p1", "t1")).unwrap();
        s.state().bind_pool_if_absent("p1", "a1", NOW).unwrap();

        let agent = s.bind_at(&pool("p2", "t1"), NOW).unwrap().unwrap();
        assert_eq!(agent.id, "a1");

        let other = s.bind_at(&pool("p3", "t2"), NOW).unwrap().unwrap();
        assert_eq!(other.id, "a2");
    }

    #[test]
    fn full_group_loses_tenant_affinity() {
        let s = scheduler(PluginConfig::default());
        register(s.state(), "a1", 1, 1.0, NOW);
        register(s.state(), "a2", 2, 0.3, NOW);
        s.state().put_pool(&pool("p1", "t1")).unwrap();
        s.state().bind_pool_if_absent("p1", "a1", NOW).unwrap();

        let agent = s.bind_at(&pool("p2", "t1"), NOW).unwrap().unwrap();
        assert_eq!(agent.id, "a2");
    }

    #[test]
    fn least_loaded_group_wins() {
        let s = scheduler(PluginConfig::default());
        register(s.state(), "a1", 1, 0.8, NOW);
        register(s.state(), "a2", 1, 0.2, NOW);
        register(s.state(), "a3", 2, 0.4, NOW);

        // Group 1 counts as 0.8 because of a1.
        let agent = s.bind_at(&pool("p1", "t1"), NOW).unwrap().unwrap();
        assert_eq!(agent.id, "a3");
    }

    #[test]
    fn full_environment_refuses() {
        let s = scheduler(PluginConfig::default());
        register(s.state(), "a1", 1, 1.0, NOW);
        register(s.state(), "a2", 2, 1.3, NOW);
        assert!(s.bind_at(&pool("p1", "t1"), NOW).unwrap().is_none());
    }

    #[test]
    fn environment_filter_applies() {
        let s = scheduler(PluginConfig {
            environment_prefix: Some("prod".into()),
            ..PluginConfig::default()
        });
        register(s.state(), "a1", 1, 0.0, NOW);
        assert!(s.bind_at(&pool("p1", "t1"), NOW).unwrap().is_none());
    }

    #[test]
    fn concurrent_binds_leave_one_binding() {
        let s = scheduler(PluginConfig::default());
        for host in ["a1", "a2", "a3", "a4"] {
            register(s.state(), host, 1, 0.1, NOW);
        }

        let chosen: Vec<String> = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..8)
                .map(|_| scope.spawn(|| s.bind_at(&pool("p1", "t1"), NOW).unwrap().unwrap().id))
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        let bindings = s.state().list_bindings().unwrap();
        assert_eq!(bindings.len(), 1);
        assert!(chosen.iter().all(|id| *id == bindings[0].agent_id));
    }
}
