//! Records that exist only on the control-plane side of the store.
//!
//! Pools, VIPs, members, monitors, networks, subnets, and ports are stored
//! as the `lbaas_core` types directly; the records here hold what the
//! scheduler and plugin callbacks need on top of them.

use serde::{Deserialize, Serialize};

use lbaas_core::rpc::{AgentConfigurations, AgentStateReport};
use lbaas_core::types::Status;

/// A registered agent, refreshed by every state report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentRecord {
    /// Stable id; agents are keyed by host.
    pub id: String,
    pub host: String,
    pub agent_type: String,
    pub topic: String,
    #[serde(default = "default_true")]
    pub admin_state_up: bool,
    #[serde(default)]
    pub configurations: AgentConfigurations,
    /// Epoch seconds of the first report after the last agent start.
    pub started_at: u64,
    /// Epoch seconds of the most recent report.
    pub heartbeat_at: u64,
}

impl AgentRecord {
    /// Build a fresh record from a state report received at `now`.
    pub fn from_report(report: &AgentStateReport, now: u64) -> Self {
        Self {
            id: report.host.clone(),
            host: report.host.clone(),
            agent_type: report.agent_type.clone(),
            topic: report.topic.clone(),
            admin_state_up: true,
            configurations: report.configurations.clone(),
            started_at: now,
            heartbeat_at: now,
        }
    }

    /// Fold a later report into this record, keeping operator state.
    pub fn refresh(&mut self, report: &AgentStateReport, now: u64) {
        self.agent_type = report.agent_type.clone();
        self.topic = report.topic.clone();
        self.configurations = report.configurations.clone();
        self.heartbeat_at = now;
        if report.start_flag {
            self.started_at = now;
        }
    }

    /// An agent is alive while its last heartbeat is within `down_secs`.
    pub fn is_alive(&self, now: u64, down_secs: u64) -> bool {
        now.saturating_sub(self.heartbeat_at) <= down_secs
    }

    pub fn environment_prefix(&self) -> &str {
        &self.configurations.environment_prefix
    }

    pub fn environment_group(&self) -> u32 {
        self.configurations.environment_group_number
    }

    pub fn capacity_score(&self) -> f64 {
        self.configurations.environment_capacity_score
    }

    pub fn tunneling_ips(&self) -> &[String] {
        &self.configurations.tunneling_ips
    }
}

/// Pool → agent binding. One row per pool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolBinding {
    pub pool_id: String,
    pub agent_id: String,
    pub bound_at: u64,
}

/// A monitor associated with a pool, with per-association status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolMonitorAssociation {
    pub pool_id: String,
    pub monitor_id: String,
    #[serde(default)]
    pub status: Status,
    #[serde(default)]
    pub status_description: Option<String>,
}

impl PoolMonitorAssociation {
    pub fn new(pool_id: &str, monitor_id: &str) -> Self {
        Self {
            pool_id: pool_id.to_string(),
            monitor_id: monitor_id.to_string(),
            status: Status::PendingCreate,
            status_description: None,
        }
    }

    pub fn table_key(&self) -> String {
        association_key(&self.pool_id, &self.monitor_id)
    }
}

/// Key of a pool ↔ monitor association row.
pub fn association_key(pool_id: &str, monitor_id: &str) -> String {
    format!("{pool_id}:{monitor_id}")
}

/// Key of a status-description row.
pub fn status_note_key(kind: &str, id: &str) -> String {
    format!("{kind}/{id}")
}

fn default_true() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report(host: &str) -> AgentStateReport {
        AgentStateReport {
            binary: "lbaas-agent".into(),
            host: host.into(),
            topic: "lbaas_agent".into(),
            agent_type: "Loadbalancer agent".into(),
            l2_population: true,
            configurations: AgentConfigurations {
                environment_prefix: "env".into(),
                environment_group_number: 2,
                environment_capacity_score: 0.25,
                ..Default::default()
            },
            start_flag: true,
        }
    }

    #[test]
    fn liveness_window() {
        let agent = AgentRecord::from_report(&report("a1"), 1000);
        assert!(agent.is_alive(1030, 75));
        assert!(agent.is_alive(1075, 75));
        assert!(!agent.is_alive(1076, 75));
        assert_eq!(agent.environment_group(), 2);
        assert_eq!(agent.capacity_score(), 0.25);
    }

    #[test]
    fn refresh_keeps_admin_state() {
        let mut agent = AgentRecord::from_report(&report("a1"), 1000);
        agent.admin_state_up = false;

        let mut later = report("a1");
        later.start_flag = false;
        agent.refresh(&later, 1100);
        assert!(!agent.admin_state_up);
        assert_eq!(agent.heartbeat_at, 1100);
        assert_eq!(agent.started_at, 1000);
    }

    #[test]
    fn association_keys() {
        let assoc = PoolMonitorAssociation::new("p1", "hm1");
        assert_eq!(assoc.table_key(), "p1:hm1");
        assert_eq!(assoc.status, Status::PendingCreate);
        assert_eq!(status_note_key("vip", "v1"), "vip/v1");
    }
}
