//! The logical service — the unit of reconciliation.
//!
//! A `LogicalService` is the fully assembled view of one pool: the pool
//! itself, its optional VIP, its members, and its health monitors, each
//! decorated with the subnet/network/port records the agent needs to
//! wire it onto an appliance.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::types::*;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServicePool {
    #[serde(flatten)]
    pub pool: Pool,
    #[serde(default)]
    pub subnet: Option<Subnet>,
    #[serde(default)]
    pub network: Option<Network>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceVip {
    #[serde(flatten)]
    pub vip: Vip,
    #[serde(default)]
    pub subnet: Option<Subnet>,
    #[serde(default)]
    pub network: Option<Network>,
    #[serde(default)]
    pub port: Option<Port>,
    #[serde(default)]
    pub vxlan_vteps: Vec<String>,
    #[serde(default)]
    pub gre_vteps: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceMember {
    #[serde(flatten)]
    pub member: Member,
    #[serde(default)]
    pub subnet: Option<Subnet>,
    #[serde(default)]
    pub network: Option<Network>,
    #[serde(default)]
    pub port: Option<Port>,
    #[serde(default)]
    pub vxlan_vteps: Vec<String>,
    #[serde(default)]
    pub gre_vteps: Vec<String>,
}

/// A pool plus everything hanging off it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogicalService {
    pub pool: ServicePool,
    #[serde(default)]
    pub vip: Option<ServiceVip>,
    #[serde(default)]
    pub members: Vec<ServiceMember>,
    #[serde(default)]
    pub health_monitors: Vec<HealthMonitor>,
}

/// A subnet referenced by the service together with its network.
#[derive(Debug, Clone, PartialEq)]
pub struct SubnetRef<'a> {
    pub subnet: &'a Subnet,
    pub network: &'a Network,
}

impl LogicalService {
    pub fn pool_id(&self) -> &str {
        &self.pool.pool.id
    }

    pub fn tenant_id(&self) -> &str {
        &self.pool.pool.tenant_id
    }

    pub fn is_pool_deleting(&self) -> bool {
        self.pool.pool.status == Status::PendingDelete
    }

    /// Cascade a pool delete onto every child object for this cycle.
    ///
    /// Returns `true` if the cascade was applied.
    pub fn cascade_pool_delete(&mut self) -> bool {
        if !self.is_pool_deleting() {
            return false;
        }
        if let Some(vip) = self.vip.as_mut() {
            vip.vip.status = Status::PendingDelete;
        }
        for member in &mut self.members {
            member.member.status = Status::PendingDelete;
        }
        for monitor in &mut self.health_monitors {
            monitor.status = Status::PendingDelete;
        }
        true
    }

    /// Whether any member carries a weight that requires a ratio method.
    pub fn uses_ratio(&self) -> bool {
        self.members
            .iter()
            .any(|m| m.member.status != Status::PendingDelete && m.member.weight > 1)
    }

    /// Distinct subnets referenced by the VIP or by live members.
    pub fn live_subnets(&self) -> Vec<SubnetRef<'_>> {
        let mut seen = BTreeSet::new();
        let mut out = Vec::new();

        let vip_ref = self
            .vip
            .as_ref()
            .filter(|v| v.vip.status != Status::PendingDelete)
            .and_then(|v| Some((v.subnet.as_ref()?, v.network.as_ref()?)));
        let member_refs = self
            .members
            .iter()
            .filter(|m| m.member.status != Status::PendingDelete)
            .filter_map(|m| Some((m.subnet.as_ref()?, m.network.as_ref()?)));

        for (subnet, network) in vip_ref.into_iter().chain(member_refs) {
            if seen.insert(subnet.id.clone()) {
                out.push(SubnetRef { subnet, network });
            }
        }
        out
    }
}
