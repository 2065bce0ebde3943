//! Deployment-wide placement state.
//!
//! One `Deployment` is built when the cluster coordinator starts and is
//! passed to everything that names objects, picks traffic groups, or
//! allocates route domains.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use md5::{Digest, Md5};

use crate::naming::{self, LOCAL_ONLY_TRAFFIC_GROUP};

#[derive(Debug)]
pub struct Deployment {
    prefix: String,
    traffic_groups: Vec<String>,
    route_domains: Mutex<HashMap<String, u16>>,
}

impl Deployment {
    /// `traffic_groups` as reported by the appliance; the local-only group
    /// is dropped and the rest sorted.
    pub fn new(prefix: &str, traffic_groups: impl IntoIterator<Item = String>) -> Self {
        let mut groups: Vec<String> = traffic_groups
            .into_iter()
            .filter(|g| !g.ends_with(LOCAL_ONLY_TRAFFIC_GROUP))
            .collect();
        groups.sort();
        groups.dedup();
        Self {
            prefix: prefix.to_string(),
            traffic_groups: groups,
            route_domains: Mutex::new(HashMap::new()),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn folder(&self, tenant_id: &str) -> String {
        naming::folder_name(&self.prefix, tenant_id)
    }

    pub fn object_name(&self, id: &str) -> String {
        naming::object_name(&self.prefix, id)
    }

    pub fn traffic_groups(&self) -> &[String] {
        &self.traffic_groups
    }

    /// Floating-address traffic group for a tenant.
    ///
    /// The MD5 digest of the tenant id, read as a big-endian integer, indexes
    /// the sorted group list, so placement is stable across restarts and
    /// across agents sharing a cluster.
    pub fn traffic_group_for(&self, tenant_id: &str) -> &str {
        if self.traffic_groups.is_empty() {
            return LOCAL_ONLY_TRAFFIC_GROUP;
        }
        let index = tenant_hash(tenant_id) % self.traffic_groups.len() as u128;
        &self.traffic_groups[index as usize]
    }

    // ── Route domains ────────────────────────────────────────────

    pub fn cached_route_domain(&self, tenant_id: &str) -> Option<u16> {
        self.lock().get(tenant_id).copied()
    }

    pub fn remember_route_domain(&self, tenant_id: &str, id: u16) {
        self.lock().insert(tenant_id.to_string(), id);
    }

    pub fn forget_route_domain(&self, tenant_id: &str) {
        self.lock().remove(tenant_id);
    }

    pub fn clear_route_domains(&self) {
        self.lock().clear();
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, u16>> {
        self.route_domains.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// MD5 of the tenant id as a big-endian integer.
pub fn tenant_hash(tenant_id: &str) -> u128 {
    Md5::digest(tenant_id.as_bytes())
        .iter()
        .fold(0u128, |acc, byte| (acc << 8) | u128::from(*byte))
}

/// Smallest route-domain id ≥ 1 not present in `used`.
pub fn next_route_domain(used: &[u16]) -> Option<u16> {
    (1..=u16::MAX).find(|id| !used.contains(id))
}

/// Stable owner id for ports allocated on behalf of an agent host.
pub fn host_device_id(host: &str) -> String {
    hex::encode(Md5::digest(host.as_bytes()))
}
