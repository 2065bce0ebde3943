//! Services this agent has successfully deployed.
//!
//! The cache is the agent's own record of which pools it owns. Periodic
//! resync compares it against what the plugin says is bound here, and the
//! state report counts it.

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use lbaas_core::LogicalService;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedService {
    pub pool_id: String,
    pub tenant_id: String,
    /// Port backing the VIP address, when the service has one.
    pub port_id: Option<String>,
    pub agent_host: String,
}

impl CachedService {
    pub fn from_service(service: &LogicalService, agent_host: &str) -> Self {
        Self {
            pool_id: service.pool_id().to_string(),
            tenant_id: service.tenant_id().to_string(),
            port_id: service.vip.as_ref().and_then(|v| v.vip.port_id.clone()),
            agent_host: agent_host.to_string(),
        }
    }
}

#[derive(Debug, Default)]
pub struct ServiceCache {
    services: Mutex<BTreeMap<String, CachedService>>,
}

impl ServiceCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<String, CachedService>> {
        self.services.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Record (or refresh) a deployed service.
    pub fn put(&self, service: &LogicalService, agent_host: &str) {
        let entry = CachedService::from_service(service, agent_host);
        self.lock().insert(entry.pool_id.clone(), entry);
    }

    pub fn remove(&self, pool_id: &str) -> Option<CachedService> {
        self.lock().remove(pool_id)
    }

    pub fn remove_service(&self, service: &LogicalService) -> Option<CachedService> {
        self.remove(service.pool_id())
    }

    pub fn get(&self, pool_id: &str) -> Option<CachedService> {
        self.lock().get(pool_id).cloned()
    }

    pub fn contains(&self, pool_id: &str) -> bool {
        self.lock().contains_key(pool_id)
    }

    /// Cached pool ids, sorted.
    pub fn pool_ids(&self) -> Vec<String> {
        self.lock().keys().cloned().collect()
    }

    pub fn entries(&self) -> Vec<CachedService> {
        self.lock().values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn flush(&self) {
        self.lock().clear();
    }
}
