//! Subnet and network lookups with a fixed invalidation window.
//!
//! Entries older than the TTL are reloaded from the store on the next
//! lookup and ignored by address scans.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

use lbaas_core::{Network, Subnet};
use lbaas_state::{StateResult, StateStore};
use tracing::debug;

/// A subnet with the network it belongs to.
#[derive(Debug, Clone, PartialEq)]
pub struct CachedSubnet {
    pub subnet: Subnet,
    pub network: Option<Network>,
}

struct Entry {
    value: CachedSubnet,
    loaded_at: Instant,
}

pub struct SubnetCache {
    ttl: Duration,
    entries: Mutex<HashMap<String, Entry>>,
}

impl SubnetCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Cached subnet, loading it (and its network) from the store when
    /// missing or stale.
    pub fn get(&self, state: &StateStore, subnet_id: &str) -> StateResult<Option<CachedSubnet>> {
        if let Some(hit) = self.fresh(subnet_id) {
            return Ok(Some(hit));
        }
        let Some(subnet) = state.get_subnet(subnet_id)? else {
            self.invalidate(subnet_id);
            return Ok(None);
        };
        let network = state.get_network(&subnet.network_id)?;
        let value = CachedSubnet { subnet, network };
        self.insert(value.clone());
        debug!(%subnet_id, "subnet cached");
        Ok(Some(value))
    }

    /// A fresh cached subnet whose CIDR contains `address`.
    pub fn find_containing(&self, address: &str) -> Option<CachedSubnet> {
        let entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        let mut hits: Vec<&Entry> = entries
            .values()
            .filter(|e| e.loaded_at.elapsed() < self.ttl && e.value.subnet.contains(address))
            .collect();
        // Most specific prefix first.
        hits.sort_by(|a, b| {
            b.value
                .subnet
                .cidr
                .prefix_len()
                .cmp(&a.value.subnet.cidr.prefix_len())
                .then_with(|| a.value.subnet.id.cmp(&b.value.subnet.id))
        });
        hits.first().map(|e| e.value.clone())
    }

    pub fn insert(&self, value: CachedSubnet) {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.insert(
            value.subnet.id.clone(),
            Entry {
                value,
                loaded_at: Instant::now(),
            },
        );
    }

    pub fn invalidate(&self, subnet_id: &str) {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.remove(subnet_id);
    }

    pub fn clear(&self) {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.clear();
    }

    pub fn len(&self) -> usize {
        let entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn fresh(&self, subnet_id: &str) -> Option<CachedSubnet> {
        let entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries
            .get(subnet_id)
            .filter(|e| e.loaded_at.elapsed() < self.ttl)
            .map(|e| e.value.clone())
    }
}
