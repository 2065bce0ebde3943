//! A connected appliance and its assured-object caches.

use std::collections::BTreeSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use lbaas_driver::{ApplianceDriver, ManagedSession, SystemInfo};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// The seed; drives sync and is the only target in autosync mode.
    Primary,
    Peer,
}

/// Which assured set an id belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Assured {
    Tenant,
    Network,
    SnatSubnet,
    GatewaySubnet,
}

/// Ids the reconciler has already verified on this appliance.
///
/// These only short-circuit repeated checks. They are flushed on every
/// full resync and entries are dropped when the object is deleted.
#[derive(Debug, Default)]
struct AssuredSets {
    entries: BTreeSet<(Assured, String)>,
}

pub struct Appliance {
    hostname: String,
    role: Role,
    system: SystemInfo,
    session: Arc<ManagedSession>,
    local_tunnel_ip: Option<String>,
    assured: Mutex<AssuredSets>,
}

impl Appliance {
    pub fn new(hostname: &str, role: Role, system: SystemInfo, session: Arc<ManagedSession>) -> Self {
        Self {
            hostname: hostname.to_string(),
            role,
            system,
            session,
            local_tunnel_ip: None,
            assured: Mutex::new(AssuredSets::default()),
        }
    }

    pub fn with_local_tunnel_ip(mut self, address: Option<String>) -> Self {
        self.local_tunnel_ip = address;
        self
    }

    pub fn hostname(&self) -> &str {
        &self.hostname
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn device_name(&self) -> &str {
        &self.system.device_name
    }

    pub fn system(&self) -> &SystemInfo {
        &self.system
    }

    /// VTEP address of this appliance, when tunnels are configured.
    pub fn local_tunnel_ip(&self) -> Option<&str> {
        self.local_tunnel_ip.as_deref()
    }

    pub fn driver(&self) -> &dyn ApplianceDriver {
        self.session.as_ref()
    }

    pub fn is_connected(&self) -> bool {
        self.session.is_connected()
    }

    fn assured(&self) -> MutexGuard<'_, AssuredSets> {
        self.assured.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn is_assured(&self, kind: Assured, id: &str) -> bool {
        self.assured().entries.contains(&(kind, id.to_string()))
    }

    pub fn mark_assured(&self, kind: Assured, id: &str) {
        self.assured().entries.insert((kind, id.to_string()));
    }

    pub fn forget_assured(&self, kind: Assured, id: &str) {
        self.assured().entries.remove(&(kind, id.to_string()));
    }

    /// Ids of one kind, sorted.
    pub fn assured_ids(&self, kind: Assured) -> Vec<String> {
        self.assured()
            .entries
            .iter()
            .filter(|(k, _)| *k == kind)
            .map(|(_, id)| id.clone())
            .collect()
    }

    pub fn flush_assured(&self) {
        self.assured().entries.clear();
    }
}

impl std::fmt::Debug for Appliance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Appliance")
            .field("hostname", &self.hostname)
            .field("role", &self.role)
            .field("device_name", &self.system.device_name)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lbaas_driver::{InMemoryAppliance, Journal};
    use std::time::Duration;

    #[tokio::test]
    async fn assured_sets_are_per_kind() {
        let dev = InMemoryAppliance::new("bigip1", Journal::new());
        let system = dev.system_info().await.unwrap();
        let session = Arc::new(ManagedSession::new(dev, Duration::from_secs(5)));
        let appliance = Appliance::new("bigip1", Role::Primary, system, session);

        appliance.mark_assured(Assured::Network, "n1");
        appliance.mark_assured(Assured::SnatSubnet, "s1");
        assert!(appliance.is_assured(Assured::Network, "n1"));
        assert!(!appliance.is_assured(Assured::Network, "s1"));
        assert_eq!(appliance.assured_ids(Assured::SnatSubnet), vec!["s1"]);

        appliance.forget_assured(Assured::Network, "n1");
        assert!(!appliance.is_assured(Assured::Network, "n1"));
        appliance.flush_assured();
        assert!(appliance.assured_ids(Assured::SnatSubnet).is_empty());
        assert_eq!(appliance.device_name(), "bigip1.local");
    }
}
