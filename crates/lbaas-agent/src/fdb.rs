//! Tunnel registry and L2 population.
//!
//! The reconciler registers every overlay tunnel it assures; L2 population
//! messages from the control plane then add or remove forwarding records
//! on those tunnels across every appliance. Peer VTEPs learned through
//! `tunnel_update` are remembered per overlay type so tunnels assured later
//! start with the full flood list.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use lbaas_cluster::ClusterCoordinator;
use lbaas_core::NetworkType;
use lbaas_core::rpc::{FLOODING_MAC, FdbEntries, FdbNetwork, FdbUpdate};
use lbaas_driver::FdbRecord;
use tracing::{debug, info, warn};

use crate::error::AgentResult;

/// An overlay tunnel the reconciler has assured.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TunnelEntry {
    pub network_id: String,
    pub folder: String,
    pub name: String,
    pub network_type: NetworkType,
    pub segment_id: u32,
}

#[derive(Debug, Default)]
struct RegistryState {
    tunnels: BTreeMap<String, TunnelEntry>,
    vteps: BTreeMap<&'static str, BTreeSet<String>>,
}

#[derive(Debug, Default)]
pub struct TunnelRegistry {
    state: Mutex<RegistryState>,
}

impl TunnelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, RegistryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn register(&self, entry: TunnelEntry) {
        self.lock().tunnels.insert(entry.network_id.clone(), entry);
    }

    pub fn unregister(&self, network_id: &str) -> Option<TunnelEntry> {
        self.lock().tunnels.remove(network_id)
    }

    pub fn get(&self, network_id: &str) -> Option<TunnelEntry> {
        self.lock().tunnels.get(network_id).cloned()
    }

    pub fn tunnels_of_type(&self, network_type: NetworkType) -> Vec<TunnelEntry> {
        self.lock()
            .tunnels
            .values()
            .filter(|t| t.network_type == network_type)
            .cloned()
            .collect()
    }

    /// Drop every registered tunnel; learned VTEPs are kept.
    pub fn clear_tunnels(&self) {
        self.lock().tunnels.clear();
    }

    /// Returns `true` if the VTEP was not known yet.
    pub fn add_vtep(&self, network_type: NetworkType, address: &str) -> bool {
        self.lock()
            .vteps
            .entry(network_type.as_str())
            .or_default()
            .insert(address.to_string())
    }

    pub fn vteps(&self, network_type: NetworkType) -> Vec<String> {
        self.lock()
            .vteps
            .get(network_type.as_str())
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default()
    }
}

/// Forwarding records for one network, skipping this cluster's own VTEPs.
fn records_for(network: &FdbNetwork, own_vteps: &[String]) -> Vec<FdbRecord> {
    let mut records: Vec<FdbRecord> = network
        .ports
        .iter()
        .filter(|(vtep, _)| !own_vteps.contains(vtep))
        .flat_map(|(vtep, ports)| {
            ports.iter().map(move |(mac, _ip)| FdbRecord {
                mac: if mac.is_empty() {
                    FLOODING_MAC.to_string()
                } else {
                    mac.clone()
                },
                endpoint: vtep.clone(),
            })
        })
        .collect();
    records.sort_by(|a, b| (&a.endpoint, &a.mac).cmp(&(&b.endpoint, &b.mac)));
    records.dedup();
    records
}

pub struct L2Population {
    cluster: Arc<ClusterCoordinator>,
    tunnels: Arc<TunnelRegistry>,
}

#[derive(Clone, Copy)]
enum FdbChange {
    Add,
    Remove,
}

impl L2Population {
    pub fn new(cluster: Arc<ClusterCoordinator>, tunnels: Arc<TunnelRegistry>) -> Self {
        Self { cluster, tunnels }
    }

    pub async fn add_fdb_entries(&self, entries: &FdbEntries) -> AgentResult<()> {
        self.apply(entries, FdbChange::Add).await
    }

    pub async fn remove_fdb_entries(&self, entries: &FdbEntries) -> AgentResult<()> {
        self.apply(entries, FdbChange::Remove).await
    }

    /// Move records: everything in `before` is removed, then `after` added.
    pub async fn update_fdb_entries(&self, update: &FdbUpdate) -> AgentResult<()> {
        self.apply(&update.before, FdbChange::Remove).await?;
        self.apply(&update.after, FdbChange::Add).await
    }

    /// A peer VTEP came up: flood to it from every tunnel of its type.
    pub async fn tunnel_update(&self, tunnel_ip: &str, tunnel_type: NetworkType) -> AgentResult<()> {
        if self.cluster.tunneling_ips().iter().any(|ip| ip == tunnel_ip) {
            debug!(%tunnel_ip, "ignoring our own vtep");
            return Ok(());
        }
        if self.tunnels.add_vtep(tunnel_type, tunnel_ip) {
            info!(%tunnel_ip, tunnel_type = tunnel_type.as_str(), "learned peer vtep");
        }
        let record = [FdbRecord {
            mac: FLOODING_MAC.to_string(),
            endpoint: tunnel_ip.to_string(),
        }];
        for tunnel in self.tunnels.tunnels_of_type(tunnel_type) {
            for appliance in self.cluster.all_bigips() {
                appliance
                    .driver()
                    .add_fdb_entries(&tunnel.folder, &tunnel.name, &record)
                    .await?;
            }
        }
        Ok(())
    }

    async fn apply(&self, entries: &FdbEntries, change: FdbChange) -> AgentResult<()> {
        let own = self.cluster.tunneling_ips();
        for (network_id, network) in entries {
            if !network.network_type.is_tunnel() {
                continue;
            }
            let Some(tunnel) = self.tunnels.get(network_id) else {
                debug!(%network_id, "no assured tunnel for fdb entries");
                continue;
            };
            let records = records_for(network, &own);
            if records.is_empty() {
                continue;
            }
            for appliance in self.cluster.all_bigips() {
                let driver = appliance.driver();
                let result = match change {
                    FdbChange::Add => driver.add_fdb_entries(&tunnel.folder, &tunnel.name, &records).await,
                    FdbChange::Remove => {
                        driver
                            .remove_fdb_entries(&tunnel.folder, &tunnel.name, &records)
                            .await
                    }
                };
                match result {
                    Ok(()) => {}
                    Err(e) if e.is_not_found() => {
                        warn!(%network_id, tunnel = %tunnel.name, host = %appliance.hostname(), "tunnel vanished, dropping it");
                        self.tunnels.unregister(network_id);
                        break;
                    }
                    Err(e) => return Err(e.into()),
                }
            }
        }
        Ok(())
    }
}
