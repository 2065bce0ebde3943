//! Deterministic in-memory appliance.
//!
//! Behaves like a real device for everything the reconciler relies on:
//! duplicate creates conflict, deletes of missing objects are `NotFound`,
//! and objects still referenced elsewhere refuse deletion with `InUse`.
//! Every mutation is appended to a [`Journal`] that several appliances can
//! share, so tests can assert ordering across a cluster.
//!
//! Cluster behaviour: appliances built with [`InMemoryAppliance::cluster`]
//! know their peers. `sync_to_group` pushes configuration to them, and so
//! does every mutation while autosync is on. Local-only self-IPs never
//! move, and tunnels only move while tunnel sync is enabled.

use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use async_trait::async_trait;
use lbaas_core::naming::{COMMON_FOLDER, LOCAL_ONLY_TRAFFIC_GROUP, full_path};

use crate::driver::ApplianceDriver;
use crate::error::{DriverError, DriverResult};
use crate::types::*;

// ── Journal ───────────────────────────────────────────────────────

/// Ordered log of mutations, `"<host> <op> <target>"` per entry.
#[derive(Debug, Clone, Default)]
pub struct Journal(Arc<Mutex<Vec<String>>>);

impl Journal {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<String>> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn record(&self, entry: String) {
        self.lock().push(entry);
    }

    pub fn entries(&self) -> Vec<String> {
        self.lock().clone()
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    /// Index of the first entry containing every needle.
    pub fn position(&self, needles: &[&str]) -> Option<usize> {
        self.lock()
            .iter()
            .position(|e| needles.iter().all(|n| e.contains(n)))
    }

    /// Index of the last entry containing every needle.
    pub fn last_position(&self, needles: &[&str]) -> Option<usize> {
        self.lock()
            .iter()
            .rposition(|e| needles.iter().all(|n| e.contains(n)))
    }

    pub fn count(&self, needles: &[&str]) -> usize {
        self.lock()
            .iter()
            .filter(|e| needles.iter().all(|n| e.contains(n)))
            .count()
    }
}

// ── State ─────────────────────────────────────────────────────────

/// Everything configured inside one folder.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FolderState {
    pub route_domain: Option<u16>,
    pub vlans: BTreeMap<String, Vlan>,
    pub tunnels: BTreeMap<String, Tunnel>,
    /// Tunnel name → `(mac, endpoint)` records.
    pub fdb: BTreeMap<String, BTreeSet<(String, String)>>,
    pub self_ips: BTreeMap<String, SelfIp>,
    pub snat_translations: BTreeMap<String, SnatTranslation>,
    pub snat_pools: BTreeMap<String, Vec<String>>,
    /// Node addresses. A node appears with its first pool member and is
    /// only dropped by removing the last member that uses it.
    pub nodes: BTreeSet<String>,
    pub pools: BTreeMap<String, AppliancePool>,
    /// Pool name → member name → member.
    pub members: BTreeMap<String, BTreeMap<String, PoolMember>>,
    pub monitors: BTreeMap<String, Monitor>,
    pub virtual_servers: BTreeMap<String, VirtualServer>,
    pub rules: BTreeMap<String, IRule>,
    pub persistence: BTreeMap<String, UniversalPersistence>,
}

impl FolderState {
    /// No objects and no route domain left.
    pub fn is_empty(&self) -> bool {
        self.route_domain.is_none()
            && self.vlans.is_empty()
            && self.tunnels.is_empty()
            && self.self_ips.is_empty()
            && self.snat_translations.is_empty()
            && self.snat_pools.is_empty()
            && self.nodes.is_empty()
            && self.pools.is_empty()
            && self.monitors.is_empty()
            && self.virtual_servers.is_empty()
            && self.rules.is_empty()
            && self.persistence.is_empty()
    }
}

#[derive(Debug)]
struct ApplianceState {
    system: SystemInfo,
    device_group: Option<String>,
    devices: Vec<DeviceInfo>,
    traffic_groups: Vec<String>,
    autosync: bool,
    tunnel_sync: bool,
    trusted: BTreeSet<String>,
    folders: BTreeMap<String, FolderState>,
    load: CapacityMetrics,
    reachable: bool,
    faults: HashMap<String, VecDeque<DriverError>>,
    syncs: u32,
    saves: u32,
}

impl ApplianceState {
    fn folder(&self, folder: &str) -> DriverResult<&FolderState> {
        self.folders
            .get(folder)
            .ok_or_else(|| DriverError::NotFound(format!("folder /{folder}")))
    }

    fn folder_mut(&mut self, folder: &str) -> DriverResult<&mut FolderState> {
        self.folders
            .get_mut(folder)
            .ok_or_else(|| DriverError::NotFound(format!("folder /{folder}")))
    }

    fn self_ip_uses(&self, l2_path: &str) -> bool {
        self.folders
            .values()
            .flat_map(|f| f.self_ips.values())
            .any(|ip| ip.vlan == l2_path)
    }

    fn snat_pool_uses(&self, translation_path: &str) -> bool {
        self.folders
            .values()
            .flat_map(|f| f.snat_pools.values())
            .any(|members| members.iter().any(|m| m == translation_path))
    }
}

fn missing(kind: &str, folder: &str, name: &str) -> DriverError {
    DriverError::NotFound(format!("{kind} {}", full_path(folder, name)))
}

fn exists(kind: &str, folder: &str, name: &str) -> DriverError {
    DriverError::Conflict(format!("{kind} {}", full_path(folder, name)))
}

/// Copy configuration onto a peer, keeping the peer's device-local objects.
fn replicate(source: &BTreeMap<String, FolderState>, target: &mut ApplianceState, tunnel_sync: bool) {
    let mut folders = source.clone();
    for (name, folder) in folders.iter_mut() {
        folder
            .self_ips
            .retain(|_, ip| ip.traffic_group != LOCAL_ONLY_TRAFFIC_GROUP);
        if !tunnel_sync {
            folder.tunnels.clear();
            folder.fdb.clear();
        }
        if let Some(own) = target.folders.get(name) {
            folder.self_ips.extend(
                own.self_ips
                    .iter()
                    .filter(|(_, ip)| ip.traffic_group == LOCAL_ONLY_TRAFFIC_GROUP)
                    .map(|(k, v)| (k.clone(), v.clone())),
            );
            if !tunnel_sync {
                folder.tunnels = own.tunnels.clone();
                folder.fdb = own.fdb.clone();
            }
        }
    }
    target.folders = folders;
}

// ── Appliance ─────────────────────────────────────────────────────

pub struct InMemoryAppliance {
    hostname: String,
    state: Mutex<ApplianceState>,
    journal: Journal,
    peers: Mutex<Vec<Weak<InMemoryAppliance>>>,
}

impl InMemoryAppliance {
    /// A standalone device with a `/Common` folder and two traffic groups.
    pub fn new(hostname: &str, journal: Journal) -> Arc<Self> {
        let device_name = format!("{hostname}.local");
        let mut folders = BTreeMap::new();
        folders.insert(
            COMMON_FOLDER.to_string(),
            FolderState {
                route_domain: Some(0),
                ..FolderState::default()
            },
        );
        Arc::new(InMemoryAppliance {
            hostname: hostname.to_string(),
            state: Mutex::new(ApplianceState {
                system: SystemInfo {
                    device_name: device_name.clone(),
                    version: "12.1.2".to_string(),
                    platform: "Z100".to_string(),
                    serial_number: format!("sn-{hostname}"),
                    provisioned: vec!["ltm".to_string()],
                    provision_extramb: 500,
                    ha_enabled: false,
                },
                device_group: None,
                devices: vec![DeviceInfo {
                    name: device_name,
                    management_address: hostname.to_string(),
                }],
                traffic_groups: vec![
                    LOCAL_ONLY_TRAFFIC_GROUP.to_string(),
                    "traffic-group-1".to_string(),
                ],
                autosync: false,
                tunnel_sync: true,
                trusted: BTreeSet::new(),
                folders,
                load: CapacityMetrics::default(),
                reachable: true,
                faults: HashMap::new(),
                syncs: 0,
                saves: 0,
            }),
            journal,
            peers: Mutex::new(Vec::new()),
        })
    }

    /// Devices joined in one sync-failover device group.
    pub fn cluster(hostnames: &[&str], group: &str, journal: Journal) -> Vec<Arc<Self>> {
        let appliances: Vec<Arc<Self>> = hostnames
            .iter()
            .map(|h| InMemoryAppliance::new(h, journal.clone()))
            .collect();
        let devices: Vec<DeviceInfo> = appliances
            .iter()
            .map(|a| DeviceInfo {
                name: format!("{}.local", a.hostname),
                management_address: a.hostname.clone(),
            })
            .collect();
        let traffic_groups: Vec<String> = std::iter::once(LOCAL_ONLY_TRAFFIC_GROUP.to_string())
            .chain((1..=appliances.len()).map(|i| format!("traffic-group-{i}")))
            .collect();

        for appliance in &appliances {
            {
                let mut state = appliance.lock();
                state.system.ha_enabled = true;
                state.device_group = Some(group.to_string());
                state.devices = devices.clone();
                state.traffic_groups = traffic_groups.clone();
            }
            let peers = appliances
                .iter()
                .filter(|p| !Arc::ptr_eq(p, appliance))
                .map(Arc::downgrade)
                .collect();
            *appliance.peers.lock().unwrap_or_else(PoisonError::into_inner) = peers;
        }
        appliances
    }

    fn lock(&self) -> MutexGuard<'_, ApplianceState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // ── Test controls ────────────────────────────────────────────

    pub fn journal(&self) -> &Journal {
        &self.journal
    }

    /// Make the device (un)reachable; while unreachable every call is an I/O error.
    pub fn set_reachable(&self, reachable: bool) {
        self.lock().reachable = reachable;
    }

    /// Fail the next call of `op` with `error`.
    pub fn inject_fault(&self, op: &str, error: DriverError) {
        self.lock()
            .faults
            .entry(op.to_string())
            .or_default()
            .push_back(error);
    }

    pub fn set_version(&self, version: &str) {
        self.lock().system.version = version.to_string();
    }

    pub fn set_provisioned(&self, modules: &[&str]) {
        self.lock().system.provisioned = modules.iter().map(|m| m.to_string()).collect();
    }

    /// Traffic counters reported through `capacity_metrics`.
    pub fn set_load(&self, load: CapacityMetrics) {
        self.lock().load = load;
    }

    /// Configuration objects per folder, for state comparisons.
    pub fn snapshot(&self) -> BTreeMap<String, FolderState> {
        self.lock().folders.clone()
    }

    pub fn folder(&self, folder: &str) -> Option<FolderState> {
        self.lock().folders.get(folder).cloned()
    }

    pub fn autosync_enabled(&self) -> bool {
        self.lock().autosync
    }

    pub fn sync_count(&self) -> u32 {
        self.lock().syncs
    }

    pub fn save_count(&self) -> u32 {
        self.lock().saves
    }

    pub fn trusted_devices(&self) -> Vec<String> {
        self.lock().trusted.iter().cloned().collect()
    }

    // ── Internals ────────────────────────────────────────────────

    fn check(&self, state: &mut ApplianceState, op: &str) -> DriverResult<()> {
        if !state.reachable {
            return Err(DriverError::Io(format!("{}: connection refused", self.hostname)));
        }
        if let Some(fault) = state.faults.get_mut(op).and_then(VecDeque::pop_front) {
            return Err(fault);
        }
        Ok(())
    }

    fn read<T>(
        &self,
        op: &str,
        f: impl FnOnce(&ApplianceState) -> DriverResult<T>,
    ) -> DriverResult<T> {
        let mut state = self.lock();
        self.check(&mut state, op)?;
        f(&*state)
    }

    fn mutate<T>(
        &self,
        op: &str,
        target: String,
        f: impl FnOnce(&mut ApplianceState) -> DriverResult<T>,
    ) -> DriverResult<T> {
        let (value, propagate) = {
            let mut state = self.lock();
            self.check(&mut state, op)?;
            let value = f(&mut *state)?;
            self.journal
                .record(format!("{} {op} {target}", self.hostname));
            let propagate = state
                .autosync
                .then(|| (state.folders.clone(), state.tunnel_sync));
            (value, propagate)
        };
        if let Some((folders, tunnel_sync)) = propagate {
            self.push_to_peers(&folders, tunnel_sync);
        }
        Ok(value)
    }

    fn push_to_peers(&self, folders: &BTreeMap<String, FolderState>, tunnel_sync: bool) {
        let peers: Vec<Arc<InMemoryAppliance>> = self
            .peers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter_map(Weak::upgrade)
            .collect();
        for peer in peers {
            let mut state = peer.lock();
            if state.reachable {
                replicate(folders, &mut state, tunnel_sync);
            }
        }
    }
}

#[async_trait]
impl ApplianceDriver for InMemoryAppliance {
    fn hostname(&self) -> &str {
        &self.hostname
    }

    async fn connect(&self) -> DriverResult<()> {
        self.read("connect", |_| Ok(()))
    }

    async fn system_info(&self) -> DriverResult<SystemInfo> {
        self.read("system_info", |s| Ok(s.system.clone()))
    }

    async fn set_tunnel_sync(&self, enabled: bool) -> DriverResult<()> {
        self.mutate("set_tunnel_sync", enabled.to_string(), |s| {
            s.tunnel_sync = enabled;
            Ok(())
        })
    }

    async fn capacity_metrics(&self) -> DriverResult<CapacityMetrics> {
        self.read("capacity_metrics", |s| {
            let tenant_folders = s.folders.iter().filter(|(n, _)| *n != COMMON_FOLDER);
            let nodes: BTreeSet<&str> = s
                .folders
                .values()
                .flat_map(|f| f.members.values())
                .flat_map(|m| m.values())
                .map(|m| m.address.as_str())
                .collect();
            Ok(CapacityMetrics {
                node_count: nodes.len() as u64,
                tenants: tenant_folders.count() as u64,
                tunnels: s.folders.values().map(|f| f.tunnels.len() as u64).sum(),
                vlans: s.folders.values().map(|f| f.vlans.len() as u64).sum(),
                route_domains: s
                    .folders
                    .values()
                    .filter(|f| matches!(f.route_domain, Some(id) if id != 0))
                    .count() as u64,
                ..s.load.clone()
            })
        })
    }

    // ── Cluster & trust ──────────────────────────────────────────

    async fn failover_device_group(&self) -> DriverResult<Option<String>> {
        self.read("failover_device_group", |s| Ok(s.device_group.clone()))
    }

    async fn device_group_members(&self, group: &str) -> DriverResult<Vec<DeviceInfo>> {
        self.read("device_group_members", |s| match &s.device_group {
            Some(g) if g == group => Ok(s.devices.clone()),
            _ => Err(DriverError::NotFound(format!("device group {group}"))),
        })
    }

    async fn traffic_groups(&self) -> DriverResult<Vec<String>> {
        self.read("traffic_groups", |s| Ok(s.traffic_groups.clone()))
    }

    async fn sync_status(&self) -> DriverResult<SyncStatus> {
        self.read("sync_status", |s| {
            Ok(if s.device_group.is_none() {
                SyncStatus::Standalone
            } else {
                SyncStatus::InSync
            })
        })
    }

    async fn sync_to_group(&self, group: &str) -> DriverResult<()> {
        let (folders, tunnel_sync) = self.mutate("sync_to_group", group.to_string(), |s| {
            match &s.device_group {
                Some(g) if g == group => {}
                _ => return Err(DriverError::NotFound(format!("device group {group}"))),
            }
            s.syncs += 1;
            Ok((s.folders.clone(), s.tunnel_sync))
        })?;
        self.push_to_peers(&folders, tunnel_sync);
        Ok(())
    }

    async fn save_config(&self) -> DriverResult<()> {
        self.mutate("save_config", "sys".to_string(), |s| {
            s.saves += 1;
            Ok(())
        })
    }

    async fn set_autosync(&self, group: &str, enabled: bool) -> DriverResult<()> {
        let op = if enabled {
            "enable_autosync"
        } else {
            "disable_autosync"
        };
        // Flip the flag before `mutate` would propagate with the old setting.
        let mut state = self.lock();
        self.check(&mut state, op)?;
        state.autosync = enabled;
        self.journal
            .record(format!("{} {op} {group}", self.hostname));
        Ok(())
    }

    async fn add_authority_device(
        &self,
        address: &str,
        _username: &str,
        _password: &str,
        device_name: &str,
    ) -> DriverResult<()> {
        self.mutate("add_authority_device", address.to_string(), |s| {
            s.trusted.insert(device_name.to_string());
            Ok(())
        })
    }

    async fn remove_device(&self, device_name: &str) -> DriverResult<()> {
        self.mutate("remove_device", device_name.to_string(), |s| {
            if !s.trusted.remove(device_name) {
                return Err(DriverError::NotFound(format!("device {device_name}")));
            }
            Ok(())
        })
    }

    async fn reset_trust(&self, device_name: &str) -> DriverResult<()> {
        self.mutate("reset_trust", device_name.to_string(), |s| {
            s.trusted.clear();
            s.system.device_name = device_name.to_string();
            Ok(())
        })
    }

    // ── Folders & route domains ──────────────────────────────────

    async fn folder_exists(&self, folder: &str) -> DriverResult<bool> {
        self.read("folder_exists", |s| Ok(s.folders.contains_key(folder)))
    }

    async fn create_folder(&self, folder: &str) -> DriverResult<()> {
        self.mutate("create_folder", format!("/{folder}"), |s| {
            if s.folders.contains_key(folder) {
                return Err(DriverError::Conflict(format!("folder /{folder}")));
            }
            s.folders.insert(folder.to_string(), FolderState::default());
            Ok(())
        })
    }

    async fn delete_folder(&self, folder: &str) -> DriverResult<()> {
        self.mutate("delete_folder", format!("/{folder}"), |s| {
            if s.folder(folder)?.is_empty() {
                s.folders.remove(folder);
                Ok(())
            } else {
                Err(DriverError::InUse(format!("folder /{folder} is not empty")))
            }
        })
    }

    async fn route_domain_ids(&self) -> DriverResult<Vec<u16>> {
        self.read("route_domain_ids", |s| {
            Ok(s.folders.values().filter_map(|f| f.route_domain).collect())
        })
    }

    async fn get_route_domain(&self, folder: &str) -> DriverResult<Option<u16>> {
        self.read("get_route_domain", |s| {
            Ok(s.folders.get(folder).and_then(|f| f.route_domain))
        })
    }

    async fn create_route_domain(&self, folder: &str, id: u16) -> DriverResult<()> {
        self.mutate("create_route_domain", format!("/{folder}%{id}"), |s| {
            if s.folders.values().any(|f| f.route_domain == Some(id)) {
                return Err(DriverError::Conflict(format!("route domain {id}")));
            }
            let f = s.folder_mut(folder)?;
            if f.route_domain.is_some() {
                return Err(DriverError::Conflict(format!("route domain for /{folder}")));
            }
            f.route_domain = Some(id);
            Ok(())
        })
    }

    async fn delete_route_domain(&self, folder: &str) -> DriverResult<()> {
        self.mutate("delete_route_domain", format!("/{folder}"), |s| {
            s.folder_mut(folder)?
                .route_domain
                .take()
                .map(|_| ())
                .ok_or_else(|| DriverError::NotFound(format!("route domain for /{folder}")))
        })
    }

    // ── L2 ───────────────────────────────────────────────────────

    async fn get_vlan(&self, folder: &str, name: &str) -> DriverResult<Option<Vlan>> {
        self.read("get_vlan", |s| Ok(s.folder(folder)?.vlans.get(name).cloned()))
    }

    async fn create_vlan(&self, folder: &str, vlan: &Vlan) -> DriverResult<()> {
        self.mutate("create_vlan", full_path(folder, &vlan.name), |s| {
            let f = s.folder_mut(folder)?;
            if f.vlans.contains_key(&vlan.name) {
                return Err(exists("vlan", folder, &vlan.name));
            }
            f.vlans.insert(vlan.name.clone(), vlan.clone());
            Ok(())
        })
    }

    async fn delete_vlan(&self, folder: &str, name: &str) -> DriverResult<()> {
        self.mutate("delete_vlan", full_path(folder, name), |s| {
            if s.self_ip_uses(&full_path(folder, name)) {
                return Err(DriverError::InUse(format!("vlan {}", full_path(folder, name))));
            }
            s.folder_mut(folder)?
                .vlans
                .remove(name)
                .map(|_| ())
                .ok_or_else(|| missing("vlan", folder, name))
        })
    }

    async fn get_tunnel(&self, folder: &str, name: &str) -> DriverResult<Option<Tunnel>> {
        self.read("get_tunnel", |s| Ok(s.folder(folder)?.tunnels.get(name).cloned()))
    }

    async fn create_tunnel(&self, folder: &str, tunnel: &Tunnel) -> DriverResult<()> {
        self.mutate("create_tunnel", full_path(folder, &tunnel.name), |s| {
            let f = s.folder_mut(folder)?;
            if f.tunnels.contains_key(&tunnel.name) {
                return Err(exists("tunnel", folder, &tunnel.name));
            }
            f.tunnels.insert(tunnel.name.clone(), tunnel.clone());
            Ok(())
        })
    }

    async fn delete_tunnel(&self, folder: &str, name: &str) -> DriverResult<()> {
        self.mutate("delete_tunnel", full_path(folder, name), |s| {
            if s.self_ip_uses(&full_path(folder, name)) {
                return Err(DriverError::InUse(format!("tunnel {}", full_path(folder, name))));
            }
            let f = s.folder_mut(folder)?;
            f.fdb.remove(name);
            f.tunnels
                .remove(name)
                .map(|_| ())
                .ok_or_else(|| missing("tunnel", folder, name))
        })
    }

    async fn fdb_entries(&self, folder: &str, tunnel: &str) -> DriverResult<Vec<FdbRecord>> {
        self.read("fdb_entries", |s| {
            let f = s.folder(folder)?;
            if !f.tunnels.contains_key(tunnel) {
                return Err(missing("tunnel", folder, tunnel));
            }
            Ok(f.fdb
                .get(tunnel)
                .into_iter()
                .flatten()
                .map(|(mac, endpoint)| FdbRecord {
                    mac: mac.clone(),
                    endpoint: endpoint.clone(),
                })
                .collect())
        })
    }

    async fn add_fdb_entries(
        &self,
        folder: &str,
        tunnel: &str,
        records: &[FdbRecord],
    ) -> DriverResult<()> {
        self.mutate("add_fdb_entries", full_path(folder, tunnel), |s| {
            let f = s.folder_mut(folder)?;
            if !f.tunnels.contains_key(tunnel) {
                return Err(missing("tunnel", folder, tunnel));
            }
            let entries = f.fdb.entry(tunnel.to_string()).or_default();
            for r in records {
                entries.insert((r.mac.clone(), r.endpoint.clone()));
            }
            Ok(())
        })
    }

    async fn remove_fdb_entries(
        &self,
        folder: &str,
        tunnel: &str,
        records: &[FdbRecord],
    ) -> DriverResult<()> {
        self.mutate("remove_fdb_entries", full_path(folder, tunnel), |s| {
            let f = s.folder_mut(folder)?;
            if let Some(entries) = f.fdb.get_mut(tunnel) {
                for r in records {
                    entries.remove(&(r.mac.clone(), r.endpoint.clone()));
                }
            }
            Ok(())
        })
    }

    // ── L3 ───────────────────────────────────────────────────────

    async fn get_self_ip(&self, folder: &str, name: &str) -> DriverResult<Option<SelfIp>> {
        self.read("get_self_ip", |s| Ok(s.folder(folder)?.self_ips.get(name).cloned()))
    }

    async fn create_self_ip(&self, folder: &str, self_ip: &SelfIp) -> DriverResult<()> {
        self.mutate("create_self_ip", full_path(folder, &self_ip.name), |s| {
            let f = s.folder_mut(folder)?;
            if f.self_ips.contains_key(&self_ip.name) {
                return Err(exists("self-ip", folder, &self_ip.name));
            }
            f.self_ips.insert(self_ip.name.clone(), self_ip.clone());
            Ok(())
        })
    }

    async fn delete_self_ip(&self, folder: &str, name: &str) -> DriverResult<()> {
        self.mutate("delete_self_ip", full_path(folder, name), |s| {
            s.folder_mut(folder)?
                .self_ips
                .remove(name)
                .map(|_| ())
                .ok_or_else(|| missing("self-ip", folder, name))
        })
    }

    async fn get_snat_translation(
        &self,
        folder: &str,
        name: &str,
    ) -> DriverResult<Option<SnatTranslation>> {
        self.read("get_snat_translation", |s| {
            Ok(s.folder(folder)?.snat_translations.get(name).cloned())
        })
    }

    async fn create_snat_translation(
        &self,
        folder: &str,
        translation: &SnatTranslation,
    ) -> DriverResult<()> {
        self.mutate(
            "create_snat_translation",
            full_path(folder, &translation.name),
            |s| {
                let f = s.folder_mut(folder)?;
                if f.snat_translations.contains_key(&translation.name) {
                    return Err(exists("snat translation", folder, &translation.name));
                }
                f.snat_translations
                    .insert(translation.name.clone(), translation.clone());
                Ok(())
            },
        )
    }

    async fn delete_snat_translation(&self, folder: &str, name: &str) -> DriverResult<()> {
        self.mutate("delete_snat_translation", full_path(folder, name), |s| {
            let path = full_path(folder, name);
            if s.snat_pool_uses(&path) {
                return Err(DriverError::InUse(format!("snat translation {path}")));
            }
            s.folder_mut(folder)?
                .snat_translations
                .remove(name)
                .map(|_| ())
                .ok_or_else(|| missing("snat translation", folder, name))
        })
    }

    async fn snat_pool_members(&self, folder: &str, pool: &str) -> DriverResult<Vec<String>> {
        self.read("snat_pool_members", |s| {
            Ok(s.folder(folder)?
                .snat_pools
                .get(pool)
                .cloned()
                .unwrap_or_default())
        })
    }

    async fn set_snat_pool_members(
        &self,
        folder: &str,
        pool: &str,
        members: &[String],
    ) -> DriverResult<()> {
        self.mutate("set_snat_pool_members", full_path(folder, pool), |s| {
            s.folder_mut(folder)?
                .snat_pools
                .insert(pool.to_string(), members.to_vec());
            Ok(())
        })
    }

    async fn delete_snat_pool(&self, folder: &str, pool: &str) -> DriverResult<()> {
        self.mutate("delete_snat_pool", full_path(folder, pool), |s| {
            s.folder_mut(folder)?
                .snat_pools
                .remove(pool)
                .map(|_| ())
                .ok_or_else(|| missing("snat pool", folder, pool))
        })
    }

    async fn virtual_addresses(&self, folder: &str) -> DriverResult<Vec<String>> {
        self.read("virtual_addresses", |s| {
            let set: BTreeSet<String> = s
                .folder(folder)?
                .virtual_servers
                .values()
                .map(|vs| vs.destination.clone())
                .collect();
            Ok(set.into_iter().collect())
        })
    }

    async fn node_addresses(&self, folder: &str) -> DriverResult<Vec<String>> {
        self.read("node_addresses", |s| {
            Ok(s.folder(folder)?.nodes.iter().cloned().collect())
        })
    }

    // ── Pools & members ──────────────────────────────────────────

    async fn get_pool(&self, folder: &str, name: &str) -> DriverResult<Option<AppliancePool>> {
        self.read("get_pool", |s| Ok(s.folder(folder)?.pools.get(name).cloned()))
    }

    async fn create_pool(&self, folder: &str, pool: &AppliancePool) -> DriverResult<()> {
        self.mutate("create_pool", full_path(folder, &pool.name), |s| {
            let f = s.folder_mut(folder)?;
            if f.pools.contains_key(&pool.name) {
                return Err(exists("pool", folder, &pool.name));
            }
            f.pools.insert(pool.name.clone(), pool.clone());
            f.members.insert(pool.name.clone(), BTreeMap::new());
            Ok(())
        })
    }

    async fn update_pool(&self, folder: &str, pool: &AppliancePool) -> DriverResult<()> {
        self.mutate("update_pool", full_path(folder, &pool.name), |s| {
            let existing = s
                .folder_mut(folder)?
                .pools
                .get_mut(&pool.name)
                .ok_or_else(|| missing("pool", folder, &pool.name))?;
            *existing = pool.clone();
            Ok(())
        })
    }

    async fn delete_pool(&self, folder: &str, name: &str) -> DriverResult<()> {
        self.mutate("delete_pool", full_path(folder, name), |s| {
            let f = s.folder_mut(folder)?;
            if f.virtual_servers
                .values()
                .any(|vs| vs.pool.as_deref() == Some(name))
            {
                return Err(DriverError::InUse(format!("pool {}", full_path(folder, name))));
            }
            f.members.remove(name);
            f.pools
                .remove(name)
                .map(|_| ())
                .ok_or_else(|| missing("pool", folder, name))
        })
    }

    async fn list_pools(&self, folder: &str) -> DriverResult<Vec<String>> {
        self.read("list_pools", |s| Ok(s.folder(folder)?.pools.keys().cloned().collect()))
    }

    async fn pool_members(&self, folder: &str, pool: &str) -> DriverResult<Vec<PoolMember>> {
        self.read("pool_members", |s| {
            s.folder(folder)?
                .members
                .get(pool)
                .map(|m| m.values().cloned().collect())
                .ok_or_else(|| missing("pool", folder, pool))
        })
    }

    async fn add_pool_member(
        &self,
        folder: &str,
        pool: &str,
        member: &PoolMember,
    ) -> DriverResult<()> {
        let target = format!("{} {}", full_path(folder, pool), member.name());
        self.mutate("add_pool_member", target, |s| {
            let f = s.folder_mut(folder)?;
            let members = f
                .members
                .get_mut(pool)
                .ok_or_else(|| missing("pool", folder, pool))?;
            if members.contains_key(&member.name()) {
                return Err(DriverError::Conflict(format!("member {}", member.name())));
            }
            members.insert(member.name(), member.clone());
            f.nodes.insert(member.address.clone());
            Ok(())
        })
    }

    async fn update_pool_member(
        &self,
        folder: &str,
        pool: &str,
        member: &PoolMember,
    ) -> DriverResult<()> {
        let target = format!("{} {}", full_path(folder, pool), member.name());
        self.mutate("update_pool_member", target, |s| {
            let existing = s
                .folder_mut(folder)?
                .members
                .get_mut(pool)
                .ok_or_else(|| missing("pool", folder, pool))?
                .get_mut(&member.name())
                .ok_or_else(|| DriverError::NotFound(format!("member {}", member.name())))?;
            *existing = member.clone();
            Ok(())
        })
    }

    async fn remove_pool_member(
        &self,
        folder: &str,
        pool: &str,
        address: &str,
        port: u16,
    ) -> DriverResult<()> {
        let name = format!("{address}:{port}");
        let target = format!("{} {name}", full_path(folder, pool));
        self.mutate("remove_pool_member", target, |s| {
            let f = s.folder_mut(folder)?;
            f.members
                .get_mut(pool)
                .ok_or_else(|| missing("pool", folder, pool))?
                .remove(&name)
                .ok_or_else(|| DriverError::NotFound(format!("member {name}")))?;
            let referenced = f
                .members
                .values()
                .flat_map(|m| m.values())
                .any(|m| m.address == address);
            if !referenced {
                f.nodes.remove(address);
            }
            Ok(())
        })
    }

    async fn pool_stats(&self, folder: &str, pool: &str) -> DriverResult<AppliancePoolStats> {
        self.read("pool_stats", |s| {
            let members = s
                .folder(folder)?
                .members
                .get(pool)
                .ok_or_else(|| missing("pool", folder, pool))?;
            let active = members.values().filter(|m| m.enabled).count() as u64;
            Ok(AppliancePoolStats {
                bytes_in: s.load.throughput,
                bytes_out: s.load.throughput,
                active_connections: active,
                total_connections: active,
                member_up: members.values().map(|m| (m.name(), m.enabled)).collect(),
            })
        })
    }

    // ── Monitors ─────────────────────────────────────────────────

    async fn get_monitor(&self, folder: &str, name: &str) -> DriverResult<Option<Monitor>> {
        self.read("get_monitor", |s| Ok(s.folder(folder)?.monitors.get(name).cloned()))
    }

    async fn create_monitor(&self, folder: &str, monitor: &Monitor) -> DriverResult<()> {
        self.mutate("create_monitor", full_path(folder, &monitor.name), |s| {
            let f = s.folder_mut(folder)?;
            if f.monitors.contains_key(&monitor.name) {
                return Err(exists("monitor", folder, &monitor.name));
            }
            f.monitors.insert(monitor.name.clone(), monitor.clone());
            Ok(())
        })
    }

    async fn update_monitor(&self, folder: &str, monitor: &Monitor) -> DriverResult<()> {
        self.mutate("update_monitor", full_path(folder, &monitor.name), |s| {
            let existing = s
                .folder_mut(folder)?
                .monitors
                .get_mut(&monitor.name)
                .ok_or_else(|| missing("monitor", folder, &monitor.name))?;
            *existing = monitor.clone();
            Ok(())
        })
    }

    async fn delete_monitor(&self, folder: &str, name: &str) -> DriverResult<()> {
        self.mutate("delete_monitor", full_path(folder, name), |s| {
            let f = s.folder_mut(folder)?;
            if f.pools.values().any(|p| p.monitors.iter().any(|m| m == name)) {
                return Err(DriverError::InUse(format!(
                    "monitor {}",
                    full_path(folder, name)
                )));
            }
            f.monitors
                .remove(name)
                .map(|_| ())
                .ok_or_else(|| missing("monitor", folder, name))
        })
    }

    async fn list_monitors(&self, folder: &str) -> DriverResult<Vec<String>> {
        self.read("list_monitors", |s| {
            Ok(s.folder(folder)?.monitors.keys().cloned().collect())
        })
    }

    async fn set_pool_monitors(
        &self,
        folder: &str,
        pool: &str,
        monitors: &[String],
    ) -> DriverResult<()> {
        self.mutate("set_pool_monitors", full_path(folder, pool), |s| {
            let f = s.folder_mut(folder)?;
            if let Some(unknown) = monitors.iter().find(|m| !f.monitors.contains_key(*m)) {
                return Err(missing("monitor", folder, unknown));
            }
            f.pools
                .get_mut(pool)
                .ok_or_else(|| missing("pool", folder, pool))?
                .monitors = monitors.to_vec();
            Ok(())
        })
    }

    // ── Virtual servers ──────────────────────────────────────────

    async fn get_virtual_server(
        &self,
        folder: &str,
        name: &str,
    ) -> DriverResult<Option<VirtualServer>> {
        self.read("get_virtual_server", |s| {
            Ok(s.folder(folder)?.virtual_servers.get(name).cloned())
        })
    }

    async fn create_virtual_server(&self, folder: &str, vs: &VirtualServer) -> DriverResult<()> {
        self.mutate("create_virtual_server", full_path(folder, &vs.name), |s| {
            let f = s.folder_mut(folder)?;
            if f.virtual_servers.contains_key(&vs.name) {
                return Err(exists("virtual server", folder, &vs.name));
            }
            if let Some(pool) = &vs.pool {
                if !f.pools.contains_key(pool) {
                    return Err(missing("pool", folder, pool));
                }
            }
            f.virtual_servers.insert(vs.name.clone(), vs.clone());
            Ok(())
        })
    }

    async fn update_virtual_server(&self, folder: &str, vs: &VirtualServer) -> DriverResult<()> {
        self.mutate("update_virtual_server", full_path(folder, &vs.name), |s| {
            let existing = s
                .folder_mut(folder)?
                .virtual_servers
                .get_mut(&vs.name)
                .ok_or_else(|| missing("virtual server", folder, &vs.name))?;
            *existing = vs.clone();
            Ok(())
        })
    }

    async fn delete_virtual_server(&self, folder: &str, name: &str) -> DriverResult<()> {
        self.mutate("delete_virtual_server", full_path(folder, name), |s| {
            s.folder_mut(folder)?
                .virtual_servers
                .remove(name)
                .map(|_| ())
                .ok_or_else(|| missing("virtual server", folder, name))
        })
    }

    async fn list_virtual_servers(&self, folder: &str) -> DriverResult<Vec<String>> {
        self.read("list_virtual_servers", |s| {
            Ok(s.folder(folder)?.virtual_servers.keys().cloned().collect())
        })
    }

    async fn put_rule(&self, folder: &str, rule: &IRule) -> DriverResult<()> {
        self.mutate("put_rule", full_path(folder, &rule.name), |s| {
            s.folder_mut(folder)?
                .rules
                .insert(rule.name.clone(), rule.clone());
            Ok(())
        })
    }

    async fn delete_rule(&self, folder: &str, name: &str) -> DriverResult<()> {
        self.mutate("delete_rule", full_path(folder, name), |s| {
            let f = s.folder_mut(folder)?;
            if f.virtual_servers
                .values()
                .any(|vs| vs.rules.iter().any(|(r, _)| r == name))
            {
                return Err(DriverError::InUse(format!("rule {}", full_path(folder, name))));
            }
            f.rules
                .remove(name)
                .map(|_| ())
                .ok_or_else(|| missing("rule", folder, name))
        })
    }

    async fn put_persistence_profile(
        &self,
        folder: &str,
        profile: &UniversalPersistence,
    ) -> DriverResult<()> {
        self.mutate("put_persistence_profile", full_path(folder, &profile.name), |s| {
            s.folder_mut(folder)?
                .persistence
                .insert(profile.name.clone(), profile.clone());
            Ok(())
        })
    }

    async fn delete_persistence_profile(&self, folder: &str, name: &str) -> DriverResult<()> {
        self.mutate("delete_persistence_profile", full_path(folder, name), |s| {
            let f = s.folder_mut(folder)?;
            if f.virtual_servers.values().any(|vs| {
                vs.persistence.as_deref() == Some(name)
                    || vs.fallback_persistence.as_deref() == Some(name)
            }) {
                return Err(DriverError::InUse(format!(
                    "persistence profile {}",
                    full_path(folder, name)
                )));
            }
            f.persistence
                .remove(name)
                .map(|_| ())
                .ok_or_else(|| missing("persistence profile", folder, name))
        })
    }
}
