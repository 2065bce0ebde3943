//! The appliance driver interface.
//!
//! Every operation names its folder explicitly; callers normally go
//! through [`crate::scope::FolderScope`] rather than passing folders by
//! hand. Deletes of missing objects return `NotFound` and callers decide
//! whether that is benign (see [`crate::error::ignore_not_found`]).

use async_trait::async_trait;

use crate::error::DriverResult;
use crate::types::*;

#[async_trait]
pub trait ApplianceDriver: Send + Sync {
    // ── Session & system ─────────────────────────────────────────

    /// Management address this driver talks to.
    fn hostname(&self) -> &str;

    /// Open (or re-open) the management session.
    async fn connect(&self) -> DriverResult<()>;

    async fn system_info(&self) -> DriverResult<SystemInfo>;
    async fn set_tunnel_sync(&self, enabled: bool) -> DriverResult<()>;
    async fn capacity_metrics(&self) -> DriverResult<CapacityMetrics>;

    // ── Cluster & trust ──────────────────────────────────────────

    /// Name of the sync-failover device group this device belongs to.
    async fn failover_device_group(&self) -> DriverResult<Option<String>>;
    async fn device_group_members(&self, group: &str) -> DriverResult<Vec<DeviceInfo>>;
    async fn traffic_groups(&self) -> DriverResult<Vec<String>>;
    async fn sync_status(&self) -> DriverResult<SyncStatus>;
    async fn sync_to_group(&self, group: &str) -> DriverResult<()>;
    async fn save_config(&self) -> DriverResult<()>;
    async fn set_autosync(&self, group: &str, enabled: bool) -> DriverResult<()>;
    async fn add_authority_device(
        &self,
        address: &str,
        username: &str,
        password: &str,
        device_name: &str,
    ) -> DriverResult<()>;
    async fn remove_device(&self, device_name: &str) -> DriverResult<()>;
    async fn reset_trust(&self, device_name: &str) -> DriverResult<()>;

    // ── Folders & route domains ──────────────────────────────────

    async fn folder_exists(&self, folder: &str) -> DriverResult<bool>;
    async fn create_folder(&self, folder: &str) -> DriverResult<()>;
    async fn delete_folder(&self, folder: &str) -> DriverResult<()>;
    /// Every route-domain id in use on the device.
    async fn route_domain_ids(&self) -> DriverResult<Vec<u16>>;
    /// The route domain bound to a folder, if any.
    async fn get_route_domain(&self, folder: &str) -> DriverResult<Option<u16>>;
    async fn create_route_domain(&self, folder: &str, id: u16) -> DriverResult<()>;
    async fn delete_route_domain(&self, folder: &str) -> DriverResult<()>;

    // ── L2: VLANs, tunnels, FDB ──────────────────────────────────

    async fn get_vlan(&self, folder: &str, name: &str) -> DriverResult<Option<Vlan>>;
    async fn create_vlan(&self, folder: &str, vlan: &Vlan) -> DriverResult<()>;
    async fn delete_vlan(&self, folder: &str, name: &str) -> DriverResult<()>;
    async fn get_tunnel(&self, folder: &str, name: &str) -> DriverResult<Option<Tunnel>>;
    async fn create_tunnel(&self, folder: &str, tunnel: &Tunnel) -> DriverResult<()>;
    async fn delete_tunnel(&self, folder: &str, name: &str) -> DriverResult<()>;
    async fn fdb_entries(&self, folder: &str, tunnel: &str) -> DriverResult<Vec<FdbRecord>>;
    async fn add_fdb_entries(
        &self,
        folder: &str,
        tunnel: &str,
        records: &[FdbRecord],
    ) -> DriverResult<()>;
    async fn remove_fdb_entries(
        &self,
        folder: &str,
        tunnel: &str,
        records: &[FdbRecord],
    ) -> DriverResult<()>;

    // ── L3: self-IPs, SNAT ───────────────────────────────────────

    async fn get_self_ip(&self, folder: &str, name: &str) -> DriverResult<Option<SelfIp>>;
    async fn create_self_ip(&self, folder: &str, self_ip: &SelfIp) -> DriverResult<()>;
    async fn delete_self_ip(&self, folder: &str, name: &str) -> DriverResult<()>;
    async fn get_snat_translation(
        &self,
        folder: &str,
        name: &str,
    ) -> DriverResult<Option<SnatTranslation>>;
    async fn create_snat_translation(
        &self,
        folder: &str,
        translation: &SnatTranslation,
    ) -> DriverResult<()>;
    async fn delete_snat_translation(&self, folder: &str, name: &str) -> DriverResult<()>;
    /// Full paths of the translations in a SNAT pool.
    async fn snat_pool_members(&self, folder: &str, pool: &str) -> DriverResult<Vec<String>>;
    /// Replace a SNAT pool's members, creating the pool if needed.
    async fn set_snat_pool_members(
        &self,
        folder: &str,
        pool: &str,
        members: &[String],
    ) -> DriverResult<()>;
    async fn delete_snat_pool(&self, folder: &str, pool: &str) -> DriverResult<()>;
    /// Virtual addresses (with route domain) in a folder.
    async fn virtual_addresses(&self, folder: &str) -> DriverResult<Vec<String>>;
    /// Pool node addresses (with route domain) in a folder.
    async fn node_addresses(&self, folder: &str) -> DriverResult<Vec<String>>;

    // ── Pools & members ──────────────────────────────────────────

    async fn get_pool(&self, folder: &str, name: &str) -> DriverResult<Option<AppliancePool>>;
    async fn create_pool(&self, folder: &str, pool: &AppliancePool) -> DriverResult<()>;
    async fn update_pool(&self, folder: &str, pool: &AppliancePool) -> DriverResult<()>;
    async fn delete_pool(&self, folder: &str, name: &str) -> DriverResult<()>;
    async fn list_pools(&self, folder: &str) -> DriverResult<Vec<String>>;
    async fn pool_members(&self, folder: &str, pool: &str) -> DriverResult<Vec<PoolMember>>;
    async fn add_pool_member(
        &self,
        folder: &str,
        pool: &str,
        member: &PoolMember,
    ) -> DriverResult<()>;
    async fn update_pool_member(
        &self,
        folder: &str,
        pool: &str,
        member: &PoolMember,
    ) -> DriverResult<()>;
    async fn remove_pool_member(
        &self,
        folder: &str,
        pool: &str,
        address: &str,
        port: u16,
    ) -> DriverResult<()>;
    async fn pool_stats(&self, folder: &str, pool: &str) -> DriverResult<AppliancePoolStats>;

    // ── Monitors ─────────────────────────────────────────────────

    async fn get_monitor(&self, folder: &str, name: &str) -> DriverResult<Option<Monitor>>;
    async fn create_monitor(&self, folder: &str, monitor: &Monitor) -> DriverResult<()>;
    async fn update_monitor(&self, folder: &str, monitor: &Monitor) -> DriverResult<()>;
    /// Fails with `InUse` while any pool still references the monitor.
    async fn delete_monitor(&self, folder: &str, name: &str) -> DriverResult<()>;
    async fn list_monitors(&self, folder: &str) -> DriverResult<Vec<String>>;
    async fn set_pool_monitors(
        &self,
        folder: &str,
        pool: &str,
        monitors: &[String],
    ) -> DriverResult<()>;

    // ── Virtual servers, rules, persistence ──────────────────────

    async fn get_virtual_server(
        &self,
        folder: &str,
        name: &str,
    ) -> DriverResult<Option<VirtualServer>>;
    async fn create_virtual_server(&self, folder: &str, vs: &VirtualServer) -> DriverResult<()>;
    async fn update_virtual_server(&self, folder: &str, vs: &VirtualServer) -> DriverResult<()>;
    async fn delete_virtual_server(&self, folder: &str, name: &str) -> DriverResult<()>;
    async fn list_virtual_servers(&self, folder: &str) -> DriverResult<Vec<String>>;
    /// Create or replace an iRule.
    async fn put_rule(&self, folder: &str, rule: &IRule) -> DriverResult<()>;
    async fn delete_rule(&self, folder: &str, name: &str) -> DriverResult<()>;
    /// Create or replace a universal persistence profile.
    async fn put_persistence_profile(
        &self,
        folder: &str,
        profile: &UniversalPersistence,
    ) -> DriverResult<()>;
    async fn delete_persistence_profile(&self, folder: &str, name: &str) -> DriverResult<()>;
}
