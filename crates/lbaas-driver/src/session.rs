//! Connection-managed appliance session.
//!
//! `ManagedSession` wraps any driver and adds the connection discipline
//! every appliance call needs: reconnect when the session was dropped,
//! bound each call with a timeout, and flip to disconnected when a call
//! fails with a connectivity error. The next call retries the connection
//! and, if that fails too, reports `NotConnected` carrying the original
//! I/O error.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tracing::{info, warn};

use crate::driver::ApplianceDriver;
use crate::error::{DriverError, DriverResult};
use crate::types::*;

/// Run one driver call under the session guard.
macro_rules! guarded {
    ($self:ident, $op:literal, $call:expr) => {{
        $self.ensure_connected().await?;
        let result = match tokio::time::timeout($self.timeout, $call).await {
            Ok(result) => result,
            Err(_) => Err(DriverError::Timeout(format!(
                "{} {} after {:?}",
                $self.inner.hostname(),
                $op,
                $self.timeout
            ))),
        };
        $self.observe($op, result)
    }};
}

pub struct ManagedSession {
    inner: Arc<dyn ApplianceDriver>,
    timeout: Duration,
    connected: AtomicBool,
    last_error: Mutex<Option<String>>,
}

impl ManagedSession {
    /// Wrap a driver. The session connects lazily on first use.
    pub fn new(inner: Arc<dyn ApplianceDriver>, timeout: Duration) -> Self {
        Self {
            inner,
            timeout,
            connected: AtomicBool::new(false),
            last_error: Mutex::new(None),
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn remember(&self, error: &DriverError) {
        *self.last_error.lock().unwrap_or_else(PoisonError::into_inner) = Some(error.to_string());
    }

    async fn ensure_connected(&self) -> DriverResult<()> {
        if self.is_connected() {
            return Ok(());
        }
        match tokio::time::timeout(self.timeout, self.inner.connect()).await {
            Ok(Ok(())) => {
                self.connected.store(true, Ordering::SeqCst);
                info!(host = %self.inner.hostname(), "appliance session connected");
                Ok(())
            }
            Ok(Err(e)) => {
                let original = self
                    .last_error
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .clone()
                    .unwrap_or_else(|| e.to_string());
                warn!(host = %self.inner.hostname(), error = %e, "appliance reconnect failed");
                Err(DriverError::NotConnected(format!(
                    "{}: {original}",
                    self.inner.hostname()
                )))
            }
            Err(_) => Err(DriverError::NotConnected(format!(
                "{}: connect timed out after {:?}",
                self.inner.hostname(),
                self.timeout
            ))),
        }
    }

    fn observe<T>(&self, op: &str, result: DriverResult<T>) -> DriverResult<T> {
        if let Err(e) = &result {
            if e.is_connectivity() {
                self.connected.store(false, Ordering::SeqCst);
                self.remember(e);
                warn!(host = %self.inner.hostname(), op, error = %e, "appliance session lost");
            }
        }
        result
    }
}

#[async_trait]
impl ApplianceDriver for ManagedSession {
    fn hostname(&self) -> &str {
        self.inner.hostname()
    }

    async fn connect(&self) -> DriverResult<()> {
        self.connected.store(false, Ordering::SeqCst);
        self.ensure_connected().await
    }

    async fn system_info(&self) -> DriverResult<SystemInfo> {
        guarded!(self, "system_info", self.inner.system_info())
    }

    async fn set_tunnel_sync(&self, enabled: bool) -> DriverResult<()> {
        guarded!(self, "set_tunnel_sync", self.inner.set_tunnel_sync(enabled))
    }

    async fn capacity_metrics(&self) -> DriverResult<CapacityMetrics> {
        guarded!(self, "capacity_metrics", self.inner.capacity_metrics())
    }

    async fn failover_device_group(&self) -> DriverResult<Option<String>> {
        guarded!(self, "failover_device_group", self.inner.failover_device_group())
    }

    async fn device_group_members(&self, group: &str) -> DriverResult<Vec<DeviceInfo>> {
        guarded!(self, "device_group_members", self.inner.device_group_members(group))
    }

    async fn traffic_groups(&self) -> DriverResult<Vec<String>> {
        guarded!(self, "traffic_groups", self.inner.traffic_groups())
    }

    async fn sync_status(&self) -> DriverResult<SyncStatus> {
        guarded!(self, "sync_status", self.inner.sync_status())
    }

    async fn sync_to_group(&self, group: &str) -> DriverResult<()> {
        guarded!(self, "sync_to_group", self.inner.sync_to_group(group))
    }

    async fn save_config(&self) -> DriverResult<()> {
        guarded!(self, "save_config", self.inner.save_config())
    }

    async fn set_autosync(&self, group: &str, enabled: bool) -> DriverResult<()> {
        guarded!(self, "set_autosync", self.inner.set_autosync(group, enabled))
    }

    async fn add_authority_device(
        &self,
        address: &str,
        username: &str,
        password: &str,
        device_name: &str,
    ) -> DriverResult<()> {
        guarded!(
            self,
            "add_authority_device",
            self.inner
                .add_authority_device(address, username, password, device_name)
        )
    }

    async fn remove_device(&self, device_name: &str) -> DriverResult<()> {
        guarded!(self, "remove_device", self.inner.remove_device(device_name))
    }

    async fn reset_trust(&self, device_name: &str) -> DriverResult<()> {
        guarded!(self, "reset_trust", self.inner.reset_trust(device_name))
    }

    async fn folder_exists(&self, folder: &str) -> DriverResult<bool> {
        guarded!(self, "folder_exists", self.inner.folder_exists(folder))
    }

    async fn create_folder(&self, folder: &str) -> DriverResult<()> {
        guarded!(self, "create_folder", self.inner.create_folder(folder))
    }

    async fn delete_folder(&self, folder: &str) -> DriverResult<()> {
        guarded!(self, "delete_folder", self.inner.delete_folder(folder))
    }

    async fn route_domain_ids(&self) -> DriverResult<Vec<u16>> {
        guarded!(self, "route_domain_ids", self.inner.route_domain_ids())
    }

    async fn get_route_domain(&self, folder: &str) -> DriverResult<Option<u16>> {
        guarded!(self, "get_route_domain", self.inner.get_route_domain(folder))
    }

    async fn create_route_domain(&self, folder: &str, id: u16) -> DriverResult<()> {
        guarded!(self, "create_route_domain", self.inner.create_route_domain(folder, id))
    }

    async fn delete_route_domain(&self, folder: &str) -> DriverResult<()> {
        guarded!(self, "delete_route_domain", self.inner.delete_route_domain(folder))
    }

    async fn get_vlan(&self, folder: &str, name: &str) -> DriverResult<Option<Vlan>> {
        guarded!(self, "get_vlan", self.inner.get_vlan(folder, name))
    }

    async fn create_vlan(&self, folder: &str, vlan: &Vlan) -> DriverResult<()> {
        guarded!(self, "create_vlan", self.inner.create_vlan(folder, vlan))
    }

    async fn delete_vlan(&self, folder: &str, name: &str) -> DriverResult<()> {
        guarded!(self, "delete_vlan", self.inner.delete_vlan(folder, name))
    }

    async fn get_tunnel(&self, folder: &str, name: &str) -> DriverResult<Option<Tunnel>> {
        guarded!(self, "get_tunnel", self.inner.get_tunnel(folder, name))
    }

    async fn create_tunnel(&self, folder: &str, tunnel: &Tunnel) -> DriverResult<()> {
        guarded!(self, "create_tunnel", self.inner.create_tunnel(folder, tunnel))
    }

    async fn delete_tunnel(&self, folder: &str, name: &str) -> DriverResult<()> {
        guarded!(self, "delete_tunnel", self.inner.delete_tunnel(folder, name))
    }

    async fn fdb_entries(&self, folder: &str, tunnel: &str) -> DriverResult<Vec<FdbRecord>> {
        guarded!(self, "fdb_entries", self.inner.fdb_entries(folder, tunnel))
    }

    async fn add_fdb_entries(
        &self,
        folder: &str,
        tunnel: &str,
        records: &[FdbRecord],
    ) -> DriverResult<()> {
        guarded!(
            self,
            "add_fdb_entries",
            self.inner.add_fdb_entries(folder, tunnel, records)
        )
    }

    async fn remove_fdb_entries(
        &self,
        folder: &str,
        tunnel: &str,
        records: &[FdbRecord],
    ) -> DriverResult<()> {
        guarded!(
            self,
            "remove_fdb_entries",
            self.inner.remove_fdb_entries(folder, tunnel, records)
        )
    }

    async fn get_self_ip(&self, folder: &str, name: &str) -> DriverResult<Option<SelfIp>> {
        guarded!(self, "get_self_ip", self.inner.get_self_ip(folder, name))
    }

    async fn create_self_ip(&self, folder: &str, self_ip: &SelfIp) -> DriverResult<()> {
        guarded!(self, "create_self_ip", self.inner.create_self_ip(folder, self_ip))
    }

    async fn delete_self_ip(&self, folder: &str, name: &str) -> DriverResult<()> {
        guarded!(self, "delete_self_ip", self.inner.delete_self_ip(folder, name))
    }

    async fn get_snat_translation(
        &self,
        folder: &str,
        name: &str,
    ) -> DriverResult<Option<SnatTranslation>> {
        guarded!(
            self,
            "get_snat_translation",
            self.inner.get_snat_translation(folder, name)
        )
    }

    async fn create_snat_translation(
        &self,
        folder: &str,
        translation: &SnatTranslation,
    ) -> DriverResult<()> {
        guarded!(
            self,
            "create_snat_translation",
            self.inner.create_snat_translation(folder, translation)
        )
    }

    async fn delete_snat_translation(&self, folder: &str, name: &str) -> DriverResult<()> {
        guarded!(
            self,
            "delete_snat_translation",
            self.inner.delete_snat_translation(folder, name)
        )
    }

    async fn snat_pool_members(&self, folder: &str, pool: &str) -> DriverResult<Vec<String>> {
        guarded!(self, "snat_pool_members", self.inner.snat_pool_members(folder, pool))
    }

    async fn set_snat_pool_members(
        &self,
        folder: &str,
        pool: &str,
        members: &[String],
    ) -> DriverResult<()> {
        guarded!(
            self,
            "set_snat_pool_members",
            self.inner.set_snat_pool_members(folder, pool, members)
        )
    }

    async fn delete_snat_pool(&self, folder: &str, pool: &str) -> DriverResult<()> {
        guarded!(self, "delete_snat_pool", self.inner.delete_snat_pool(folder, pool))
    }

    async fn virtual_addresses(&self, folder: &str) -> DriverResult<Vec<String>> {
        guarded!(self, "virtual_addresses", self.inner.virtual_addresses(folder))
    }

    async fn node_addresses(&self, folder: &str) -> DriverResult<Vec<String>> {
        guarded!(self, "node_addresses", self.inner.node_addresses(folder))
    }

    async fn get_pool(&self, folder: &str, name: &str) -> DriverResult<Option<AppliancePool>> {
        guarded!(self, "get_pool", self.inner.get_pool(folder, name))
    }

    async fn create_pool(&self, folder: &str, pool: &AppliancePool) -> DriverResult<()> {
        guarded!(self, "create_pool", self.inner.create_pool(folder, pool))
    }

    async fn update_pool(&self, folder: &str, pool: &AppliancePool) -> DriverResult<()> {
        guarded!(self, "update_pool", self.inner.update_pool(folder, pool))
    }

    async fn delete_pool(&self, folder: &str, name: &str) -> DriverResult<()> {
        guarded!(self, "delete_pool", self.inner.delete_pool(folder, name))
    }

    async fn list_pools(&self, folder: &str) -> DriverResult<Vec<String>> {
        guarded!(self, "list_pools", self.inner.list_pools(folder))
    }

    async fn pool_members(&self, folder: &str, pool: &str) -> DriverResult<Vec<PoolMember>> {
        guarded!(self, "pool_members", self.inner.pool_members(folder, pool))
    }

    async fn add_pool_member(
        &self,
        folder: &str,
        pool: &str,
        member: &PoolMember,
    ) -> DriverResult<()> {
        guarded!(self, "add_pool_member", self.inner.add_pool_member(folder, pool, member))
    }

    async fn update_pool_member(
        &self,
        folder: &str,
        pool: &str,
        member: &PoolMember,
    ) -> DriverResult<()> {
        guarded!(
            self,
            "update_pool_member",
            self.inner.update_pool_member(folder, pool, member)
        )
    }

    async fn remove_pool_member(
        &self,
        folder: &str,
        pool: &str,
        address: &str,
        port: u16,
    ) -> DriverResult<()> {
        guarded!(
            self,
            "remove_pool_member",
            self.inner.remove_pool_member(folder, pool, address, port)
        )
    }

    async fn pool_stats(&self, folder: &str, pool: &str) -> DriverResult<AppliancePoolStats> {
        guarded!(self, "pool_stats", self.inner.pool_stats(folder, pool))
    }

    async fn get_monitor(&self, folder: &str, name: &str) -> DriverResult<Option<Monitor>> {
        guarded!(self, "get_monitor", self.inner.get_monitor(folder, name))
    }

    async fn create_monitor(&self, folder: &str, monitor: &Monitor) -> DriverResult<()> {
        guarded!(self, "create_monitor", self.inner.create_monitor(folder, monitor))
    }

    async fn update_monitor(&self, folder: &str, monitor: &Monitor) -> DriverResult<()> {
        guarded!(self, "update_monitor", self.inner.update_monitor(folder, monitor))
    }

    async fn delete_monitor(&self, folder: &str, name: &str) -> DriverResult<()> {
        guarded!(self, "delete_monitor", self.inner.delete_monitor(folder, name))
    }

    async fn list_monitors(&self, folder: &str) -> DriverResult<Vec<String>> {
        guarded!(self, "list_monitors", self.inner.list_monitors(folder))
    }

    async fn set_pool_monitors(
        &self,
        folder: &str,
        pool: &str,
        monitors: &[String],
    ) -> DriverResult<()> {
        guarded!(
            self,
            "set_pool_monitors",
            self.inner.set_pool_monitors(folder, pool, monitors)
        )
    }

    async fn get_virtual_server(
        &self,
        folder: &str,
        name: &str,
    ) -> DriverResult<Option<VirtualServer>> {
        guarded!(self, "get_virtual_server", self.inner.get_virtual_server(folder, name))
    }

    async fn create_virtual_server(&self, folder: &str, vs: &VirtualServer) -> DriverResult<()> {
        guarded!(self, "create_virtual_server", self.inner.create_virtual_server(folder, vs))
    }

    async fn update_virtual_server(&self, folder: &str, vs: &VirtualServer) -> DriverResult<()> {
        guarded!(self, "update_virtual_server", self.inner.update_virtual_server(folder, vs))
    }

    async fn delete_virtual_server(&self, folder: &str, name: &str) -> DriverResult<()> {
        guarded!(
            self,
            "delete_virtual_server",
            self.inner.delete_virtual_server(folder, name)
        )
    }

    async fn list_virtual_servers(&self, folder: &str) -> DriverResult<Vec<String>> {
        guarded!(self, "list_virtual_servers", self.inner.list_virtual_servers(folder))
    }

    async fn put_rule(&self, folder: &str, rule: &IRule) -> DriverResult<()> {
        guarded!(self, "put_rule", self.inner.put_rule(folder, rule))
    }

    async fn delete_rule(&self, folder: &str, name: &str) -> DriverResult<()> {
        guarded!(self, "delete_rule", self.inner.delete_rule(folder, name))
    }

    async fn put_persistence_profile(
        &self,
        folder: &str,
        profile: &UniversalPersistence,
    ) -> DriverResult<()> {
        guarded!(
            self,
            "put_persistence_profile",
            self.inner.put_persistence_profile(folder, profile)
        )
    }

    async fn delete_persistence_profile(&self, folder: &str, name: &str) -> DriverResult<()> {
        guarded!(
            self,
            "delete_persistence_profile",
            self.inner.delete_persistence_profile(folder, name)
        )
    }
}
