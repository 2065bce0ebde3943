//! Folder-scoped view of a driver.
//!
//! A `FolderScope` pins one folder and its route domain so call sites
//! never format folder paths or `%rd` suffixes by hand.

use lbaas_core::naming::{COMMON_FOLDER, full_path, with_route_domain};

use crate::driver::ApplianceDriver;
use crate::error::DriverResult;
use crate::types::*;

/// Forward folder-relative calls to the driver with the pinned folder.
macro_rules! scoped {
    ($( fn $name:ident($($arg:ident: $ty:ty),*) -> $ret:ty; )*) => {
        $(
            pub async fn $name(&self, $($arg: $ty),*) -> DriverResult<$ret> {
                self.driver.$name(&self.folder, $($arg),*).await
            }
        )*
    };
}

#[derive(Clone)]
pub struct FolderScope<'a> {
    driver: &'a dyn ApplianceDriver,
    folder: String,
    route_domain: u16,
}

impl<'a> FolderScope<'a> {
    pub fn new(driver: &'a dyn ApplianceDriver, folder: impl Into<String>, route_domain: u16) -> Self {
        Self {
            driver,
            folder: folder.into(),
            route_domain,
        }
    }

    /// The shared `/Common` folder (route domain 0).
    pub fn common(driver: &'a dyn ApplianceDriver) -> Self {
        Self::new(driver, COMMON_FOLDER, 0)
    }

    pub fn folder(&self) -> &str {
        &self.folder
    }

    pub fn route_domain(&self) -> u16 {
        self.route_domain
    }

    pub fn hostname(&self) -> &str {
        self.driver.hostname()
    }

    pub fn driver(&self) -> &'a dyn ApplianceDriver {
        self.driver
    }

    /// `/<folder>/<name>`.
    pub fn path(&self, name: &str) -> String {
        full_path(&self.folder, name)
    }

    /// An address decorated with this scope's route domain.
    pub fn address(&self, address: &str) -> String {
        with_route_domain(address, self.route_domain)
    }

    pub async fn exists(&self) -> DriverResult<bool> {
        self.driver.folder_exists(&self.folder).await
    }

    scoped! {
        fn get_vlan(name: &str) -> Option<Vlan>;
        fn create_vlan(vlan: &Vlan) -> ();
        fn delete_vlan(name: &str) -> ();
        fn get_tunnel(name: &str) -> Option<Tunnel>;
        fn create_tunnel(tunnel: &Tunnel) -> ();
        fn delete_tunnel(name: &str) -> ();
        fn fdb_entries(tunnel: &str) -> Vec<FdbRecord>;
        fn add_fdb_entries(tunnel: &str, records: &[FdbRecord]) -> ();
        fn remove_fdb_entries(tunnel: &str, records: &[FdbRecord]) -> ();
        fn get_self_ip(name: &str) -> Option<SelfIp>;
        fn create_self_ip(self_ip: &SelfIp) -> ();
        fn delete_self_ip(name: &str) -> ();
        fn get_snat_translation(name: &str) -> Option<SnatTranslation>;
        fn create_snat_translation(translation: &SnatTranslation) -> ();
        fn delete_snat_translation(name: &str) -> ();
        fn snat_pool_members(pool: &str) -> Vec<String>;
        fn set_snat_pool_members(pool: &str, members: &[String]) -> ();
        fn delete_snat_pool(pool: &str) -> ();
        fn virtual_addresses() -> Vec<String>;
        fn node_addresses() -> Vec<String>;
        fn get_pool(name: &str) -> Option<AppliancePool>;
        fn create_pool(pool: &AppliancePool) -> ();
        fn update_pool(pool: &AppliancePool) -> ();
        fn delete_pool(name: &str) -> ();
        fn list_pools() -> Vec<String>;
        fn pool_members(pool: &str) -> Vec<PoolMember>;
        fn add_pool_member(pool: &str, member: &PoolMember) -> ();
        fn update_pool_member(pool: &str, member: &PoolMember) -> ();
        fn remove_pool_member(pool: &str, address: &str, port: u16) -> ();
        fn pool_stats(pool: &str) -> AppliancePoolStats;
        fn get_monitor(name: &str) -> Option<Monitor>;
        fn create_monitor(monitor: &Monitor) -> ();
        fn update_monitor(monitor: &Monitor) -> ();
        fn delete_monitor(name: &str) -> ();
        fn list_monitors() -> Vec<String>;
        fn set_pool_monitors(pool: &str, monitors: &[String]) -> ();
        fn get_virtual_server(name: &str) -> Option<VirtualServer>;
        fn create_virtual_server(vs: &VirtualServer) -> ();
        fn update_virtual_server(vs: &VirtualServer) -> ();
        fn delete_virtual_server(name: &str) -> ();
        fn list_virtual_servers() -> Vec<String>;
        fn put_rule(rule: &IRule) -> ();
        fn delete_rule(name: &str) -> ();
        fn put_persistence_profile(profile: &UniversalPersistence) -> ();
        fn delete_persistence_profile(name: &str) -> ();
    }
}
