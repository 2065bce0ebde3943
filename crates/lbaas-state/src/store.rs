//! StateStore — redb-backed control-plane store.
//!
//! Holds the load-balancing objects, the network records they reference,
//! registered agents, and pool → agent bindings. All values are
//! JSON-serialized into redb's `&[u8]` value columns. The store supports
//! both on-disk and in-memory backends (the latter for testing).

use std::path::Path;
use std::sync::Arc;

use redb::{Database, ReadableDatabase, ReadableTable};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;

use lbaas_core::types::*;

use crate::error::{StateError, StateResult};
use crate::tables::*;
use crate::types::*;

/// Closure mapping a redb or serde error into the matching `StateError`.
macro_rules! map_err {
    (Open) => {
        |e| StateError::Open(e.to_string())
    };
    (Serialize) => {
        |e| StateError::Encode(e.to_string())
    };
    (Deserialize) => {
        |e| StateError::Decode(e.to_string())
    };
    ($step:ident) => {
        |e| StateError::storage(stringify!($step), e)
    };
}

/// Thread-safe control-plane store backed by redb.
#[derive(Clone)]
pub struct StateStore {
    db: Arc<Database>,
}

impl StateStore {
    /// Open (or create) a persistent store at the given path.
    pub fn open(path: &Path) -> StateResult<Self> {
        let db = Database::create(path).map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!(?path, "state store opened");
        Ok(store)
    }

    /// Create an ephemeral in-memory store (for testing).
    pub fn open_in_memory() -> StateResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!("in-memory state store opened");
        Ok(store)
    }

    /// Create all tables if they don't exist yet.
    fn ensure_tables(&self) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(txn))?;
        for table in ALL {
            txn.open_table(table).map_err(map_err!(table))?;
        }
        txn.commit().map_err(map_err!(txn))?;
        Ok(())
    }

    // ── Generic row access ─────────────────────────────────────────

    fn put<T: Serialize>(&self, table: JsonTable, key: &str, value: &T) -> StateResult<()> {
        let value = serde_json::to_vec(value).map_err(map_err!(Serialize))?;
        let txn = self.db.begin_write().map_err(map_err!(txn))?;
        {
            let mut table = txn.open_table(table).map_err(map_err!(table))?;
            table
                .insert(key, value.as_slice())
                .map_err(map_err!(write))?;
        }
        txn.commit().map_err(map_err!(txn))?;
        Ok(())
    }

    fn get<T: DeserializeOwned>(&self, table: JsonTable, key: &str) -> StateResult<Option<T>> {
        let txn = self.db.begin_read().map_err(map_err!(txn))?;
        let table = txn.open_table(table).map_err(map_err!(table))?;
        match table.get(key).map_err(map_err!(read))? {
            Some(guard) => {
                let value = serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }

    /// Every row whose key starts with `prefix` (empty prefix = whole table).
    fn list<T: DeserializeOwned>(&self, table: JsonTable, prefix: &str) -> StateResult<Vec<T>> {
        let txn = self.db.begin_read().map_err(map_err!(txn))?;
        let table = txn.open_table(table).map_err(map_err!(table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(read))? {
            let (key, value) = entry.map_err(map_err!(read))?;
            if key.value().starts_with(prefix) {
                let row = serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
                results.push(row);
            }
        }
        Ok(results)
    }

    fn remove(&self, table: JsonTable, key: &str) -> StateResult<bool> {
        let txn = self.db.begin_write().map_err(map_err!(txn))?;
        let existed;
        {
            let mut table = txn.open_table(table).map_err(map_err!(table))?;
            existed = table.remove(key).map_err(map_err!(write))?.is_some();
        }
        txn.commit().map_err(map_err!(txn))?;
        Ok(existed)
    }

    // ── Pools ──────────────────────────────────────────────────────

    pub fn put_pool(&self, pool: &Pool) -> StateResult<()> {
        self.put(POOLS, &pool.id, pool)?;
        debug!(pool_id = %pool.id, status = %pool.status, "pool stored");
        Ok(())
    }

    pub fn get_pool(&self, pool_id: &str) -> StateResult<Option<Pool>> {
        self.get(POOLS, pool_id)
    }

    pub fn list_pools(&self) -> StateResult<Vec<Pool>> {
        self.list(POOLS, "")
    }

    /// Delete a pool with its stats and monitor associations.
    pub fn delete_pool(&self, pool_id: &str) -> StateResult<bool> {
        for assoc in self.list_pool_monitors(pool_id)? {
            self.remove(POOL_MONITORS, &assoc.table_key())?;
        }
        self.remove(POOL_STATS, pool_id)?;
        let existed = self.remove(POOLS, pool_id)?;
        debug!(%pool_id, existed, "pool deleted");
        Ok(existed)
    }

    // ── VIPs ───────────────────────────────────────────────────────

    pub fn put_vip(&self, vip: &Vip) -> StateResult<()> {
        self.put(VIPS, &vip.id, vip)
    }

    pub fn get_vip(&self, vip_id: &str) -> StateResult<Option<Vip>> {
        self.get(VIPS, vip_id)
    }

    pub fn list_vips(&self) -> StateResult<Vec<Vip>> {
        self.list(VIPS, "")
    }

    pub fn delete_vip(&self, vip_id: &str) -> StateResult<bool> {
        self.remove(VIPS, vip_id)
    }

    // ── Members ────────────────────────────────────────────────────

    pub fn put_member(&self, member: &Member) -> StateResult<()> {
        self.put(MEMBERS, &member.id, member)
    }

    pub fn get_member(&self, member_id: &str) -> StateResult<Option<Member>> {
        self.get(MEMBERS, member_id)
    }

    pub fn list_members(&self) -> StateResult<Vec<Member>> {
        self.list(MEMBERS, "")
    }

    /// Members of one pool, ordered by id.
    pub fn list_members_for_pool(&self, pool_id: &str) -> StateResult<Vec<Member>> {
        let mut members: Vec<Member> = self
            .list_members()?
            .into_iter()
            .filter(|m| m.pool_id == pool_id)
            .collect();
        members.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(members)
    }

    pub fn delete_member(&self, member_id: &str) -> StateResult<bool> {
        self.remove(MEMBERS, member_id)
    }

    // ── Health monitors ────────────────────────────────────────────

    pub fn put_health_monitor(&self, monitor: &HealthMonitor) -> StateResult<()> {
        self.put(HEALTH_MONITORS, &monitor.id, monitor)
    }

    pub fn get_health_monitor(&self, monitor_id: &str) -> StateResult<Option<HealthMonitor>> {
        self.get(HEALTH_MONITORS, monitor_id)
    }

    pub fn list_health_monitors(&self) -> StateResult<Vec<HealthMonitor>> {
        self.list(HEALTH_MONITORS, "")
    }

    pub fn delete_health_monitor(&self, monitor_id: &str) -> StateResult<bool> {
        self.remove(HEALTH_MONITORS, monitor_id)
    }

    // ── Pool ↔ monitor associations ────────────────────────────────

    pub fn put_pool_monitor(&self, assoc: &PoolMonitorAssociation) -> StateResult<()> {
        self.put(POOL_MONITORS, &assoc.table_key(), assoc)
    }

    pub fn get_pool_monitor(
        &self,
        pool_id: &str,
        monitor_id: &str,
    ) -> StateResult<Option<PoolMonitorAssociation>> {
        self.get(POOL_MONITORS, &association_key(pool_id, monitor_id))
    }

    pub fn list_pool_monitors(&self, pool_id: &str) -> StateResult<Vec<PoolMonitorAssociation>> {
        self.list(POOL_MONITORS, &format!("{pool_id}:"))
    }

    /// Pools a monitor is associated with.
    pub fn pools_for_monitor(&self, monitor_id: &str) -> StateResult<Vec<String>> {
        let rows: Vec<PoolMonitorAssociation> = self.list(POOL_MONITORS, "")?;
        Ok(rows
            .into_iter()
            .filter(|a| a.monitor_id == monitor_id)
            .map(|a| a.pool_id)
            .collect())
    }

    pub fn delete_pool_monitor(&self, pool_id: &str, monitor_id: &str) -> StateResult<bool> {
        self.remove(POOL_MONITORS, &association_key(pool_id, monitor_id))
    }

    // ── Networks and subnets ───────────────────────────────────────

    pub fn put_network(&self, network: &Network) -> StateResult<()> {
        self.put(NETWORKS, &network.id, network)
    }

    pub fn get_network(&self, network_id: &str) -> StateResult<Option<Network>> {
        self.get(NETWORKS, network_id)
    }

    pub fn list_networks(&self) -> StateResult<Vec<Network>> {
        self.list(NETWORKS, "")
    }

    pub fn put_subnet(&self, subnet: &Subnet) -> StateResult<()> {
        self.put(SUBNETS, &subnet.id, subnet)
    }

    pub fn get_subnet(&self, subnet_id: &str) -> StateResult<Option<Subnet>> {
        self.get(SUBNETS, subnet_id)
    }

    pub fn list_subnets(&self) -> StateResult<Vec<Subnet>> {
        self.list(SUBNETS, "")
    }

    // ── Ports ──────────────────────────────────────────────────────

    pub fn put_port(&self, port: &Port) -> StateResult<()> {
        self.put(PORTS, &port.id, port)
    }

    pub fn get_port(&self, port_id: &str) -> StateResult<Option<Port>> {
        self.get(PORTS, port_id)
    }

    pub fn list_ports(&self) -> StateResult<Vec<Port>> {
        self.list(PORTS, "")
    }

    pub fn ports_by_name(&self, name: &str) -> StateResult<Vec<Port>> {
        Ok(self
            .list_ports()?
            .into_iter()
            .filter(|p| p.name == name)
            .collect())
    }

    /// Ports holding `address` as a fixed IP, on any subnet.
    pub fn ports_by_fixed_ip(&self, address: &str) -> StateResult<Vec<Port>> {
        Ok(self
            .list_ports()?
            .into_iter()
            .filter(|p| p.fixed_ips.iter().any(|ip| ip.ip_address == address))
            .collect())
    }

    pub fn ports_on_network(&self, network_id: &str) -> StateResult<Vec<Port>> {
        Ok(self
            .list_ports()?
            .into_iter()
            .filter(|p| p.network_id == network_id)
            .collect())
    }

    pub fn delete_port(&self, port_id: &str) -> StateResult<bool> {
        self.remove(PORTS, port_id)
    }

    // ── Agents ─────────────────────────────────────────────────────

    pub fn put_agent(&self, agent: &AgentRecord) -> StateResult<()> {
        self.put(AGENTS, &agent.id, agent)
    }

    pub fn get_agent(&self, agent_id: &str) -> StateResult<Option<AgentRecord>> {
        self.get(AGENTS, agent_id)
    }

    pub fn get_agent_by_host(&self, host: &str) -> StateResult<Option<AgentRecord>> {
        Ok(self.list_agents()?.into_iter().find(|a| a.host == host))
    }

    pub fn list_agents(&self) -> StateResult<Vec<AgentRecord>> {
        self.list(AGENTS, "")
    }

    pub fn delete_agent(&self, agent_id: &str) -> StateResult<bool> {
        self.remove(AGENTS, agent_id)
    }

    // ── Pool bindings ──────────────────────────────────────────────

    pub fn get_binding(&self, pool_id: &str) -> StateResult<Option<PoolBinding>> {
        self.get(BINDINGS, pool_id)
    }

    pub fn list_bindings(&self) -> StateResult<Vec<PoolBinding>> {
        self.list(BINDINGS, "")
    }

    pub fn bindings_for_agent(&self, agent_id: &str) -> StateResult<Vec<PoolBinding>> {
        Ok(self
            .list_bindings()?
            .into_iter()
            .filter(|b| b.agent_id == agent_id)
            .collect())
    }

    /// Bind a pool unless a binding already exists, in one write transaction.
    ///
    /// Returns the binding that holds afterwards and whether this call
    /// created it.
    pub fn bind_pool_if_absent(
        &self,
        pool_id: &str,
        agent_id: &str,
        now: u64,
    ) -> StateResult<(PoolBinding, bool)> {
        let txn = self.db.begin_write().map_err(map_err!(txn))?;
        let outcome;
        {
            let mut table = txn.open_table(BINDINGS).map_err(map_err!(table))?;
            let existing: Option<PoolBinding> = match table.get(pool_id).map_err(map_err!(read))? {
                Some(guard) => {
                    Some(serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?)
                }
                None => None,
            };
            outcome = match existing {
                Some(binding) => (binding, false),
                None => {
                    let binding = PoolBinding {
                        pool_id: pool_id.to_string(),
                        agent_id: agent_id.to_string(),
                        bound_at: now,
                    };
                    let value = serde_json::to_vec(&binding).map_err(map_err!(Serialize))?;
                    table
                        .insert(pool_id, value.as_slice())
                        .map_err(map_err!(write))?;
                    (binding, true)
                }
            };
        }
        txn.commit().map_err(map_err!(txn))?;
        if outcome.1 {
            debug!(%pool_id, %agent_id, "pool bound");
        }
        Ok(outcome)
    }

    /// Overwrite a pool's binding (explicit rebind on failover or rebalance).
    pub fn rebind_pool(&self, pool_id: &str, agent_id: &str, now: u64) -> StateResult<PoolBinding> {
        let binding = PoolBinding {
            pool_id: pool_id.to_string(),
            agent_id: agent_id.to_string(),
            bound_at: now,
        };
        self.put(BINDINGS, pool_id, &binding)?;
        debug!(%pool_id, %agent_id, "pool rebound");
        Ok(binding)
    }

    pub fn delete_binding(&self, pool_id: &str) -> StateResult<bool> {
        self.remove(BINDINGS, pool_id)
    }

    /// Tenants with at least one pool bound to `agent_id`.
    pub fn tenants_for_agent(&self, agent_id: &str) -> StateResult<Vec<String>> {
        let mut tenants = Vec::new();
        for binding in self.bindings_for_agent(agent_id)? {
            let Some(pool) = self.get_pool(&binding.pool_id)? else {
                continue;
            };
            if !tenants.contains(&pool.tenant_id) {
                tenants.push(pool.tenant_id);
            }
        }
        Ok(tenants)
    }

    // ── Stats and status notes ─────────────────────────────────────

    pub fn put_pool_stats(&self, pool_id: &str, stats: &PoolStats) -> StateResult<()> {
        self.put(POOL_STATS, pool_id, stats)
    }

    pub fn get_pool_stats(&self, pool_id: &str) -> StateResult<Option<PoolStats>> {
        self.get(POOL_STATS, pool_id)
    }

    /// Record (or clear, with `None`) the description attached to an
    /// object's last status change.
    pub fn set_status_note(&self, kind: &str, id: &str, note: Option<&str>) -> StateResult<()> {
        let key = status_note_key(kind, id);
        match note {
            Some(note) => self.put(STATUS_NOTES, &key, &note),
            None => self.remove(STATUS_NOTES, &key).map(|_| ()),
        }
    }

    pub fn status_note(&self, kind: &str, id: &str) -> StateResult<Option<String>> {
        self.get(STATUS_NOTES, &status_note_key(kind, id))
    }
}
