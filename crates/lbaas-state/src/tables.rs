//! redb table definitions for the control-plane store.
//!
//! Every table maps a `&str` key to a JSON-serialized record. Keys are
//! object ids unless noted.

use redb::TableDefinition;

/// Shape shared by every table: id → JSON record.
pub type JsonTable = TableDefinition<'static, &'static str, &'static [u8]>;

pub const POOLS: JsonTable = TableDefinition::new("pools");
pub const VIPS: JsonTable = TableDefinition::new("vips");
pub const MEMBERS: JsonTable = TableDefinition::new("members");
pub const HEALTH_MONITORS: JsonTable = TableDefinition::new("health_monitors");

/// Pool ↔ monitor associations keyed by `{pool_id}:{monitor_id}`.
pub const POOL_MONITORS: JsonTable = TableDefinition::new("pool_monitors");

pub const NETWORKS: JsonTable = TableDefinition::new("networks");
pub const SUBNETS: JsonTable = TableDefinition::new("subnets");
pub const PORTS: JsonTable = TableDefinition::new("ports");

/// Agents keyed by host.
pub const AGENTS: JsonTable = TableDefinition::new("agents");

/// Pool → agent bindings keyed by pool id. One row per pool.
pub const BINDINGS: JsonTable = TableDefinition::new("pool_bindings");

pub const POOL_STATS: JsonTable = TableDefinition::new("pool_stats");

/// Human-readable status descriptions keyed by `{kind}/{id}`.
pub const STATUS_NOTES: JsonTable = TableDefinition::new("status_notes");

pub const ALL: [JsonTable; 12] = [
    POOLS,
    VIPS,
    MEMBERS,
    HEALTH_MONITORS,
    POOL_MONITORS,
    NETWORKS,
    SUBNETS,
    PORTS,
    AGENTS,
    BINDINGS,
    POOL_STATS,
    STATUS_NOTES,
];
