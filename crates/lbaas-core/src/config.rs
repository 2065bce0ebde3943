//! agent.toml configuration parser.

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// HA topology of the appliance cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum HaType {
    #[default]
    Standalone,
    Pair,
    Scalen,
}

impl HaType {
    pub fn as_str(&self) -> &'static str {
        match self {
            HaType::Standalone => "standalone",
            HaType::Pair => "pair",
            HaType::Scalen => "scalen",
        }
    }
}

/// How configuration reaches the cluster members.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SyncMode {
    /// The agent drives every appliance individually.
    #[default]
    Replication,
    /// The agent drives one appliance and relies on device-group autosync.
    Autosync,
}

/// Which virtual-server profile family to use for non-HTTP VIPs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum VirtualServerKind {
    #[default]
    Standard,
    FastL4,
}

/// Per-metric caps for the capacity score. Unset caps are not scored.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CapacityCaps {
    pub throughput: Option<u64>,
    pub active_connections: Option<u64>,
    pub ssl_tps: Option<u64>,
    pub node_count: Option<u64>,
    pub ssl_profiles: Option<u64>,
    pub tenants: Option<u64>,
    pub tunnels: Option<u64>,
    pub vlans: Option<u64>,
    pub route_domains: Option<u64>,
}

impl CapacityCaps {
    pub fn is_empty(&self) -> bool {
        *self == CapacityCaps::default()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Host name this agent registers under.
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_prefix")]
    pub environment_prefix: String,
    #[serde(default = "default_group")]
    pub environment_group_number: u32,
    /// Management addresses; the first entry is the seed.
    #[serde(default)]
    pub icontrol_hostnames: Vec<String>,
    #[serde(default = "default_username")]
    pub icontrol_username: String,
    #[serde(default)]
    pub icontrol_password: String,
    #[serde(default = "default_icontrol_port")]
    pub icontrol_port: u16,
    #[serde(default = "default_connection_timeout")]
    pub connection_timeout_secs: u64,
    #[serde(default)]
    pub ha_type: HaType,
    #[serde(default)]
    pub sync_mode: SyncMode,
    /// Explicit device-group name; discovered from the seed when unset.
    #[serde(default)]
    pub device_group: Option<String>,
    /// Add peers as trusted devices during startup.
    #[serde(default)]
    pub auto_trust: bool,
    #[serde(default = "default_true")]
    pub route_domain_per_tenant: bool,
    #[serde(default)]
    pub global_routed_mode: bool,
    #[serde(default = "default_true")]
    pub snat_mode: bool,
    /// `0` selects SNAT automap instead of explicit translations.
    #[serde(default = "default_snat_count")]
    pub snat_addresses_per_subnet: u32,
    #[serde(default)]
    pub vtep_selfip_name: Option<String>,
    #[serde(default)]
    pub tunnel_types: Vec<String>,
    /// Physical network → appliance interface. `default` is the fallback.
    #[serde(default = "default_mappings")]
    pub physical_network_mappings: HashMap<String, String>,
    /// Networks pre-provisioned in `/Common` that the agent must never create.
    #[serde(default)]
    pub common_network_ids: HashMap<String, String>,
    #[serde(default = "default_true")]
    pub l2_population: bool,
    #[serde(default)]
    pub virtual_server_kind: VirtualServerKind,
    #[serde(default = "default_periodic_interval")]
    pub periodic_interval_secs: u64,
    #[serde(default = "default_resync_interval")]
    pub resync_interval_secs: u64,
    #[serde(default = "default_report_interval")]
    pub report_interval_secs: u64,
    #[serde(default = "default_stats_interval")]
    pub stats_interval_secs: u64,
    #[serde(default = "default_sync_attempts")]
    pub sync_attempts: u32,
    #[serde(default = "default_sync_backoff")]
    pub sync_backoff_secs: u64,
    #[serde(default = "default_poll_ms")]
    pub serializer_poll_ms: u64,
    #[serde(default = "default_min_version")]
    pub min_version: String,
    #[serde(default)]
    pub save_config_after_sync: bool,
    #[serde(default)]
    pub capacity: CapacityCaps,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Read(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

impl AgentConfig {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: AgentConfig = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> anyhow::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Reject configurations the cluster coordinator cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.environment_prefix.is_empty() {
            return Err(ConfigError::Invalid("environment_prefix is empty".into()));
        }
        if self.icontrol_hostnames.is_empty() {
            return Err(ConfigError::Invalid("icontrol_hostnames is empty".into()));
        }
        let hosts = self.icontrol_hostnames.len();
        let ok = match self.ha_type {
            HaType::Standalone => hosts == 1,
            HaType::Pair => hosts == 2,
            HaType::Scalen => hosts >= 2,
        };
        if !ok {
            return Err(ConfigError::Invalid(format!(
                "ha_type {} does not match {hosts} configured hosts",
                self.ha_type.as_str()
            )));
        }
        if !self.tunnel_types.is_empty() && self.vtep_selfip_name.is_none() {
            return Err(ConfigError::Invalid(
                "tunnel_types requires vtep_selfip_name".into(),
            ));
        }
        semver::Version::parse(&self.min_version)
            .map_err(|e| ConfigError::Invalid(format!("min_version: {e}")))?;
        Ok(())
    }

    pub fn connection_timeout(&self) -> Duration {
        Duration::from_secs(self.connection_timeout_secs)
    }

    pub fn sync_backoff(&self) -> Duration {
        Duration::from_secs(self.sync_backoff_secs)
    }

    /// Interface for a physical network, falling back to `default`.
    pub fn interface_for(&self, physical_network: Option<&str>) -> Option<&str> {
        physical_network
            .and_then(|p| self.physical_network_mappings.get(p))
            .or_else(|| self.physical_network_mappings.get("default"))
            .map(String::as_str)
    }

    /// Build a minimal config for the given seed appliance (tests, scaffolding).
    pub fn scaffold(host: &str, icontrol_hostnames: &[&str], ha_type: HaType) -> Self {
        AgentConfig {
            host: host.to_string(),
            icontrol_hostnames: icontrol_hostnames.iter().map(|h| h.to_string()).collect(),
            ha_type,
            ..AgentConfig::default()
        }
    }
}

impl Default for AgentConfig {
    fn default() -> Self {
        AgentConfig {
            host: default_host(),
            environment_prefix: default_prefix(),
            environment_group_number: default_group(),
            icontrol_hostnames: Vec::new(),
            icontrol_username: default_username(),
            icontrol_password: String::new(),
            icontrol_port: default_icontrol_port(),
            connection_timeout_secs: default_connection_timeout(),
            ha_type: HaType::Standalone,
            sync_mode: SyncMode::Replication,
            device_group: None,
            auto_trust: false,
            route_domain_per_tenant: true,
            global_routed_mode: false,
            snat_mode: true,
            snat_addresses_per_subnet: default_snat_count(),
            vtep_selfip_name: None,
            tunnel_types: Vec::new(),
            physical_network_mappings: default_mappings(),
            common_network_ids: HashMap::new(),
            l2_population: true,
            virtual_server_kind: VirtualServerKind::Standard,
            periodic_interval_secs: default_periodic_interval(),
            resync_interval_secs: default_resync_interval(),
            report_interval_secs: default_report_interval(),
            stats_interval_secs: default_stats_interval(),
            sync_attempts: default_sync_attempts(),
            sync_backoff_secs: default_sync_backoff(),
            serializer_poll_ms: default_poll_ms(),
            min_version: default_min_version(),
            save_config_after_sync: false,
            capacity: CapacityCaps::default(),
        }
    }
}

// ── Plugin side ──────────────────────────────────────────────────

/// Control-plane settings: scheduling and service assembly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PluginConfig {
    /// Only schedule onto agents reporting this environment prefix.
    #[serde(default)]
    pub environment_prefix: Option<String>,
    /// An agent whose last report is older than this is dead.
    #[serde(default = "default_agent_down")]
    pub agent_down_secs: u64,
    /// Rewrite the pool binding when failing over to a live agent.
    #[serde(default)]
    pub rebind_on_failover: bool,
    /// How long assembled subnet/network lookups stay cached.
    #[serde(default = "default_subnet_cache")]
    pub subnet_cache_secs: u64,
}

impl Default for PluginConfig {
    fn default() -> Self {
        PluginConfig {
            environment_prefix: None,
            agent_down_secs: default_agent_down(),
            rebind_on_failover: false,
            subnet_cache_secs: default_subnet_cache(),
        }
    }
}

impl PluginConfig {
    pub fn subnet_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.subnet_cache_secs)
    }
}

fn default_true() -> bool {
    true
}
fn default_agent_down() -> u64 {
    75
}
fn default_subnet_cache() -> u64 {
    1800
}
fn default_host() -> String {
    "lbaas-agent".to_string()
}
fn default_prefix() -> String {
    "env".to_string()
}
fn default_group() -> u32 {
    1
}
fn default_username() -> String {
    "admin".to_string()
}
fn default_icontrol_port() -> u16 {
    80
}
fn default_connection_timeout() -> u64 {
    30
}
fn default_snat_count() -> u32 {
    1
}
fn default_mappings() -> HashMap<String, String> {
    HashMap::from([("default".to_string(), "1.1".to_string())])
}
fn default_periodic_interval() -> u64 {
    10
}
fn default_resync_interval() -> u64 {
    300
}
fn default_report_interval() -> u64 {
    30
}
fn default_stats_interval() -> u64 {
    600
}
fn default_sync_attempts() -> u32 {
    4
}
fn default_sync_backoff() -> u64 {
    130
}
fn default_poll_ms() -> u64 {
    100
}
fn default_min_version() -> String {
    "11.5.0".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_applied() {
        let config = AgentConfig::default();
        assert_eq!(config.environment_prefix, "env");
        assert_eq!(config.sync_attempts, 4);
        assert_eq!(config.sync_backoff_secs, 130);
        assert_eq!(config.virtual_server_kind, VirtualServerKind::Standard);
        assert_eq!(config.interface_for(None), Some("1.1"));
    }

    #[test]
    fn parse_minimal() {
        let toml_str = r#"
host = "agent-1"
environment_prefix = "prod"
icontrol_hostnames = ["10.190.0.10", "10.190.0.11"]
ha_type = "pair"
sync_mode = "autosync"

[physical_network_mappings]
physnet1 = "1.3"
"#;
        let config: AgentConfig = toml::from_str(toml_str).unwrap();
        config.validate().unwrap();
        assert_eq!(config.sync_mode, SyncMode::Autosync);
        assert_eq!(config.interface_for(Some("physnet1")), Some("1.3"));
        assert_eq!(config.interface_for(Some("physnet9")), None);
    }

    #[test]
    fn ha_host_count_is_validated() {
        let mut config = AgentConfig::scaffold("a", &["10.0.0.1"], HaType::Pair);
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        config.ha_type = HaType::Standalone;
        assert!(config.validate().is_ok());

        config.ha_type = HaType::Scalen;
        assert!(config.validate().is_err());
        config.icontrol_hostnames.push("10.0.0.2".into());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn tunnels_require_vtep_selfip() {
        let mut config = AgentConfig::scaffold("a", &["10.0.0.1"], HaType::Standalone);
        config.tunnel_types = vec!["vxlan".into()];
        assert!(config.validate().is_err());
        config.vtep_selfip_name = Some("vtep".into());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn plugin_defaults() {
        let config: PluginConfig = toml::from_str("rebind_on_failover = true").unwrap();
        assert!(config.rebind_on_failover);
        assert_eq!(config.agent_down_secs, 75);
        assert_eq!(config.subnet_cache_ttl(), Duration::from_secs(1800));
        assert_eq!(config.environment_prefix, None);
    }

    #[test]
    fn from_file_reads_and_validates() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("agent.toml");
        std::fs::write(&path, "icontrol_hostnames = [\"10.0.0.1\"]\n").unwrap();
        let config = AgentConfig::from_file(&path).unwrap();
        assert_eq!(config.icontrol_hostnames, vec!["10.0.0.1"]);
    }
}
