//! lbaasd.toml: the agent and plugin sections in one file.

use std::path::Path;

use anyhow::Context;
use lbaas_core::{AgentConfig, PluginConfig};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DaemonConfig {
    #[serde(default)]
    pub agent: AgentConfig,
    #[serde(default)]
    pub plugin: PluginConfig,
}

impl DaemonConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> anyhow::Result<Self> {
        let config: DaemonConfig = toml::from_str(content).context("parsing config")?;
        config.agent.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lbaas_core::HaType;

    #[test]
    fn parses_both_sections() {
        let config = DaemonConfig::parse(
            r#"
            [agent]
            host = "lb-host-1"
            icontrol_hostnames = ["10.1.0.10", "10.1.0.11"]
            icontrol_password = "secret"
            ha_type = "pair"

            [plugin]
            environment_prefix = "prod"
            rebind_on_failover = true
            "#,
        )
        .unwrap();
        assert_eq!(config.agent.host, "lb-host-1");
        assert_eq!(config.agent.ha_type, HaType::Pair);
        assert_eq!(config.plugin.environment_prefix.as_deref(), Some("prod"));
        assert!(config.plugin.rebind_on_failover);
        assert_eq!(config.plugin.agent_down_secs, 75);
    }

    #[test]
    fn plugin_section_is_optional() {
        let config = DaemonConfig::parse(
            r#"
            [agent]
            icontrol_hostnames = ["10.1.0.10"]
            "#,
        )
        .unwrap();
        assert_eq!(config.plugin, PluginConfig::default());
    }

    #[test]
    fn ha_mismatch_is_rejected() {
        let err = DaemonConfig::parse(
            r#"
            [agent]
            icontrol_hostnames = ["10.1.0.10"]
            ha_type = "pair"
            "#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("ha_type"));
    }

    #[test]
    fn missing_agent_section_is_rejected() {
        assert!(DaemonConfig::parse("[plugin]\nagent_down_secs = 30\n").is_err());
    }

    #[test]
    fn reads_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("lbaasd.toml");
        std::fs::write(&path, "[agent]\nicontrol_hostnames = [\"10.1.0.10\"]\n").unwrap();
        let config = DaemonConfig::from_file(&path).unwrap();
        assert_eq!(config.agent.icontrol_hostnames, vec!["10.1.0.10".to_string()]);
        assert!(DaemonConfig::from_file(&dir.path().join("missing.toml")).is_err());
    }
}
