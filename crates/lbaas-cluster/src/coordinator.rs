//! The cluster coordinator.
//!
//! Opens a session to the seed appliance, validates it, discovers the HA
//! peers from the seed's failover device group, and exposes the set of
//! appliances the reconciler should drive. It also owns cluster-wide
//! operations: config sync, autosync toggling, and device trust.

use std::collections::HashMap;
use std::sync::Arc;

use lbaas_core::naming::{COMMON_FOLDER, LOCAL_ONLY_TRAFFIC_GROUP, strip_route_domain};
use lbaas_core::rpc::ApplianceEndpoint;
use lbaas_core::{AgentConfig, Deployment, HaType, SyncMode};
use lbaas_driver::{ApplianceDriver, ManagedSession, SyncStatus, SystemInfo};
use tracing::{debug, info, warn};

use crate::appliance::{Appliance, Role};
use crate::error::{ClusterError, ClusterResult};
use crate::factory::DriverFactory;
use crate::trust;

/// Module that must be provisioned on every appliance.
const REQUIRED_MODULE: &str = "ltm";

#[derive(Debug)]
pub struct ClusterCoordinator {
    config: AgentConfig,
    deployment: Arc<Deployment>,
    device_group: Option<String>,
    /// The primary is always first.
    appliances: Vec<Arc<Appliance>>,
}

impl ClusterCoordinator {
    /// Connect to the seed and its peers and validate the cluster.
    pub async fn connect(config: AgentConfig, factory: &dyn DriverFactory) -> ClusterResult<Self> {
        config
            .validate()
            .map_err(|e| ClusterError::Config(e.to_string()))?;
        let seed_host = config
            .icontrol_hostnames
            .first()
            .cloned()
            .ok_or_else(|| ClusterError::Config("no seed appliance configured".into()))?;

        let (seed, seed_system) = open_session(&config, factory, &seed_host).await?;
        let mut members = vec![(seed_host.clone(), Role::Primary, seed.clone(), seed_system)];

        let device_group = match config.ha_type {
            HaType::Standalone => None,
            ha_type => {
                let group = match &config.device_group {
                    Some(group) => group.clone(),
                    None => seed.failover_device_group().await?.ok_or_else(|| {
                        ClusterError::Config(format!(
                            "{seed_host} is not a member of a sync-failover device group"
                        ))
                    })?,
                };
                let devices = seed.device_group_members(&group).await?;
                check_member_count(ha_type, devices.len())?;
                for device in devices
                    .iter()
                    .filter(|d| d.management_address != seed_host)
                {
                    let (session, system) =
                        open_session(&config, factory, &device.management_address).await?;
                    members.push((device.management_address.clone(), Role::Peer, session, system));
                }
                info!(%group, devices = devices.len(), "device group discovered");
                Some(group)
            }
        };

        let traffic_groups = seed.traffic_groups().await?;
        let deployment = Arc::new(Deployment::new(&config.environment_prefix, traffic_groups));
        debug!(groups = ?deployment.traffic_groups(), "traffic groups loaded");

        let mut appliances = Vec::with_capacity(members.len());
        for (hostname, role, session, system) in members {
            let tunnel_ip = local_tunnel_ip(&config, &hostname, session.as_ref()).await?;
            let appliance =
                Appliance::new(&hostname, role, system, session).with_local_tunnel_ip(tunnel_ip);
            appliances.push(Arc::new(appliance));
        }

        let coordinator = Self {
            config,
            deployment,
            device_group,
            appliances,
        };
        coordinator.prepare_cluster().await?;
        info!(
            seed = %seed_host,
            ha_type = coordinator.config.ha_type.as_str(),
            appliances = coordinator.appliances.len(),
            "cluster connected"
        );
        Ok(coordinator)
    }

    /// Trust, tunnel sync, and autosync setup for clustered deployments.
    async fn prepare_cluster(&self) -> ClusterResult<()> {
        let Some(group) = self.device_group.as_deref() else {
            return Ok(());
        };
        if self.config.auto_trust {
            self.ensure_trust().await?;
        }
        let autosync = self.config.sync_mode == SyncMode::Autosync;
        for appliance in &self.appliances {
            if !self.config.tunnel_types.is_empty() {
                // Each device keeps its own tunnel local address.
                appliance.driver().set_tunnel_sync(false).await?;
            }
            appliance.driver().set_autosync(group, autosync).await?;
        }
        Ok(())
    }

    // ── Accessors ────────────────────────────────────────────────

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    pub fn deployment(&self) -> &Arc<Deployment> {
        &self.deployment
    }

    pub fn device_group(&self) -> Option<&str> {
        self.device_group.as_deref()
    }

    pub fn ha_type(&self) -> HaType {
        self.config.ha_type
    }

    pub fn sync_mode(&self) -> SyncMode {
        self.config.sync_mode
    }

    pub fn is_autosync(&self) -> bool {
        self.device_group.is_some() && self.config.sync_mode == SyncMode::Autosync
    }

    pub fn primary(&self) -> &Arc<Appliance> {
        &self.appliances[0]
    }

    /// Every appliance in the cluster.
    pub fn all_bigips(&self) -> &[Arc<Appliance>] {
        &self.appliances
    }

    /// Appliances the reconciler writes to: all of them in replication
    /// mode, only the primary under autosync.
    pub fn config_bigips(&self) -> &[Arc<Appliance>] {
        if self.is_autosync() {
            &self.appliances[..1]
        } else {
            &self.appliances
        }
    }

    pub fn is_connected(&self) -> bool {
        self.appliances.iter().all(|a| a.is_connected())
    }

    /// Drop every appliance's assured-object cache.
    pub fn flush_assured(&self) {
        for appliance in &self.appliances {
            appliance.flush_assured();
        }
    }

    pub fn tunneling_ips(&self) -> Vec<String> {
        self.appliances
            .iter()
            .filter_map(|a| a.local_tunnel_ip().map(str::to_string))
            .collect()
    }

    /// Per-appliance identity for the agent state report.
    pub fn endpoints(&self) -> HashMap<String, ApplianceEndpoint> {
        self.appliances
            .iter()
            .map(|a| {
                let system = a.system();
                (
                    a.hostname().to_string(),
                    ApplianceEndpoint {
                        device_name: system.device_name.clone(),
                        platform: system.platform.clone(),
                        version: system.version.clone(),
                        serial_number: system.serial_number.clone(),
                    },
                )
            })
            .collect()
    }

    // ── Cluster operations ───────────────────────────────────────

    /// Push the primary's configuration to the device group.
    ///
    /// Standalone deployments only save (when configured). Sync is retried
    /// `sync_attempts` times with `sync_backoff_secs` between attempts.
    pub async fn sync(&self, reason: &str) -> ClusterResult<()> {
        let Some(group) = self.device_group.as_deref() else {
            return self.save_if_configured().await;
        };
        let primary = self.primary().driver();
        let attempts = self.config.sync_attempts.max(1);
        let mut last_error = String::new();

        for attempt in 1..=attempts {
            let outcome = match primary.sync_to_group(group).await {
                Ok(()) => primary.sync_status().await,
                Err(e) => Err(e),
            };
            match outcome {
                Ok(SyncStatus::InSync) | Ok(SyncStatus::Standalone) => {
                    debug!(%group, reason, attempt, "cluster in sync");
                    return self.save_if_configured().await;
                }
                Ok(status) => last_error = format!("sync status {status:?}"),
                Err(e) => last_error = e.to_string(),
            }
            warn!(%group, reason, attempt, error = %last_error, "cluster sync attempt failed");
            if attempt < attempts {
                tokio::time::sleep(self.config.sync_backoff()).await;
            }
        }
        Err(ClusterError::SyncFailed {
            attempts,
            last_error,
        })
    }

    async fn save_if_configured(&self) -> ClusterResult<()> {
        if self.config.save_config_after_sync {
            for appliance in &self.appliances {
                appliance.driver().save_config().await?;
            }
        }
        Ok(())
    }

    /// Turn device-group autosync on or off on every member.
    pub async fn set_autosync(&self, enabled: bool) -> ClusterResult<()> {
        let Some(group) = self.device_group.as_deref() else {
            return Ok(());
        };
        for appliance in &self.appliances {
            appliance.driver().set_autosync(group, enabled).await?;
        }
        info!(%group, enabled, "autosync toggled");
        Ok(())
    }

    /// Add every peer to the primary's trust domain.
    pub async fn ensure_trust(&self) -> ClusterResult<()> {
        let seed = self.primary().driver();
        for peer in self.appliances.iter().filter(|a| a.role() == Role::Peer) {
            trust::add_peer(
                seed,
                peer,
                &self.config.icontrol_username,
                &self.config.icontrol_password,
            )
            .await?;
        }
        Ok(())
    }

    pub async fn reset_trust(&self) -> ClusterResult<()> {
        trust::reset(&self.appliances).await
    }
}

async fn open_session(
    config: &AgentConfig,
    factory: &dyn DriverFactory,
    hostname: &str,
) -> ClusterResult<(Arc<ManagedSession>, SystemInfo)> {
    let session = Arc::new(ManagedSession::new(
        factory.open(hostname)?,
        config.connection_timeout(),
    ));
    session.connect().await?;
    let system = session.system_info().await?;
    check_version(hostname, &system.version, &config.min_version)?;
    if !system.provisioned.iter().any(|m| m == REQUIRED_MODULE) {
        return Err(ClusterError::Config(format!(
            "{hostname}: module {REQUIRED_MODULE} is not provisioned"
        )));
    }
    debug!(host = %hostname, version = %system.version, "appliance validated");
    Ok((session, system))
}

/// Compare major.minor against the configured minimum.
fn check_version(hostname: &str, reported: &str, minimum: &str) -> ClusterResult<()> {
    let have = parse_version(reported)
        .ok_or_else(|| ClusterError::Config(format!("{hostname}: unparsable version {reported}")))?;
    let want = parse_version(minimum)
        .ok_or_else(|| ClusterError::Config(format!("invalid min_version {minimum}")))?;
    if (have.major, have.minor) < (want.major, want.minor) {
        return Err(ClusterError::Config(format!(
            "{hostname}: version {reported} is below the supported minimum {minimum}"
        )));
    }
    Ok(())
}

/// Appliance versions may carry more than three components (`12.1.2.0.0.7`).
fn parse_version(raw: &str) -> Option<semver::Version> {
    let mut parts = raw.split('.').map(|p| p.parse::<u64>());
    let major = parts.next()?.ok()?;
    let minor = parts.next().unwrap_or(Ok(0)).ok()?;
    let patch = parts.next().unwrap_or(Ok(0)).ok()?;
    Some(semver::Version::new(major, minor, patch))
}

fn check_member_count(ha_type: HaType, devices: usize) -> ClusterResult<()> {
    let ok = match ha_type {
        HaType::Standalone => devices <= 1,
        HaType::Pair => devices == 2,
        HaType::Scalen => devices >= 2,
    };
    if ok {
        Ok(())
    } else {
        Err(ClusterError::Config(format!(
            "ha_type {} does not match a device group of {devices} devices",
            ha_type.as_str()
        )))
    }
}

/// The VTEP self-IP address of an appliance, when tunnels are configured.
async fn local_tunnel_ip(
    config: &AgentConfig,
    hostname: &str,
    driver: &dyn ApplianceDriver,
) -> ClusterResult<Option<String>> {
    if config.tunnel_types.is_empty() {
        return Ok(None);
    }
    let Some(name) = config.vtep_selfip_name.as_deref() else {
        return Err(ClusterError::Config("tunnel_types requires vtep_selfip_name".into()));
    };
    match driver.get_self_ip(COMMON_FOLDER, name).await? {
        Some(self_ip) => {
            if self_ip.traffic_group != LOCAL_ONLY_TRAFFIC_GROUP {
                warn!(host = %hostname, %name, "VTEP self-IP is floating");
            }
            Ok(Some(strip_route_domain(&self_ip.address).to_string()))
        }
        None => Err(ClusterError::Config(format!(
            "{hostname}: VTEP self-IP {name} not found in /{COMMON_FOLDER}"
        ))),
    }
}
