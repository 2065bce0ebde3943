//! Service reconciler.
//!
//! One call to [`Reconciler::reconcile`] drives a logical service to
//! convergence on every appliance the cluster coordinator hands out:
//!
//! ```text
//!   cascade ─▶ tenant ─▶ networks ─▶ pool ─▶ monitors ─▶ members ─▶ vip
//!                                                                    │
//!   final sync ◀── tenant cleanup ◀── network teardown ◀── pool delete
//! ```
//!
//! Every phase is diff-based: it reads what the appliance has, compares it
//! with the service, and only writes the difference. Errors in the
//! tenant..vip phases abort the reconcile; teardown and cleanup errors are
//! logged and the next resync retries them.

mod member;
mod monitor;
mod network;
mod pool;
mod tenant;
mod vip;

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use lbaas_cluster::ClusterCoordinator;
use lbaas_core::deployment::host_device_id;
use lbaas_core::naming::{COMMON_FOLDER, full_path};
use lbaas_core::rpc::PortRequest;
use lbaas_core::{LogicalService, Network, PluginApi, Port, Subnet};
use lbaas_driver::{ApplianceDriver, FolderScope};
use tracing::{debug, info, warn};

use crate::error::{AgentError, AgentResult, InPhase, Phase};
use crate::fdb::TunnelRegistry;

pub use monitor::{build_monitor, receive_string, send_string};
pub use pool::{effective_lb_method, requested_lb_method};
pub use vip::{app_cookie_rule, throttle_rule};

/// What a reconcile changed beyond the service's own objects.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileOutcome {
    pub pool_deleted: bool,
    pub tenant_removed: bool,
    /// Subnets whose networking was torn down.
    pub reclaimed_subnets: Vec<String>,
}

/// Where a tenant's objects live on the appliances.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct TenantScope {
    pub tenant_id: String,
    pub folder: String,
    pub route_domain: u16,
}

impl TenantScope {
    fn on<'a>(&self, driver: &'a dyn ApplianceDriver) -> FolderScope<'a> {
        FolderScope::new(driver, self.folder.as_str(), self.route_domain)
    }
}

/// Where one network's L2 and L3 objects live.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Placement {
    pub folder: String,
    pub route_domain: u16,
    pub l2_name: String,
    /// Lives in `/Common` and may be shared with other tenants.
    pub shared: bool,
    /// Provisioned by the operator; never created or deleted here.
    pub preprovisioned: bool,
}

impl Placement {
    fn on<'a>(&self, driver: &'a dyn ApplianceDriver) -> FolderScope<'a> {
        FolderScope::new(driver, self.folder.as_str(), self.route_domain)
    }

    pub fn l2_path(&self) -> String {
        if self.l2_name.starts_with('/') {
            self.l2_name.clone()
        } else {
            full_path(&self.folder, &self.l2_name)
        }
    }
}

/// Bookkeeping carried between phases of one reconcile.
#[derive(Debug, Default)]
pub(crate) struct Pass {
    /// Subnets a deleted member or VIP lived on.
    check_for_delete: BTreeMap<String, (Subnet, Network)>,
    /// Subnets still referenced by live objects.
    keep: BTreeSet<String>,
    /// Networks carrying those subnets.
    keep_networks: BTreeSet<String>,
}

impl Pass {
    fn flag(&mut self, subnet: Option<&Subnet>, network: Option<&Network>) {
        if let (Some(subnet), Some(network)) = (subnet, network) {
            self.check_for_delete
                .entry(subnet.id.clone())
                .or_insert_with(|| (subnet.clone(), network.clone()));
        }
    }
}

pub struct Reconciler {
    cluster: Arc<ClusterCoordinator>,
    plugin: Arc<dyn PluginApi>,
    tunnels: Arc<TunnelRegistry>,
}

impl Reconciler {
    pub fn new(
        cluster: Arc<ClusterCoordinator>,
        plugin: Arc<dyn PluginApi>,
        tunnels: Arc<TunnelRegistry>,
    ) -> Self {
        Self {
            cluster,
            plugin,
            tunnels,
        }
    }

    pub fn cluster(&self) -> &Arc<ClusterCoordinator> {
        &self.cluster
    }

    pub fn tunnels(&self) -> &Arc<TunnelRegistry> {
        &self.tunnels
    }

    /// Converge the appliances on `service`.
    ///
    /// A pool in `pending_delete` cascades onto its children first, so the
    /// caller sees the cascaded statuses in `service` afterwards.
    pub async fn reconcile(&self, service: &mut LogicalService) -> AgentResult<ReconcileOutcome> {
        let mut outcome = ReconcileOutcome::default();
        let config = self.cluster.config();

        if service.cascade_pool_delete() {
            debug!(pool_id = %service.pool_id(), "pool delete cascaded to children");
        }
        let pool_deleting = service.is_pool_deleting();

        let tenant = self.assure_tenant(service).await.in_phase(Phase::Tenant)?;

        let mut pass = Pass::default();
        for live in service.live_subnets() {
            pass.keep.insert(live.subnet.id.clone());
            pass.keep_networks.insert(live.network.id.clone());
        }

        if !config.global_routed_mode {
            self.assure_networks(&tenant, service)
                .await
                .in_phase(Phase::Network)?;
        }
        if !pool_deleting {
            self.assure_pool(&tenant, service).await.in_phase(Phase::Pool)?;
        }
        self.reconcile_monitors(&tenant, service)
            .await
            .in_phase(Phase::Monitor)?;
        self.reconcile_members(&tenant, service, &mut pass)
            .await
            .in_phase(Phase::Member)?;
        self.reconcile_vip(&tenant, service, &mut pass)
            .await
            .in_phase(Phase::Vip)?;

        if pool_deleting {
            self.delete_pool(&tenant, service)
                .await
                .in_phase(Phase::PoolDelete)?;
            outcome.pool_deleted = true;
        }

        if !config.global_routed_mode {
            outcome.reclaimed_subnets = self.teardown_networks(&tenant, &pass).await;
        }

        if outcome.pool_deleted || !outcome.reclaimed_subnets.is_empty() {
            match self.cleanup_tenant(&tenant).await.in_phase(Phase::TenantCleanup) {
                Ok(removed) => outcome.tenant_removed = removed,
                Err(e) => warn!(tenant_id = %tenant.tenant_id, error = %e, "tenant cleanup failed"),
            }
        }

        // Tenant removal already synced under autosync.
        if self.cluster.is_autosync() && !outcome.tenant_removed {
            self.cluster
                .sync("reconcile")
                .await
                .in_phase(Phase::FinalSync)?;
        }

        info!(
            pool_id = %service.pool_id(),
            tenant_id = %tenant.tenant_id,
            pool_deleted = outcome.pool_deleted,
            tenant_removed = outcome.tenant_removed,
            reclaimed = outcome.reclaimed_subnets.len(),
            "service reconciled"
        );
        Ok(outcome)
    }

    // ── Shared helpers ───────────────────────────────────────────

    /// Where a network's objects go for this tenant.
    pub(crate) fn placement(&self, tenant: &TenantScope, network: &Network) -> Placement {
        let config = self.cluster.config();
        let deployment = self.cluster.deployment();
        if let Some(name) = config.common_network_ids.get(&network.id) {
            return Placement {
                folder: COMMON_FOLDER.to_string(),
                route_domain: 0,
                l2_name: name.clone(),
                shared: true,
                preprovisioned: true,
            };
        }
        if network.shared {
            return Placement {
                folder: COMMON_FOLDER.to_string(),
                route_domain: 0,
                l2_name: deployment.object_name(&network.id),
                shared: true,
                preprovisioned: false,
            };
        }
        Placement {
            folder: tenant.folder.clone(),
            route_domain: tenant.route_domain,
            l2_name: deployment.object_name(&network.id),
            shared: false,
            preprovisioned: false,
        }
    }

    /// Route domain for an address on `network` (the tenant's when unknown).
    pub(crate) fn route_domain_on(&self, tenant: &TenantScope, network: Option<&Network>) -> u16 {
        network
            .map(|n| self.placement(tenant, n).route_domain)
            .unwrap_or(tenant.route_domain)
    }

    /// Find the plugin port named `name`, allocating it on `subnet` if needed.
    pub(crate) async fn port_for(
        &self,
        name: &str,
        subnet: &Subnet,
        fixed_address: Option<&str>,
    ) -> AgentResult<Port> {
        if let Some(port) = self.plugin.get_port_by_name(name).await?.into_iter().next() {
            return Ok(port);
        }
        let host = &self.cluster.config().host;
        let request = PortRequest {
            subnet_id: subnet.id.clone(),
            name: name.to_string(),
            fixed_address: None,
            device_id: host_device_id(host),
            binding_host: Some(host.clone()),
        };
        let port = match fixed_address {
            Some(address) => {
                self.plugin
                    .create_port_on_subnet_with_specific_ip(request, address)
                    .await?
            }
            None => self.plugin.create_port_on_subnet(request).await?,
        };
        debug!(port = %name, subnet_id = %subnet.id, address = ?port.first_ip(), "allocated port");
        Ok(port)
    }

    /// Release a plugin port; a port that is already gone is fine.
    pub(crate) async fn release_port(&self, name: &str) -> AgentResult<()> {
        match self.plugin.delete_port_by_name(name).await {
            Ok(()) | Err(lbaas_core::RpcError::NotFound(_)) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Sync the device group if there is one.
    pub(crate) async fn force_sync(&self, reason: &str) -> AgentResult<()> {
        if self.cluster.device_group().is_some() {
            self.cluster.sync(reason).await?;
        }
        Ok(())
    }
}

/// First fixed address of a freshly allocated port.
pub(crate) fn port_address(port: &Port) -> AgentResult<&str> {
    port.first_ip()
        .ok_or_else(|| AgentError::Invalid(format!("port {} has no fixed address", port.name)))
}
