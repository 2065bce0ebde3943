//! Tenant folder, route domain, and tenant teardown.

use std::sync::Arc;

use lbaas_cluster::{Appliance, Assured};
use lbaas_core::LogicalService;
use lbaas_core::deployment::next_route_domain;
use lbaas_driver::ignore_not_found;
use tracing::{debug, info, warn};

use super::{Reconciler, TenantScope};
use crate::error::{AgentError, AgentResult};

impl Reconciler {
    /// Ensure the tenant folder and its route domain on every config target.
    pub(super) async fn assure_tenant(&self, service: &LogicalService) -> AgentResult<TenantScope> {
        let tenant_id = service.tenant_id();
        let folder = self.cluster.deployment().folder(tenant_id);
        let route_domain = self.route_domain_for(tenant_id, &folder).await?;
        let tenant = TenantScope {
            tenant_id: tenant_id.to_string(),
            folder,
            route_domain,
        };

        for appliance in self.cluster.config_bigips() {
            if appliance.is_assured(Assured::Tenant, tenant_id) {
                continue;
            }
            let driver = appliance.driver();
            if !driver.folder_exists(&tenant.folder).await? {
                driver.create_folder(&tenant.folder).await?;
                info!(host = %appliance.hostname(), folder = %tenant.folder, "created tenant folder");
            }
            if route_domain != 0 && driver.get_route_domain(&tenant.folder).await?.is_none() {
                driver.create_route_domain(&tenant.folder, route_domain).await?;
                debug!(host = %appliance.hostname(), folder = %tenant.folder, route_domain, "created route domain");
            }
            appliance.mark_assured(Assured::Tenant, tenant_id);
        }
        Ok(tenant)
    }

    /// Route domain for a tenant: cached, then the folder's, then the
    /// smallest id no appliance uses yet.
    async fn route_domain_for(&self, tenant_id: &str, folder: &str) -> AgentResult<u16> {
        let config = self.cluster.config();
        if !config.route_domain_per_tenant || config.global_routed_mode {
            return Ok(0);
        }
        let deployment = self.cluster.deployment();
        if let Some(id) = deployment.cached_route_domain(tenant_id) {
            return Ok(id);
        }

        let existing = self.cluster.primary().driver().get_route_domain(folder).await?;
        let id = match existing {
            Some(id) => id,
            None => {
                let mut used = Vec::new();
                for appliance in self.cluster.config_bigips() {
                    used.extend(appliance.driver().route_domain_ids().await?);
                }
                next_route_domain(&used)
                    .ok_or_else(|| AgentError::Invalid("no free route domain ids".into()))?
            }
        };
        deployment.remember_route_domain(tenant_id, id);
        Ok(id)
    }

    /// Remove the tenant folder once nothing of the tenant is left in it.
    ///
    /// Under autosync, folder deletion does not replicate safely, so autosync
    /// is switched off for the whole teardown and each appliance is cleaned
    /// individually. Returns `true` when the folder was removed.
    pub(super) async fn cleanup_tenant(&self, tenant: &TenantScope) -> AgentResult<bool> {
        let primary = self.cluster.primary().driver();
        if !primary.folder_exists(&tenant.folder).await? {
            self.forget_tenant(tenant);
            return Ok(false);
        }
        let scope = tenant.on(primary);
        if !scope.list_monitors().await?.is_empty()
            || !scope.list_pools().await?.is_empty()
            || !scope.list_virtual_servers().await?.is_empty()
        {
            debug!(folder = %tenant.folder, "tenant folder still in use");
            return Ok(false);
        }

        let removed = if self.cluster.is_autosync() {
            self.cluster.set_autosync(false).await?;
            let result = self.remove_tenant_from(self.cluster.all_bigips(), tenant).await;
            self.cluster.set_autosync(true).await?;
            let removed = result?;
            self.cluster.sync("tenant cleanup").await?;
            removed
        } else {
            self.remove_tenant_from(self.cluster.config_bigips(), tenant).await?
        };

        self.forget_tenant(tenant);
        if removed {
            info!(tenant_id = %tenant.tenant_id, folder = %tenant.folder, "tenant removed");
        }
        Ok(removed)
    }

    async fn remove_tenant_from(
        &self,
        appliances: &[Arc<Appliance>],
        tenant: &TenantScope,
    ) -> AgentResult<bool> {
        let snat_pool = self.cluster.deployment().object_name(&tenant.tenant_id);
        for appliance in appliances {
            let driver = appliance.driver();
            ignore_not_found(driver.delete_snat_pool(&tenant.folder, &snat_pool).await)?;
            if tenant.route_domain != 0 {
                ignore_not_found(driver.delete_route_domain(&tenant.folder).await)?;
            }
            match driver.delete_folder(&tenant.folder).await {
                Ok(()) => {}
                Err(e) if e.is_not_found() => {}
                Err(e) if e.is_in_use() => {
                    warn!(host = %appliance.hostname(), folder = %tenant.folder, error = %e, "tenant folder not empty, leaving it");
                    return Ok(false);
                }
                Err(e) => return Err(e.into()),
            }
        }
        Ok(true)
    }

    fn forget_tenant(&self, tenant: &TenantScope) {
        for appliance in self.cluster.all_bigips() {
            appliance.forget_assured(Assured::Tenant, &tenant.tenant_id);
        }
        self.cluster
            .deployment()
            .forget_route_domain(&tenant.tenant_id);
    }
}
