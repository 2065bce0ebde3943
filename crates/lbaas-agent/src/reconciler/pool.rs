//! Pool create/update/delete and LB method selection.

use lbaas_core::{LbMethod, LogicalService};
use lbaas_driver::{AppliancePool, ApplianceLbMethod, ignore_not_found};
use tracing::{debug, info};

use super::{Reconciler, TenantScope};
use crate::error::AgentResult;

/// The appliance method for a requested method.
pub fn requested_lb_method(method: LbMethod) -> ApplianceLbMethod {
    match method {
        LbMethod::RoundRobin => ApplianceLbMethod::RoundRobin,
        LbMethod::LeastConnections => ApplianceLbMethod::LeastConnectionsMember,
        LbMethod::SourceIp => ApplianceLbMethod::LeastConnectionsNode,
        LbMethod::Ratio => ApplianceLbMethod::RatioMember,
        LbMethod::RatioLeastConnections => ApplianceLbMethod::RatioLeastConnectionsMember,
    }
}

/// The method actually configured: weighted members force a ratio variant.
pub fn effective_lb_method(method: LbMethod, uses_ratio: bool) -> ApplianceLbMethod {
    if !uses_ratio {
        return requested_lb_method(method);
    }
    match method {
        LbMethod::LeastConnections | LbMethod::RatioLeastConnections => {
            ApplianceLbMethod::RatioLeastConnectionsMember
        }
        _ => ApplianceLbMethod::RatioMember,
    }
}

fn desired_pool(name: String, service: &LogicalService) -> AppliancePool {
    let pool = &service.pool.pool;
    AppliancePool {
        name,
        description: pool.description.clone(),
        lb_method: effective_lb_method(pool.lb_method, service.uses_ratio()),
        monitors: Vec::new(),
    }
}

impl Reconciler {
    /// Create the pool, or bring its method and description in line.
    pub(super) async fn assure_pool(&self, tenant: &TenantScope, service: &LogicalService) -> AgentResult<()> {
        let name = self.cluster.deployment().object_name(service.pool_id());
        let desired = desired_pool(name.clone(), service);
        for appliance in self.cluster.config_bigips() {
            let scope = tenant.on(appliance.driver());
            match scope.get_pool(&name).await? {
                None => {
                    scope.create_pool(&desired).await?;
                    info!(host = %appliance.hostname(), pool = %scope.path(&name), lb_method = desired.lb_method.as_str(), "created pool");
                }
                Some(existing)
                    if existing.lb_method != desired.lb_method
                        || existing.description != desired.description =>
                {
                    scope
                        .update_pool(&AppliancePool {
                            monitors: existing.monitors,
                            ..desired.clone()
                        })
                        .await?;
                    debug!(host = %appliance.hostname(), pool = %scope.path(&name), "updated pool");
                }
                Some(_) => {}
            }
        }
        Ok(())
    }

    /// Re-apply the effective method once the member set is final.
    pub(super) async fn reaffirm_lb_method(
        &self,
        tenant: &TenantScope,
        service: &LogicalService,
    ) -> AgentResult<()> {
        let name = self.cluster.deployment().object_name(service.pool_id());
        let method = effective_lb_method(service.pool.pool.lb_method, service.uses_ratio());
        for appliance in self.cluster.config_bigips() {
            let scope = tenant.on(appliance.driver());
            let Some(existing) = scope.get_pool(&name).await? else {
                continue;
            };
            if existing.lb_method != method {
                debug!(pool = %scope.path(&name), from = existing.lb_method.as_str(), to = method.as_str(), "switching lb method");
                scope
                    .update_pool(&AppliancePool {
                        lb_method: method,
                        ..existing
                    })
                    .await?;
            }
        }
        Ok(())
    }

    pub(super) async fn delete_pool(&self, tenant: &TenantScope, service: &LogicalService) -> AgentResult<()> {
        let name = self.cluster.deployment().object_name(service.pool_id());
        for appliance in self.cluster.config_bigips() {
            ignore_not_found(tenant.on(appliance.driver()).delete_pool(&name).await)?;
            info!(host = %appliance.hostname(), pool = %name, "deleted pool");
        }
        Ok(())
    }
}
