//! Pool member reconciliation.

use std::collections::HashMap;

use lbaas_core::naming::{strip_route_domain, with_route_domain};
use lbaas_core::{LogicalService, ServiceMember, Status};
use lbaas_driver::{PoolMember, ignore_not_found};
use tracing::{debug, info};

use super::{Pass, Reconciler, TenantScope};
use crate::error::AgentResult;

impl Reconciler {
    fn desired_member(&self, tenant: &TenantScope, member: &ServiceMember) -> PoolMember {
        let rd = self.route_domain_on(tenant, member.network.as_ref());
        PoolMember {
            address: with_route_domain(&member.member.address, rd),
            port: member.member.protocol_port,
            ratio: member.member.weight.max(1),
            enabled: member.member.admin_state_up,
        }
    }

    /// Make the pool's member list match the service.
    ///
    /// Subnets of deleted members are flagged for teardown. A sync is
    /// forced after any removal so peers drop the node before its self-IP
    /// can go away.
    pub(super) async fn reconcile_members(
        &self,
        tenant: &TenantScope,
        service: &LogicalService,
        pass: &mut Pass,
    ) -> AgentResult<()> {
        let pool_name = self.cluster.deployment().object_name(service.pool_id());
        let mut removed_any = false;

        for member in &service.members {
            if member.member.status == Status::PendingDelete {
                pass.flag(member.subnet.as_ref(), member.network.as_ref());
            }
        }

        for appliance in self.cluster.config_bigips() {
            let scope = tenant.on(appliance.driver());
            let existing = match scope.pool_members(&pool_name).await {
                Ok(members) => members,
                Err(e) if e.is_not_found() => {
                    debug!(pool = %pool_name, "pool absent, no members to reconcile");
                    continue;
                }
                Err(e) => return Err(e.into()),
            };
            let mut on_device: HashMap<(String, u16), PoolMember> = existing
                .into_iter()
                .map(|m| ((strip_route_domain(&m.address).to_string(), m.port), m))
                .collect();

            for member in &service.members {
                let key = (member.member.address.clone(), member.member.protocol_port);
                let current = on_device.remove(&key);

                if member.member.status == Status::PendingDelete {
                    if let Some(current) = current {
                        ignore_not_found(
                            scope
                                .remove_pool_member(&pool_name, &current.address, current.port)
                                .await,
                        )?;
                        removed_any = true;
                        debug!(pool = %pool_name, member = %current.name(), "removed member");
                    }
                    continue;
                }

                let desired = self.desired_member(tenant, member);
                match current {
                    None => {
                        scope.add_pool_member(&pool_name, &desired).await?;
                        debug!(pool = %pool_name, member = %desired.name(), "added member");
                    }
                    Some(current) if current.address != desired.address => {
                        // Route domain moved; the member name changes with it.
                        ignore_not_found(
                            scope
                                .remove_pool_member(&pool_name, &current.address, current.port)
                                .await,
                        )?;
                        scope.add_pool_member(&pool_name, &desired).await?;
                    }
                    Some(current) if current != desired => {
                        scope.update_pool_member(&pool_name, &desired).await?;
                    }
                    Some(_) => {}
                }
            }

            for stale in on_device.into_values() {
                ignore_not_found(
                    scope
                        .remove_pool_member(&pool_name, &stale.address, stale.port)
                        .await,
                )?;
                removed_any = true;
                info!(host = %appliance.hostname(), pool = %pool_name, member = %stale.name(), "removed unknown member");
            }
        }

        if !service.is_pool_deleting() {
            self.reaffirm_lb_method(tenant, service).await?;
        }
        if removed_any {
            self.force_sync("member delete").await?;
        }
        Ok(())
    }
}
