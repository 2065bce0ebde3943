//! Per-subnet networking: L2 objects, local self-IPs, SNAT or gateway
//! forwarding, and their teardown once a subnet is no longer used.

use std::collections::BTreeSet;
use std::sync::Arc;

use lbaas_cluster::{Appliance, Assured};
use lbaas_core::naming::{LOCAL_ONLY_TRAFFIC_GROUP, strip_route_domain};
use lbaas_core::rpc::FLOODING_MAC;
use lbaas_core::{LogicalService, Network, NetworkType, Subnet};
use lbaas_driver::{
    FdbRecord, IpProtocol, SelfIp, SnatSetting, SnatTranslation, Tunnel, TunnelProfile,
    VirtualServer, VirtualServerKind, Vlan, ignore_not_found,
};
use tracing::{debug, info, warn};

use super::{Pass, Placement, Reconciler, TenantScope, port_address};
use crate::error::{AgentError, AgentResult};
use crate::fdb::TunnelEntry;

/// Name of an appliance's own self-IP (and its port) on a subnet.
pub fn local_self_ip_name(device_name: &str, subnet_id: &str) -> String {
    format!("local-{device_name}-{subnet_id}")
}

/// Name of the `index`th SNAT translation (and its port) on a subnet.
pub fn snat_name(traffic_group: &str, subnet_id: &str, index: u32) -> String {
    format!("snat-{traffic_group}-{subnet_id}-{index}")
}

pub fn gateway_name(subnet_id: &str) -> String {
    format!("gw-{subnet_id}")
}

pub fn forwarder_name(subnet_id: &str) -> String {
    format!("fwd-{subnet_id}")
}

fn snat_key(tenant_id: &str, subnet_id: &str) -> String {
    format!("{tenant_id}/{subnet_id}")
}

impl Reconciler {
    fn l2_targets(&self, network: &Network) -> &[Arc<Appliance>] {
        // Tunnels carry a per-device local address, so each appliance gets its own.
        if network.network_type.is_tunnel() {
            self.cluster.all_bigips()
        } else {
            self.cluster.config_bigips()
        }
    }

    /// Ensure networking for every subnet the VIP or a live member uses.
    pub(super) async fn assure_networks(
        &self,
        tenant: &TenantScope,
        service: &LogicalService,
    ) -> AgentResult<()> {
        let config = self.cluster.config();
        for subnet_ref in service.live_subnets() {
            let (subnet, network) = (subnet_ref.subnet, subnet_ref.network);
            let placement = self.placement(tenant, network);
            self.assure_l2(&placement, network, service).await?;
            self.assure_local_self_ips(&placement, subnet).await?;
            if config.snat_mode {
                if config.snat_addresses_per_subnet > 0 {
                    self.assure_snats(tenant, &placement, subnet).await?;
                }
            } else {
                self.assure_gateway(tenant, &placement, subnet).await?;
            }
        }
        Ok(())
    }

    async fn assure_l2(
        &self,
        placement: &Placement,
        network: &Network,
        service: &LogicalService,
    ) -> AgentResult<()> {
        if placement.preprovisioned {
            return Ok(());
        }
        let config = self.cluster.config();
        let segment = network.segmentation_id.unwrap_or(0);

        for appliance in self.l2_targets(network) {
            if appliance.is_assured(Assured::Network, &network.id) {
                continue;
            }
            let scope = placement.on(appliance.driver());
            match network.network_type {
                NetworkType::Flat | NetworkType::Vlan => {
                    if scope.get_vlan(&placement.l2_name).await?.is_none() {
                        let tag = if network.network_type == NetworkType::Flat {
                            0
                        } else {
                            segment
                        };
                        scope
                            .create_vlan(&Vlan {
                                name: placement.l2_name.clone(),
                                tag,
                                interface: config
                                    .interface_for(network.physical_network.as_deref())
                                    .map(str::to_string),
                                description: network.id.clone(),
                            })
                            .await?;
                        info!(host = %appliance.hostname(), vlan = %placement.l2_path(), tag, "created vlan");
                    }
                }
                NetworkType::Vxlan | NetworkType::Gre => {
                    let local_address = appliance.local_tunnel_ip().ok_or_else(|| {
                        AgentError::Invalid(format!(
                            "{}: no vtep address for {} network {}",
                            appliance.hostname(),
                            network.network_type.as_str(),
                            network.id
                        ))
                    })?;
                    if scope.get_tunnel(&placement.l2_name).await?.is_none() {
                        let profile = if network.network_type == NetworkType::Vxlan {
                            TunnelProfile::Vxlan
                        } else {
                            TunnelProfile::Gre
                        };
                        scope
                            .create_tunnel(&Tunnel {
                                name: placement.l2_name.clone(),
                                profile,
                                key: segment,
                                local_address: local_address.to_string(),
                                description: network.id.clone(),
                            })
                            .await?;
                        info!(host = %appliance.hostname(), tunnel = %placement.l2_path(), key = segment, "created tunnel");
                    }
                    let records: Vec<FdbRecord> = self
                        .flood_vteps(service, network)
                        .into_iter()
                        .map(|endpoint| FdbRecord {
                            mac: FLOODING_MAC.to_string(),
                            endpoint,
                        })
                        .collect();
                    if !records.is_empty() {
                        scope.add_fdb_entries(&placement.l2_name, &records).await?;
                    }
                    self.tunnels.register(TunnelEntry {
                        network_id: network.id.clone(),
                        folder: placement.folder.clone(),
                        name: placement.l2_name.clone(),
                        network_type: network.network_type,
                        segment_id: segment,
                    });
                }
            }
            appliance.mark_assured(Assured::Network, &network.id);
        }
        Ok(())
    }

    /// Peer VTEPs that should receive flooded traffic for `network`.
    fn flood_vteps(&self, service: &LogicalService, network: &Network) -> BTreeSet<String> {
        let pick = |vxlan: &[String], gre: &[String]| -> Vec<String> {
            match network.network_type {
                NetworkType::Vxlan => vxlan.to_vec(),
                NetworkType::Gre => gre.to_vec(),
                _ => Vec::new(),
            }
        };
        let mut vteps: BTreeSet<String> = BTreeSet::new();
        if let Some(vip) = service.vip.as_ref() {
            if vip.network.as_ref().map(|n| n.id.as_str()) == Some(network.id.as_str()) {
                vteps.extend(pick(&vip.vxlan_vteps, &vip.gre_vteps));
            }
        }
        for member in &service.members {
            if member.network.as_ref().map(|n| n.id.as_str()) == Some(network.id.as_str()) {
                vteps.extend(pick(&member.vxlan_vteps, &member.gre_vteps));
            }
        }
        vteps.extend(self.tunnels.vteps(network.network_type));
        for own in self.cluster.tunneling_ips() {
            vteps.remove(&own);
        }
        vteps
    }

    /// One non-floating self-IP per appliance on the subnet.
    async fn assure_local_self_ips(&self, placement: &Placement, subnet: &Subnet) -> AgentResult<()> {
        for appliance in self.cluster.all_bigips() {
            let scope = placement.on(appliance.driver());
            let name = local_self_ip_name(appliance.device_name(), &subnet.id);
            if scope.get_self_ip(&name).await?.is_some() {
                continue;
            }
            let port = self.port_for(&name, subnet, None).await?;
            let address = port_address(&port)?;
            scope
                .create_self_ip(&SelfIp {
                    name: name.clone(),
                    address: scope.address(address),
                    prefix_len: subnet.cidr.prefix_len(),
                    vlan: placement.l2_path(),
                    floating: false,
                    traffic_group: LOCAL_ONLY_TRAFFIC_GROUP.to_string(),
                })
                .await?;
            debug!(host = %appliance.hostname(), self_ip = %name, %address, "created local self-ip");
        }
        Ok(())
    }

    /// SNAT translations on the tenant's traffic group, pooled in the
    /// tenant's SNAT pool (created with its first translation).
    async fn assure_snats(
        &self,
        tenant: &TenantScope,
        placement: &Placement,
        subnet: &Subnet,
    ) -> AgentResult<()> {
        let deployment = self.cluster.deployment();
        let count = self.cluster.config().snat_addresses_per_subnet;
        let traffic_group = deployment.traffic_group_for(&tenant.tenant_id);
        let pool_name = deployment.object_name(&tenant.tenant_id);
        let key = snat_key(&tenant.tenant_id, &subnet.id);

        for appliance in self.cluster.config_bigips() {
            if appliance.is_assured(Assured::SnatSubnet, &key) {
                continue;
            }
            let net_scope = placement.on(appliance.driver());
            let tenant_scope = tenant.on(appliance.driver());
            let mut members = tenant_scope.snat_pool_members(&pool_name).await?;
            let mut changed = false;

            for index in 0..count {
                let name = snat_name(traffic_group, &subnet.id, index);
                if net_scope.get_snat_translation(&name).await?.is_none() {
                    let port = self.port_for(&name, subnet, None).await?;
                    let address = port_address(&port)?;
                    net_scope
                        .create_snat_translation(&SnatTranslation {
                            name: name.clone(),
                            address: net_scope.address(address),
                            traffic_group: traffic_group.to_string(),
                        })
                        .await?;
                    debug!(host = %appliance.hostname(), snat = %name, %address, "created snat translation");
                }
                let path = net_scope.path(&name);
                if !members.contains(&path) {
                    members.push(path);
                    changed = true;
                }
            }
            if changed {
                tenant_scope.set_snat_pool_members(&pool_name, &members).await?;
            }
            appliance.mark_assured(Assured::SnatSubnet, &key);
        }
        Ok(())
    }

    /// Floating gateway self-IP plus a wildcard forwarder, for deployments
    /// that route instead of translating.
    async fn assure_gateway(
        &self,
        tenant: &TenantScope,
        placement: &Placement,
        subnet: &Subnet,
    ) -> AgentResult<()> {
        let Some(gateway) = subnet.gateway_ip.as_deref() else {
            warn!(subnet_id = %subnet.id, "subnet has no gateway, skipping gateway self-ip");
            return Ok(());
        };
        let traffic_group = self
            .cluster
            .deployment()
            .traffic_group_for(&tenant.tenant_id)
            .to_string();

        for appliance in self.cluster.config_bigips() {
            if appliance.is_assured(Assured::GatewaySubnet, &subnet.id) {
                continue;
            }
            let scope = placement.on(appliance.driver());
            let name = gateway_name(&subnet.id);
            if scope.get_self_ip(&name).await?.is_none() {
                self.port_for(&name, subnet, Some(gateway)).await?;
                scope
                    .create_self_ip(&SelfIp {
                        name: name.clone(),
                        address: scope.address(gateway),
                        prefix_len: subnet.cidr.prefix_len(),
                        vlan: placement.l2_path(),
                        floating: true,
                        traffic_group: traffic_group.clone(),
                    })
                    .await?;
            }
            let forwarder = forwarder_name(&subnet.id);
            if scope.get_virtual_server(&forwarder).await?.is_none() {
                let any = if subnet.cidr.addr().is_ipv4() { "0.0.0.0" } else { "::" };
                scope
                    .create_virtual_server(&VirtualServer {
                        name: forwarder.clone(),
                        description: format!("forwarder for subnet {}", subnet.id),
                        destination: scope.address(any),
                        port: 0,
                        mask: any.to_string(),
                        ip_protocol: IpProtocol::Any,
                        kind: VirtualServerKind::IpForwarding,
                        pool: None,
                        enabled: true,
                        profiles: Vec::new(),
                        persistence: None,
                        fallback_persistence: None,
                        rules: Vec::new(),
                        connection_limit: 0,
                        vlans: vec![placement.l2_path()],
                        snat: SnatSetting::None,
                        traffic_group: traffic_group.clone(),
                    })
                    .await?;
            }
            appliance.mark_assured(Assured::GatewaySubnet, &subnet.id);
        }
        Ok(())
    }

    // ── Teardown ─────────────────────────────────────────────────

    /// Tear down every flagged subnet nothing references any more.
    ///
    /// Failures are logged; the subnet is retried on the next reconcile
    /// that flags it. Returns the reclaimed subnet ids.
    pub(super) async fn teardown_networks(&self, tenant: &TenantScope, pass: &Pass) -> Vec<String> {
        let mut reclaimed = Vec::new();
        for (subnet_id, (subnet, network)) in &pass.check_for_delete {
            if pass.keep.contains(subnet_id) {
                continue;
            }
            match self
                .teardown_subnet(tenant, subnet, network, &pass.keep_networks)
                .await
            {
                Ok(true) => reclaimed.push(subnet_id.clone()),
                Ok(false) => {}
                Err(e) => warn!(%subnet_id, error = %e, "network teardown failed"),
            }
        }
        reclaimed
    }

    async fn teardown_subnet(
        &self,
        tenant: &TenantScope,
        subnet: &Subnet,
        network: &Network,
        keep_networks: &BTreeSet<String>,
    ) -> AgentResult<bool> {
        if self.subnet_in_use(tenant, subnet).await? {
            debug!(subnet_id = %subnet.id, "subnet still has addresses, keeping it");
            return Ok(false);
        }
        let config = self.cluster.config();
        let placement = self.placement(tenant, network);

        if placement.shared {
            // Other tenants keep using shared networks; only our pooling goes.
            if config.snat_mode {
                self.remove_snat_membership(tenant, &placement, subnet).await?;
            }
            self.forget_subnet(tenant, subnet, None);
            info!(subnet_id = %subnet.id, "released shared subnet for tenant");
            return Ok(true);
        }

        if !config.snat_mode {
            for appliance in self.cluster.config_bigips() {
                let scope = placement.on(appliance.driver());
                ignore_not_found(scope.delete_virtual_server(&forwarder_name(&subnet.id)).await)?;
                ignore_not_found(scope.delete_self_ip(&gateway_name(&subnet.id)).await)?;
            }
            self.release_port(&gateway_name(&subnet.id)).await?;
        } else if config.snat_addresses_per_subnet > 0 {
            let names = self.remove_snat_membership(tenant, &placement, subnet).await?;
            for appliance in self.cluster.config_bigips() {
                let scope = placement.on(appliance.driver());
                for name in &names {
                    ignore_not_found(scope.delete_snat_translation(name).await)?;
                }
            }
            for name in &names {
                self.release_port(name).await?;
            }
        }

        for appliance in self.cluster.all_bigips() {
            let name = local_self_ip_name(appliance.device_name(), &subnet.id);
            ignore_not_found(placement.on(appliance.driver()).delete_self_ip(&name).await)?;
            self.release_port(&name).await?;
        }

        self.force_sync("network teardown").await?;

        let keep_l2 = placement.preprovisioned || keep_networks.contains(&network.id);
        let mut l2_removed = !keep_l2;
        if !keep_l2 {
            for appliance in self.l2_targets(network) {
                let scope = placement.on(appliance.driver());
                let result = if network.network_type.is_tunnel() {
                    scope.delete_tunnel(&placement.l2_name).await
                } else {
                    scope.delete_vlan(&placement.l2_name).await
                };
                match result {
                    Ok(()) => {}
                    Err(e) if e.is_not_found() => {}
                    Err(e) if e.is_in_use() => {
                        debug!(l2 = %placement.l2_path(), "network still carries other subnets");
                        l2_removed = false;
                    }
                    Err(e) => return Err(e.into()),
                }
            }
            if l2_removed && network.network_type.is_tunnel() {
                self.tunnels.unregister(&network.id);
            }
        }
        self.forget_subnet(tenant, subnet, l2_removed.then_some(network));
        info!(subnet_id = %subnet.id, network_id = %network.id, "reclaimed subnet");
        Ok(true)
    }

    /// Whether any virtual address or pool node of the tenant lies in the subnet.
    async fn subnet_in_use(&self, tenant: &TenantScope, subnet: &Subnet) -> AgentResult<bool> {
        let scope = tenant.on(self.cluster.primary().driver());
        let mut addresses = match scope.virtual_addresses().await {
            Ok(a) => a,
            Err(e) if e.is_not_found() => return Ok(false),
            Err(e) => return Err(e.into()),
        };
        addresses.extend(scope.node_addresses().await?);
        Ok(addresses
            .iter()
            .any(|a| subnet.contains(strip_route_domain(a))))
    }

    /// Drop this subnet's translations from the tenant SNAT pool on every
    /// config target. Returns the translation names.
    async fn remove_snat_membership(
        &self,
        tenant: &TenantScope,
        placement: &Placement,
        subnet: &Subnet,
    ) -> AgentResult<Vec<String>> {
        let deployment = self.cluster.deployment();
        let traffic_group = deployment.traffic_group_for(&tenant.tenant_id);
        let pool_name = deployment.object_name(&tenant.tenant_id);
        let names: Vec<String> = (0..self.cluster.config().snat_addresses_per_subnet)
            .map(|i| snat_name(traffic_group, &subnet.id, i))
            .collect();

        for appliance in self.cluster.config_bigips() {
            let tenant_scope = tenant.on(appliance.driver());
            let net_scope = placement.on(appliance.driver());
            let paths: Vec<String> = names.iter().map(|n| net_scope.path(n)).collect();
            let members = match tenant_scope.snat_pool_members(&pool_name).await {
                Ok(m) => m,
                Err(e) if e.is_not_found() => continue,
                Err(e) => return Err(e.into()),
            };
            let remaining: Vec<String> = members
                .iter()
                .filter(|m| !paths.contains(m))
                .cloned()
                .collect();
            if remaining.len() != members.len() {
                tenant_scope.set_snat_pool_members(&pool_name, &remaining).await?;
            }
        }
        Ok(names)
    }

    fn forget_subnet(&self, tenant: &TenantScope, subnet: &Subnet, network: Option<&Network>) {
        let key = snat_key(&tenant.tenant_id, &subnet.id);
        for appliance in self.cluster.all_bigips() {
            appliance.forget_assured(Assured::SnatSubnet, &key);
            appliance.forget_assured(Assured::GatewaySubnet, &subnet.id);
            if let Some(network) = network {
                appliance.forget_assured(Assured::Network, &network.id);
            }
        }
    }
}
