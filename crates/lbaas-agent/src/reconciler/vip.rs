//! Virtual server reconciliation: profiles, persistence, and throttling.

use std::net::IpAddr;

use lbaas_core::config::VirtualServerKind as ConfiguredKind;
use lbaas_core::naming::{full_path, with_route_domain};
use lbaas_core::{LbMethod, LogicalService, PersistenceType, Protocol, ServiceVip, Status};
use lbaas_driver::{
    DriverResult, FolderScope, IRule, IpProtocol, SnatSetting, UniversalPersistence,
    VirtualServer, VirtualServerKind, ignore_not_found,
};
use tracing::{debug, info};

use super::{Pass, Reconciler, TenantScope};
use crate::error::AgentResult;

const TCP_PROFILE: &str = "/Common/tcp";
const UDP_PROFILE: &str = "/Common/udp";
const FASTL4_PROFILE: &str = "/Common/fastL4";
const HTTP_PROFILE: &str = "/Common/http";
const SOURCE_ADDR_PERSISTENCE: &str = "/Common/source_addr";
const COOKIE_PERSISTENCE: &str = "/Common/cookie";

const APP_COOKIE_TIMEOUT_SECS: u32 = 3600;
const THROTTLE_PRIORITY: u32 = 500;
const THROTTLE_SESSION_SECS: u32 = 300;
const THROTTLE_WINDOW_SECS: u32 = 60;

/// iRule persisting on the lower-cased value of `cookie`.
pub fn app_cookie_rule(cookie: &str) -> String {
    format!(
        "when HTTP_REQUEST {{\n  \
           if {{ [HTTP::cookie \"{cookie}\"] ne \"\" }} {{\n    \
             persist uie [string tolower [HTTP::cookie \"{cookie}\"]] {APP_COOKIE_TIMEOUT_SECS}\n  \
           }}\n\
         }}\n\
         when HTTP_RESPONSE {{\n  \
           if {{ [HTTP::cookie \"{cookie}\"] ne \"\" }} {{\n    \
             persist add uie [string tolower [HTTP::cookie \"{cookie}\"]] {APP_COOKIE_TIMEOUT_SECS}\n  \
           }}\n\
         }}\n"
    )
}

/// iRule limiting each client to `limit` requests per window.
pub fn throttle_rule(limit: u32) -> String {
    format!(
        "when RULE_INIT {{\n  \
           set static::max_reqs {limit}\n  \
           set static::session_timeout {THROTTLE_SESSION_SECS}\n  \
           set static::window_secs {THROTTLE_WINDOW_SECS}\n\
         }}\n\
         when HTTP_REQUEST {{\n  \
           set key \"throttle_[IP::client_addr]\"\n  \
           set count [table keys -subtable $key -count]\n  \
           if {{ $count >= $static::max_reqs }} {{\n    \
             HTTP::respond 503 content \"Request limit exceeded\"\n    \
             return\n  \
           }}\n  \
           table set -subtable $key [clock clicks -milliseconds] 1 $static::session_timeout $static::window_secs\n\
         }}\n"
    )
}

fn throttle_name(vs: &str) -> String {
    format!("throttle_{vs}")
}

fn app_cookie_name(vs: &str) -> String {
    format!("app_cookie_{vs}")
}

/// Profile family for a VIP. HTTP and app-cookie persistence need a full proxy.
fn kind_for(configured: ConfiguredKind, vip: &ServiceVip) -> VirtualServerKind {
    let app_cookie = vip
        .vip
        .session_persistence
        .as_ref()
        .is_some_and(|p| p.kind == PersistenceType::AppCookie);
    match configured {
        ConfiguredKind::Standard => VirtualServerKind::Standard,
        ConfiguredKind::FastL4 if vip.vip.protocol.is_http() || app_cookie => {
            VirtualServerKind::Standard
        }
        ConfiguredKind::FastL4 => VirtualServerKind::FastL4,
    }
}

fn profiles_for(kind: VirtualServerKind, vip: &ServiceVip) -> Vec<String> {
    let mut profiles = vec![match (kind, vip.vip.protocol) {
        (VirtualServerKind::FastL4, _) => FASTL4_PROFILE.to_string(),
        (_, Protocol::Udp) => UDP_PROFILE.to_string(),
        _ => TCP_PROFILE.to_string(),
    }];
    let cookie = vip
        .vip
        .session_persistence
        .as_ref()
        .is_some_and(|p| matches!(p.kind, PersistenceType::HttpCookie | PersistenceType::AppCookie));
    if kind == VirtualServerKind::Standard && (vip.vip.protocol == Protocol::Http || cookie) {
        profiles.push(HTTP_PROFILE.to_string());
    }
    profiles
}

fn host_mask(address: &str) -> &'static str {
    match address.parse::<IpAddr>() {
        Ok(IpAddr::V6(_)) => "ffff:ffff:ffff:ffff:ffff:ffff:ffff:ffff",
        _ => "255.255.255.255",
    }
}

/// Persistence choices for one VIP.
#[derive(Debug, Default, PartialEq, Eq)]
struct Persistence {
    primary: Option<String>,
    fallback: Option<String>,
    /// Per-VIP iRule and profile to install, keyed by cookie name.
    app_cookie: Option<String>,
}

fn persistence_for(vs_name: &str, vip: &ServiceVip, pool_method: LbMethod) -> Persistence {
    let Some(persist) = vip.vip.session_persistence.as_ref() else {
        return Persistence::default();
    };
    let source_fallback =
        (pool_method == LbMethod::SourceIp).then(|| SOURCE_ADDR_PERSISTENCE.to_string());
    match (persist.kind, persist.cookie_name.as_deref().filter(|c| !c.is_empty())) {
        (PersistenceType::SourceIp, _) => Persistence {
            primary: Some(SOURCE_ADDR_PERSISTENCE.to_string()),
            ..Persistence::default()
        },
        (PersistenceType::AppCookie, Some(cookie)) => Persistence {
            primary: Some(app_cookie_name(vs_name)),
            fallback: source_fallback,
            app_cookie: Some(cookie.to_string()),
        },
        (PersistenceType::HttpCookie | PersistenceType::AppCookie, _) => Persistence {
            primary: Some(COOKIE_PERSISTENCE.to_string()),
            fallback: source_fallback,
            app_cookie: None,
        },
    }
}

/// Delete a per-VIP object that may already be gone or still referenced.
fn delete_quietly(result: DriverResult<()>, what: &str) -> AgentResult<()> {
    match result {
        Err(e) if e.is_not_found() || e.is_in_use() => {
            debug!(object = %what, error = %e, "left in place");
            Ok(())
        }
        other => Ok(other?),
    }
}

impl Reconciler {
    fn desired_virtual_server(
        &self,
        tenant: &TenantScope,
        service: &LogicalService,
        vip: &ServiceVip,
        vs_name: &str,
    ) -> (VirtualServer, Persistence) {
        let config = self.cluster.config();
        let deployment = self.cluster.deployment();
        let kind = kind_for(config.virtual_server_kind, vip);
        let persistence = persistence_for(vs_name, vip, service.pool.pool.lb_method);

        let limit = vip.vip.connection_limit.max(0);
        let throttled = limit > 0 && vip.vip.protocol == Protocol::Http;
        let mut rules = Vec::new();
        if throttled {
            rules.push((throttle_name(vs_name), THROTTLE_PRIORITY));
        }
        if persistence.app_cookie.is_some() {
            rules.push((app_cookie_name(vs_name), 0));
        }

        let vlans = match vip.network.as_ref() {
            Some(network) if !config.global_routed_mode => {
                vec![self.placement(tenant, network).l2_path()]
            }
            _ => Vec::new(),
        };
        let snat = if config.global_routed_mode {
            SnatSetting::Automap
        } else if !config.snat_mode {
            SnatSetting::None
        } else if config.snat_addresses_per_subnet == 0 {
            SnatSetting::Automap
        } else {
            SnatSetting::Pool(full_path(
                &tenant.folder,
                &deployment.object_name(&tenant.tenant_id),
            ))
        };

        let rd = self.route_domain_on(tenant, vip.network.as_ref());
        let vs = VirtualServer {
            name: vs_name.to_string(),
            description: vip.vip.description.clone(),
            destination: with_route_domain(&vip.vip.address, rd),
            port: vip.vip.protocol_port,
            mask: host_mask(&vip.vip.address).to_string(),
            ip_protocol: match vip.vip.protocol {
                Protocol::Udp => IpProtocol::Udp,
                Protocol::Icmp => IpProtocol::Any,
                _ => IpProtocol::Tcp,
            },
            kind,
            pool: Some(deployment.object_name(service.pool_id())),
            enabled: vip.vip.admin_state_up,
            profiles: profiles_for(kind, vip),
            persistence: persistence.primary.clone(),
            fallback_persistence: persistence.fallback.clone(),
            rules,
            connection_limit: if throttled {
                0
            } else {
                u32::try_from(limit).unwrap_or(u32::MAX)
            },
            vlans,
            snat,
            traffic_group: deployment.traffic_group_for(&tenant.tenant_id).to_string(),
        };
        (vs, persistence)
    }

    /// Create, update, or delete the service's virtual server.
    pub(super) async fn reconcile_vip(
        &self,
        tenant: &TenantScope,
        service: &LogicalService,
        pass: &mut Pass,
    ) -> AgentResult<()> {
        let Some(vip) = service.vip.as_ref() else {
            return Ok(());
        };
        let vs_name = self.cluster.deployment().object_name(&vip.vip.id);

        if vip.vip.status == Status::PendingDelete {
            pass.flag(vip.subnet.as_ref(), vip.network.as_ref());
            for appliance in self.cluster.config_bigips() {
                let scope = tenant.on(appliance.driver());
                delete_virtual_server(&scope, &vs_name).await?;
            }
            self.force_sync("vip delete").await?;
            return Ok(());
        }

        let (desired, persistence) = self.desired_virtual_server(tenant, service, vip, &vs_name);
        let throttle = throttle_name(&vs_name);
        let app_cookie = app_cookie_name(&vs_name);

        for appliance in self.cluster.config_bigips() {
            let scope = tenant.on(appliance.driver());

            if desired.rules.iter().any(|(r, _)| *r == throttle) {
                let limit = u32::try_from(vip.vip.connection_limit).unwrap_or(u32::MAX);
                scope
                    .put_rule(&IRule {
                        name: throttle.clone(),
                        body: throttle_rule(limit),
                    })
                    .await?;
            }
            if let Some(cookie) = persistence.app_cookie.as_deref() {
                scope
                    .put_rule(&IRule {
                        name: app_cookie.clone(),
                        body: app_cookie_rule(cookie),
                    })
                    .await?;
                scope
                    .put_persistence_profile(&UniversalPersistence {
                        name: app_cookie.clone(),
                        rule: app_cookie.clone(),
                        timeout_secs: APP_COOKIE_TIMEOUT_SECS,
                    })
                    .await?;
            }

            let previous = scope.get_virtual_server(&vs_name).await?;
            match &previous {
                None => {
                    scope.create_virtual_server(&desired).await?;
                    info!(host = %appliance.hostname(), vs = %scope.path(&vs_name), destination = %desired.destination, port = desired.port, "created virtual server");
                }
                Some(current) if *current != desired => {
                    scope.update_virtual_server(&desired).await?;
                    debug!(host = %appliance.hostname(), vs = %scope.path(&vs_name), "updated virtual server");
                }
                Some(_) => {}
            }

            let Some(previous) = previous else {
                continue;
            };
            let had_rule = |name: &str| previous.rules.iter().any(|(r, _)| r == name);
            if had_rule(&throttle) && !desired.rules.iter().any(|(r, _)| *r == throttle) {
                delete_quietly(scope.delete_rule(&throttle).await, &throttle)?;
            }
            if previous.persistence.as_deref() == Some(app_cookie.as_str())
                && persistence.app_cookie.is_none()
            {
                delete_quietly(scope.delete_persistence_profile(&app_cookie).await, &app_cookie)?;
            }
            if had_rule(&app_cookie) && persistence.app_cookie.is_none() {
                delete_quietly(scope.delete_rule(&app_cookie).await, &app_cookie)?;
            }
        }
        Ok(())
    }
}

/// Strip persistence and rules, then delete the virtual server and its
/// per-VIP rules and profile.
async fn delete_virtual_server(scope: &FolderScope<'_>, vs_name: &str) -> AgentResult<()> {
    match scope.get_virtual_server(vs_name).await {
        Ok(Some(current)) => {
            if current.persistence.is_some()
                || current.fallback_persistence.is_some()
                || !current.rules.is_empty()
            {
                scope
                    .update_virtual_server(&VirtualServer {
                        persistence: None,
                        fallback_persistence: None,
                        rules: Vec::new(),
                        ..current
                    })
                    .await?;
            }
            ignore_not_found(scope.delete_virtual_server(vs_name).await)?;
            info!(host = %scope.hostname(), vs = %scope.path(vs_name), "deleted virtual server");
        }
        Ok(None) => {}
        Err(e) if e.is_not_found() => return Ok(()),
        Err(e) => return Err(e.into()),
    }
    let throttle = throttle_name(vs_name);
    let app_cookie = app_cookie_name(vs_name);
    ignore_not_found(scope.delete_rule(&throttle).await)?;
    ignore_not_found(scope.delete_persistence_profile(&app_cookie).await)?;
    ignore_not_found(scope.delete_rule(&app_cookie).await)?;
    Ok(())
}
