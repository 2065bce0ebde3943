//! End-to-end agent scenarios against in-memory appliances.

mod common;

use std::sync::Arc;

use common::*;
use lbaas_agent::AgentManager;
use lbaas_core::*;
use lbaas_cluster::ClusterCoordinator;
use lbaas_core::rpc::FLOODING_MAC;
use lbaas_driver::{
    ApplianceLbMethod, DriverError, InMemoryAppliance, MonitorKind, SnatSetting, TunnelProfile,
    VirtualServerKind,
};

fn manager(cluster: Arc<ClusterCoordinator>, plugin: &Arc<RecordingPlugin>) -> Arc<AgentManager> {
    Arc::new(AgentManager::new(cluster, plugin.clone()))
}

fn create_pool(service: LogicalService) -> AgentRequest {
    AgentRequest::CreatePool {
        pool: service.pool.pool.clone(),
        service,
    }
}

fn delete_pool(service: LogicalService) -> AgentRequest {
    let mut service = service;
    service.pool.pool.status = Status::PendingDelete;
    AgentRequest::DeletePool {
        pool: service.pool.pool.clone(),
        service,
    }
}

fn lb_method(dev: &InMemoryAppliance) -> ApplianceLbMethod {
    dev.folder("env_t1").unwrap().pools["env_p1"].lb_method
}

fn update_vip(service: LogicalService) -> AgentRequest {
    let vip = service.vip.as_ref().unwrap().vip.clone();
    AgentRequest::UpdateVip {
        old_vip: vip.clone(),
        vip,
        service,
    }
}

// ── Create ───────────────────────────────────────────────────────

#[tokio::test]
async fn create_pool_builds_tenant_networks_and_objects() {
    let (dev, cluster) = standalone().await;
    let plugin = RecordingPlugin::new();
    let service = web_service();
    plugin.serve(&service);
    let agent = manager(cluster, &plugin);

    agent.process(create_pool(service)).await.unwrap();

    let folder = dev.folder("env_t1").expect("tenant folder");
    assert_eq!(folder.route_domain, Some(1));
    assert!(folder.vlans.contains_key("env_n0"));
    assert!(folder.vlans.contains_key("env_n1"));
    assert_eq!(folder.vlans["env_n1"].tag, 101);

    let pool = &folder.pools["env_p1"];
    assert_eq!(pool.lb_method, ApplianceLbMethod::RoundRobin);
    assert_eq!(pool.monitors, vec!["env_m1".to_string()]);

    let members: Vec<&String> = folder.members["env_p1"].keys().collect();
    assert_eq!(members, vec!["10.0.1.5%1:80", "10.0.1.6%1:80"]);

    let monitor = &folder.monitors["env_m1"];
    assert_eq!(monitor.kind, MonitorKind::Http);
    assert_eq!(monitor.interval, 5);
    assert_eq!(monitor.timeout, 48);
    assert_eq!(monitor.send.as_deref(), Some(r"GET /health HTTP/1.0\r\n\r\n"));

    let vs = &folder.virtual_servers["env_v1"];
    assert_eq!(vs.destination, "10.0.0.100%1");
    assert_eq!(vs.port, 80);
    assert_eq!(vs.vlans, vec!["/env_t1/env_n0".to_string()]);
    assert_eq!(vs.snat, SnatSetting::Pool("/env_t1/env_t1".into()));
    assert!(vs.profiles.iter().any(|p| p == "/Common/http"));

    // One local self-ip and one SNAT translation per subnet.
    assert_eq!(folder.self_ips.len(), 2);
    assert_eq!(folder.snat_translations.len(), 2);
    assert_eq!(folder.snat_pools["env_t1"].len(), 2);

    assert!(plugin.called("update_pool_status p1 active"));
    assert!(plugin.called("update_vip_status v1 active"));
    assert!(plugin.called("update_member_status mb1 active"));
    assert!(plugin.called("update_member_status mb2 active"));
    assert!(plugin.called("update_health_monitor_status m1 active"));
    assert!(agent.cache().contains("p1"));
}

#[tokio::test]
async fn reconcile_is_idempotent() {
    let (dev, cluster) = standalone().await;
    let plugin = RecordingPlugin::new();
    let service = web_service();
    plugin.serve(&service);
    let agent = manager(cluster, &plugin);

    agent.process(create_pool(service.clone())).await.unwrap();
    let before = dev.snapshot();
    dev.journal().clear();

    let settled = with_status(service, Status::Active);
    agent
        .process(AgentRequest::UpdatePool {
            old_pool: settled.pool.pool.clone(),
            pool: settled.pool.pool.clone(),
            service: settled,
        })
        .await
        .unwrap();

    assert_eq!(dev.snapshot(), before);
    assert_eq!(dev.journal().count(&["create_"]), 0);
    assert_eq!(dev.journal().count(&["delete_"]), 0);
    assert_eq!(dev.journal().count(&["add_pool_member"]), 0);
}

#[tokio::test]
async fn weighted_member_switches_to_ratio() {
    let (dev, cluster) = standalone().await;
    let plugin = RecordingPlugin::new();
    let mut service = web_service();
    service.members[0].member.weight = 10;
    plugin.serve(&service);
    let agent = manager(cluster, &plugin);

    agent.process(create_pool(service)).await.unwrap();

    let folder = dev.folder("env_t1").unwrap();
    assert_eq!(folder.pools["env_p1"].lb_method, ApplianceLbMethod::RatioMember);
    assert_eq!(folder.members["env_p1"]["10.0.1.5%1:80"].ratio, 10);
    assert_eq!(folder.members["env_p1"]["10.0.1.6%1:80"].ratio, 1);
}

#[tokio::test]
async fn least_connections_reverts_when_weight_goes() {
    let (dev, cluster) = standalone().await;
    let plugin = RecordingPlugin::new();
    let mut service = web_service();
    service.pool.pool.lb_method = LbMethod::LeastConnections;
    service.members[1].member.weight = 5;
    plugin.serve(&service);
    let agent = manager(cluster, &plugin);

    agent.process(create_pool(service.clone())).await.unwrap();
    assert_eq!(lb_method(&dev), ApplianceLbMethod::RatioLeastConnectionsMember);

    let mut removed = with_status(service, Status::Active);
    removed.members[1].member.status = Status::PendingDelete;
    let member = removed.members[1].member.clone();
    agent
        .process(AgentRequest::DeleteMember {
            member,
            service: removed,
        })
        .await
        .unwrap();

    assert_eq!(lb_method(&dev), ApplianceLbMethod::LeastConnectionsMember);
    assert!(plugin.called("member_destroyed mb2"));
    let folder = dev.folder("env_t1").unwrap();
    assert_eq!(folder.members["env_p1"].len(), 1);
}

#[tokio::test]
async fn member_without_subnet_uses_tenant_route_domain() {
    let (dev, cluster) = standalone().await;
    let plugin = RecordingPlugin::new();
    let mut service = web_service();
    let mut stray = member("mb3", "192.168.50.9", 1);
    stray.subnet = None;
    stray.network = None;
    service.members.push(stray);
    plugin.serve(&service);
    let agent = manager(cluster, &plugin);

    agent.process(create_pool(service)).await.unwrap();

    let folder = dev.folder("env_t1").unwrap();
    assert!(folder.members["env_p1"].contains_key("192.168.50.9%1:80"));
    // No networking is built for it.
    assert_eq!(folder.self_ips.len(), 2);
    assert!(plugin.called("update_member_status mb3 active"));
}

// ── Network modes ────────────────────────────────────────────────

#[tokio::test]
async fn routed_mode_builds_gateway_and_forwarder_then_reclaims_them() {
    let (dev, cluster) = standalone_with(|config| config.snat_mode = false).await;
    let plugin = RecordingPlugin::new();
    let service = with_gateways(web_service());
    plugin.serve(&service);
    let agent = manager(cluster, &plugin);

    agent.process(create_pool(service.clone())).await.unwrap();

    let folder = dev.folder("env_t1").unwrap();
    let gateway = &folder.self_ips["gw-s1"];
    assert_eq!(gateway.address, "10.0.1.1%1");
    assert!(gateway.floating);
    assert_eq!(gateway.vlan, "/env_t1/env_n1");
    assert_eq!(folder.self_ips["gw-s0"].address, "10.0.0.1%1");

    let forwarder = &folder.virtual_servers["fwd-s1"];
    assert_eq!(forwarder.kind, VirtualServerKind::IpForwarding);
    assert_eq!(forwarder.destination, "0.0.0.0%1");
    assert_eq!(forwarder.vlans, vec!["/env_t1/env_n1".to_string()]);
    assert_eq!(forwarder.snat, SnatSetting::None);

    // Nothing is translated; the VIP relies on the gateway.
    assert!(folder.snat_translations.is_empty());
    assert!(folder.snat_pools.is_empty());
    assert_eq!(folder.virtual_servers["env_v1"].snat, SnatSetting::None);
    assert!(plugin.port_names().contains(&"gw-s1".to_string()));
    assert!(plugin.called("update_member_status mb1 active"));

    agent
        .process(delete_pool(with_status(service, Status::Active)))
        .await
        .unwrap();

    assert!(dev.folder("env_t1").is_none());
    assert!(plugin.port_names().is_empty());
    assert!(plugin.called("pool_destroyed p1"));
}

#[tokio::test]
async fn routed_mode_without_gateway_skips_forwarding() {
    let (dev, cluster) = standalone_with(|config| config.snat_mode = false).await;
    let plugin = RecordingPlugin::new();
    let service = web_service();
    plugin.serve(&service);
    let agent = manager(cluster, &plugin);

    agent.process(create_pool(service)).await.unwrap();

    let folder = dev.folder("env_t1").unwrap();
    assert!(!folder.self_ips.contains_key("gw-s1"));
    assert!(!folder.virtual_servers.contains_key("fwd-s1"));
    assert!(plugin.called("update_pool_status p1 active"));
}

#[tokio::test]
async fn tunnel_networks_get_tunnels_and_flood_records() {
    let (dev, cluster) = tunneled_standalone().await;
    let plugin = RecordingPlugin::new();
    let mut service = web_service();
    move_to_network(&mut service, &tunnel_network("n1", NetworkType::Vxlan, 5001));
    move_to_network(&mut service, &tunnel_network("n0", NetworkType::Gre, 77));
    for member in &mut service.members {
        member.vxlan_vteps = vec!["192.168.100.21".into(), LOCAL_VTEP.into()];
    }
    service.vip.as_mut().unwrap().gre_vteps = vec!["192.168.100.31".into()];
    plugin.serve(&service);
    let agent = manager(cluster, &plugin);

    agent.process(create_pool(service.clone())).await.unwrap();

    let folder = dev.folder("env_t1").unwrap();
    assert!(folder.vlans.is_empty());
    let vxlan = &folder.tunnels["env_n1"];
    assert_eq!(vxlan.profile, TunnelProfile::Vxlan);
    assert_eq!(vxlan.key, 5001);
    assert_eq!(vxlan.local_address, LOCAL_VTEP);
    let gre = &folder.tunnels["env_n0"];
    assert_eq!(gre.profile, TunnelProfile::Gre);
    assert_eq!(gre.key, 77);

    // Our own VTEP never floods to itself.
    let flood: Vec<(String, String)> = folder.fdb["env_n1"].iter().cloned().collect();
    assert_eq!(flood, vec![(FLOODING_MAC.to_string(), "192.168.100.21".to_string())]);
    assert!(folder.fdb["env_n0"].contains(&(FLOODING_MAC.to_string(), "192.168.100.31".to_string())));

    assert_eq!(folder.self_ips["local-bigip1.local-s1"].vlan, "/env_t1/env_n1");
    assert_eq!(folder.virtual_servers["env_v1"].vlans, vec!["/env_t1/env_n0".to_string()]);

    agent
        .process(delete_pool(with_status(service, Status::Active)))
        .await
        .unwrap();
    assert!(dev.folder("env_t1").is_none());
}

// ── Persistence and throttling ───────────────────────────────────

#[tokio::test]
async fn app_cookie_persistence_installs_rule_and_profile() {
    let (dev, cluster) = standalone().await;
    let plugin = RecordingPlugin::new();
    let mut service = web_service();
    service.vip.as_mut().unwrap().vip.session_persistence = Some(SessionPersistence {
        kind: PersistenceType::AppCookie,
        cookie_name: Some("JSESSIONID".into()),
    });
    plugin.serve(&service);
    let agent = manager(cluster, &plugin);

    agent.process(create_pool(service.clone())).await.unwrap();

    let folder = dev.folder("env_t1").unwrap();
    let rule = &folder.rules["app_cookie_env_v1"];
    assert!(rule.body.contains(r#"persist uie [string tolower [HTTP::cookie "JSESSIONID"]] 3600"#));
    let profile = &folder.persistence["app_cookie_env_v1"];
    assert_eq!(profile.rule, "app_cookie_env_v1");
    assert_eq!(profile.timeout_secs, 3600);

    let vs = &folder.virtual_servers["env_v1"];
    assert_eq!(vs.persistence.as_deref(), Some("app_cookie_env_v1"));
    assert_eq!(vs.fallback_persistence, None);
    assert_eq!(vs.rules, vec![("app_cookie_env_v1".to_string(), 0)]);
    assert!(vs.profiles.iter().any(|p| p == "/Common/http"));

    // Dropping persistence strips the VIP and removes both objects.
    let mut plain = with_status(service, Status::Active);
    plain.vip.as_mut().unwrap().vip.session_persistence = None;
    agent.process(update_vip(plain)).await.unwrap();

    let folder = dev.folder("env_t1").unwrap();
    assert!(folder.rules.is_empty());
    assert!(folder.persistence.is_empty());
    assert_eq!(folder.virtual_servers["env_v1"].persistence, None);
    assert!(folder.virtual_servers["env_v1"].rules.is_empty());
}

#[tokio::test]
async fn http_connection_limit_becomes_throttle_rule() {
    let (dev, cluster) = standalone().await;
    let plugin = RecordingPlugin::new();
    let mut service = web_service();
    service.vip.as_mut().unwrap().vip.connection_limit = 100;
    plugin.serve(&service);
    let agent = manager(cluster, &plugin);

    agent.process(create_pool(service.clone())).await.unwrap();

    let folder = dev.folder("env_t1").unwrap();
    assert!(folder.rules["throttle_env_v1"].body.contains("set static::max_reqs 100"));
    let vs = &folder.virtual_servers["env_v1"];
    assert_eq!(vs.rules, vec![("throttle_env_v1".to_string(), 500)]);
    // The rule enforces the limit, not the virtual server.
    assert_eq!(vs.connection_limit, 0);

    let mut unlimited = with_status(service, Status::Active);
    unlimited.vip.as_mut().unwrap().vip.connection_limit = -1;
    agent.process(update_vip(unlimited)).await.unwrap();

    let folder = dev.folder("env_t1").unwrap();
    assert!(!folder.rules.contains_key("throttle_env_v1"));
    assert!(folder.virtual_servers["env_v1"].rules.is_empty());
}

// ── Serialization ────────────────────────────────────────────────

#[tokio::test]
async fn member_burst_coalesces_into_one_request() {
    let (dev, cluster) = standalone().await;
    let plugin = RecordingPlugin::new();
    let agent = manager(cluster, &plugin);

    let base = with_status(web_service(), Status::Active);
    let mut handles = Vec::new();
    let mut service = base.clone();
    service.members.clear();
    for i in 0..50u32 {
        let added = member(&format!("mb{i}"), &format!("10.0.1.{}", 10 + i), 1);
        service.members.push(added.clone());
        plugin.serve(&service);
        let request = AgentRequest::CreateMember {
            member: added.member,
            service: service.clone(),
        };
        if let Some(handle) = agent.dispatch(request) {
            handles.push(handle);
        }
        assert!(agent.serializer().len() <= 2);
    }
    assert_eq!(handles.len(), 2);

    for handle in handles {
        handle.await.unwrap();
    }
    assert!(agent.serializer().is_empty());
    let folder = dev.folder("env_t1").unwrap();
    assert_eq!(folder.members["env_p1"].len(), 50);
    assert!(plugin.called("update_member_status mb49 active"));
}

#[tokio::test]
async fn failed_burst_marks_every_coalesced_member() {
    let (dev, cluster) = standalone().await;
    let plugin = RecordingPlugin::new();
    let agent = manager(cluster, &plugin);
    // Both the head request and the coalesced one fail to add members.
    for _ in 0..2 {
        dev.inject_fault(
            "add_pool_member",
            DriverError::Api {
                status: 500,
                message: "member rejected".into(),
            },
        );
    }

    let mut service = with_status(web_service(), Status::Active);
    service.members.clear();
    let mut handles = Vec::new();
    for i in 0..5u32 {
        let added = member(&format!("mb{i}"), &format!("10.0.1.{}", 10 + i), 1);
        service.members.push(added.clone());
        plugin.serve(&service);
        let request = AgentRequest::CreateMember {
            member: added.member,
            service: service.clone(),
        };
        if let Some(handle) = agent.dispatch(request) {
            handles.push(handle);
        }
    }
    assert_eq!(handles.len(), 2);
    for handle in handles {
        handle.await.unwrap();
    }

    for i in 0..5 {
        assert!(
            plugin.called(&format!("update_member_status mb{i} error")),
            "mb{i} not marked error: {:?}",
            plugin.calls()
        );
    }
    assert!(!plugin.called("update_member_status mb1 active"));
    assert!(agent.serializer().is_empty());
}

// ── Delete ───────────────────────────────────────────────────────

#[tokio::test]
async fn pool_delete_cascades_and_reclaims_everything() {
    let (dev, cluster) = standalone().await;
    let plugin = RecordingPlugin::new();
    let service = web_service();
    plugin.serve(&service);
    let agent = manager(cluster, &plugin);
    agent.process(create_pool(service.clone())).await.unwrap();

    // Children are still active; the pool delete cascades onto them.
    agent
        .process(delete_pool(with_status(service, Status::Active)))
        .await
        .unwrap();

    assert!(dev.folder("env_t1").is_none());
    assert!(plugin.called("vip_destroyed v1"));
    assert!(plugin.called("member_destroyed mb1"));
    assert!(plugin.called("member_destroyed mb2"));
    assert!(plugin.called("health_monitor_destroyed m1 p1"));
    assert!(plugin.called("pool_destroyed p1"));
    assert!(plugin.port_names().is_empty());
    assert!(!agent.cache().contains("p1"));
}

#[tokio::test]
async fn removing_last_member_on_a_subnet_reclaims_it() {
    let (dev, cluster) = standalone().await;
    let plugin = RecordingPlugin::new();
    let mut service = web_service();
    let mut lone = member("mb3", "10.0.2.7", 1);
    lone.subnet = Some(subnet("s2", "n2", "10.0.2.0/24"));
    lone.network = Some(network("n2", 102));
    service.members.push(lone);
    plugin.serve(&service);
    let agent = manager(cluster, &plugin);
    agent.process(create_pool(service.clone())).await.unwrap();
    assert!(dev.folder("env_t1").unwrap().vlans.contains_key("env_n2"));

    let mut removed = with_status(service, Status::Active);
    removed.members[2].member.status = Status::PendingDelete;
    let member = removed.members[2].member.clone();
    agent
        .process(AgentRequest::DeleteMember {
            member,
            service: removed,
        })
        .await
        .unwrap();

    let folder = dev.folder("env_t1").unwrap();
    assert!(!folder.nodes.iter().any(|n| n.starts_with("10.0.2.7")));
    assert!(!folder.vlans.contains_key("env_n2"));
    assert!(!folder.self_ips.keys().any(|name| name.ends_with("-s2")));
    assert!(folder.vlans.contains_key("env_n1"));
    assert!(plugin.called("member_destroyed mb3"));
}

#[tokio::test]
async fn replicated_pair_syncs_before_removing_self_ips() {
    let (devs, cluster) = pair(SyncMode::Replication).await;
    let plugin = RecordingPlugin::new();
    let service = web_service();
    plugin.serve(&service);
    let agent = manager(cluster, &plugin);
    agent.process(create_pool(service.clone())).await.unwrap();
    for dev in &devs {
        assert!(dev.folder("env_t1").is_some());
    }

    let journal = devs[0].journal().clone();
    journal.clear();
    agent
        .process(delete_pool(with_status(service, Status::Active)))
        .await
        .unwrap();

    let first_sync = journal.position(&["bigip1 sync_to_group"]).expect("sync forced");
    let first_self_ip = journal.position(&["delete_self_ip"]).expect("self-ip removed");
    assert!(first_sync < first_self_ip);

    let vs_gone = journal.position(&["delete_virtual_server", "env_v1"]).unwrap();
    assert!(vs_gone < first_self_ip);
    assert!(vs_gone < journal.position(&["delete_snat_translation"]).unwrap());

    for dev in &devs {
        assert!(dev.folder("env_t1").is_none());
    }
    assert!(plugin.called("pool_destroyed p1"));
    assert!(plugin.called("vip_destroyed v1"));
}

#[tokio::test]
async fn autosync_pair_removes_tenant_with_autosync_off() {
    let (devs, cluster) = pair(SyncMode::Autosync).await;
    let plugin = RecordingPlugin::new();
    let service = web_service();
    plugin.serve(&service);
    let agent = manager(cluster, &plugin);
    agent.process(create_pool(service.clone())).await.unwrap();
    // Autosync carried the primary's objects to the peer.
    assert!(devs[1].folder("env_t1").unwrap().pools.contains_key("env_p1"));

    let journal = devs[0].journal().clone();
    journal.clear();
    agent
        .process(delete_pool(with_status(service, Status::Active)))
        .await
        .unwrap();

    let off = journal.position(&["bigip1 disable_autosync"]).unwrap();
    assert!(journal.position(&["bigip2 disable_autosync"]).unwrap() > off);
    let rd1 = journal.position(&["bigip1 delete_route_domain", "/env_t1"]).unwrap();
    let folder1 = journal.position(&["bigip1 delete_folder", "/env_t1"]).unwrap();
    let rd2 = journal.position(&["bigip2 delete_route_domain", "/env_t1"]).unwrap();
    let folder2 = journal.position(&["bigip2 delete_folder", "/env_t1"]).unwrap();
    assert!(off < rd1 && rd1 < folder1);
    assert!(rd2 < folder2);

    let on = journal.last_position(&["enable_autosync"]).unwrap();
    assert!(on > folder1 && on > folder2);
    assert!(journal.last_position(&["bigip1 sync_to_group"]).unwrap() > on);

    for dev in &devs {
        assert!(dev.folder("env_t1").is_none());
        assert!(dev.autosync_enabled());
    }
}

// ── Admin state, stats, reports ──────────────────────────────────

#[tokio::test]
async fn requests_are_dropped_while_admin_down() {
    let (dev, cluster) = standalone().await;
    let plugin = RecordingPlugin::new();
    let service = web_service();
    plugin.serve(&service);
    let agent = manager(cluster, &plugin);

    agent
        .process(AgentRequest::AgentUpdated {
            admin_state_up: false,
        })
        .await
        .unwrap();
    assert!(!agent.is_admin_up());

    agent.process(create_pool(service)).await.unwrap();
    assert!(dev.folder("env_t1").is_none());
    assert!(plugin.calls().is_empty());

    agent
        .process(AgentRequest::AgentUpdated {
            admin_state_up: true,
        })
        .await
        .unwrap();
    assert!(agent.is_admin_up());
    assert!(agent.needs_resync());
}

#[tokio::test]
async fn resync_reconciles_every_bound_pool() {
    let (dev, cluster) = standalone().await;
    let plugin = RecordingPlugin::new();
    plugin.serve(&with_status(web_service(), Status::Active));
    let agent = manager(cluster, &plugin);

    agent.resync().await.unwrap();

    assert!(dev.folder("env_t1").unwrap().pools.contains_key("env_p1"));
    assert_eq!(agent.cache().pool_ids(), vec!["p1".to_string()]);
    assert!(plugin.called("update_pool_status p1 active"));
}

#[tokio::test]
async fn resync_waits_for_requests_already_queued() {
    let (_dev, cluster) = standalone().await;
    let plugin = RecordingPlugin::new();
    let service = web_service();
    plugin.serve(&service);
    let agent = manager(cluster, &plugin);

    // Queued but not yet run when the resync starts.
    let pending = agent.dispatch(create_pool(service)).unwrap();
    agent.resync().await.unwrap();
    pending.await.unwrap();

    let calls = plugin.calls();
    let created = calls
        .iter()
        .position(|c| c == "update_pool_status p1 active")
        .unwrap();
    let listed = calls.iter().position(|c| c == "get_active_pools").unwrap();
    assert!(created < listed, "resync listed pools mid-request: {calls:?}");
    assert_eq!(agent.cache().pool_ids(), vec!["p1".to_string()]);
    assert!(agent.serializer().is_empty());
}

#[tokio::test]
async fn resync_drops_pools_no_longer_bound() {
    let (_dev, cluster) = standalone().await;
    let plugin = RecordingPlugin::new();
    let service = web_service();
    plugin.serve(&service);
    let agent = manager(cluster, &plugin);
    agent.process(create_pool(service)).await.unwrap();
    assert!(agent.cache().contains("p1"));

    plugin.forget("p1");
    agent.resync().await.unwrap();
    assert!(agent.cache().pool_ids().is_empty());
}

#[tokio::test]
async fn pool_stats_map_member_names_to_ids() {
    let (_dev, cluster) = standalone().await;
    let plugin = RecordingPlugin::new();
    let service = web_service();
    plugin.serve(&service);
    let agent = manager(cluster, &plugin);
    agent.process(create_pool(service.clone())).await.unwrap();

    let settled = with_status(service, Status::Active);
    agent
        .process(AgentRequest::GetPoolStats {
            pool: settled.pool.pool.clone(),
            service: settled,
        })
        .await
        .unwrap();

    let stats = plugin.stats("p1").expect("stats reported");
    assert_eq!(stats.members.len(), 2);
    assert_eq!(stats.members["mb1"], Status::Active);
    assert_eq!(stats.members["mb2"], Status::Active);
}

#[tokio::test]
async fn state_report_sets_start_flag_once() {
    let (_dev, cluster) = standalone().await;
    let plugin = RecordingPlugin::new();
    let agent = manager(cluster, &plugin);

    agent.report_state().await.unwrap();
    agent.report_state().await.unwrap();

    let reports = plugin.reports();
    assert_eq!(reports.len(), 2);
    assert!(reports[0].start_flag);
    assert!(!reports[1].start_flag);
    assert_eq!(reports[0].host, "agent-1");
    assert_eq!(reports[0].configurations.environment_prefix, "env");
    assert_eq!(reports[0].configurations.environment_capacity_score, 0.0);
    assert!(reports[0].configurations.icontrol_endpoints.contains_key("bigip1"));
}
