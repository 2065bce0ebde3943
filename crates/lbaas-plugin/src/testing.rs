//! Store fixtures shared by the unit tests.

use lbaas_core::rpc::{AgentConfigurations, AgentStateReport};
use lbaas_core::*;
use lbaas_state::{AgentRecord, PoolMonitorAssociation, StateStore};

pub fn network(id: &str, kind: NetworkType, segment: u32) -> Network {
    Network {
        id: id.into(),
        tenant_id: "t1".into(),
        network_type: kind,
        physical_network: Some("physnet1".into()),
        segmentation_id: Some(segment),
        shared: false,
    }
}

pub fn subnet(id: &str, network_id: &str, cidr: &str) -> Subnet {
    Subnet {
        id: id.into(),
        tenant_id: "t1".into(),
        network_id: network_id.into(),
        cidr: cidr.parse().unwrap(),
        gateway_ip: None,
        shared: false,
    }
}

pub fn port(id: &str, network_id: &str, subnet_id: &str, address: &str, tenant: &str) -> Port {
    Port {
        id: id.into(),
        name: id.into(),
        network_id: network_id.into(),
        tenant_id: tenant.into(),
        mac_address: "fa:16:3e:00:00:01".into(),
        fixed_ips: vec![FixedIp {
            subnet_id: subnet_id.into(),
            ip_address: address.into(),
        }],
        device_id: String::new(),
        device_owner: String::new(),
        binding_host: None,
        allowed_address_pairs: vec![],
    }
}

pub fn pool(id: &str) -> Pool {
    Pool {
        id: id.into(),
        tenant_id: "t1".into(),
        name: id.into(),
        description: String::new(),
        lb_method: LbMethod::RoundRobin,
        protocol: Protocol::Http,
        admin_state_up: true,
        status: Status::Active,
        subnet_id: "s1".into(),
        vip_id: None,
        health_monitor_ids: vec![],
    }
}

pub fn member(id: &str, address: &str) -> Member {
    Member {
        id: id.into(),
        tenant_id: "t1".into(),
        pool_id: "p1".into(),
        address: address.into(),
        protocol_port: 80,
        weight: 1,
        admin_state_up: true,
        status: Status::Active,
    }
}

pub fn vip() -> Vip {
    Vip {
        id: "v1".into(),
        tenant_id: "t1".into(),
        pool_id: "p1".into(),
        name: "web".into(),
        description: String::new(),
        address: "10.0.0.100".into(),
        protocol: Protocol::Http,
        protocol_port: 80,
        admin_state_up: true,
        connection_limit: -1,
        session_persistence: None,
        subnet_id: "s0".into(),
        port_id: Some("vip-port".into()),
        status: Status::Active,
    }
}

pub fn monitor(id: &str) -> HealthMonitor {
    HealthMonitor {
        id: id.into(),
        tenant_id: "t1".into(),
        kind: MonitorType::Http,
        delay: 5,
        timeout: 16,
        max_retries: 3,
        url_path: Some("/health".into()),
        http_method: Some("GET".into()),
        expected_codes: Some("200".into()),
        admin_state_up: true,
        status: Status::Active,
    }
}

/// Pool p1 (t1) on s1 with VIP v1 on s0, two members, and monitor m1.
pub fn seed_web_service(state: &StateStore) {
    state.put_network(&network("n0", NetworkType::Vlan, 100)).unwrap();
    state.put_network(&network("n1", NetworkType::Vlan, 101)).unwrap();
    state.put_subnet(&subnet("s0", "n0", "10.0.0.0/24")).unwrap();
    state.put_subnet(&subnet("s1", "n1", "10.0.1.0/24")).unwrap();
    state.put_port(&port("vip-port", "n0", "s0", "10.0.0.100", "t1")).unwrap();

    let mut p1 = pool("p1");
    p1.vip_id = Some("v1".into());
    p1.health_monitor_ids = vec!["m1".into()];
    state.put_pool(&p1).unwrap();
    state.put_vip(&vip()).unwrap();
    state.put_member(&member("mb1", "10.0.1.5")).unwrap();
    state.put_member(&member("mb2", "10.0.1.6")).unwrap();
    state.put_health_monitor(&monitor("m1")).unwrap();
    let mut assoc = PoolMonitorAssociation::new("p1", "m1");
    assoc.status = Status::Active;
    state.put_pool_monitor(&assoc).unwrap();
}

pub fn report(host: &str, tunneling_ips: &[&str]) -> AgentStateReport {
    AgentStateReport {
        binary: "lbaas-agent".into(),
        host: host.into(),
        topic: "lbaas_agent".into(),
        agent_type: "Loadbalancer agent".into(),
        l2_population: true,
        configurations: AgentConfigurations {
            environment_prefix: "env".into(),
            environment_group_number: 1,
            tunnel_types: vec!["vxlan".into()],
            tunneling_ips: tunneling_ips.iter().map(|s| s.to_string()).collect(),
            ..Default::default()
        },
        start_flag: true,
    }
}

pub fn register_agent(state: &StateStore, host: &str, tunneling_ips: &[&str]) {
    let record = AgentRecord::from_report(&report(host, tunneling_ips), lbaas_scheduler::epoch_secs());
    state.put_agent(&record).unwrap();
}
