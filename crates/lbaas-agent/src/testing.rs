//! Builders shared by the crate's unit tests.

use lbaas_core::*;

pub fn network(id: &str) -> Network {
    Network {
        id: id.to_string(),
        tenant_id: "t1".to_string(),
        network_type: NetworkType::Vlan,
        physical_network: Some("physnet1".to_string()),
        segmentation_id: Some(100),
        shared: false,
    }
}

pub fn subnet(id: &str, network_id: &str, cidr: &str) -> Subnet {
    Subnet {
        id: id.to_string(),
        tenant_id: "t1".to_string(),
        network_id: network_id.to_string(),
        cidr: cidr.parse().unwrap(),
        gateway_ip: None,
        shared: false,
    }
}

pub fn health_monitor(id: &str, kind: MonitorType) -> HealthMonitor {
    HealthMonitor {
        id: id.to_string(),
        tenant_id: "t1".to_string(),
        kind,
        delay: 5,
        timeout: 4,
        max_retries: 3,
        url_path: None,
        http_method: None,
        expected_codes: None,
        admin_state_up: true,
        status: Status::PendingCreate,
    }
}

/// Pool `pool_id` of tenant `t1` on subnet `10.0.1.0/24` with `n` members.
pub fn service_with_members(pool_id: &str, n: usize) -> LogicalService {
    let net = network("n1");
    let sub = subnet("s1", "n1", "10.0.1.0/24");
    let members = (0..n)
        .map(|i| ServiceMember {
            member: Member {
                id: format!("m{i}"),
                tenant_id: "t1".into(),
                pool_id: pool_id.into(),
                address: format!("10.0.1.{}", 10 + i),
                protocol_port: 80,
                weight: 1,
                admin_state_up: true,
                status: Status::PendingCreate,
            },
            subnet: Some(sub.clone()),
            network: Some(net.clone()),
            port: None,
            vxlan_vteps: vec![],
            gre_vteps: vec![],
        })
        .collect();
    LogicalService {
        pool: ServicePool {
            pool: Pool {
                id: pool_id.into(),
                tenant_id: "t1".into(),
                name: "web".into(),
                description: String::new(),
                lb_method: LbMethod::RoundRobin,
                protocol: Protocol::Http,
                admin_state_up: true,
                status: Status::PendingCreate,
                subnet_id: "s1".into(),
                vip_id: None,
                health_monitor_ids: vec![],
            },
            subnet: Some(sub),
            network: Some(net),
        },
        vip: None,
        members,
        health_monitors: vec![],
    }
}
