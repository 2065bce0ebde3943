//! Standalone wiring regression: REST API → plugin driver → in-process
//! transport → agent → in-memory appliance, and back through the callbacks.

use std::sync::Arc;

use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use serde_json::{Value, json};
use tokio::sync::mpsc::UnboundedReceiver;
use tower::ServiceExt;

use lbaas_agent::AgentManager;
use lbaas_cluster::{ClusterCoordinator, FixedFactory};
use lbaas_core::{AgentConfig, AgentRequest, HaType, PluginConfig};
use lbaas_driver::{InMemoryAppliance, Journal};
use lbaas_plugin::{LocalTransport, PluginDriver};
use lbaas_state::StateStore;

struct Daemon {
    router: Router,
    manager: Arc<AgentManager>,
    requests: UnboundedReceiver<AgentRequest>,
    appliance: Arc<InMemoryAppliance>,
}

impl Daemon {
    async fn start() -> Self {
        let transport = Arc::new(LocalTransport::new());
        let driver = Arc::new(PluginDriver::new(
            StateStore::open_in_memory().unwrap(),
            PluginConfig::default(),
            transport.clone(),
        ));

        let appliance = InMemoryAppliance::new("bigip1", Journal::new());
        let config = AgentConfig::scaffold("lb-host-1", &["bigip1"], HaType::Standalone);
        let factory = FixedFactory::new().with_driver(appliance.clone());
        let cluster = ClusterCoordinator::connect(config, &factory).await.unwrap();
        let manager = Arc::new(AgentManager::new(Arc::new(cluster), driver.callbacks()));
        let requests = transport.register("lb-host-1");
        manager.report_state().await.unwrap();

        Self {
            router: lbaas_api::build_router(driver, 75),
            manager,
            requests,
            appliance,
        }
    }

    async fn pump(&mut self) -> usize {
        let mut handled = 0;
        while let Ok(request) = self.requests.try_recv() {
            self.manager.process(request).await.unwrap();
            handled += 1;
        }
        handled
    }

    async fn call(&self, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let builder = Request::builder().method(method).uri(uri);
        let req = match body {
            Some(body) => builder
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };
        let resp = self.router.clone().oneshot(req).await.unwrap();
        let status = resp.status();
        let bytes = resp.into_body().collect().await.unwrap().to_bytes();
        let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, value)
    }

    async fn seed_networks(&self) {
        for (net, sub, segment, cidr) in [("n0", "s0", 100, "10.0.0.0/24"), ("n1", "s1", 101, "10.0.1.0/24")] {
            let (status, _) = self
                .call(
                    "POST",
                    "/api/v1/networks",
                    Some(json!({
                        "id": net,
                        "tenant_id": "t1",
                        "network_type": "vlan",
                        "physical_network": "physnet1",
                        "segmentation_id": segment
                    })),
                )
                .await;
            assert_eq!(status, StatusCode::CREATED);
            let (status, _) = self
                .call(
                    "POST",
                    "/api/v1/subnets",
                    Some(json!({"id": sub, "tenant_id": "t1", "network_id": net, "cidr": cidr})),
                )
                .await;
            assert_eq!(status, StatusCode::CREATED);
        }
    }
}

#[tokio::test]
async fn service_deploys_and_tears_down_through_the_api() {
    let mut daemon = Daemon::start().await;
    daemon.seed_networks().await;

    let (status, _) = daemon
        .call(
            "POST",
            "/api/v1/pools",
            Some(json!({"id": "p1", "tenant_id": "t1", "protocol": "HTTP", "subnet_id": "s1"})),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, body) = daemon
        .call(
            "POST",
            "/api/v1/vips",
            Some(json!({
                "id": "v1",
                "tenant_id": "t1",
                "pool_id": "p1",
                "address": "10.0.0.100",
                "protocol": "HTTP",
                "protocol_port": 80,
                "subnet_id": "s0"
            })),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert!(body["data"]["port_id"].is_string());

    let (status, _) = daemon
        .call(
            "POST",
            "/api/v1/members",
            Some(json!({
                "id": "mb1",
                "tenant_id": "t1",
                "pool_id": "p1",
                "address": "10.0.1.5",
                "protocol_port": 8080
            })),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(daemon.pump().await, 3);

    let (_, body) = daemon.call("GET", "/api/v1/pools/p1", None).await;
    assert_eq!(body["data"]["status"], "active");
    let (_, body) = daemon.call("GET", "/api/v1/members/mb1", None).await;
    assert_eq!(body["data"]["status"], "active");

    let folder = daemon.appliance.folder("env_t1").expect("tenant folder");
    assert!(folder.members["env_p1"].contains_key("10.0.1.5%1:8080"));
    assert_eq!(folder.virtual_servers["env_v1"].destination, "10.0.0.100%1");

    let (status, _) = daemon.call("DELETE", "/api/v1/pools/p1", None).await;
    assert_eq!(status, StatusCode::ACCEPTED);
    daemon.pump().await;

    assert!(daemon.appliance.folder("env_t1").is_none());
    let (status, _) = daemon.call("GET", "/api/v1/pools/p1", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (_, body) = daemon.call("GET", "/api/v1/vips", None).await;
    assert!(body["data"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn registered_agent_is_visible_and_alive() {
    let daemon = Daemon::start().await;
    let (status, body) = daemon.call("GET", "/api/v1/agents/lb-host-1", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["alive"], true);
    assert_eq!(body["data"]["agent_type"], "Loadbalancer agent");
}
