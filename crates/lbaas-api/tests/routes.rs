//! Router-level tests: requests go through the full axum stack.

use std::sync::Arc;

use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use serde_json::{Value, json};
use tokio::sync::mpsc::UnboundedReceiver;
use tower::ServiceExt;

use lbaas_api::build_router;
use lbaas_core::rpc::{AgentConfigurations, AgentStateReport};
use lbaas_core::{AgentRequest, PluginConfig};
use lbaas_plugin::{LocalTransport, PluginDriver};
use lbaas_scheduler::epoch_secs;
use lbaas_state::StateStore;

struct Harness {
    router: Router,
    driver: Arc<PluginDriver>,
    casts: UnboundedReceiver<AgentRequest>,
}

fn harness() -> Harness {
    let store = StateStore::open_in_memory().unwrap();
    let transport = Arc::new(LocalTransport::new());
    let casts = transport.register("lb-host-1");
    let driver = Arc::new(PluginDriver::new(store, PluginConfig::default(), transport));

    let report = AgentStateReport {
        binary: "lbaas-agent".into(),
        host: "lb-host-1".into(),
        topic: "lbaas_agent".into(),
        agent_type: "Loadbalancer agent".into(),
        l2_population: true,
        configurations: AgentConfigurations {
            environment_prefix: "env".into(),
            environment_group_number: 1,
            tunnel_types: vec!["vxlan".into()],
            tunneling_ips: vec!["192.0.2.10".into()],
            ..Default::default()
        },
        start_flag: true,
    };
    driver.callbacks().register(&report, epoch_secs()).unwrap();

    Harness {
        router: build_router(driver.clone(), 75),
        driver,
        casts,
    }
}

async fn send(router: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let builder = Request::builder().method(method).uri(uri);
    let req = match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };
    let resp = router.clone().oneshot(req).await.unwrap();
    let status = resp.status();
    let bytes = resp.into_body().collect().await.unwrap().to_bytes();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, value)
}

async fn seed_network(router: &Router) {
    let (status, _) = send(
        router,
        "POST",
        "/api/v1/networks",
        Some(json!({"id": "n1", "tenant_id": "t1", "network_type": "vlan", "segmentation_id": 101})),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let (status, _) = send(
        router,
        "POST",
        "/api/v1/subnets",
        Some(json!({"id": "s1", "tenant_id": "t1", "network_id": "n1", "cidr": "10.0.1.0/24"})),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
}

fn pool_body() -> Value {
    json!({
        "id": "p1",
        "tenant_id": "t1",
        "name": "web",
        "lb_method": "round_robin",
        "protocol": "HTTP",
        "subnet_id": "s1"
    })
}

#[tokio::test]
async fn create_pool_casts_to_bound_agent() {
    let mut h = harness();
    seed_network(&h.router).await;

    let (status, body) = send(&h.router, "POST", "/api/v1/pools", Some(pool_body())).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["success"], true);
    assert_eq!(body["data"]["status"], "pending_create");

    match h.casts.try_recv().unwrap() {
        AgentRequest::CreatePool { pool, service } => {
            assert_eq!(pool.id, "p1");
            assert_eq!(service.pool.pool.id, "p1");
        }
        other => panic!("unexpected cast: {other:?}"),
    }
    let binding = h.driver.state().get_binding("p1").unwrap().unwrap();
    assert_eq!(binding.agent_id, "lb-host-1");
}

#[tokio::test]
async fn pool_service_view_is_assembled() {
    let h = harness();
    seed_network(&h.router).await;
    send(&h.router, "POST", "/api/v1/pools", Some(pool_body())).await;

    let (status, body) = send(&h.router, "GET", "/api/v1/pools/p1/service", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["pool"]["pool"]["id"], "p1");
    assert_eq!(body["data"]["pool"]["subnet"]["cidr"], "10.0.1.0/24");

    let (status, body) = send(&h.router, "GET", "/api/v1/pools/nope/service", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["success"], false);
}

#[tokio::test]
async fn delete_pool_is_accepted_and_cast() {
    let mut h = harness();
    seed_network(&h.router).await;
    send(&h.router, "POST", "/api/v1/pools", Some(pool_body())).await;
    h.casts.try_recv().unwrap();

    let (status, _) = send(&h.router, "DELETE", "/api/v1/pools/p1", None).await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert!(matches!(h.casts.try_recv().unwrap(), AgentRequest::DeletePool { .. }));

    let (_, body) = send(&h.router, "GET", "/api/v1/pools/p1", None).await;
    assert_eq!(body["data"]["status"], "pending_delete");
}

#[tokio::test]
async fn agents_are_listed_with_liveness() {
    let h = harness();
    let (status, body) = send(&h.router, "GET", "/api/v1/agents", None).await;
    assert_eq!(status, StatusCode::OK);
    let agents = body["data"].as_array().unwrap();
    assert_eq!(agents.len(), 1);
    assert_eq!(agents[0]["host"], "lb-host-1");
    assert_eq!(agents[0]["alive"], true);
}

#[tokio::test]
async fn disabling_an_agent_stops_scheduling() {
    let mut h = harness();
    seed_network(&h.router).await;

    let (status, body) = send(
        &h.router,
        "PUT",
        "/api/v1/agents/lb-host-1",
        Some(json!({"admin_state_up": false})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["admin_state_up"], false);
    assert!(matches!(
        h.casts.try_recv().unwrap(),
        AgentRequest::AgentUpdated { admin_state_up: false }
    ));

    let (status, body) = send(&h.router, "POST", "/api/v1/pools", Some(pool_body())).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["success"], false);
}

#[tokio::test]
async fn monitor_in_use_cannot_be_deleted() {
    let mut h = harness();
    seed_network(&h.router).await;
    send(&h.router, "POST", "/api/v1/pools", Some(pool_body())).await;
    h.casts.try_recv().unwrap();

    let monitor = json!({
        "id": "hm1",
        "tenant_id": "t1",
        "type": "HTTP",
        "delay": 5,
        "timeout": 3,
        "max_retries": 2
    });
    let (status, _) = send(&h.router, "POST", "/api/v1/health_monitors", Some(monitor)).await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, _) = send(
        &h.router,
        "POST",
        "/api/v1/pools/p1/health_monitors",
        Some(json!({"health_monitor_id": "hm1"})),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert!(matches!(
        h.casts.try_recv().unwrap(),
        AgentRequest::CreatePoolHealthMonitor { .. }
    ));

    let (status, _) = send(&h.router, "DELETE", "/api/v1/health_monitors/hm1", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn unknown_routes_and_objects() {
    let h = harness();
    let (status, _) = send(&h.router, "GET", "/api/v1/vips/v9", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (status, _) = send(&h.router, "GET", "/api/v1/members/m9", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (status, _) = send(&h.router, "DELETE", "/api/v1/members/m9", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}
