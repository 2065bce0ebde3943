//! REST API handlers.
//!
//! Writes go through the plugin driver; reads come from the store. Every
//! handler returns the `{success, data | error}` envelope.

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::{Deserialize, Serialize};
use tracing::warn;

use lbaas_core::{HealthMonitor, Member, Network, Pool, Subnet, Vip};
use lbaas_plugin::PluginError;
use lbaas_scheduler::epoch_secs;
use lbaas_state::AgentRecord;

use crate::ApiState;

/// Response wrapper for consistent API format.
#[derive(Serialize)]
struct ApiResponse<T: Serialize> {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl<T: Serialize> ApiResponse<T> {
    fn ok(data: T) -> Json<Self> {
        Json(Self {
            success: true,
            data: Some(data),
            error: None,
        })
    }
}

fn error_response(msg: &str, status: StatusCode) -> Response {
    (
        status,
        Json(ApiResponse::<()> {
            success: false,
            data: None,
            error: Some(msg.to_string()),
        }),
    )
        .into_response()
}

fn plugin_error(e: PluginError) -> Response {
    let status = match &e {
        PluginError::NotFound { .. } => StatusCode::NOT_FOUND,
        PluginError::Invalid(_) | PluginError::AddressInUse { .. } => StatusCode::BAD_REQUEST,
        PluginError::AddressExhausted(_) => StatusCode::CONFLICT,
        PluginError::NoAgent(_) | PluginError::Transport(_) => StatusCode::SERVICE_UNAVAILABLE,
        PluginError::State(_) | PluginError::Scheduler(_) => {
            warn!(error = %e, "request failed");
            StatusCode::INTERNAL_SERVER_ERROR
        }
    };
    error_response(&e.to_string(), status)
}

fn found<T: Serialize>(result: Result<Option<T>, lbaas_state::StateError>, what: &str) -> Response {
    match result {
        Ok(Some(value)) => ApiResponse::ok(value).into_response(),
        Ok(None) => error_response(&format!("{what} not found"), StatusCode::NOT_FOUND),
        Err(e) => error_response(&e.to_string(), StatusCode::INTERNAL_SERVER_ERROR),
    }
}

fn listed<T: Serialize>(result: Result<Vec<T>, lbaas_state::StateError>) -> Response {
    match result {
        Ok(rows) => ApiResponse::ok(rows).into_response(),
        Err(e) => error_response(&e.to_string(), StatusCode::INTERNAL_SERVER_ERROR),
    }
}

fn created<T: Serialize>(result: Result<T, PluginError>) -> Response {
    match result {
        Ok(value) => (StatusCode::CREATED, ApiResponse::ok(value)).into_response(),
        Err(e) => plugin_error(e),
    }
}

fn accepted<T: Serialize>(result: Result<T, PluginError>) -> Response {
    match result {
        Ok(value) => (StatusCode::ACCEPTED, ApiResponse::ok(value)).into_response(),
        Err(e) => plugin_error(e),
    }
}

// ── Pools ──────────────────────────────────────────────────────

/// GET /api/v1/pools
pub async fn list_pools(State(state): State<ApiState>) -> Response {
    listed(state.driver.state().list_pools())
}

/// GET /api/v1/pools/{id}
pub async fn get_pool(State(state): State<ApiState>, Path(id): Path<String>) -> Response {
    found(state.driver.state().get_pool(&id), "pool")
}

/// POST /api/v1/pools
pub async fn create_pool(State(state): State<ApiState>, Json(pool): Json<Pool>) -> Response {
    created(state.driver.create_pool(pool).await)
}

/// PUT /api/v1/pools/{id}
pub async fn update_pool(
    State(state): State<ApiState>,
    Path(id): Path<String>,
    Json(mut pool): Json<Pool>,
) -> Response {
    pool.id = id;
    accepted(state.driver.update_pool(pool).await)
}

/// DELETE /api/v1/pools/{id}
pub async fn delete_pool(State(state): State<ApiState>, Path(id): Path<String>) -> Response {
    accepted(state.driver.delete_pool(&id).await.map(|()| "deleting"))
}

/// GET /api/v1/pools/{id}/service
pub async fn get_pool_service(State(state): State<ApiState>, Path(id): Path<String>) -> Response {
    match state.driver.assembler().assemble(&id) {
        Ok(Some(service)) => ApiResponse::ok(service).into_response(),
        Ok(None) => error_response("pool not found", StatusCode::NOT_FOUND),
        Err(e) => plugin_error(e),
    }
}

/// GET /api/v1/pools/{id}/stats
///
/// Returns the last recorded stats and asks the bound agent to refresh them.
pub async fn get_pool_stats(State(state): State<ApiState>, Path(id): Path<String>) -> Response {
    match state.driver.pool_stats(&id).await {
        Ok(stats) => ApiResponse::ok(stats).into_response(),
        Err(e) => plugin_error(e),
    }
}

/// Monitor association request body.
#[derive(Debug, Deserialize)]
pub struct AssociateMonitor {
    pub health_monitor_id: String,
}

/// POST /api/v1/pools/{id}/health_monitors
pub async fn associate_monitor(
    State(state): State<ApiState>,
    Path(id): Path<String>,
    Json(req): Json<AssociateMonitor>,
) -> Response {
    let result = state
        .driver
        .create_pool_health_monitor(&id, &req.health_monitor_id)
        .await
        .map(|()| serde_json::json!({"pool_id": id, "health_monitor_id": req.health_monitor_id}));
    created(result)
}

/// DELETE /api/v1/pools/{id}/health_monitors/{monitor_id}
pub async fn dissociate_monitor(
    State(state): State<ApiState>,
    Path((id, monitor_id)): Path<(String, String)>,
) -> Response {
    accepted(
        state
            .driver
            .delete_pool_health_monitor(&id, &monitor_id)
            .await
            .map(|()| "deleting"),
    )
}

// ── VIPs ───────────────────────────────────────────────────────

/// GET /api/v1/vips
pub async fn list_vips(State(state): State<ApiState>) -> Response {
    listed(state.driver.state().list_vips())
}

/// GET /api/v1/vips/{id}
pub async fn get_vip(State(state): State<ApiState>, Path(id): Path<String>) -> Response {
    found(state.driver.state().get_vip(&id), "vip")
}

/// POST /api/v1/vips
pub async fn create_vip(State(state): State<ApiState>, Json(vip): Json<Vip>) -> Response {
    created(state.driver.create_vip(vip).await)
}

/// PUT /api/v1/vips/{id}
pub async fn update_vip(
    State(state): State<ApiState>,
    Path(id): Path<String>,
    Json(mut vip): Json<Vip>,
) -> Response {
    vip.id = id;
    accepted(state.driver.update_vip(vip).await)
}

/// DELETE /api/v1/vips/{id}
pub async fn delete_vip(State(state): State<ApiState>, Path(id): Path<String>) -> Response {
    accepted(state.driver.delete_vip(&id).await.map(|()| "deleting"))
}

// ── Members ────────────────────────────────────────────────────

/// GET /api/v1/members
pub async fn list_members(State(state): State<ApiState>) -> Response {
    listed(state.driver.state().list_members())
}

/// GET /api/v1/members/{id}
pub async fn get_member(State(state): State<ApiState>, Path(id): Path<String>) -> Response {
    found(state.driver.state().get_member(&id), "member")
}

/// POST /api/v1/members
pub async fn create_member(State(state): State<ApiState>, Json(member): Json<Member>) -> Response {
    created(state.driver.create_member(member).await)
}

/// PUT /api/v1/members/{id}
pub async fn update_member(
    State(state): State<ApiState>,
    Path(id): Path<String>,
    Json(mut member): Json<Member>,
) -> Response {
    member.id = id;
    accepted(state.driver.update_member(member).await)
}

/// DELETE /api/v1/members/{id}
pub async fn delete_member(State(state): State<ApiState>, Path(id): Path<String>) -> Response {
    accepted(state.driver.delete_member(&id).await.map(|()| "deleting"))
}

// ── Health monitors ────────────────────────────────────────────

/// GET /api/v1/health_monitors
pub async fn list_monitors(State(state): State<ApiState>) -> Response {
    listed(state.driver.state().list_health_monitors())
}

/// GET /api/v1/health_monitors/{id}
pub async fn get_monitor(State(state): State<ApiState>, Path(id): Path<String>) -> Response {
    found(state.driver.state().get_health_monitor(&id), "health monitor")
}

/// POST /api/v1/health_monitors
pub async fn create_monitor(
    State(state): State<ApiState>,
    Json(monitor): Json<HealthMonitor>,
) -> Response {
    created(state.driver.create_health_monitor(monitor))
}

/// PUT /api/v1/health_monitors/{id}
pub async fn update_monitor(
    State(state): State<ApiState>,
    Path(id): Path<String>,
    Json(mut monitor): Json<HealthMonitor>,
) -> Response {
    monitor.id = id;
    accepted(state.driver.update_health_monitor(monitor).await)
}

/// DELETE /api/v1/health_monitors/{id}
pub async fn delete_monitor(State(state): State<ApiState>, Path(id): Path<String>) -> Response {
    match state.driver.delete_health_monitor(&id) {
        Ok(()) => ApiResponse::ok("deleted").into_response(),
        Err(e) => plugin_error(e),
    }
}

// ── Agents ─────────────────────────────────────────────────────

/// An agent record with its computed liveness.
#[derive(Debug, Serialize)]
pub struct AgentView {
    #[serde(flatten)]
    pub agent: AgentRecord,
    pub alive: bool,
}

impl AgentView {
    fn new(agent: AgentRecord, down_secs: u64) -> Self {
        let alive = agent.is_alive(epoch_secs(), down_secs);
        Self { agent, alive }
    }
}

/// GET /api/v1/agents
pub async fn list_agents(State(state): State<ApiState>) -> Response {
    match state.driver.state().list_agents() {
        Ok(agents) => {
            let views: Vec<AgentView> = agents
                .into_iter()
                .map(|a| AgentView::new(a, state.agent_down_secs))
                .collect();
            ApiResponse::ok(views).into_response()
        }
        Err(e) => error_response(&e.to_string(), StatusCode::INTERNAL_SERVER_ERROR),
    }
}

/// GET /api/v1/agents/{id}
pub async fn get_agent(State(state): State<ApiState>, Path(id): Path<String>) -> Response {
    match state.driver.state().get_agent(&id) {
        Ok(Some(agent)) => ApiResponse::ok(AgentView::new(agent, state.agent_down_secs)).into_response(),
        Ok(None) => error_response("agent not found", StatusCode::NOT_FOUND),
        Err(e) => error_response(&e.to_string(), StatusCode::INTERNAL_SERVER_ERROR),
    }
}

/// Agent update request body.
#[derive(Debug, Deserialize)]
pub struct AgentUpdate {
    pub admin_state_up: bool,
}

/// PUT /api/v1/agents/{id}
pub async fn update_agent(
    State(state): State<ApiState>,
    Path(id): Path<String>,
    Json(req): Json<AgentUpdate>,
) -> Response {
    match state.driver.update_agent(&id, req.admin_state_up).await {
        Ok(agent) => ApiResponse::ok(AgentView::new(agent, state.agent_down_secs)).into_response(),
        Err(e) => plugin_error(e),
    }
}

// ── Networks ───────────────────────────────────────────────────

/// GET /api/v1/networks
pub async fn list_networks(State(state): State<ApiState>) -> Response {
    listed(state.driver.state().list_networks())
}

/// POST /api/v1/networks
pub async fn create_network(
    State(state): State<ApiState>,
    Json(network): Json<Network>,
) -> Response {
    match state.driver.state().put_network(&network) {
        Ok(()) => (StatusCode::CREATED, ApiResponse::ok(network)).into_response(),
        Err(e) => error_response(&e.to_string(), StatusCode::INTERNAL_SERVER_ERROR),
    }
}

/// GET /api/v1/subnets
pub async fn list_subnets(State(state): State<ApiState>) -> Response {
    listed(state.driver.state().list_subnets())
}

/// POST /api/v1/subnets
pub async fn create_subnet(State(state): State<ApiState>, Json(subnet): Json<Subnet>) -> Response {
    let store = state.driver.state();
    match store.get_network(&subnet.network_id) {
        Ok(Some(_)) => {}
        Ok(None) => {
            return error_response(
                &format!("network {} does not exist", subnet.network_id),
                StatusCode::BAD_REQUEST,
            );
        }
        Err(e) => return error_response(&e.to_string(), StatusCode::INTERNAL_SERVER_ERROR),
    }
    match store.put_subnet(&subnet) {
        Ok(()) => {
            state.driver.assembler().subnet_cache().invalidate(&subnet.id);
            (StatusCode::CREATED, ApiResponse::ok(subnet)).into_response()
        }
        Err(e) => error_response(&e.to_string(), StatusCode::INTERNAL_SERVER_ERROR),
    }
}
