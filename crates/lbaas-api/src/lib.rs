//! lbaas-api — REST API for load balancer objects.
//!
//! Mutations go through the [`PluginDriver`], which stores them and casts
//! them to the bound agent; reads come straight from the store.
//!
//! # API Routes
//!
//! | Method | Path | Description |
//! |---|---|---|
//! | GET, POST | `/api/v1/pools` | List / create pools |
//! | GET, PUT, DELETE | `/api/v1/pools/{id}` | Get / update / delete a pool |
//! | GET | `/api/v1/pools/{id}/service` | Assembled service view |
//! | GET | `/api/v1/pools/{id}/stats` | Pool statistics |
//! | POST | `/api/v1/pools/{id}/health_monitors` | Associate a monitor |
//! | DELETE | `/api/v1/pools/{id}/health_monitors/{monitor_id}` | Dissociate a monitor |
//! | GET, POST | `/api/v1/vips` | List / create VIPs |
//! | GET, PUT, DELETE | `/api/v1/vips/{id}` | Get / update / delete a VIP |
//! | GET, POST | `/api/v1/members` | List / create members |
//! | GET, PUT, DELETE | `/api/v1/members/{id}` | Get / update / delete a member |
//! | GET, POST | `/api/v1/health_monitors` | List / create monitors |
//! | GET, PUT, DELETE | `/api/v1/health_monitors/{id}` | Get / update / delete a monitor |
//! | GET | `/api/v1/agents` | List agents with liveness |
//! | GET, PUT | `/api/v1/agents/{id}` | Get / set admin state |
//! | GET, POST | `/api/v1/networks` | List / create networks |
//! | GET, POST | `/api/v1/subnets` | List / create subnets |

pub mod handlers;

use std::sync::Arc;

use axum::Router;
use axum::routing::{delete, get, post};
use lbaas_plugin::PluginDriver;

/// Shared state for API handlers.
#[derive(Clone)]
pub struct ApiState {
    pub driver: Arc<PluginDriver>,
    /// Seconds without a report after which an agent is shown as down.
    pub agent_down_secs: u64,
}

/// Build the API router.
pub fn build_router(driver: Arc<PluginDriver>, agent_down_secs: u64) -> Router {
    let state = ApiState {
        driver,
        agent_down_secs,
    };

    let api_routes = Router::new()
        .route("/pools", get(handlers::list_pools).post(handlers::create_pool))
        .route(
            "/pools/{id}",
            get(handlers::get_pool)
                .put(handlers::update_pool)
                .delete(handlers::delete_pool),
        )
        .route("/pools/{id}/service", get(handlers::get_pool_service))
        .route("/pools/{id}/stats", get(handlers::get_pool_stats))
        .route("/pools/{id}/health_monitors", post(handlers::associate_monitor))
        .route(
            "/pools/{id}/health_monitors/{monitor_id}",
            delete(handlers::dissociate_monitor),
        )
        .route("/vips", get(handlers::list_vips).post(handlers::create_vip))
        .route(
            "/vips/{id}",
            get(handlers::get_vip)
                .put(handlers::update_vip)
                .delete(handlers::delete_vip),
        )
        .route("/members", get(handlers::list_members).post(handlers::create_member))
        .route(
            "/members/{id}",
            get(handlers::get_member)
                .put(handlers::update_member)
                .delete(handlers::delete_member),
        )
        .route(
            "/health_monitors",
            get(handlers::list_monitors).post(handlers::create_monitor),
        )
        .route(
            "/health_monitors/{id}",
            get(handlers::get_monitor)
                .put(handlers::update_monitor)
                .delete(handlers::delete_monitor),
        )
        .route("/agents", get(handlers::list_agents))
        .route("/agents/{id}", get(handlers::get_agent).put(handlers::update_agent))
        .route("/networks", get(handlers::list_networks).post(handlers::create_network))
        .route("/subnets", get(handlers::list_subnets).post(handlers::create_subnet))
        .with_state(state);

    Router::new().nest("/api/v1", api_routes)
}
