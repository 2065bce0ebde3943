//! lbaas-core — shared types for the load-balancing agent and plugin.
//!
//! - `types`: pools, VIPs, members, monitors, networks, subnets, ports
//! - `service`: the assembled `LogicalService` view the agent reconciles
//! - `config`: `agent.toml` parsing and validation
//! - `deployment`: prefix, traffic-group placement, route-domain cache
//! - `naming`: appliance folder/object naming and route-domain notation
//! - `rpc`: the plugin ↔ agent request and callback contract

pub mod config;
pub mod deployment;
pub mod naming;
pub mod rpc;
pub mod service;
pub mod types;

pub use deployment::Deployment;
pub use config::{AgentConfig, ConfigError, HaType, PluginConfig, SyncMode, VirtualServerKind};
pub use rpc::{AgentRequest, PluginApi, RpcError, RpcResult};
pub use service::{LogicalService, ServiceMember, ServicePool, ServiceVip, SubnetRef};
pub use types::*;
