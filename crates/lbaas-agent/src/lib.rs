//! lbaas-agent — drives appliances to match the plugin's logical services.
//!
//! ```text
//!   plugin cast ──▶ AgentManager::dispatch ──▶ RequestSerializer (FIFO,
//!                                                 │   create_member coalescing)
//!                                                 ▼
//!                                            Reconciler ──▶ ClusterCoordinator
//!                                                 │             └─ appliances
//!                                                 ▼
//!                                  status callbacks ──▶ plugin
//!                                  ServiceCache (pools deployed here)
//! ```
//!
//! Periodic resync, stats, and state-report loops run beside the request
//! path and go through the same serializer for anything that mutates an
//! appliance.

pub mod cache;
pub mod capacity;
pub mod error;
pub mod fdb;
pub mod manager;
pub mod reconciler;
pub mod serializer;

#[cfg(test)]
mod testing;

pub use cache::{CachedService, ServiceCache};
pub use error::{AgentError, AgentResult, Phase};
pub use fdb::{L2Population, TunnelEntry, TunnelRegistry};
pub use manager::{AgentManager, Queued};
pub use reconciler::{ReconcileOutcome, Reconciler};
pub use serializer::{RequestSerializer, Submission, Ticket};
