//! lbaas-state — embedded control-plane store.
//!
//! Uses redb (pure Rust, ACID) to hold pools, VIPs, members, monitors,
//! the networks/subnets/ports they reference, registered agents, and
//! pool → agent bindings.

pub mod error;
pub mod store;
pub mod tables;
pub mod types;

pub use error::{StateError, StateResult};
pub use store::StateStore;
pub use types::{AgentRecord, PoolBinding, PoolMonitorAssociation};
