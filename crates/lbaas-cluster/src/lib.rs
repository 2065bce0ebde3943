//! lbaas-cluster — the cluster coordinator.
//!
//! ```text
//!   agent.toml ──▶ ClusterCoordinator::connect
//!                    │ seed session, version + provisioning checks
//!                    │ device group → peers (one ManagedSession each)
//!                    │ traffic groups → Deployment
//!                    ▼
//!                  config_bigips()  (all in replication, primary in autosync)
//! ```

pub mod appliance;
pub mod coordinator;
pub mod error;
pub mod factory;
pub mod trust;

pub use appliance::{Appliance, Assured, Role};
pub use coordinator::ClusterCoordinator;
pub use error::{ClusterError, ClusterResult};
pub use factory::{DriverFactory, FixedFactory, RestFactory};
