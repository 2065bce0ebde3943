//! lbaas-scheduler — binds pools to agents.
//!
//! A pool is bound to exactly one agent for its lifetime. The scheduler
//! reads registered agents and existing bindings from the state store and
//! writes new bindings in a single write transaction:
//!
//! ```text
//! AgentScheduler::bind(pool)
//!   ├── bound?      ── alive ─▶ bound agent
//!   │                └─ dead ──▶ live peer in same environment/group
//!   └── unbound     ── tenant affinity ─▶ agent already hosting the tenant
//!                    └─ lowest-capacity group ─▶ random agent in group
//! ```

pub mod error;
pub mod scheduler;

pub use error::{SchedulerError, SchedulerResult};
pub use scheduler::{AgentScheduler, epoch_secs};
