//! lbaas-plugin — the control-plane side of the load balancer service.
//!
//! ```text
//!   API ──▶ PluginDriver ──▶ StateStore (pending_* status)
//!                │
//!                ├──▶ AgentScheduler::bind ──▶ agent
//!                ├──▶ ServiceAssembler ──▶ LogicalService
//!                └──▶ AgentTransport::cast(agent, request)
//!
//!   agent ──▶ PluginCallbacks (PluginApi) ──▶ StateStore
//!             statuses, ports, service views, state reports
//! ```

pub mod address;
pub mod assembler;
pub mod callbacks;
pub mod driver;
pub mod error;
pub mod subnet_cache;
pub mod transport;

#[cfg(test)]
mod testing;

pub use assembler::ServiceAssembler;
pub use callbacks::{DEVICE_OWNER, PluginCallbacks};
pub use driver::PluginDriver;
pub use error::{PluginError, PluginResult};
pub use subnet_cache::{CachedSubnet, SubnetCache};
pub use transport::{AgentTransport, LocalTransport};
