//! lbaas-driver — the appliance driver interface.
//!
//! ```text
//!   reconciler ──▶ FolderScope ──▶ ManagedSession ──▶ RestDriver ──▶ /mgmt/tm
//!                  (folder, %rd)   (reconnect,        (HTTP/1.1,
//!                                   timeout)           basic auth)
//! ```
//!
//! `InMemoryAppliance` implements the same trait deterministically and is
//! what the agent's tests run against.

pub mod driver;
pub mod error;
pub mod memory;
pub mod rest;
pub mod scope;
pub mod session;
pub mod types;

pub use driver::ApplianceDriver;
pub use error::{DriverError, DriverResult, ignore_not_found};
pub use memory::{FolderState, InMemoryAppliance, Journal};
pub use rest::RestDriver;
pub use scope::FolderScope;
pub use session::ManagedSession;
pub use types::*;
