//! Routing state for the proxy.
//!
//! Holds the immutable target registry loaded at startup and the
//! mutable per-client affinity table shared by request handlers.

mod affinity_table;
mod target_registry;

pub use affinity_table::{AffinityTable, ClientId};
pub use target_registry::{BackendTarget, KeyFormat, TargetRegistry};
