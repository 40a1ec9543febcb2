//! Namespace delegates.
//!
//! Each delegate owns one top-level namespace of the tree, answers calls
//! routed to it and keeps its subtree current by emitting path changes.

mod devices_api;
mod groups_api;

pub use devices_api::DevicesApi;
pub use groups_api::GroupsApi;
