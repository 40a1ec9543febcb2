//! # meshbridge-app
//!
//! Application core: port definitions and everything that runs between
//! them.
//!
//! ## Responsibilities
//! - Define **port traits** the adapters implement: settings and state
//!   stores, the control network, the converter registry and the log level
//!   control.
//! - Resolve user keys to entities and run payloads through the
//!   **converter pipeline** (ordering, endpoint routing, deferred reads).
//! - Expose the `devices` and `groups` **namespace delegates** behind three
//!   call surfaces: the envelope [`api`], the flat [`commands`] router and
//!   the [`legacy`] bridge options.
//! - Turn every observable change into a `PathChange` on the in-process
//!   [`event_bus`], fanned out to [`session`]s.
//!
//! ## Dependency rule
//! Depends on `meshbridge-domain` only (plus `tokio` for locks, timers and
//! channels). Never imports adapter crates.

pub mod api;
pub mod bridge;
pub mod commands;
pub mod event_bus;
pub mod legacy;
pub mod pipeline;
pub mod ports;
pub mod publisher;
pub mod resolver;
pub mod services;
pub mod session;

#[cfg(test)]
pub(crate) mod test_support;
