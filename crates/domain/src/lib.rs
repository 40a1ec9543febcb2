//! # meshbridge-domain
//!
//! Pure domain model for the meshbridge command-routing engine.
//!
//! ## Responsibilities
//! - Foundational types: typed identifiers, error taxonomy, timestamps
//! - Define **entity records** (devices, groups, their settings and scenes)
//! - Define the **uniform envelope** (`{command, path, data}` in,
//!   `{command: "response", status, data|error}` out)
//! - Define the **closed event vocabulary** carried by the event bus
//! - Define the **state tree** snapshot pushed to freshly connected observers
//!
//! ## Dependency rule
//! This crate has **no internal dependencies**.
//! It must never import anything from `app`, adapters, or external IO crates.
//! All IO boundaries are expressed as traits in the `app` crate (ports).

pub mod error;
pub mod id;
pub mod time;

pub mod device;
pub mod endpoint;
pub mod envelope;
pub mod event;
pub mod group;
pub mod path;
pub mod state;
pub mod tree;
