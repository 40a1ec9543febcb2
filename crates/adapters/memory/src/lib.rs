//! # meshbridge-adapter-memory
//!
//! In-memory implementations of the store ports.
//!
//! - [`MemorySettingsStore`]: device and group records plus the ban list,
//!   seeded from configuration at startup.
//! - [`MemoryStateStore`]: last known state per entity.
//!
//! Nothing is written to disk: records live as long as the process.

mod settings;
mod state;

pub use settings::MemorySettingsStore;
pub use state::MemoryStateStore;
