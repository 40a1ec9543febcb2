//! Port definitions: traits that adapters implement.
//!
//! Ports are the boundaries between the application core and the outside world.
//! They are defined here (in `app`) so that both the use-case layer and the
//! adapter layer can depend on them without creating circular dependencies.

pub mod converter;
pub mod log_level;
pub mod network;
pub mod settings;
pub mod state;

pub use converter::{
    CapabilityDescriptor, ConvertContext, Converter, Definition, DefinitionRegistry, Operation,
    SetOutcome, Target,
};
pub use log_level::{FixedLogLevel, LogLevelControl};
pub use network::{Network, NetworkEvent};
pub use settings::SettingsStore;
pub use state::StateStore;
