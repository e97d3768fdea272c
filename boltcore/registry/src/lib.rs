//! Host-facing tables consulted during compilation: the command registry
//! (named builtins with typed signatures), the constants manager
//! (integer-indexed compile-time constants), and the closed event-name set.
//!
//! All three are built during initialization and read-only while a
//! compilation runs; core crates receive them by reference.

mod commands;
mod constants;
mod events;

pub use commands::{CommandDef, CommandKind, CommandRegistry, ParamDef, ParamType};
pub use constants::{ConstValue, ConstantsManager};
pub use events::{all_event_names, is_valid_event_name, EventType};
