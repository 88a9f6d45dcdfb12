//! Generation lifecycle: state machine, per-session table, watchdog.

pub mod state;
pub mod table;
pub mod watchdog;

pub use state::{transition, GenerationState, GenerationTrigger, Transition};
pub use table::{GenerationContext, GenerationTable};
pub use watchdog::Watchdog;
