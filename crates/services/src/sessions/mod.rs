mod runtime;
mod view;
mod workflow;

// Public API of the session subsystem.
pub use crate::error::SessionError;
pub use runtime::{
    FetchOutcome, RuntimePhase, SessionOutcome, SessionRuntime, SubmitOutcome, TickOutcome,
    spawn_countdown,
};
pub use view::{RuntimeSnapshot, format_clock};
pub use workflow::{SessionLauncher, SessionPlan};
