//! Access-control state machine.
//!
//! The machine never touches hardware or files. The runtime turns ticks and
//! worker results into [`Event`]s and carries out the returned [`Effect`]s.

pub mod decision;
pub mod event;
pub mod machine;
pub mod session;
pub mod state;

pub use decision::{Thresholds, Verdict};
pub use event::{AccessRecord, BlowReading, Deferred, Effect, Event, PinMatch, Tone, UserAction};
pub use machine::{AccessFsm, FsmSettings, Screen};
pub use session::{Session, GUEST_ID, GUEST_NAME};
pub use state::{PinPhase, State, TickKind};

#[cfg(test)]
mod tests;
