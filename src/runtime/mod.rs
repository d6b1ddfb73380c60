//! Event loop that drives the state machine from ticks, keys and workers.

pub mod kiosk;
pub mod schedule;

use crate::fsm::{Tone, UserAction};

pub use kiosk::{Collaborators, Kiosk, LoopEvent};
pub use schedule::{TickSchedule, Timers};

/// Output side of the operator terminal.
pub trait Display {
    fn show(&mut self, top: &str, center: &str, tone: Tone);
    fn show_buttons(&mut self, primary: Option<&str>, secondary: Option<&str>);
    fn progress(&mut self, fraction: Option<f32>);
}

/// Keys the loop understands besides PIN entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Action(UserAction),
    Recalibrate,
    Quit,
}

pub trait Keypad {
    /// Blocks until a PIN is entered. `None` when the user cancels.
    fn request_pin(&mut self) -> Option<String>;

    /// Never blocks.
    fn poll(&mut self) -> Option<Command>;
}
