use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PinPhase {
    AwaitingPin,
    /// Gathering face shots for a PIN holder without a trained face.
    Collecting,
    /// Waiting for the background re-index after enrollment.
    Training,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Idle,
    Detect,
    PinEntry(PinPhase),
    DetectRetry,
    IdentifiedWait,
    Measure,
    DecidePass,
    Retry,
    DecideDeny,
    /// A message is on screen until the scheduled return to IDLE.
    Notice,
}

/// Periodic inputs the runtime feeds while a state is active.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TickKind {
    /// Bounding box only.
    Camera,
    /// Recognition in DETECT, verification in DETECT_RETRY.
    Face,
    Clock,
    Distance,
    Measure,
}

impl State {
    pub fn ticks(&self) -> &'static [TickKind] {
        match self {
            State::Idle => &[TickKind::Camera, TickKind::Clock],
            State::Detect => &[TickKind::Face, TickKind::Clock],
            State::DetectRetry => &[TickKind::Face],
            State::IdentifiedWait => &[TickKind::Camera, TickKind::Distance],
            State::Measure => &[TickKind::Measure],
            _ => &[],
        }
    }

    /// Guest and PIN requests are honoured only before identification starts.
    pub fn accepts_identity_request(&self) -> bool {
        matches!(self, State::Idle | State::Detect)
    }

    /// Past identification and before the session ends.
    pub fn requires_employee(&self) -> bool {
        matches!(
            self,
            State::DetectRetry
                | State::IdentifiedWait
                | State::Measure
                | State::DecidePass
                | State::Retry
                | State::DecideDeny
        )
    }
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            State::Idle => "IDLE",
            State::Detect => "DETECT",
            State::PinEntry(PinPhase::AwaitingPin) => "PIN_ENTRY",
            State::PinEntry(PinPhase::Collecting) => "PIN_ENTRY/COLLECT",
            State::PinEntry(PinPhase::Training) => "PIN_ENTRY/TRAIN",
            State::DetectRetry => "DETECT_RETRY",
            State::IdentifiedWait => "IDENTIFIED_WAIT",
            State::Measure => "MEASURE",
            State::DecidePass => "DECIDE_PASS",
            State::Retry => "RETRY",
            State::DecideDeny => "DECIDE_DENY",
            State::Notice => "NOTICE",
        };
        f.write_str(name)
    }
}
