use std::time::Duration;

use image::GrayImage;

use crate::core::detector::FaceBox;
use crate::core::engine::{Recognition, ShotOutcome};
use crate::journal::{AccessResult, VerificationSource};
use crate::storage::registry::Employee;

/// One measurement poll: distance, microphone burst amplitude and a gas read.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BlowReading {
    pub distance_cm: f64,
    pub amplitude: u16,
    /// `None` when the gas channel could not be read.
    pub gas_raw: Option<u16>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PinMatch {
    pub employee: Employee,
    pub trained: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UserAction {
    RequestPin,
    Guest,
    Primary,
    Secondary,
}

/// Single-shot timers requested through [`Effect::Schedule`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Deferred {
    ReturnToIdle,
    CaptureShot,
    RetryExpired,
    /// The re-index after an enrollment never reported back.
    TrainingExpired,
    /// The promille worker never reported back.
    AnalysisExpired,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    /// Detection result. Only the bbox is filled in IDLE and IDENTIFIED_WAIT.
    FaceTick(Recognition),
    DistanceTick { distance_cm: f64 },
    MeasureTick(BlowReading),
    ShotCaptured(ShotOutcome),
    TrainingProgress { done: usize, total: usize },
    TrainingFinished { ok: bool },
    PromilleReady(f64),
    MeasurementFailed(String),
    /// `None` for a PIN that matches nobody.
    PinSubmitted(Option<PinMatch>),
    PinCancelled,
    Action(UserAction),
    Deferred { token: u64, kind: Deferred },
    Clock(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tone {
    Neutral,
    Info,
    Success,
    Warning,
    Error,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AccessRecord {
    pub employee_id: String,
    pub employee_name: String,
    pub promille: f64,
    pub result: AccessResult,
    pub source: VerificationSource,
    pub fallback_pin: bool,
}

/// Work the runtime performs on behalf of the state machine.
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    Show { top: String, center: String, tone: Tone },
    Buttons { primary: Option<String>, secondary: Option<String> },
    Progress(Option<f32>),
    Schedule { after: Duration, token: u64, kind: Deferred },
    PromptPin,
    CaptureShot,
    /// Persist shots, then re-index in the background.
    Enroll { employee_id: String, shots: Vec<GrayImage> },
    LearnOnline { employee_id: String, bbox: FaceBox },
    ComputePromille { samples: Vec<u16> },
    OpenGate,
    Led(AccessResult),
    Record(AccessRecord),
}
