use std::time::{Duration, Instant};

use image::GrayImage;

use crate::core::detector::FaceBox;
use crate::journal::VerificationSource;

pub const GUEST_ID: &str = "<guest>";
pub const GUEST_NAME: &str = "Guest";

/// One verification and measurement attempt. Owned by the state machine;
/// workers only ever see copies of the pieces they need.
#[derive(Debug, Clone, Default)]
pub struct Session {
    pub employee_id: Option<String>,
    pub employee_name: Option<String>,
    pub is_guest: bool,
    /// Identity rests on PIN possession, not a face match.
    pub fallback_pin: bool,

    pub last_bbox: Option<FaceBox>,
    pub last_confidence: f32,
    /// A face of at least `face_min_size` was seen in IDENTIFIED_WAIT.
    pub good_face: bool,

    pub stable_candidate: Option<String>,
    pub stable_ticks: u32,
    pub fail_ticks: u32,
    pub lost_ticks: u32,
    pub retry_ticks: u32,

    pub shots: Vec<GrayImage>,
    pub collect_started: Option<Instant>,

    pub blow_time: Duration,
    pub samples: Vec<u16>,
    pub measure_started: Option<Instant>,
    pub last_measure_tick: Option<Instant>,
    /// Samples have been handed off for promille computation.
    pub finalized: bool,
    pub promille: Option<f64>,
}

impl Session {
    pub fn guest() -> Self {
        Self {
            employee_id: Some(GUEST_ID.to_string()),
            employee_name: Some(GUEST_NAME.to_string()),
            is_guest: true,
            fallback_pin: true,
            ..Default::default()
        }
    }

    pub fn identify(&mut self, employee_id: &str, name: &str) {
        self.employee_id = Some(employee_id.to_string());
        self.employee_name = Some(name.to_string());
    }

    pub fn display_name(&self) -> &str {
        self.employee_name
            .as_deref()
            .or(self.employee_id.as_deref())
            .unwrap_or("<unknown>")
    }

    pub fn verification_source(&self) -> VerificationSource {
        if self.fallback_pin {
            VerificationSource::Pin
        } else {
            VerificationSource::Face
        }
    }

    pub fn reset_stability(&mut self) {
        self.stable_candidate = None;
        self.stable_ticks = 0;
    }

    /// Same candidate on consecutive ticks builds stability; a new one restarts it.
    pub fn observe_candidate(&mut self, candidate: Option<&str>) {
        match candidate {
            Some(id) if self.stable_candidate.as_deref() == Some(id) => self.stable_ticks += 1,
            Some(id) => {
                self.stable_candidate = Some(id.to_string());
                self.stable_ticks = 1;
            }
            None => self.reset_stability(),
        }
    }

    pub fn start_measurement(&mut self, now: Instant) {
        self.blow_time = Duration::ZERO;
        self.samples.clear();
        self.measure_started = Some(now);
        self.last_measure_tick = Some(now);
        self.finalized = false;
        self.promille = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stability_counter() {
        let mut session = Session::default();
        session.observe_candidate(Some("1"));
        session.observe_candidate(Some("1"));
        assert_eq!(session.stable_ticks, 2);
        session.observe_candidate(Some("2"));
        assert_eq!((session.stable_candidate.as_deref(), session.stable_ticks), (Some("2"), 1));
        session.observe_candidate(None);
        assert_eq!(session.stable_ticks, 0);
    }

    #[test]
    fn test_guest_identity() {
        let guest = Session::guest();
        assert_eq!(guest.employee_id.as_deref(), Some(GUEST_ID));
        assert_eq!(guest.display_name(), GUEST_NAME);
        assert_eq!(guest.verification_source(), VerificationSource::Pin);
    }
}
