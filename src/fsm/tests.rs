use std::time::{Duration, Instant};

use image::GrayImage;

use super::*;
use crate::common::config::Config;
use crate::core::detector::FaceBox;
use crate::core::engine::{Recognition, ShotOutcome};
use crate::journal::{AccessResult, VerificationSource};
use crate::sensors::promille_from_mean;
use crate::storage::registry::Employee;

struct Harness {
    fsm: AccessFsm,
    now: Instant,
}

impl Harness {
    fn new() -> Self {
        Self::with(|_| {})
    }

    fn with(tweak: impl FnOnce(&mut Config)) -> Self {
        let mut config = Config::default();
        tweak(&mut config);
        let mut fsm = AccessFsm::new(FsmSettings::from_config(&config));
        fsm.start();
        Self {
            fsm,
            now: Instant::now(),
        }
    }

    fn state(&self) -> State {
        self.fsm.state()
    }

    fn send(&mut self, event: Event) -> Vec<Effect> {
        let fx = self.fsm.handle(event, self.now);
        if self.state().requires_employee() {
            assert!(self.fsm.session().employee_id.is_some(), "{} without employee", self.state());
        }
        fx
    }

    fn advance(&mut self, ms: u64) {
        self.now += Duration::from_millis(ms);
    }

    fn fire(&mut self, kind: Deferred) -> Vec<Effect> {
        let token = self.fsm.token();
        self.send(Event::Deferred { token, kind })
    }

    fn face(&mut self, id: Option<&str>, confidence: f32) -> Vec<Effect> {
        self.send(Event::FaceTick(recognized(id, confidence, big_box())))
    }

    fn no_face(&mut self) -> Vec<Effect> {
        self.send(Event::FaceTick(Recognition::no_face()))
    }

    fn distance(&mut self, cm: f64) -> Vec<Effect> {
        self.send(Event::DistanceTick { distance_cm: cm })
    }

    fn blow(&mut self, blowing: bool) -> Vec<Effect> {
        self.advance(100);
        let amplitude = if blowing { 400 } else { 10 };
        self.send(Event::MeasureTick(BlowReading {
            distance_cm: 12.0,
            amplitude,
            gas_raw: Some(300),
        }))
    }

    /// Blows until the samples are handed off; returns them.
    fn blow_until_done(&mut self) -> Vec<u16> {
        for _ in 0..100 {
            for effect in self.blow(true) {
                if let Effect::ComputePromille { samples } = effect {
                    return samples;
                }
            }
        }
        panic!("measurement never finalized");
    }

    fn guest_to_measure(&mut self) {
        self.send(Event::Action(UserAction::Guest));
        self.distance(12.0);
        assert_eq!(self.state(), State::Measure);
    }

    fn employee_to_measure(&mut self) {
        self.face(None, 0.0);
        self.face(Some("7"), 90.0);
        self.face(Some("7"), 90.0);
        assert_eq!(self.state(), State::IdentifiedWait);
        self.camera(big_box());
        self.distance(12.0);
        assert_eq!(self.state(), State::Measure);
    }

    /// Detection-only tick, as IDLE and IDENTIFIED_WAIT receive them.
    fn camera(&mut self, bbox: FaceBox) -> Vec<Effect> {
        self.send(Event::FaceTick(Recognition {
            bbox: Some(bbox),
            ..Default::default()
        }))
    }

    fn to_training(&mut self) {
        self.send(Event::Action(UserAction::RequestPin));
        self.send(Event::PinSubmitted(Some(PinMatch { employee: employee("5", "5555"), trained: false })));
        for _ in 0..10 {
            self.send(Event::ShotCaptured(ShotOutcome::Accepted(GrayImage::new(4, 4))));
        }
        assert_eq!(self.state(), State::PinEntry(PinPhase::Training));
    }
}

fn big_box() -> FaceBox {
    FaceBox { x1: 20.0, y1: 20.0, x2: 220.0, y2: 240.0, confidence: 0.95 }
}

fn small_box() -> FaceBox {
    FaceBox { x1: 20.0, y1: 20.0, x2: 80.0, y2: 90.0, confidence: 0.95 }
}

fn recognized(id: Option<&str>, confidence: f32, bbox: FaceBox) -> Recognition {
    Recognition {
        employee_id: id.map(str::to_string),
        display_name: id.map(|id| format!("Employee {}", id)),
        confidence,
        bbox: Some(bbox),
    }
}

fn employee(id: &str, pin: &str) -> Employee {
    Employee {
        id: id.to_string(),
        name: format!("Employee {}", id),
        pin: pin.to_string(),
    }
}

fn records(fx: &[Effect]) -> Vec<&AccessRecord> {
    fx.iter()
        .filter_map(|e| match e {
            Effect::Record(r) => Some(r),
            _ => None,
        })
        .collect()
}

fn scheduled(fx: &[Effect], kind: Deferred) -> Option<Duration> {
    fx.iter().find_map(|e| match e {
        Effect::Schedule { after, kind: k, .. } if *k == kind => Some(*after),
        _ => None,
    })
}

#[test]
fn test_face_in_idle_starts_detect() {
    let mut h = Harness::new();
    assert_eq!(h.state(), State::Idle);
    h.send(Event::FaceTick(Recognition {
        bbox: Some(big_box()),
        ..Default::default()
    }));
    assert_eq!(h.state(), State::Detect);
    assert_eq!(h.fsm.epoch(), 1);
}

#[test]
fn test_unrecognized_face_falls_back_to_pin() {
    let mut h = Harness::new();
    h.face(None, 0.0);
    for _ in 0..4 {
        let fx = h.face(None, 0.0);
        assert!(!fx.contains(&Effect::PromptPin));
        assert_eq!(h.state(), State::Detect);
    }
    let fx = h.face(None, 0.0);
    assert_eq!(h.state(), State::PinEntry(PinPhase::AwaitingPin));
    assert!(fx.contains(&Effect::PromptPin));

    let fx = h.send(Event::PinSubmitted(Some(PinMatch {
        employee: employee("4", "1234"),
        trained: true,
    })));
    assert_eq!(h.state(), State::DetectRetry);
    assert!(fx.iter().any(|e| matches!(e, Effect::Show { .. })));
    assert!(h.fsm.session().fallback_pin);
}

#[test]
fn test_stable_match_is_accepted() {
    let mut h = Harness::new();
    h.face(None, 0.0);
    let fx = h.face(Some("7"), 90.0);
    assert_eq!(h.state(), State::Detect);
    assert!(fx.iter().all(|e| !matches!(e, Effect::LearnOnline { .. })));

    let fx = h.face(Some("7"), 90.0);
    assert_eq!(h.state(), State::IdentifiedWait);
    assert!(fx.contains(&Effect::LearnOnline {
        employee_id: "7".to_string(),
        bbox: big_box(),
    }));
    let session = h.fsm.session();
    assert_eq!(session.employee_id.as_deref(), Some("7"));
    assert_eq!(session.employee_name.as_deref(), Some("Employee 7"));
    assert!(!session.fallback_pin);
    assert!(!session.good_face);
}

#[test]
fn test_identified_face_in_range_waits_for_camera_tick() {
    let mut h = Harness::new();
    h.face(None, 0.0);
    h.face(Some("7"), 90.0);
    h.face(Some("7"), 90.0);
    assert_eq!(h.state(), State::IdentifiedWait);

    h.distance(12.0);
    assert_eq!(h.state(), State::IdentifiedWait);
    assert_eq!(h.fsm.screen().center, "Distance: 12 cm - look at the camera");

    h.camera(big_box());
    assert!(h.fsm.session().good_face);
    h.distance(12.0);
    assert_eq!(h.state(), State::Measure);
}

#[test]
fn test_verified_face_in_range_waits_for_camera_tick() {
    let mut h = Harness::new();
    h.send(Event::Action(UserAction::RequestPin));
    h.send(Event::PinSubmitted(Some(PinMatch { employee: employee("3", "4321"), trained: true })));
    h.face(Some("3"), 80.0);
    assert_eq!(h.state(), State::IdentifiedWait);
    assert!(!h.fsm.session().fallback_pin);

    h.distance(12.0);
    assert_eq!(h.state(), State::IdentifiedWait);
    h.camera(small_box());
    h.distance(12.0);
    assert_eq!(h.state(), State::IdentifiedWait);
    h.camera(big_box());
    h.distance(12.0);
    assert_eq!(h.state(), State::Measure);
}

#[test]
fn test_alternating_candidates_never_accepted() {
    let mut h = Harness::new();
    h.face(None, 0.0);
    for i in 0..4 {
        let id = if i % 2 == 0 { "1" } else { "2" };
        h.face(Some(id), 95.0);
        assert_eq!(h.state(), State::Detect);
    }
    h.face(Some("1"), 95.0);
    assert_eq!(h.state(), State::PinEntry(PinPhase::AwaitingPin));
}

#[test]
fn test_low_confidence_is_not_accepted() {
    let mut h = Harness::new();
    h.face(None, 0.0);
    h.face(Some("7"), 40.0);
    h.face(Some("7"), 40.0);
    h.face(Some("7"), 40.0);
    assert_eq!(h.state(), State::Detect);
}

#[test]
fn test_lost_face_returns_to_idle() {
    let mut h = Harness::new();
    h.face(None, 0.0);
    h.face(None, 0.0);
    h.face(None, 0.0);
    for _ in 0..4 {
        h.no_face();
        assert_eq!(h.state(), State::Detect);
    }
    assert_eq!(h.fsm.session().fail_ticks, 0);
    h.no_face();
    assert_eq!(h.state(), State::Idle);
    assert!(h.fsm.session().employee_id.is_none());
}

#[test]
fn test_wrong_pin_shows_notice_then_idles() {
    let mut h = Harness::new();
    h.send(Event::Action(UserAction::RequestPin));
    assert_eq!(h.state(), State::PinEntry(PinPhase::AwaitingPin));
    let fx = h.send(Event::PinSubmitted(None));
    assert_eq!(h.state(), State::Notice);
    assert_eq!(h.fsm.screen().center, "Wrong PIN");
    assert_eq!(scheduled(&fx, Deferred::ReturnToIdle), Some(Duration::from_millis(2000)));
    h.fire(Deferred::ReturnToIdle);
    assert_eq!(h.state(), State::Idle);
}

#[test]
fn test_pin_cancel_returns_to_idle() {
    let mut h = Harness::new();
    h.send(Event::Action(UserAction::RequestPin));
    h.send(Event::PinCancelled);
    assert_eq!(h.state(), State::Idle);
}

#[test]
fn test_stale_timer_is_ignored() {
    let mut h = Harness::new();
    h.send(Event::Action(UserAction::RequestPin));
    h.send(Event::PinSubmitted(None));
    let stale = h.fsm.token();
    h.fire(Deferred::ReturnToIdle);
    h.face(None, 0.0);
    assert_eq!(h.state(), State::Detect);
    h.send(Event::Deferred { token: stale, kind: Deferred::ReturnToIdle });
    assert_eq!(h.state(), State::Detect);
}

#[test]
fn test_detect_retry_confirms_or_falls_back() {
    let mut h = Harness::new();
    h.send(Event::Action(UserAction::RequestPin));
    h.send(Event::PinSubmitted(Some(PinMatch { employee: employee("3", "4321"), trained: true })));
    assert_eq!(h.state(), State::DetectRetry);
    h.face(Some("9"), 99.0);
    assert_eq!(h.state(), State::DetectRetry);
    let fx = h.face(Some("3"), 70.0);
    assert_eq!(h.state(), State::IdentifiedWait);
    assert!(!h.fsm.session().fallback_pin);
    assert!(fx.iter().any(|e| matches!(e, Effect::LearnOnline { employee_id, .. } if employee_id == "3")));

    let mut h = Harness::new();
    h.send(Event::Action(UserAction::RequestPin));
    h.send(Event::PinSubmitted(Some(PinMatch { employee: employee("3", "4321"), trained: true })));
    h.no_face();
    h.face(None, 0.0);
    assert_eq!(h.state(), State::DetectRetry);
    h.face(Some("3"), 30.0);
    assert_eq!(h.state(), State::IdentifiedWait);
    assert!(h.fsm.session().fallback_pin);
    assert_eq!(h.fsm.session().verification_source(), VerificationSource::Pin);
}

#[test]
fn test_new_face_is_collected_and_trained() {
    let mut h = Harness::new();
    h.send(Event::Action(UserAction::RequestPin));
    let fx = h.send(Event::PinSubmitted(Some(PinMatch { employee: employee("5", "5555"), trained: false })));
    assert_eq!(h.state(), State::PinEntry(PinPhase::Collecting));
    assert!(fx.contains(&Effect::CaptureShot));

    let fx = h.send(Event::ShotCaptured(ShotOutcome::TooSmall { span: 60.0 }));
    assert_eq!(scheduled(&fx, Deferred::CaptureShot), Some(Duration::from_millis(80)));
    h.advance(80);
    assert!(h.fire(Deferred::CaptureShot).contains(&Effect::CaptureShot));

    let mut last = Vec::new();
    for _ in 0..10 {
        h.advance(120);
        last = h.send(Event::ShotCaptured(ShotOutcome::Accepted(GrayImage::new(4, 4))));
    }
    assert_eq!(h.state(), State::PinEntry(PinPhase::Training));
    let enrolled = last.iter().find_map(|e| match e {
        Effect::Enroll { employee_id, shots } => Some((employee_id.clone(), shots.len())),
        _ => None,
    });
    assert_eq!(enrolled, Some(("5".to_string(), 10)));

    h.send(Event::TrainingProgress { done: 1, total: 2 });
    assert_eq!(h.fsm.screen().center, "Training... 1/2");
    h.send(Event::TrainingFinished { ok: true });
    assert_eq!(h.state(), State::DetectRetry);
}

#[test]
fn test_lost_training_result_continues_on_pin() {
    let mut h = Harness::new();
    h.send(Event::Action(UserAction::RequestPin));
    h.send(Event::PinSubmitted(Some(PinMatch { employee: employee("5", "5555"), trained: false })));
    let mut last = Vec::new();
    for _ in 0..10 {
        last = h.send(Event::ShotCaptured(ShotOutcome::Accepted(GrayImage::new(4, 4))));
    }
    assert_eq!(scheduled(&last, Deferred::TrainingExpired), Some(Duration::from_secs(120)));

    h.advance(120_000);
    let fx = h.fire(Deferred::TrainingExpired);
    assert_eq!(h.state(), State::DetectRetry);
    assert!(fx.contains(&Effect::Progress(None)));
    assert!(h.fsm.session().fallback_pin);

    // the worker reporting late changes nothing
    assert!(h.send(Event::TrainingFinished { ok: true }).is_empty());
    assert_eq!(h.state(), State::DetectRetry);
}

#[test]
fn test_training_deadline_is_dropped_once_finished() {
    let mut h = Harness::new();
    h.to_training();
    let token = h.fsm.token();
    h.send(Event::TrainingFinished { ok: true });
    assert_eq!(h.state(), State::DetectRetry);
    h.send(Event::Deferred { token, kind: Deferred::TrainingExpired });
    assert_eq!(h.state(), State::DetectRetry);
}

#[test]
fn test_enrollment_times_out() {
    let mut h = Harness::new();
    h.send(Event::Action(UserAction::RequestPin));
    h.send(Event::PinSubmitted(Some(PinMatch { employee: employee("5", "5555"), trained: false })));
    h.send(Event::ShotCaptured(ShotOutcome::Accepted(GrayImage::new(4, 4))));
    h.advance(15_000);
    let fx = h.fire(Deferred::CaptureShot);
    assert!(!fx.contains(&Effect::CaptureShot));
    assert_eq!(h.state(), State::Notice);
    h.fire(Deferred::ReturnToIdle);
    assert_eq!(h.state(), State::Idle);
}

#[test]
fn test_far_distance_never_measures() {
    let mut h = Harness::new();
    h.send(Event::Action(UserAction::Guest));
    assert_eq!(h.state(), State::IdentifiedWait);
    for _ in 0..100 {
        h.advance(200);
        h.distance(45.0);
        assert_eq!(h.state(), State::IdentifiedWait);
    }
    assert_eq!(h.fsm.screen().center, "Distance: 45 cm");
    h.distance(f64::INFINITY);
    assert_eq!(h.state(), State::IdentifiedWait);
}

#[test]
fn test_wait_requires_good_face_without_fallback() {
    let mut h = Harness::new();
    h.face(None, 0.0);
    h.send(Event::FaceTick(recognized(Some("7"), 90.0, small_box())));
    h.send(Event::FaceTick(recognized(Some("7"), 90.0, small_box())));
    assert_eq!(h.state(), State::IdentifiedWait);
    assert!(!h.fsm.session().good_face);

    h.distance(12.0);
    assert_eq!(h.state(), State::IdentifiedWait);
    h.camera(big_box());
    h.distance(12.0);
    assert_eq!(h.state(), State::Measure);
}

#[test]
fn test_identified_wait_times_out() {
    let mut h = Harness::new();
    h.send(Event::Action(UserAction::Guest));
    h.advance(30_000);
    h.distance(45.0);
    assert_eq!(h.state(), State::Notice);
}

#[test]
fn test_measure_counts_only_blow_time() {
    let mut h = Harness::new();
    h.guest_to_measure();

    for _ in 0..29 {
        let fx = h.blow(true);
        assert!(fx.iter().all(|e| !matches!(e, Effect::ComputePromille { .. })));
        h.blow(false);
    }
    assert_eq!(h.fsm.session().blow_time, Duration::from_millis(2900));
    assert_eq!(h.fsm.session().samples.len(), 29);

    let fx = h.blow(true);
    assert!(h.fsm.session().finalized);
    assert!(fx.contains(&Effect::Progress(Some(1.0))));
    assert!(fx.iter().any(|e| matches!(e, Effect::ComputePromille { samples } if samples.len() == 30)));

    // no further sampling once handed off
    assert!(h.blow(true).is_empty());
}

#[test]
fn test_long_poll_gap_is_capped() {
    let mut h = Harness::new();
    h.guest_to_measure();
    h.advance(2_000);
    h.send(Event::MeasureTick(BlowReading { distance_cm: 12.0, amplitude: 400, gas_raw: None }));
    assert_eq!(h.fsm.session().blow_time, Duration::from_millis(500));
    assert!(h.fsm.session().samples.is_empty());
}

#[test]
fn test_out_of_range_is_not_blowing() {
    let mut h = Harness::new();
    h.guest_to_measure();
    h.advance(100);
    h.send(Event::MeasureTick(BlowReading { distance_cm: 30.0, amplitude: 900, gas_raw: Some(500) }));
    assert_eq!(h.fsm.session().blow_time, Duration::ZERO);
    assert!(h.fsm.session().samples.is_empty());
}

#[test]
fn test_measure_times_out() {
    let mut h = Harness::new();
    h.guest_to_measure();
    h.advance(20_000);
    h.send(Event::MeasureTick(BlowReading { distance_cm: 12.0, amplitude: 400, gas_raw: Some(300) }));
    assert_eq!(h.state(), State::Notice);
}

#[test]
fn test_low_promille_passes() {
    let promille = promille_from_mean(33.0, 0.0, 220.0);
    assert!((promille - 0.15).abs() < 1e-9);

    let mut h = Harness::new();
    h.employee_to_measure();
    let samples = h.blow_until_done();
    assert!(samples.iter().all(|&s| s == 300));

    let fx = h.send(Event::PromilleReady(promille));
    assert_eq!(h.state(), State::DecidePass);
    assert!(fx.contains(&Effect::OpenGate));
    assert!(fx.contains(&Effect::Led(AccessResult::Pass)));
    let logged = records(&fx);
    assert_eq!(logged.len(), 1);
    assert_eq!(logged[0].result, AccessResult::Pass);
    assert_eq!(logged[0].employee_id, "7");
    assert_eq!(logged[0].source, VerificationSource::Face);
    assert!(!logged[0].fallback_pin);
    assert_eq!(scheduled(&fx, Deferred::ReturnToIdle), Some(Duration::from_millis(2500)));

    // a late duplicate result must not actuate twice
    assert!(h.send(Event::PromilleReady(promille)).is_empty());
    h.fire(Deferred::ReturnToIdle);
    assert_eq!(h.state(), State::Idle);
}

#[test]
fn test_middle_band_retry_then_deny() {
    let mut h = Harness::new();
    h.employee_to_measure();
    h.blow_until_done();
    let fx = h.send(Event::PromilleReady(0.35));
    assert_eq!(h.state(), State::Retry);
    assert!(fx.contains(&Effect::Buttons {
        primary: Some("Measure again".to_string()),
        secondary: Some("Deny".to_string()),
    }));
    assert!(records(&fx).is_empty());

    let fx = h.send(Event::Action(UserAction::Secondary));
    assert_eq!(h.state(), State::DecideDeny);
    assert!(fx.contains(&Effect::Led(AccessResult::Deny)));
    assert!(!fx.contains(&Effect::OpenGate));
    let logged = records(&fx);
    assert_eq!(logged.len(), 1);
    assert_eq!(logged[0].result.event_name(), "deny_access");
    assert_eq!(logged[0].promille, 0.35);
    assert_eq!(scheduled(&fx, Deferred::ReturnToIdle), Some(Duration::from_millis(2000)));

    h.fire(Deferred::ReturnToIdle);
    assert_eq!(h.state(), State::Idle);
}

#[test]
fn test_retry_measure_again() {
    let mut h = Harness::new();
    h.employee_to_measure();
    h.blow_until_done();
    h.send(Event::PromilleReady(0.3));
    let expiry = h.fsm.token();
    h.send(Event::Action(UserAction::Primary));
    assert_eq!(h.state(), State::Measure);
    assert!(!h.fsm.session().finalized);

    h.send(Event::Deferred { token: expiry, kind: Deferred::RetryExpired });
    assert_eq!(h.state(), State::Measure);

    h.blow_until_done();
    h.send(Event::PromilleReady(0.1));
    assert_eq!(h.state(), State::DecidePass);
}

#[test]
fn test_retry_expiry_denies() {
    let mut h = Harness::new();
    h.employee_to_measure();
    h.blow_until_done();
    h.send(Event::PromilleReady(0.3));
    let fx = h.fire(Deferred::RetryExpired);
    assert_eq!(h.state(), State::DecideDeny);
    assert_eq!(records(&fx).len(), 1);
}

#[test]
fn test_high_promille_denies() {
    let mut h = Harness::new();
    h.employee_to_measure();
    h.blow_until_done();
    let fx = h.send(Event::PromilleReady(0.8));
    assert_eq!(h.state(), State::DecideDeny);
    assert_eq!(records(&fx)[0].result, AccessResult::Deny);
    assert_eq!(scheduled(&fx, Deferred::ReturnToIdle), Some(Duration::from_millis(3000)));
}

#[test]
fn test_guest_logs_nothing() {
    let mut h = Harness::new();
    h.guest_to_measure();
    h.blow_until_done();
    let fx = h.send(Event::PromilleReady(0.0));
    assert_eq!(h.state(), State::DecidePass);
    assert!(fx.contains(&Effect::OpenGate));
    assert!(fx.iter().all(|e| !matches!(e, Effect::Led(_) | Effect::Record(_))));

    let mut h = Harness::new();
    h.guest_to_measure();
    h.blow_until_done();
    let fx = h.send(Event::PromilleReady(1.0));
    assert_eq!(h.state(), State::DecideDeny);
    assert!(fx.iter().all(|e| !matches!(e, Effect::Led(_) | Effect::Record(_) | Effect::OpenGate)));
}

#[test]
fn test_inverted_thresholds_are_swapped() {
    let mut h = Harness::with(|c| {
        c.decision.threshold_pass = 0.5;
        c.decision.threshold_deny = 0.2;
    });
    h.guest_to_measure();
    h.blow_until_done();
    h.send(Event::PromilleReady(0.35));
    assert_eq!(h.state(), State::Retry);
}

#[test]
fn test_measurement_failure_shows_notice() {
    let mut h = Harness::new();
    h.guest_to_measure();
    h.send(Event::MeasurementFailed("adc".to_string()));
    assert_eq!(h.state(), State::Measure);
    h.blow_until_done();
    h.send(Event::MeasurementFailed("adc".to_string()));
    assert_eq!(h.state(), State::Notice);
}

#[test]
fn test_lost_promille_result_shows_notice() {
    let mut h = Harness::new();
    h.guest_to_measure();
    let mut handoff = Vec::new();
    for _ in 0..100 {
        handoff = h.blow(true);
        if h.fsm.session().finalized {
            break;
        }
    }
    assert_eq!(scheduled(&handoff, Deferred::AnalysisExpired), Some(Duration::from_secs(10)));

    // polls after the handoff neither sample nor time out on their own
    h.advance(600_000);
    h.blow(true);
    assert_eq!(h.state(), State::Measure);

    h.fire(Deferred::AnalysisExpired);
    assert_eq!(h.state(), State::Notice);
    assert_eq!(h.fsm.screen().center, "Measurement error");
    assert!(h.send(Event::PromilleReady(0.0)).is_empty());
    h.fire(Deferred::ReturnToIdle);
    assert_eq!(h.state(), State::Idle);
}

#[test]
fn test_analysis_deadline_ignored_before_handoff() {
    let mut h = Harness::new();
    h.guest_to_measure();
    h.blow(true);
    h.fire(Deferred::AnalysisExpired);
    assert_eq!(h.state(), State::Measure);
}

#[test]
fn test_identity_requests_only_before_identification() {
    let mut h = Harness::new();
    h.employee_to_measure();
    h.send(Event::Action(UserAction::Guest));
    h.send(Event::Action(UserAction::RequestPin));
    assert_eq!(h.state(), State::Measure);
    assert!(!h.fsm.session().is_guest);
}

#[test]
fn test_clock_refreshes_idle_top_line() {
    let mut h = Harness::new();
    let fx = h.send(Event::Clock("08:15:00".to_string()));
    assert_eq!(fx.len(), 1);
    assert_eq!(h.fsm.screen().top, "08:15:00");

    h.send(Event::Action(UserAction::Guest));
    assert!(h.send(Event::Clock("08:15:01".to_string())).is_empty());
}

#[test]
fn test_new_session_clears_previous_employee() {
    let mut h = Harness::new();
    h.employee_to_measure();
    h.blow_until_done();
    h.send(Event::PromilleReady(0.0));
    h.fire(Deferred::ReturnToIdle);
    let first_epoch = h.fsm.epoch();

    h.send(Event::Action(UserAction::Guest));
    assert!(h.fsm.epoch() > first_epoch);
    assert_eq!(h.fsm.session().employee_id.as_deref(), Some(GUEST_ID));
    assert!(h.fsm.session().samples.is_empty());
}
