use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::common::config::Config;
use crate::core::engine::{Recognition, ShotOutcome};
use crate::fsm::decision::{Thresholds, Verdict};
use crate::fsm::event::{
    AccessRecord, BlowReading, Deferred, Effect, Event, PinMatch, Tone, UserAction,
};
use crate::fsm::session::Session;
use crate::fsm::state::{PinPhase, State};
use crate::journal::AccessResult;
use crate::sensors::distance::format_distance;
use crate::sensors::{is_blowing, DistanceWindow};

/// Longest gap between measurement polls that still counts as blow time.
const MAX_MEASURE_STEP: Duration = Duration::from_millis(500);

const IDLE_PROMPT: &str = "Look at the camera";
const PIN_LABEL: &str = "PIN";
const GUEST_LABEL: &str = "Guest";
const RETRY_LABEL: &str = "Measure again";
const DENY_LABEL: &str = "Deny";

/// Everything the state machine reads from the configuration, resolved once.
#[derive(Debug, Clone)]
pub struct FsmSettings {
    pub conf_ok: f32,
    pub conf_low: f32,
    pub stable_ticks: u32,
    pub detect_fail_limit: u32,
    pub detect_retry_limit: u32,
    pub detect_lost_ticks: u32,
    pub face_min_size: f32,
    pub train_required_shots: usize,
    pub train_timeout: Duration,
    pub training_deadline: Duration,
    pub window: DistanceWindow,
    pub mic_threshold: u16,
    pub measure_seconds: Duration,
    pub measure_timeout: Duration,
    pub identified_wait_timeout: Duration,
    pub analysis_timeout: Duration,
    pub thresholds: Thresholds,
    pub pass_display: Duration,
    pub deny_display: Duration,
    pub retry_deny_display: Duration,
    pub wrong_pin_display: Duration,
    pub error_display: Duration,
    pub shot_accepted_delay: Duration,
    pub shot_rejected_delay: Duration,
}

impl FsmSettings {
    pub fn from_config(config: &Config) -> Self {
        let r = &config.recognition;
        let m = &config.measurement;
        let d = &config.decision;
        Self {
            conf_ok: r.recognition_conf_ok,
            conf_low: r.recognition_conf_low,
            stable_ticks: r.recognition_stable_ticks,
            detect_fail_limit: r.detect_fail_limit,
            detect_retry_limit: r.detect_retry_limit,
            detect_lost_ticks: r.detect_lost_ticks,
            face_min_size: r.face_min_size as f32,
            train_required_shots: config.enrollment.train_required_shots,
            train_timeout: Duration::from_secs(config.enrollment.train_timeout_sec),
            training_deadline: Duration::from_secs(config.enrollment.training_deadline_sec),
            window: DistanceWindow::new(m.distance_min_cm, m.distance_max_cm),
            mic_threshold: m.mic_threshold,
            measure_seconds: Duration::from_secs_f64(m.measure_seconds),
            measure_timeout: Duration::from_secs(m.measure_timeout_sec),
            identified_wait_timeout: Duration::from_secs(m.identified_wait_timeout_sec),
            analysis_timeout: Duration::from_secs(m.analysis_timeout_sec),
            thresholds: Thresholds::normalized(d.threshold_pass, d.threshold_deny),
            pass_display: Duration::from_millis(d.pass_display_ms),
            deny_display: Duration::from_millis(d.deny_display_ms),
            retry_deny_display: Duration::from_millis(d.retry_deny_display_ms),
            wrong_pin_display: Duration::from_millis(d.wrong_pin_display_ms),
            error_display: Duration::from_millis(d.error_display_ms),
            shot_accepted_delay: Duration::from_millis(config.timing.shot_accepted_ms),
            shot_rejected_delay: Duration::from_millis(config.timing.shot_rejected_ms),
        }
    }
}

/// What the display currently shows.
#[derive(Debug, Clone, PartialEq)]
pub struct Screen {
    pub top: String,
    pub center: String,
    pub tone: Tone,
}

/// The access-control state machine.
///
/// `handle` is a pure transition: all inputs arrive as events stamped with
/// `now`, all outputs leave as effects. Delayed transitions are requested
/// with [`Effect::Schedule`] and carry the token that was current when they
/// were scheduled; the token changes on every state change, so a timer that
/// outlived its state is dropped on arrival.
pub struct AccessFsm {
    settings: FsmSettings,
    state: State,
    session: Session,
    token: u64,
    epoch: u64,
    entered_at: Option<Instant>,
    clock: String,
    screen: Screen,
}

impl AccessFsm {
    pub fn new(settings: FsmSettings) -> Self {
        Self {
            settings,
            state: State::Idle,
            session: Session::default(),
            token: 0,
            epoch: 0,
            entered_at: None,
            clock: String::new(),
            screen: Screen {
                top: String::new(),
                center: IDLE_PROMPT.to_string(),
                tone: Tone::Neutral,
            },
        }
    }

    pub fn state(&self) -> State {
        self.state
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn token(&self) -> u64 {
        self.token
    }

    /// Increments each time a new session starts.
    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn screen(&self) -> &Screen {
        &self.screen
    }

    pub fn settings(&self) -> &FsmSettings {
        &self.settings
    }

    /// Effects that paint the idle screen; used once at startup.
    pub fn start(&mut self) -> Vec<Effect> {
        let mut fx = Vec::new();
        self.paint_idle(&mut fx);
        fx
    }

    pub fn handle(&mut self, event: Event, now: Instant) -> Vec<Effect> {
        let mut fx = Vec::new();
        match event {
            Event::Clock(text) => self.on_clock(text, &mut fx),
            Event::Deferred { token, kind } => {
                if token != self.token {
                    debug!(token, current = self.token, ?kind, "stale timer dropped");
                } else {
                    self.on_deferred(kind, now, &mut fx);
                }
            }
            Event::Action(action) => self.on_action(action, now, &mut fx),
            Event::FaceTick(recognition) => self.on_face(recognition, now, &mut fx),
            Event::DistanceTick { distance_cm } => self.on_distance(distance_cm, now, &mut fx),
            Event::MeasureTick(reading) => self.on_measure(reading, now, &mut fx),
            Event::ShotCaptured(outcome) => self.on_shot(outcome, now, &mut fx),
            Event::TrainingProgress { done, total } => self.on_training_progress(done, total, &mut fx),
            Event::TrainingFinished { ok } => self.on_training_finished(ok, now, &mut fx),
            Event::PromilleReady(promille) => self.on_promille(promille, now, &mut fx),
            Event::MeasurementFailed(reason) => self.on_measurement_failed(&reason, now, &mut fx),
            Event::PinSubmitted(found) => self.on_pin(found, now, &mut fx),
            Event::PinCancelled => {
                if self.state == State::PinEntry(PinPhase::AwaitingPin) {
                    info!("pin_cancelled");
                    self.reset_idle(&mut fx);
                }
            }
        }
        fx
    }

    fn transition(&mut self, next: State, now: Instant) {
        if self.state != next {
            info!(from = %self.state, to = %next, employee_id = ?self.session.employee_id, "state_transition");
        }
        self.state = next;
        self.token += 1;
        self.entered_at = Some(now);
    }

    fn show(&mut self, top: impl Into<String>, center: impl Into<String>, tone: Tone, fx: &mut Vec<Effect>) {
        self.screen = Screen {
            top: top.into(),
            center: center.into(),
            tone,
        };
        fx.push(Effect::Show {
            top: self.screen.top.clone(),
            center: self.screen.center.clone(),
            tone,
        });
    }

    fn buttons(primary: Option<&str>, secondary: Option<&str>, fx: &mut Vec<Effect>) {
        fx.push(Effect::Buttons {
            primary: primary.map(str::to_string),
            secondary: secondary.map(str::to_string),
        });
    }

    fn schedule(&self, after: Duration, kind: Deferred, fx: &mut Vec<Effect>) {
        fx.push(Effect::Schedule {
            after,
            token: self.token,
            kind,
        });
    }

    fn paint_idle(&mut self, fx: &mut Vec<Effect>) {
        let top = self.clock.clone();
        self.show(top, IDLE_PROMPT, Tone::Neutral, fx);
        Self::buttons(Some(PIN_LABEL), Some(GUEST_LABEL), fx);
        fx.push(Effect::Progress(None));
    }

    fn reset_idle(&mut self, fx: &mut Vec<Effect>) {
        if self.state != State::Idle {
            info!(from = %self.state, to = "IDLE", "state_transition");
        }
        self.state = State::Idle;
        self.token += 1;
        self.entered_at = None;
        self.session = Session::default();
        self.paint_idle(fx);
    }

    /// Shows a message and returns to IDLE after `delay`.
    fn notice(&mut self, message: &str, tone: Tone, delay: Duration, now: Instant, fx: &mut Vec<Effect>) {
        self.transition(State::Notice, now);
        let top = self.session.employee_name.clone().unwrap_or_default();
        self.show(top, message, tone, fx);
        Self::buttons(None, None, fx);
        fx.push(Effect::Progress(None));
        self.schedule(delay, Deferred::ReturnToIdle, fx);
    }

    fn on_clock(&mut self, text: String, fx: &mut Vec<Effect>) {
        self.clock = text;
        if matches!(self.state, State::Idle | State::Detect) {
            let center = self.screen.center.clone();
            let tone = self.screen.tone;
            let top = self.clock.clone();
            self.show(top, center, tone, fx);
        }
    }

    fn on_deferred(&mut self, kind: Deferred, now: Instant, fx: &mut Vec<Effect>) {
        match (kind, self.state) {
            (Deferred::ReturnToIdle, State::Notice | State::DecidePass | State::DecideDeny) => {
                self.reset_idle(fx)
            }
            (Deferred::CaptureShot, State::PinEntry(PinPhase::Collecting)) => {
                if !self.collection_expired(now, fx) {
                    fx.push(Effect::CaptureShot);
                }
            }
            (Deferred::TrainingExpired, State::PinEntry(PinPhase::Training)) => {
                warn!(employee_id = ?self.session.employee_id, "training_deadline, continuing on PIN");
                fx.push(Effect::Progress(None));
                self.enter_detect_retry(now, fx);
            }
            (Deferred::AnalysisExpired, State::Measure) if self.session.finalized => {
                warn!(employee_id = ?self.session.employee_id, "promille_deadline");
                let delay = self.settings.error_display;
                self.notice("Measurement error", Tone::Error, delay, now, fx);
            }
            (Deferred::RetryExpired, State::Retry) => {
                info!(employee_id = ?self.session.employee_id, "retry_expired, treating as deny");
                self.deny(self.settings.retry_deny_display, now, fx);
            }
            (kind, state) => debug!(?kind, %state, "timer ignored"),
        }
    }

    fn on_action(&mut self, action: UserAction, now: Instant, fx: &mut Vec<Effect>) {
        match (self.state, action) {
            (State::Idle | State::Detect, UserAction::RequestPin | UserAction::Primary) => {
                self.session = Session::default();
                self.epoch += 1;
                self.enter_pin_entry(now, fx);
            }
            (State::Idle | State::Detect, UserAction::Guest | UserAction::Secondary) => {
                self.session = Session::guest();
                self.epoch += 1;
                info!(epoch = self.epoch, "guest_session_started");
                self.enter_identified_wait(now, fx);
            }
            (State::Retry, UserAction::Primary) => {
                info!(employee_id = ?self.session.employee_id, "measure_again");
                self.enter_measure(now, fx);
            }
            (State::Retry, UserAction::Secondary) => {
                self.deny(self.settings.retry_deny_display, now, fx);
            }
            (state, action) => debug!(%state, ?action, "action ignored"),
        }
    }

    // ----- identification -------------------------------------------------

    fn on_face(&mut self, recognition: Recognition, now: Instant, fx: &mut Vec<Effect>) {
        match self.state {
            State::Idle => {
                if recognition.bbox.is_some() {
                    self.session = Session::default();
                    self.epoch += 1;
                    debug!(epoch = self.epoch, "face_appeared");
                    self.enter_detect(now, fx);
                }
            }
            State::Detect => self.detect_tick(recognition, now, fx),
            State::DetectRetry => self.retry_tick(recognition, now, fx),
            State::IdentifiedWait => {
                if let Some(bbox) = recognition.bbox {
                    self.session.last_bbox = Some(bbox);
                    if bbox.span() >= self.settings.face_min_size {
                        self.session.good_face = true;
                    }
                }
                self.wait_expired(now, fx);
            }
            _ => {}
        }
    }

    fn enter_detect(&mut self, now: Instant, fx: &mut Vec<Effect>) {
        self.transition(State::Detect, now);
        let top = self.clock.clone();
        self.show(top, "Recognizing...", Tone::Info, fx);
    }

    fn confidence_tone(&self, confidence: f32) -> Tone {
        if confidence >= self.settings.conf_ok {
            Tone::Success
        } else if confidence >= self.settings.conf_low {
            Tone::Warning
        } else {
            Tone::Error
        }
    }

    fn detect_tick(&mut self, recognition: Recognition, now: Instant, fx: &mut Vec<Effect>) {
        let Some(bbox) = recognition.bbox else {
            let s = &mut self.session;
            s.lost_ticks += 1;
            s.fail_ticks = 0;
            s.reset_stability();
            if s.lost_ticks >= self.settings.detect_lost_ticks {
                info!(lost_ticks = s.lost_ticks, "face_lost");
                self.reset_idle(fx);
            } else {
                let top = self.clock.clone();
                self.show(top, IDLE_PROMPT, Tone::Neutral, fx);
            }
            return;
        };

        self.session.lost_ticks = 0;
        self.session.last_bbox = Some(bbox);
        self.session.last_confidence = recognition.confidence;
        self.session.observe_candidate(recognition.employee_id.as_deref());

        let stable = self.session.stable_ticks >= self.settings.stable_ticks;
        if let Some(id) = recognition.employee_id.as_ref() {
            if stable && recognition.confidence >= self.settings.conf_ok {
                let id = id.clone();
                let name = recognition.display_name.clone().unwrap_or_else(|| id.clone());
                info!(employee_id = %id, confidence = recognition.confidence, "face_identified");
                self.session.identify(&id, &name);
                self.session.fallback_pin = false;
                fx.push(Effect::LearnOnline { employee_id: id, bbox });
                self.enter_identified_wait(now, fx);
                return;
            }
        }

        self.session.fail_ticks += 1;
        if self.session.fail_ticks >= self.settings.detect_fail_limit {
            info!(fail_ticks = self.session.fail_ticks, "recognition_failed, asking for PIN");
            self.enter_pin_entry(now, fx);
            return;
        }

        let label = match recognition.display_name.or(recognition.employee_id) {
            Some(name) => format!("{} ({:.0}%)", name, recognition.confidence),
            None => format!("Recognizing... {:.0}%", recognition.confidence),
        };
        let tone = self.confidence_tone(recognition.confidence);
        let top = self.clock.clone();
        self.show(top, label, tone, fx);
    }

    fn enter_pin_entry(&mut self, now: Instant, fx: &mut Vec<Effect>) {
        self.transition(State::PinEntry(PinPhase::AwaitingPin), now);
        self.show("", "Enter your PIN", Tone::Info, fx);
        Self::buttons(None, None, fx);
        fx.push(Effect::PromptPin);
    }

    fn on_pin(&mut self, found: Option<PinMatch>, now: Instant, fx: &mut Vec<Effect>) {
        if self.state != State::PinEntry(PinPhase::AwaitingPin) {
            return;
        }
        let Some(PinMatch { employee, trained }) = found else {
            warn!("pin_rejected");
            let delay = self.settings.wrong_pin_display;
            self.notice("Wrong PIN", Tone::Error, delay, now, fx);
            return;
        };

        info!(employee_id = %employee.id, trained, "pin_accepted");
        self.session.identify(&employee.id, &employee.name);
        self.session.fallback_pin = true;
        if trained {
            self.enter_detect_retry(now, fx);
        } else {
            self.enter_collecting(now, fx);
        }
    }

    // ----- enrollment -----------------------------------------------------

    fn enter_collecting(&mut self, now: Instant, fx: &mut Vec<Effect>) {
        self.transition(State::PinEntry(PinPhase::Collecting), now);
        self.session.shots.clear();
        self.session.collect_started = Some(now);
        let top = self.session.display_name().to_string();
        self.show(top, "New face: look at the camera", Tone::Info, fx);
        fx.push(Effect::Progress(Some(0.0)));
        fx.push(Effect::CaptureShot);
    }

    fn collection_expired(&mut self, now: Instant, fx: &mut Vec<Effect>) -> bool {
        let started = self.session.collect_started.unwrap_or(now);
        if now.duration_since(started) < self.settings.train_timeout {
            return false;
        }
        warn!(
            employee_id = ?self.session.employee_id,
            shots = self.session.shots.len(),
            "enrollment_timeout"
        );
        let delay = self.settings.error_display;
        self.notice("Enrollment timed out", Tone::Error, delay, now, fx);
        true
    }

    fn on_shot(&mut self, outcome: ShotOutcome, now: Instant, fx: &mut Vec<Effect>) {
        if self.state != State::PinEntry(PinPhase::Collecting) || self.collection_expired(now, fx) {
            return;
        }

        let required = self.settings.train_required_shots;
        let top = self.session.display_name().to_string();
        let hint = match outcome {
            ShotOutcome::Accepted(crop) => {
                self.session.shots.push(crop);
                let taken = self.session.shots.len();
                fx.push(Effect::Progress(Some((taken as f32 / required as f32).min(1.0))));
                if taken >= required {
                    self.enter_training(now, fx);
                } else {
                    self.show(top, format!("Shot {}/{}", taken, required), Tone::Info, fx);
                    self.schedule(self.settings.shot_accepted_delay, Deferred::CaptureShot, fx);
                }
                return;
            }
            ShotOutcome::NoFace => "No face found",
            ShotOutcome::TooSmall { .. } => "Come closer",
            ShotOutcome::PoorQuality { .. } => "Hold still, better light",
        };
        self.show(top, hint, Tone::Warning, fx);
        self.schedule(self.settings.shot_rejected_delay, Deferred::CaptureShot, fx);
    }

    fn enter_training(&mut self, now: Instant, fx: &mut Vec<Effect>) {
        let Some(employee_id) = self.session.employee_id.clone() else {
            self.reset_idle(fx);
            return;
        };
        self.transition(State::PinEntry(PinPhase::Training), now);
        let shots = std::mem::take(&mut self.session.shots);
        info!(employee_id = %employee_id, shots = shots.len(), "enrollment_collected");
        let top = self.session.display_name().to_string();
        self.show(top, "Training...", Tone::Info, fx);
        fx.push(Effect::Progress(Some(0.0)));
        fx.push(Effect::Enroll { employee_id, shots });
        self.schedule(self.settings.training_deadline, Deferred::TrainingExpired, fx);
    }

    fn on_training_progress(&mut self, done: usize, total: usize, fx: &mut Vec<Effect>) {
        if self.state != State::PinEntry(PinPhase::Training) {
            return;
        }
        let fraction = if total == 0 { 1.0 } else { done as f32 / total as f32 };
        fx.push(Effect::Progress(Some(fraction.clamp(0.0, 1.0))));
        let top = self.session.display_name().to_string();
        self.show(top, format!("Training... {}/{}", done, total), Tone::Info, fx);
    }

    fn on_training_finished(&mut self, ok: bool, now: Instant, fx: &mut Vec<Effect>) {
        if self.state != State::PinEntry(PinPhase::Training) {
            return;
        }
        if !ok {
            warn!(employee_id = ?self.session.employee_id, "training_failed, continuing on PIN");
        }
        fx.push(Effect::Progress(None));
        self.enter_detect_retry(now, fx);
    }

    fn enter_detect_retry(&mut self, now: Instant, fx: &mut Vec<Effect>) {
        self.transition(State::DetectRetry, now);
        self.session.retry_ticks = 0;
        let top = self.session.display_name().to_string();
        self.show(top, "Verifying face...", Tone::Info, fx);
        Self::buttons(None, None, fx);
    }

    fn retry_tick(&mut self, recognition: Recognition, now: Instant, fx: &mut Vec<Effect>) {
        self.session.retry_ticks += 1;
        let matched = recognition.employee_id.is_some()
            && recognition.employee_id == self.session.employee_id
            && recognition.confidence >= self.settings.conf_ok;

        if matched {
            if let (Some(id), Some(bbox)) = (self.session.employee_id.clone(), recognition.bbox) {
                info!(employee_id = %id, confidence = recognition.confidence, "face_verified");
                self.session.fallback_pin = false;
                fx.push(Effect::LearnOnline { employee_id: id, bbox });
                self.enter_identified_wait(now, fx);
                return;
            }
        }

        if self.session.retry_ticks >= self.settings.detect_retry_limit {
            info!(employee_id = ?self.session.employee_id, "face_not_verified, continuing on PIN");
            self.session.fallback_pin = true;
            self.enter_identified_wait(now, fx);
            return;
        }

        let tone = self.confidence_tone(recognition.confidence);
        let top = self.session.display_name().to_string();
        self.show(top, format!("Verifying face... {:.0}%", recognition.confidence), tone, fx);
    }

    // ----- measurement ----------------------------------------------------

    fn enter_identified_wait(&mut self, now: Instant, fx: &mut Vec<Effect>) {
        self.transition(State::IdentifiedWait, now);
        // only a face seen while waiting counts
        self.session.good_face = false;
        let top = format!("Hello, {}", self.session.display_name());
        self.show(top, "Come closer to the sensor", Tone::Success, fx);
        Self::buttons(None, None, fx);
        fx.push(Effect::Progress(None));
    }

    fn wait_expired(&mut self, now: Instant, fx: &mut Vec<Effect>) -> bool {
        let entered = self.entered_at.unwrap_or(now);
        if now.duration_since(entered) < self.settings.identified_wait_timeout {
            return false;
        }
        warn!(employee_id = ?self.session.employee_id, "identified_wait_timeout");
        let delay = self.settings.error_display;
        self.notice("Timed out, please start again", Tone::Error, delay, now, fx);
        true
    }

    fn on_distance(&mut self, distance_cm: f64, now: Instant, fx: &mut Vec<Effect>) {
        if self.state != State::IdentifiedWait || self.wait_expired(now, fx) {
            return;
        }
        let s = &self.session;
        let identity_ok = s.good_face || s.fallback_pin || s.is_guest;
        if self.settings.window.contains(distance_cm) && identity_ok {
            self.enter_measure(now, fx);
            return;
        }

        let center = if identity_ok {
            format!("Distance: {}", format_distance(distance_cm))
        } else {
            format!("Distance: {} - look at the camera", format_distance(distance_cm))
        };
        let top = format!("Hello, {}", self.session.display_name());
        self.show(top, center, Tone::Info, fx);
    }

    fn enter_measure(&mut self, now: Instant, fx: &mut Vec<Effect>) {
        self.transition(State::Measure, now);
        self.session.start_measurement(now);
        let top = self.session.display_name().to_string();
        self.show(top, "Blow steadily into the sensor", Tone::Info, fx);
        Self::buttons(None, None, fx);
        fx.push(Effect::Progress(Some(0.0)));
    }

    fn on_measure(&mut self, reading: BlowReading, now: Instant, fx: &mut Vec<Effect>) {
        if self.state != State::Measure || self.session.finalized {
            return;
        }
        let started = self.session.measure_started.unwrap_or(now);
        if now.duration_since(started) >= self.settings.measure_timeout {
            warn!(
                employee_id = ?self.session.employee_id,
                blow_ms = self.session.blow_time.as_millis() as u64,
                "measure_timeout"
            );
            let delay = self.settings.error_display;
            self.notice("No breath detected, please start again", Tone::Error, delay, now, fx);
            return;
        }

        let s = &mut self.session;
        let last = s.last_measure_tick.unwrap_or(now);
        let step = now.duration_since(last).min(MAX_MEASURE_STEP);
        s.last_measure_tick = Some(now);

        let blowing = is_blowing(
            &self.settings.window,
            reading.distance_cm,
            reading.amplitude,
            self.settings.mic_threshold,
        );
        if blowing {
            s.blow_time += step;
            if let Some(raw) = reading.gas_raw {
                s.samples.push(raw);
            }
        }

        let target = self.settings.measure_seconds.as_secs_f32();
        let progress = if target > 0.0 {
            (s.blow_time.as_secs_f32() / target).clamp(0.0, 1.0)
        } else {
            1.0
        };
        fx.push(Effect::Progress(Some(progress)));

        if s.blow_time >= self.settings.measure_seconds {
            s.finalized = true;
            info!(
                employee_id = ?s.employee_id,
                samples = s.samples.len(),
                blow_ms = s.blow_time.as_millis() as u64,
                "measurement_complete"
            );
            fx.push(Effect::ComputePromille {
                samples: s.samples.clone(),
            });
            let top = s.display_name().to_string();
            self.show(top, "Analyzing...", Tone::Info, fx);
            self.schedule(self.settings.analysis_timeout, Deferred::AnalysisExpired, fx);
            return;
        }

        let top = self.session.display_name().to_string();
        if blowing {
            self.show(top, "Keep blowing...", Tone::Success, fx);
        } else if !self.settings.window.contains(reading.distance_cm) {
            let center = format!("Distance: {}", format_distance(reading.distance_cm));
            self.show(top, center, Tone::Warning, fx);
        } else {
            self.show(top, "Blow steadily into the sensor", Tone::Info, fx);
        }
    }

    fn on_measurement_failed(&mut self, reason: &str, now: Instant, fx: &mut Vec<Effect>) {
        if self.state != State::Measure || !self.session.finalized {
            return;
        }
        warn!(employee_id = ?self.session.employee_id, reason, "promille_failed");
        let delay = self.settings.error_display;
        self.notice("Measurement error", Tone::Error, delay, now, fx);
    }

    // ----- decision -------------------------------------------------------

    fn on_promille(&mut self, promille: f64, now: Instant, fx: &mut Vec<Effect>) {
        if self.state != State::Measure || !self.session.finalized {
            debug!(promille, state = %self.state, "promille ignored");
            return;
        }
        self.session.promille = Some(promille);
        let verdict = self.settings.thresholds.decide(promille);
        info!(employee_id = ?self.session.employee_id, promille, ?verdict, "decision");
        match verdict {
            Verdict::Pass => self.pass(promille, now, fx),
            Verdict::Retry => self.enter_retry(promille, now, fx),
            Verdict::Deny => self.deny(self.settings.deny_display, now, fx),
        }
    }

    fn record(&self, result: AccessResult) -> Option<Effect> {
        let s = &self.session;
        if s.is_guest {
            return None;
        }
        let employee_id = s.employee_id.clone()?;
        Some(Effect::Record(AccessRecord {
            employee_name: s.employee_name.clone().unwrap_or_else(|| employee_id.clone()),
            employee_id,
            promille: s.promille.unwrap_or(0.0),
            result,
            source: s.verification_source(),
            fallback_pin: s.fallback_pin,
        }))
    }

    fn pass(&mut self, promille: f64, now: Instant, fx: &mut Vec<Effect>) {
        self.transition(State::DecidePass, now);
        fx.push(Effect::OpenGate);
        if !self.session.is_guest {
            fx.push(Effect::Led(AccessResult::Pass));
        }
        fx.extend(self.record(AccessResult::Pass));
        let top = self.session.display_name().to_string();
        self.show(top, format!("Pass ({:.2} \u{2030})", promille), Tone::Success, fx);
        Self::buttons(None, None, fx);
        fx.push(Effect::Progress(None));
        self.schedule(self.settings.pass_display, Deferred::ReturnToIdle, fx);
    }

    fn enter_retry(&mut self, promille: f64, now: Instant, fx: &mut Vec<Effect>) {
        self.transition(State::Retry, now);
        let top = self.session.display_name().to_string();
        self.show(top, format!("Unclear result ({:.2} \u{2030})", promille), Tone::Warning, fx);
        Self::buttons(Some(RETRY_LABEL), Some(DENY_LABEL), fx);
        fx.push(Effect::Progress(None));
        self.schedule(self.settings.identified_wait_timeout, Deferred::RetryExpired, fx);
    }

    fn deny(&mut self, delay: Duration, now: Instant, fx: &mut Vec<Effect>) {
        self.transition(State::DecideDeny, now);
        if !self.session.is_guest {
            fx.push(Effect::Led(AccessResult::Deny));
        }
        fx.extend(self.record(AccessResult::Deny));
        let top = self.session.display_name().to_string();
        let center = match self.session.promille {
            Some(p) => format!("Access denied ({:.2} \u{2030})", p),
            None => "Access denied".to_string(),
        };
        self.show(top, center, Tone::Error, fx);
        Self::buttons(None, None, fx);
        fx.push(Effect::Progress(None));
        self.schedule(delay, Deferred::ReturnToIdle, fx);
    }
}
