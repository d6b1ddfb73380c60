use std::collections::VecDeque;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Local;
use image::{DynamicImage, GrayImage};
use tracing::{debug, error, info, warn};

use crate::camera::FrameSource;
use crate::common::config::Config;
use crate::common::error::Result;
use crate::core::detector::FaceBox;
use crate::core::engine::{FaceEngine, Recognition, ShotOutcome};
use crate::fsm::{
    AccessFsm, AccessRecord, BlowReading, Effect, Event, FsmSettings, PinMatch, State, TickKind,
};
use crate::hardware::{GateController, Gpio};
use crate::journal::{AccessResult, EventLogger, LogEntry};
use crate::runtime::schedule::{TickSchedule, Timers};
use crate::runtime::{Command, Display, Keypad};
use crate::sensors::{Adc, DistanceSensor, GasSensor, Microphone};
use crate::storage::registry::EmployeeRegistry;

/// Upper bound on one loop sleep, so keys stay responsive.
const INPUT_POLL: Duration = Duration::from_millis(50);

/// Results handed back from background workers.
#[derive(Debug)]
pub enum LoopEvent {
    Calibrated(std::result::Result<f64, String>),
    TrainingProgress { done: usize, total: usize },
    TrainingFinished { ok: bool },
    Promille(std::result::Result<f64, String>),
}

/// Hardware capabilities and operator terminal.
pub struct Collaborators<D, K> {
    pub adc: Arc<dyn Adc>,
    pub gpio: Arc<dyn Gpio>,
    pub camera: Arc<dyn FrameSource>,
    pub display: D,
    pub keypad: K,
}

pub struct Kiosk<D: Display, K: Keypad> {
    fsm: AccessFsm,
    engine: Arc<FaceEngine>,
    registry: Arc<EmployeeRegistry>,
    logger: EventLogger,
    camera: Arc<dyn FrameSource>,
    gas: GasSensor,
    distance: DistanceSensor,
    mic: Microphone,
    gate: GateController,
    display: D,
    keypad: K,
    timers: Timers,
    ticks: TickSchedule,
    tx: Sender<LoopEvent>,
    rx: Receiver<LoopEvent>,
    calibrated: bool,
    calibrating: bool,
    last_frame: Option<DynamicImage>,
}

impl<D: Display, K: Keypad> Kiosk<D, K> {
    pub fn new(
        config: &Config,
        engine: Arc<FaceEngine>,
        registry: Arc<EmployeeRegistry>,
        logger: EventLogger,
        parts: Collaborators<D, K>,
    ) -> Result<Self> {
        let sensors = &config.sensors;
        let gate = GateController::start(parts.gpio, &config.gate)?;
        let (tx, rx) = mpsc::channel();

        Ok(Self {
            fsm: AccessFsm::new(FsmSettings::from_config(config)),
            engine,
            registry,
            logger,
            camera: parts.camera,
            gas: GasSensor::new(parts.adc.clone(), sensors),
            distance: DistanceSensor::new(parts.adc.clone(), sensors.distance_channel),
            mic: Microphone::new(parts.adc, sensors.mic_channel, sensors.mic_amp_samples),
            gate,
            display: parts.display,
            keypad: parts.keypad,
            timers: Timers::new(),
            ticks: TickSchedule::from_config(config),
            tx,
            rx,
            calibrated: false,
            calibrating: false,
            last_frame: None,
        })
    }

    pub fn state(&self) -> State {
        self.fsm.state()
    }

    pub fn fsm(&self) -> &AccessFsm {
        &self.fsm
    }

    pub fn is_calibrated(&self) -> bool {
        self.calibrated
    }

    /// Runs until the operator quits. Outputs are driven low on the way out.
    pub fn run(&mut self) -> Result<()> {
        info!("kiosk_started");
        let effects = self.fsm.start();
        self.apply_all(effects);
        self.start_calibration();

        loop {
            while let Ok(event) = self.rx.try_recv() {
                self.on_loop_event(event);
            }

            match self.keypad.poll() {
                Some(Command::Quit) => break,
                Some(Command::Recalibrate) => self.start_calibration(),
                Some(Command::Action(action)) => self.dispatch(Event::Action(action)),
                None => {}
            }

            if self.calibrated {
                self.run_due(Instant::now());
            }

            let now = Instant::now();
            let wait = [self.timers.next_due(), self.ticks.next_due()]
                .into_iter()
                .flatten()
                .min()
                .map_or(INPUT_POLL, |due| due.saturating_duration_since(now).min(INPUT_POLL));
            match self.rx.recv_timeout(wait) {
                Ok(event) => self.on_loop_event(event),
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => {
                    error!("worker channel closed");
                    break;
                }
            }
        }

        self.shutdown();
        Ok(())
    }

    fn run_due(&mut self, now: Instant) {
        while let Some((token, kind)) = self.timers.pop_due(now) {
            self.dispatch(Event::Deferred { token, kind });
        }
        for kind in self.ticks.due(now) {
            // an earlier tick this round may have changed state
            if !self.fsm.state().ticks().contains(&kind) {
                continue;
            }
            if let Some(event) = self.tick(kind) {
                self.dispatch(event);
            }
        }
    }

    pub fn shutdown(&mut self) {
        info!("kiosk_stopping");
        self.gate.shutdown();
        self.logger.shutdown();
    }

    /// Feeds one event through the state machine, including every event the
    /// resulting effects produce synchronously.
    pub fn dispatch(&mut self, event: Event) {
        let mut queue = VecDeque::from([event]);
        while let Some(event) = queue.pop_front() {
            let effects = self.fsm.handle(event, Instant::now());
            for effect in effects {
                if let Some(follow_up) = self.apply(effect) {
                    queue.push_back(follow_up);
                }
            }
        }
        self.ticks.sync(self.fsm.state().ticks(), Instant::now());
    }

    fn apply_all(&mut self, effects: Vec<Effect>) {
        for effect in effects {
            if let Some(follow_up) = self.apply(effect) {
                self.dispatch(follow_up);
            }
        }
        self.ticks.sync(self.fsm.state().ticks(), Instant::now());
    }

    pub fn on_loop_event(&mut self, event: LoopEvent) {
        match event {
            LoopEvent::Calibrated(Ok(baseline)) => {
                self.calibrating = false;
                if !self.calibrated {
                    info!(baseline, "calibration complete, starting ticks");
                }
                self.calibrated = true;
                self.ticks.sync(self.fsm.state().ticks(), Instant::now());
            }
            LoopEvent::Calibrated(Err(e)) => {
                self.calibrating = false;
                // promille falls back to adopting the first sample
                warn!(error = %e, "calibration failed");
                self.calibrated = true;
            }
            LoopEvent::TrainingProgress { done, total } => {
                self.dispatch(Event::TrainingProgress { done, total })
            }
            LoopEvent::TrainingFinished { ok } => self.dispatch(Event::TrainingFinished { ok }),
            LoopEvent::Promille(Ok(promille)) => self.dispatch(Event::PromilleReady(promille)),
            LoopEvent::Promille(Err(e)) => self.dispatch(Event::MeasurementFailed(e)),
        }
    }

    // ----- ticks ----------------------------------------------------------

    fn frame(&mut self) -> Option<DynamicImage> {
        match self.camera.frame() {
            Ok(frame) => {
                self.last_frame = Some(frame.clone());
                Some(frame)
            }
            Err(e) => {
                debug!(error = %e, "frame unavailable");
                None
            }
        }
    }

    fn tick(&mut self, kind: TickKind) -> Option<Event> {
        match kind {
            TickKind::Camera => {
                let frame = self.frame()?;
                Some(Event::FaceTick(Recognition {
                    bbox: self.engine.detect_largest(&frame),
                    ..Recognition::default()
                }))
            }
            TickKind::Face => {
                let frame = self.frame()?;
                let mut recognition = match (self.fsm.state(), &self.fsm.session().employee_id) {
                    (State::DetectRetry, Some(target)) => self.engine.verify(&frame, target),
                    _ => self.engine.recognize(&frame),
                };
                if let Some(id) = &recognition.employee_id {
                    recognition.display_name = self.registry.by_id(id).map(|e| e.name);
                }
                Some(Event::FaceTick(recognition))
            }
            TickKind::Clock => Some(Event::Clock(Local::now().format("%H:%M:%S").to_string())),
            TickKind::Distance => Some(Event::DistanceTick {
                distance_cm: self.distance.read_cm(),
            }),
            TickKind::Measure => {
                let distance_cm = self.distance.read_cm();
                let burst = self.mic.burst();
                let gas_raw = match self.gas.read_raw() {
                    Ok(raw) => Some(raw),
                    Err(e) => {
                        debug!(error = %e, "gas read failed");
                        None
                    }
                };
                Some(Event::MeasureTick(BlowReading {
                    distance_cm,
                    amplitude: burst.amplitude,
                    gas_raw,
                }))
            }
        }
    }

    // ----- effects --------------------------------------------------------

    fn apply(&mut self, effect: Effect) -> Option<Event> {
        match effect {
            Effect::Show { top, center, tone } => self.display.show(&top, &center, tone),
            Effect::Buttons { primary, secondary } => {
                self.display.show_buttons(primary.as_deref(), secondary.as_deref())
            }
            Effect::Progress(fraction) => self.display.progress(fraction),
            Effect::Schedule { after, token, kind } => {
                self.timers.schedule(Instant::now(), after, token, kind)
            }
            Effect::PromptPin => return Some(self.prompt_pin()),
            Effect::CaptureShot => {
                let outcome = match self.frame() {
                    Some(frame) => self.engine.capture_shot(&frame),
                    None => ShotOutcome::NoFace,
                };
                return Some(Event::ShotCaptured(outcome));
            }
            Effect::Enroll { employee_id, shots } => self.spawn_training(employee_id, shots),
            Effect::LearnOnline { employee_id, bbox } => self.spawn_learning(employee_id, bbox),
            Effect::ComputePromille { samples } => self.spawn_promille(samples),
            Effect::OpenGate => self.gate.open_gate(),
            Effect::Led(AccessResult::Pass) => self.gate.signal_pass(),
            Effect::Led(AccessResult::Deny) => self.gate.signal_deny(),
            Effect::Record(record) => self.record(record),
        }
        None
    }

    fn prompt_pin(&mut self) -> Event {
        let Some(pin) = self.keypad.request_pin() else {
            return Event::PinCancelled;
        };
        let found = self.registry.by_pin(pin.trim()).map(|employee| PinMatch {
            trained: self.engine.is_trained(&employee.id),
            employee,
        });
        Event::PinSubmitted(found)
    }

    fn record(&mut self, record: AccessRecord) {
        let pin = self
            .registry
            .by_id(&record.employee_id)
            .map(|e| e.pin)
            .unwrap_or_default();
        let entry = LogEntry {
            timestamp: Local::now(),
            employee_id: record.employee_id,
            employee_name: record.employee_name,
            employee_pin: pin,
            promille: record.promille,
            decision: record.result,
            verification_source: record.source,
            fallback_pin: record.fallback_pin,
        };
        if let Err(e) = self.logger.record(&entry) {
            error!(error = %e, "access log incomplete");
        }
    }

    // ----- workers --------------------------------------------------------

    pub fn start_calibration(&mut self) {
        if self.calibrating {
            debug!("calibration already running");
            return;
        }
        self.calibrating = true;
        let gas = self.gas.clone();
        let tx = self.tx.clone();
        let spawned = std::thread::Builder::new()
            .name("gas-calibration".to_string())
            .spawn(move || {
                let result = gas.calibrate().map_err(|e| e.to_string());
                let _ = tx.send(LoopEvent::Calibrated(result));
            });
        if let Err(e) = spawned {
            error!(error = %e, "failed to start calibration worker");
            self.calibrating = false;
            self.calibrated = true;
        }
    }

    fn spawn_training(&mut self, employee_id: String, shots: Vec<GrayImage>) {
        let engine = self.engine.clone();
        let tx = self.tx.clone();
        let spawned = std::thread::Builder::new()
            .name("face-training".to_string())
            .spawn(move || {
                let progress_tx = tx.clone();
                let result = engine.enroll(&employee_id, &shots).and_then(|_| {
                    engine.reindex(|done, total| {
                        let _ = progress_tx.send(LoopEvent::TrainingProgress { done, total });
                    })
                });
                let ok = match result {
                    Ok(summary) => {
                        info!(employee_id = %employee_id, batches = summary.batches, "training_complete");
                        true
                    }
                    Err(e) => {
                        error!(employee_id = %employee_id, error = %e, "training_failed");
                        false
                    }
                };
                let _ = tx.send(LoopEvent::TrainingFinished { ok });
            });
        if let Err(e) = spawned {
            error!(error = %e, "failed to start training worker");
            self.dispatch(Event::TrainingFinished { ok: false });
        }
    }

    fn spawn_learning(&mut self, employee_id: String, bbox: FaceBox) {
        let Some(frame) = self.last_frame.clone() else {
            debug!(employee_id = %employee_id, "no frame for online learning");
            return;
        };
        let engine = self.engine.clone();
        let spawned = std::thread::Builder::new()
            .name("online-learning".to_string())
            .spawn(move || {
                if let Err(e) = engine.learn_online(&employee_id, &frame, &bbox) {
                    warn!(employee_id = %employee_id, error = %e, "online learning failed");
                }
            });
        if let Err(e) = spawned {
            warn!(error = %e, "failed to start online learning worker");
        }
    }

    fn spawn_promille(&mut self, samples: Vec<u16>) {
        let gas = self.gas.clone();
        let tx = self.tx.clone();
        let spawned = std::thread::Builder::new()
            .name("promille".to_string())
            .spawn(move || {
                let result = gas.promille_from_samples(&samples).map_err(|e| e.to_string());
                let _ = tx.send(LoopEvent::Promille(result));
            });
        if let Err(e) = spawned {
            error!(error = %e, "failed to start promille worker");
            self.dispatch(Event::MeasurementFailed(e.to_string()));
        }
    }
}
