//! Gate relay and status LEDs.
//!
//! Pulses run on a worker thread so the control loop never sleeps on a
//! relay. Commands arrive over a channel; each pin carries its own release
//! deadline, and a repeated pulse on a high pin extends it.

use std::collections::HashMap;
use std::sync::mpsc;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::common::config::GateConfig;
use crate::common::error::Result;
use crate::hardware::{Gpio, Level};

#[derive(Debug)]
enum PinCommand {
    Pulse { pin: u32, duration: Duration },
    Release { pin: u32 },
    Shutdown,
}

struct PulseWorker {
    gpio: Arc<dyn Gpio>,
    pins: Vec<u32>,
    deadlines: HashMap<u32, Instant>,
    rx: mpsc::Receiver<PinCommand>,
}

impl PulseWorker {
    fn drive(&self, pin: u32, level: Level) {
        if let Err(e) = self.gpio.set(pin, level) {
            warn!(pin, ?level, "gpio_write_failed: {}", e);
        }
    }

    fn release_expired(&mut self, now: Instant) {
        let expired: Vec<u32> = self
            .deadlines
            .iter()
            .filter(|(_, &deadline)| deadline <= now)
            .map(|(&pin, _)| pin)
            .collect();
        for pin in expired {
            self.deadlines.remove(&pin);
            self.drive(pin, Level::Low);
            debug!(pin, "pin_released");
        }
    }

    fn run(mut self) {
        info!("gate_worker_started");
        loop {
            let now = Instant::now();
            self.release_expired(now);

            let command = match self.deadlines.values().min() {
                Some(&next) => match self.rx.recv_timeout(next.saturating_duration_since(now)) {
                    Ok(command) => command,
                    Err(mpsc::RecvTimeoutError::Timeout) => continue,
                    Err(mpsc::RecvTimeoutError::Disconnected) => break,
                },
                None => match self.rx.recv() {
                    Ok(command) => command,
                    Err(_) => break,
                },
            };

            match command {
                PinCommand::Pulse { pin, duration } => {
                    self.drive(pin, Level::High);
                    self.deadlines.insert(pin, Instant::now() + duration);
                }
                PinCommand::Release { pin } => {
                    self.deadlines.remove(&pin);
                    self.drive(pin, Level::Low);
                }
                PinCommand::Shutdown => break,
            }
        }

        for &pin in &self.pins {
            self.drive(pin, Level::Low);
        }
        info!("gate_worker_stopped");
    }
}

pub struct GateController {
    tx: mpsc::Sender<PinCommand>,
    worker: Option<JoinHandle<()>>,
    gate_pin: u32,
    led_pass_pin: u32,
    led_deny_pin: u32,
    gate_pulse: Duration,
    led_pulse: Duration,
}

impl GateController {
    /// Drives every output low and starts the pulse worker.
    pub fn start(gpio: Arc<dyn Gpio>, config: &GateConfig) -> Result<Self> {
        let pins = vec![config.gate_gpio, config.led_pass_gpio, config.led_deny_gpio];
        for &pin in &pins {
            if let Err(e) = gpio.set(pin, Level::Low) {
                warn!(pin, "gpio_init_failed: {}", e);
            }
        }

        let (tx, rx) = mpsc::channel();
        let worker = PulseWorker {
            gpio,
            pins,
            deadlines: HashMap::new(),
            rx,
        };
        let handle = std::thread::Builder::new()
            .name("gate-pulse".to_string())
            .spawn(move || worker.run())?;

        Ok(Self {
            tx,
            worker: Some(handle),
            gate_pin: config.gate_gpio,
            led_pass_pin: config.led_pass_gpio,
            led_deny_pin: config.led_deny_gpio,
            gate_pulse: Duration::from_secs_f64(config.gate_pulse_sec),
            led_pulse: Duration::from_secs_f64(config.led_pulse_sec),
        })
    }

    fn send(&self, command: PinCommand) {
        if self.tx.send(command).is_err() {
            warn!("gate worker is gone, output command dropped");
        }
    }

    pub fn open_gate(&self) {
        info!(pin = self.gate_pin, "gate_open_command");
        self.send(PinCommand::Pulse { pin: self.gate_pin, duration: self.gate_pulse });
    }

    pub fn signal_pass(&self) {
        self.send(PinCommand::Release { pin: self.led_deny_pin });
        self.send(PinCommand::Pulse { pin: self.led_pass_pin, duration: self.led_pulse });
    }

    pub fn signal_deny(&self) {
        self.send(PinCommand::Release { pin: self.led_pass_pin });
        self.send(PinCommand::Pulse { pin: self.led_deny_pin, duration: self.led_pulse });
    }

    /// Drives every output low and stops the worker.
    pub fn shutdown(&mut self) {
        self.send(PinCommand::Shutdown);
        if let Some(handle) = self.worker.take() {
            if handle.join().is_err() {
                warn!("gate worker panicked");
            }
        }
    }
}

impl Drop for GateController {
    fn drop(&mut self) {
        if self.worker.is_some() {
            self.shutdown();
        }
    }
}
