//! Commands behind the `alcogate` binary.

pub mod console;

use std::sync::Arc;

use tracing::{info, warn};

use crate::camera::SnapshotCamera;
use crate::common::config::Config;
use crate::common::error::Result;
use crate::common::paths::DataLayout;
use crate::core::engine::FaceEngine;
use crate::hardware::{IioAdc, SysfsGpio};
use crate::journal::{EventLogger, HttpSink, RemoteMirror};
use crate::runtime::{Collaborators, Kiosk};
use crate::sensors::GasSensor;
use crate::storage::{DescriptorStore, EmployeeRegistry};

pub use console::{RawTerminal, TerminalDisplay, TerminalKeypad};

/// Data directories, registry and descriptor store, ready for use.
pub struct Storage {
    pub layout: DataLayout,
    pub registry: Arc<EmployeeRegistry>,
    pub store: DescriptorStore,
}

pub fn open_storage(config: &Config, dev: bool) -> Result<Storage> {
    let layout = DataLayout::resolve(&config.storage, dev)?;
    layout.ensure()?;
    info!("Data directory: {}", layout.data_dir.display());

    let registry = Arc::new(EmployeeRegistry::new(layout.employees_json.clone()));
    if let Some(bootstrap) = &config.bootstrap {
        if registry.ensure_bootstrap(bootstrap)? {
            info!(employee_id = %bootstrap.id, "bootstrap employee added");
        }
    }
    let store = DescriptorStore::new(&layout);
    Ok(Storage { layout, registry, store })
}

fn remote_mirror(config: &Config) -> Option<RemoteMirror> {
    if !config.remote.enabled {
        return None;
    }
    let started = HttpSink::new(&config.remote).and_then(|sink| RemoteMirror::start(Box::new(sink)));
    match started {
        Ok(mirror) => Some(mirror),
        Err(e) => {
            warn!(error = %e, "remote log disabled");
            None
        }
    }
}

/// Runs the kiosk on the terminal until `q`.
pub fn run_kiosk(config: &Config, dev: bool) -> Result<()> {
    let storage = open_storage(config, dev)?;
    let engine = Arc::new(FaceEngine::from_config(config, storage.store));
    let logger = EventLogger::new(&storage.layout, remote_mirror(config));

    let parts = Collaborators {
        adc: Arc::new(IioAdc::new(&config.sensors.adc_device)),
        gpio: Arc::new(SysfsGpio::new(&config.gate.gpio_root)),
        camera: Arc::new(SnapshotCamera::new(&config.camera.frame_path)),
        display: TerminalDisplay::new(),
        keypad: TerminalKeypad,
    };
    let mut kiosk = Kiosk::new(config, engine, storage.registry, logger, parts)?;

    let _raw = RawTerminal::enter()?;
    kiosk.run()
}

/// Rebuilds every descriptor set from stored crops.
pub fn reindex(config: &Config, dev: bool) -> Result<()> {
    let storage = open_storage(config, dev)?;
    let engine = FaceEngine::from_config(config, storage.store);
    let summary = engine.reindex(|done, total| println!("  [{}/{}]", done, total))?;
    println!(
        "Re-indexed {} employees: {} descriptor batches, {} crops skipped",
        summary.employees, summary.batches, summary.skipped_crops
    );
    Ok(())
}

/// Takes a gas baseline and prints it.
pub fn calibrate(config: &Config) -> Result<()> {
    let adc = Arc::new(IioAdc::new(&config.sensors.adc_device));
    let gas = GasSensor::new(adc, &config.sensors);
    println!("Calibrating with {} samples, keep the sensor in clean air...", config.sensors.baseline_samples);
    let baseline = gas.calibrate()?;
    println!("Baseline: {:.1}", baseline);
    Ok(())
}
