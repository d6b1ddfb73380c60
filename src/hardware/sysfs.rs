//! Linux sysfs adapters: the MCP3008 IIO driver for the ADC and the legacy
//! `/sys/class/gpio` interface for outputs.

use std::collections::HashSet;
use std::fs;
use std::path::PathBuf;

use parking_lot::Mutex;

use crate::common::error::{KioskError, Result};
use crate::hardware::{Gpio, Level};
use crate::sensors::{Adc, ADC_MAX};

pub struct IioAdc {
    device: PathBuf,
}

impl IioAdc {
    pub fn new(device: impl Into<PathBuf>) -> Self {
        Self { device: device.into() }
    }
}

impl Adc for IioAdc {
    fn read_channel(&self, channel: u8) -> Result<u16> {
        let path = self.device.join(format!("in_voltage{}_raw", channel));
        let raw = fs::read_to_string(&path)
            .map_err(|e| KioskError::Sensor(format!("{}: {}", path.display(), e)))?;
        let value: u16 = raw
            .trim()
            .parse()
            .map_err(|e| KioskError::Sensor(format!("{}: bad reading {:?}: {}", path.display(), raw.trim(), e)))?;
        if value > ADC_MAX {
            return Err(KioskError::Sensor(format!(
                "channel {} reading {} exceeds 10-bit range", channel, value
            )));
        }
        Ok(value)
    }
}

pub struct SysfsGpio {
    root: PathBuf,
    exported: Mutex<HashSet<u32>>,
}

impl SysfsGpio {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            exported: Mutex::new(HashSet::new()),
        }
    }

    fn ensure_output(&self, pin: u32) -> Result<PathBuf> {
        let pin_dir = self.root.join(format!("gpio{}", pin));
        let mut exported = self.exported.lock();
        if exported.contains(&pin) {
            return Ok(pin_dir);
        }

        if !pin_dir.exists() {
            fs::write(self.root.join("export"), pin.to_string())
                .map_err(|e| KioskError::Gpio(format!("export {}: {}", pin, e)))?;
        }
        if !pin_dir.exists() {
            return Err(KioskError::Gpio(format!("gpio{} did not appear after export", pin)));
        }
        fs::write(pin_dir.join("direction"), "out")
            .map_err(|e| KioskError::Gpio(format!("direction {}: {}", pin, e)))?;

        exported.insert(pin);
        Ok(pin_dir)
    }
}

impl Gpio for SysfsGpio {
    fn set(&self, pin: u32, level: Level) -> Result<()> {
        let pin_dir = self.ensure_output(pin)?;
        let value = match level {
            Level::High => "1",
            Level::Low => "0",
        };
        fs::write(pin_dir.join("value"), value)
            .map_err(|e| KioskError::Gpio(format!("value {}: {}", pin, e)))
    }
}
