use std::sync::Arc;

use crate::sensors::{Adc, ADC_MAX};

const VREF: f64 = 3.3;
const FIT_NUMERATOR: f64 = 27.86;
const FIT_OFFSET: f64 = 0.42;
const MAX_RANGE_CM: f64 = 80.0;

/// IR rangefinder fit: code -> volts -> cm. Anything outside the sensor's
/// useful range is `INFINITY`.
pub fn code_to_cm(code: u16) -> f64 {
    let volts = code as f64 / ADC_MAX as f64 * VREF;
    let denom = volts - FIT_OFFSET;
    if denom <= 0.0 {
        return f64::INFINITY;
    }
    let cm = FIT_NUMERATOR / denom;
    if cm < 0.0 || cm > MAX_RANGE_CM {
        f64::INFINITY
    } else {
        cm
    }
}

pub fn format_distance(cm: f64) -> String {
    if cm.is_infinite() || cm.is_nan() {
        "no reading".to_string()
    } else if cm > MAX_RANGE_CM {
        ">80 cm".to_string()
    } else {
        format!("{:.0} cm", cm)
    }
}

/// Inclusive distance gate for measurement.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DistanceWindow {
    pub min_cm: f64,
    pub max_cm: f64,
}

impl DistanceWindow {
    pub fn new(min_cm: f64, max_cm: f64) -> Self {
        Self { min_cm, max_cm }
    }

    pub fn contains(&self, cm: f64) -> bool {
        cm.is_finite() && cm >= self.min_cm && cm <= self.max_cm
    }
}

#[derive(Clone)]
pub struct DistanceSensor {
    adc: Arc<dyn Adc>,
    channel: u8,
}

impl DistanceSensor {
    pub fn new(adc: Arc<dyn Adc>, channel: u8) -> Self {
        Self { adc, channel }
    }

    /// Never fails; a failed read is reported as out of range.
    pub fn read_cm(&self) -> f64 {
        match self.adc.read_channel(self.channel) {
            Ok(code) => code_to_cm(code),
            Err(e) => {
                tracing::debug!("distance read failed: {}", e);
                f64::INFINITY
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sensors::fake::ScriptedAdc;

    #[test]
    fn test_low_voltage_is_infinite() {
        assert!(code_to_cm(0).is_infinite());
        // 130/1023*3.3 = 0.419 V, just below the offset
        assert!(code_to_cm(130).is_infinite());
    }

    #[test]
    fn test_far_is_infinite() {
        // ~0.76 V -> ~82 cm
        assert!(code_to_cm(236).is_infinite());
    }

    #[test]
    fn test_close_range() {
        // 500/1023*3.3 = 1.613 V -> 27.86/1.193 = 23.35 cm
        let cm = code_to_cm(500);
        assert!((cm - 23.35).abs() < 0.05, "{}", cm);
        let nearer = code_to_cm(700);
        assert!(nearer < cm);
    }

    #[test]
    fn test_window_is_inclusive() {
        let window = DistanceWindow::new(8.0, 20.0);
        assert!(window.contains(8.0));
        assert!(window.contains(20.0));
        assert!(!window.contains(20.01));
        assert!(!window.contains(f64::INFINITY));
    }

    #[test]
    fn test_read_failure_is_out_of_range() {
        let sensor = DistanceSensor::new(Arc::new(ScriptedAdc::default()), 1);
        assert!(sensor.read_cm().is_infinite());
    }

    #[test]
    fn test_format_distance() {
        assert_eq!(format_distance(f64::INFINITY), "no reading");
        assert_eq!(format_distance(95.0), ">80 cm");
        assert_eq!(format_distance(12.4), "12 cm");
    }
}
