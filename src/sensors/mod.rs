//! Gas, distance and microphone readings over a shared ADC.

pub mod distance;
pub mod gas;
pub mod microphone;

use crate::common::error::Result;

pub use distance::{DistanceSensor, DistanceWindow};
pub use gas::{promille_from_mean, GasSensor};
pub use microphone::{MicBurst, Microphone};

/// Largest code a 10-bit converter produces.
pub const ADC_MAX: u16 = 1023;

/// Single-channel reads from a 10-bit ADC.
pub trait Adc: Send + Sync {
    fn read_channel(&self, channel: u8) -> Result<u16>;
}

/// In range and loud enough counts as blowing.
pub fn is_blowing(window: &DistanceWindow, distance_cm: f64, amplitude: u16, mic_threshold: u16) -> bool {
    window.contains(distance_cm) && amplitude >= mic_threshold
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blowing_requires_range_and_amplitude() {
        let window = DistanceWindow::new(8.0, 20.0);
        assert!(is_blowing(&window, 12.0, 200, 150));
        assert!(!is_blowing(&window, 12.0, 149, 150));
        assert!(!is_blowing(&window, 45.0, 400, 150));
        assert!(!is_blowing(&window, f64::INFINITY, 400, 150));
    }
}
