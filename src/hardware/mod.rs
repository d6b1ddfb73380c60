pub mod gate;
pub mod sysfs;

use crate::common::error::Result;

pub use gate::GateController;
pub use sysfs::{IioAdc, SysfsGpio};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Level {
    Low,
    High,
}

/// Digital output pins, addressed by BCM number.
pub trait Gpio: Send + Sync {
    fn set(&self, pin: u32, level: Level) -> Result<()>;
}
