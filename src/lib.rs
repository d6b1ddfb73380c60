// Core modules
pub mod common;
pub mod core;
pub mod storage;
pub mod sensors;
pub mod camera;
pub mod hardware;
pub mod journal;
pub mod fsm;
pub mod runtime;
pub mod cli;

// Re-export commonly used types
pub use common::{Config, DataLayout, KioskError, Result};
pub use core::{DetectorChain, FaceBox, FaceEngine, Recognition};
pub use fsm::{AccessFsm, Effect, Event, State};
pub use journal::{AccessResult, EventLogger, LogEntry};
pub use runtime::Kiosk;
pub use storage::{DescriptorStore, Employee, EmployeeRegistry};
